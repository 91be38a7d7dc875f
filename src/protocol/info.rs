//! The `info` document sent in reply to `describe`.
//!
//! Built once at startup from the configured model and never changes while
//! the server runs.

use crate::error::WyomingResult;
use crate::protocol::event::Event;
use crate::protocol::messages::{data_from, expect_type, parse_data, Eventable};
use crate::transcription::registry::ModelDescriptor;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub name: String,
    pub url: String,
}

/// One model offered by an ASR program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsrModel {
    pub name: String,
    pub description: String,
    pub attribution: Attribution,
    pub installed: bool,
    pub languages: Vec<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// An ASR program and the models it serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsrProgram {
    pub name: String,
    pub description: String,
    pub attribution: Attribution,
    pub installed: bool,
    #[serde(default)]
    pub version: Option<String>,
    pub models: Vec<AsrModel>,
}

/// Capability document advertised to clients.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Info {
    #[serde(default)]
    pub asr: Vec<AsrProgram>,
}

impl Info {
    /// Info for a server that serves exactly one Whisper model.
    pub fn for_model(model_name: &str) -> Self {
        let descriptor = ModelDescriptor::for_name(model_name);

        Self {
            asr: vec![AsrProgram {
                name: "wyoming-whisper".to_string(),
                description: "Whisper speech-to-text on candle".to_string(),
                attribution: Attribution {
                    name: "Hugging Face".to_string(),
                    url: "https://github.com/huggingface/candle".to_string(),
                },
                installed: true,
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
                models: vec![AsrModel {
                    name: descriptor.name,
                    description: descriptor.description,
                    attribution: Attribution {
                        name: "OpenAI".to_string(),
                        url: "https://github.com/openai/whisper".to_string(),
                    },
                    installed: true,
                    languages: descriptor.languages,
                    version: None,
                }],
            }],
        }
    }
}

impl Eventable for Info {
    const EVENT_TYPE: &'static str = "info";

    fn to_event(&self) -> Event {
        Event::new(Self::EVENT_TYPE).with_data(data_from(self))
    }

    fn from_event(event: &Event) -> WyomingResult<Self> {
        expect_type::<Self>(event)?;
        parse_data(event)
    }
}
