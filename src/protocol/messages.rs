//! Typed views over [`Event`] for the event types this server understands.

use crate::audio::buffer::AudioFormat;
use crate::error::{WyomingError, WyomingResult};
use crate::protocol::event::Event;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Conversion between a typed message and a raw [`Event`].
pub trait Eventable: Sized {
    const EVENT_TYPE: &'static str;

    fn is_type(event_type: &str) -> bool {
        event_type == Self::EVENT_TYPE
    }

    fn to_event(&self) -> Event;

    fn from_event(event: &Event) -> WyomingResult<Self>;
}

pub(crate) fn data_from<T: Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

pub(crate) fn parse_data<T: DeserializeOwned>(event: &Event) -> WyomingResult<T> {
    serde_json::from_value(Value::Object(event.data.clone())).map_err(|e| {
        WyomingError::Protocol(format!("invalid {} data: {}", event.event_type, e))
    })
}

pub(crate) fn expect_type<T: Eventable>(event: &Event) -> WyomingResult<()> {
    if T::is_type(&event.event_type) {
        Ok(())
    } else {
        Err(WyomingError::Protocol(format!(
            "expected {} event, got {}",
            T::EVENT_TYPE,
            event.event_type
        )))
    }
}

/// Request for the server's capability document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Describe;

impl Eventable for Describe {
    const EVENT_TYPE: &'static str = "describe";

    fn to_event(&self) -> Event {
        Event::new(Self::EVENT_TYPE)
    }

    fn from_event(event: &Event) -> WyomingResult<Self> {
        expect_type::<Self>(event)?;
        Ok(Describe)
    }
}

/// Start of one utterance; carries the PCM format of the chunks that follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioStart {
    pub rate: u32,
    pub width: u16,
    pub channels: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl AudioStart {
    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.rate, self.width, self.channels)
    }
}

impl Eventable for AudioStart {
    const EVENT_TYPE: &'static str = "audio-start";

    fn to_event(&self) -> Event {
        Event::new(Self::EVENT_TYPE).with_data(data_from(self))
    }

    fn from_event(event: &Event) -> WyomingResult<Self> {
        expect_type::<Self>(event)?;
        parse_data(event)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChunkData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    width: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channels: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<u64>,
}

/// A slice of raw PCM belonging to the current utterance.
///
/// The format fields are informational; the session keeps the format
/// announced by [`AudioStart`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioChunk {
    pub rate: Option<u32>,
    pub width: Option<u16>,
    pub channels: Option<u16>,
    pub timestamp: Option<u64>,
    pub audio: Vec<u8>,
}

impl Eventable for AudioChunk {
    const EVENT_TYPE: &'static str = "audio-chunk";

    fn to_event(&self) -> Event {
        let data = ChunkData {
            rate: self.rate,
            width: self.width,
            channels: self.channels,
            timestamp: self.timestamp,
        };
        Event::new(Self::EVENT_TYPE)
            .with_data(data_from(&data))
            .with_payload(self.audio.clone())
    }

    fn from_event(event: &Event) -> WyomingResult<Self> {
        expect_type::<Self>(event)?;
        let data: ChunkData = parse_data(event)?;
        Ok(Self {
            rate: data.rate,
            width: data.width,
            channels: data.channels,
            timestamp: data.timestamp,
            audio: event.payload.clone().unwrap_or_default(),
        })
    }
}

/// End of the current utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AudioStop {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl Eventable for AudioStop {
    const EVENT_TYPE: &'static str = "audio-stop";

    fn to_event(&self) -> Event {
        Event::new(Self::EVENT_TYPE).with_data(data_from(self))
    }

    fn from_event(event: &Event) -> WyomingResult<Self> {
        expect_type::<Self>(event)?;
        parse_data(event)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TranscribeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rate: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    width: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channels: Option<u16>,
}

/// Transcription request.
///
/// `language` overrides the session's hint. `audio` (the event payload)
/// is a complete one-shot utterance; its format defaults to the session's
/// when `rate`/`width`/`channels` are absent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transcribe {
    pub name: Option<String>,
    pub language: Option<String>,
    pub rate: Option<u32>,
    pub width: Option<u16>,
    pub channels: Option<u16>,
    pub audio: Option<Vec<u8>>,
}

impl Transcribe {
    /// Inline audio format, filling missing fields from `fallback`.
    pub fn format_or(&self, fallback: AudioFormat) -> AudioFormat {
        AudioFormat::new(
            self.rate.unwrap_or(fallback.rate),
            self.width.unwrap_or(fallback.width),
            self.channels.unwrap_or(fallback.channels),
        )
    }
}

impl Eventable for Transcribe {
    const EVENT_TYPE: &'static str = "transcribe";

    fn to_event(&self) -> Event {
        let data = TranscribeData {
            name: self.name.clone(),
            language: self.language.clone(),
            rate: self.rate,
            width: self.width,
            channels: self.channels,
        };
        let event = Event::new(Self::EVENT_TYPE).with_data(data_from(&data));
        match &self.audio {
            Some(audio) => event.with_payload(audio.clone()),
            None => event,
        }
    }

    fn from_event(event: &Event) -> WyomingResult<Self> {
        expect_type::<Self>(event)?;
        let data: TranscribeData = parse_data(event)?;
        Ok(Self {
            name: data.name,
            language: data.language.filter(|l| !l.trim().is_empty()),
            rate: data.rate,
            width: data.width,
            channels: data.channels,
            audio: event.payload.clone(),
        })
    }
}

/// Transcription result sent back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transcript {
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Transcript {
    /// Reply used whenever transcription failed.
    pub fn empty() -> Self {
        Self::default()
    }
}

impl Eventable for Transcript {
    const EVENT_TYPE: &'static str = "transcript";

    fn to_event(&self) -> Event {
        Event::new(Self::EVENT_TYPE).with_data(data_from(self))
    }

    fn from_event(event: &Event) -> WyomingResult<Self> {
        expect_type::<Self>(event)?;
        parse_data(event)
    }
}

/// Keep-alive request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Ping {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Eventable for Ping {
    const EVENT_TYPE: &'static str = "ping";

    fn to_event(&self) -> Event {
        Event::new(Self::EVENT_TYPE).with_data(data_from(self))
    }

    fn from_event(event: &Event) -> WyomingResult<Self> {
        expect_type::<Self>(event)?;
        parse_data(event)
    }
}

/// Keep-alive reply; echoes the ping text.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pong {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Eventable for Pong {
    const EVENT_TYPE: &'static str = "pong";

    fn to_event(&self) -> Event {
        Event::new(Self::EVENT_TYPE).with_data(data_from(self))
    }

    fn from_event(event: &Event) -> WyomingResult<Self> {
        expect_type::<Self>(event)?;
        parse_data(event)
    }
}
