//! # Session Handler
//!
//! Turns the event stream of one connection into transcription calls and
//! reply events. One handler exists per connection and handles its events
//! strictly in arrival order.
//!
//! ## Event Handling:
//! - **describe**: reply with the info document
//! - **audio-start**: start a new utterance with the announced format
//! - **audio-chunk**: append the payload to the utterance
//! - **audio-stop**: transcribe the utterance (no reply when it is empty)
//! - **transcribe**: optional language override; transcribe inline audio if present
//! - **ping**: reply pong
//! - anything else: ignored
//!
//! ## Failure Policy:
//! Loading or inference failures never end the session. They are logged and
//! the client receives a transcript with empty text.

use crate::audio::buffer::AudioFormat;
use crate::audio::processor::write_wav_tempfile;
use crate::audio::session::Session;
use crate::config::AppConfig;
use crate::error::{WyomingError, WyomingResult};
use crate::protocol::event::Event;
use crate::protocol::info::Info;
use crate::protocol::messages::{
    AudioChunk, AudioStart, AudioStop, Describe, Eventable, Ping, Pong, Transcribe, Transcript,
};
use crate::state::AppState;
use crate::transcription::backend::{DecodeOptions, EngineLoader};
use crate::transcription::guard::{EngineLocation, ModelGuard};
use crate::transcription::registry::is_known_language;
use crate::transcription::worker::WorkerContext;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Server-wide values every new session starts from.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub language: Option<String>,
    pub beam_size: usize,
}

/// Everything sessions share. Built once at startup and handed to every
/// connection behind an `Arc`.
pub struct ServerContext {
    pub info: Info,
    pub guard: ModelGuard,
    pub worker: WorkerContext,
    pub defaults: SessionDefaults,
    /// Directory WAV files are packaged in
    pub temp_dir: PathBuf,
    pub state: AppState,
}

impl ServerContext {
    /// Wire up the guard, worker and info document from configuration.
    pub fn from_config(config: &AppConfig, loader: Arc<dyn EngineLoader>) -> Self {
        let worker = WorkerContext::new(config.performance.max_concurrent_inference);
        let location = EngineLocation {
            model_name: config.model.name.clone(),
            model_dir: config.model.cache_dir.clone(),
            data_dirs: config.model.data_dirs.clone(),
        };

        Self {
            info: Info::for_model(&config.model.name),
            guard: ModelGuard::new(location, loader, worker.clone()),
            worker,
            defaults: SessionDefaults {
                language: config.transcription.language.clone(),
                beam_size: config.transcription.beam_size,
            },
            temp_dir: config
                .performance
                .temp_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            state: AppState::new(config.clone()),
        }
    }
}

/// Per-connection event handler.
pub struct SessionHandler {
    ctx: Arc<ServerContext>,
    session: Session,
}

impl SessionHandler {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        let session = Session::new(ctx.defaults.language.clone(), ctx.defaults.beam_size);
        ctx.state.session_opened();
        Self { ctx, session }
    }

    pub fn session_id(&self) -> Uuid {
        self.session.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Handle one inbound event and return the reply to send, if any.
    pub async fn handle_event(&mut self, event: Event) -> Option<Event> {
        let event_type = event.event_type.as_str();

        if Describe::is_type(event_type) {
            return Some(self.ctx.info.to_event());
        }

        if AudioStart::is_type(event_type) {
            match AudioStart::from_event(&event) {
                Ok(start) => {
                    tracing::debug!(format = %start.format(), "Audio start");
                    self.session.start_utterance(start.format());
                }
                Err(e) => {
                    // Earlier audio must not leak into the next utterance
                    self.session.start_utterance(self.session.format());
                    tracing::warn!(error = %e, "Malformed audio-start, keeping previous format");
                }
            }
            return None;
        }

        if AudioChunk::is_type(event_type) {
            if let Some(payload) = &event.payload {
                self.session.push_audio(payload);
            }
            return None;
        }

        if AudioStop::is_type(event_type) {
            let (audio, format) = self.session.finish_utterance();
            tracing::debug!(bytes = audio.len(), "Audio stop");
            if audio.is_empty() {
                return None;
            }
            let transcript = self.transcribe_or_empty(audio, format).await;
            return Some(transcript.to_event());
        }

        if Transcribe::is_type(event_type) {
            let request = match Transcribe::from_event(&event) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring malformed transcribe");
                    return None;
                }
            };
            match &request.language {
                Some(language) if is_known_language(language) => {
                    tracing::debug!(language = %language, "Language hint updated");
                    self.session.language = Some(language.clone());
                }
                Some(language) => {
                    tracing::warn!(language = %language, "Ignoring unknown language hint");
                }
                None => {}
            }
            let format = request.format_or(self.session.format());
            return match request.audio {
                Some(audio) if !audio.is_empty() => {
                    let transcript = self.transcribe_or_empty(audio, format).await;
                    Some(transcript.to_event())
                }
                _ => None,
            };
        }

        if Ping::is_type(event_type) {
            let text = Ping::from_event(&event).ok().and_then(|ping| ping.text);
            return Some(Pong { text }.to_event());
        }

        tracing::debug!(event_type, "Ignoring unhandled event");
        None
    }

    /// Run the transcription procedure, turning any failure into an empty transcript.
    async fn transcribe_or_empty(&self, audio: Vec<u8>, format: AudioFormat) -> Transcript {
        let start = Instant::now();
        let bytes = audio.len();
        let result = self.transcribe(audio, format).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.ctx.state.record_transcription(bytes, elapsed_ms, result.is_ok());

        match result {
            Ok(transcript) => {
                tracing::info!(
                    bytes,
                    audio_secs = format.duration_secs(bytes),
                    elapsed_ms,
                    chars = transcript.text.len(),
                    "Transcribed utterance"
                );
                tracing::debug!(text = %transcript.text, "Transcript");
                transcript
            }
            Err(e) => {
                tracing::error!(
                    kind = e.kind(),
                    error = %e,
                    bytes,
                    "Transcription failed, sending empty transcript"
                );
                Transcript::empty()
            }
        }
    }

    /// Transcription procedure.
    ///
    /// ## Steps:
    /// 1. Make sure the engine is loaded (`ModelUnavailable` otherwise)
    /// 2. On the worker: package the PCM as a WAV temp file and run the engine
    /// 3. Trim the text; missing text becomes an empty string
    ///
    /// The WAV file is removed when the worker job returns, on success or failure.
    pub async fn transcribe(
        &self,
        audio: Vec<u8>,
        format: AudioFormat,
    ) -> WyomingResult<Transcript> {
        let engine = self.ctx.guard.ensure_loaded().await?;
        let options = DecodeOptions {
            language: self.session.language.clone(),
            beam_size: self.session.beam_size,
        };
        let temp_dir = self.ctx.temp_dir.clone();

        let output = self
            .ctx
            .worker
            .run("transcribe", move || {
                let wav = write_wav_tempfile(&temp_dir, &audio, format)?;
                engine.transcribe(wav.path(), &options)
            })
            .await
            .map_err(|e| WyomingError::Transcription(format!("{:#}", e)))?;

        Ok(Transcript {
            text: output.text.unwrap_or_default().trim().to_string(),
            language: output.language,
        })
    }
}

impl Drop for SessionHandler {
    fn drop(&mut self) {
        self.ctx.state.session_closed();
        tracing::debug!(
            session_id = %self.session.id,
            status = self.session.status().as_str(),
            utterances = self.session.utterances(),
            age_secs = self.session.age_secs(),
            "Session closed"
        );
    }
}
