//! # Transcription Module
//!
//! Speech-to-text with Whisper models on candle, behind a small trait seam.
//!
//! ## Key Components:
//! - **Engine traits**: `SpeechEngine` / `EngineLoader`, what the server talks to
//! - **Model Guard**: loads the engine once per process, lazily and race-free
//! - **Worker Context**: runs blocking load and inference off the event loop
//! - **Whisper Engine**: candle implementation, compiled engine files, beam search
//! - **Model Registry**: repo ids, descriptions and languages per model name

pub mod backend; // Engine traits and decode options
pub mod guard; // Lazy one-time engine loading
pub mod mel; // Slaney mel filter bank
pub mod model; // Whisper on candle
pub mod registry; // Model catalog and languages
pub mod worker; // Blocking-pool handoff

pub use backend::{DecodeOptions, EngineLoader, SpeechEngine, TranscriptionOutput};
pub use guard::{EngineLocation, ModelGuard};
pub use model::WhisperLoader;
pub use worker::WorkerContext;
