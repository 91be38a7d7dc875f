//! # Engine Traits
//!
//! The seam between the server and whatever actually turns audio into text.
//! The server only ever sees these two traits; the candle implementation lives
//! in `model.rs` and tests plug in their own.

use std::path::Path;
use std::sync::Arc;

/// Options forwarded to every transcription call.
///
/// ## Fields:
/// - `language`: ISO 639-1 hint; `None` asks the engine to detect it
/// - `beam_size`: beam width, always set (1 = greedy)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOptions {
    pub language: Option<String>,
    pub beam_size: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            language: None,
            beam_size: 5,
        }
    }
}

/// What the engine hands back. Text may be absent when nothing was recognised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptionOutput {
    pub text: Option<String>,
    pub language: Option<String>,
}

/// A loaded speech-to-text engine.
///
/// Implementations are blocking and are only called from the worker context.
/// One engine is shared by every session, hence `Send + Sync`.
pub trait SpeechEngine: Send + Sync {
    /// Transcribe the WAV file at `audio_file`.
    fn transcribe(
        &self,
        audio_file: &Path,
        options: &DecodeOptions,
    ) -> anyhow::Result<TranscriptionOutput>;

    /// Short description for logs and the health endpoint.
    fn describe(&self) -> String {
        "speech engine".to_string()
    }
}

/// Knows how to read a compiled engine from disk and how to produce one.
pub trait EngineLoader: Send + Sync {
    /// File extension of compiled engines, without the dot.
    fn engine_extension(&self) -> &str {
        "engine"
    }

    /// Load an engine previously written by [`EngineLoader::build_engine`].
    fn load_engine(&self, path: &Path) -> anyhow::Result<Arc<dyn SpeechEngine>>;

    /// Build the engine for `model_name` from scratch, persist it at `path`
    /// and return it ready to use.
    fn build_engine(&self, model_name: &str, path: &Path) -> anyhow::Result<Arc<dyn SpeechEngine>>;
}

#[cfg(test)]
impl std::fmt::Debug for dyn SpeechEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}
