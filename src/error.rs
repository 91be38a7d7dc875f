//! # Error Handling
//!
//! Error types shared by the protocol codec, the session handler and the
//! model lifecycle guard.
//!
//! ## Error Categories:
//! - **ModelUnavailable**: the speech engine could not be loaded or built
//! - **Transcription**: the engine failed while decoding one utterance
//! - **Protocol**: a frame on the wire could not be parsed
//! - **Config**: configuration file, environment or CLI values are invalid
//! - **Io**: socket and file-system failures
//!
//! ## Propagation:
//! `ModelUnavailable` and `Transcription` never reach the transport layer.
//! The session handler turns them into an empty transcript. `Protocol` and
//! `Io` end the one connection they happened on.

use std::fmt;

/// Custom error types for the server.
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(WyomingError::Protocol("header is not a JSON object".to_string()));
/// ```
#[derive(Debug)]
pub enum WyomingError {
    /// The inference collaborator is missing, or loading/building the engine failed
    ModelUnavailable(String),

    /// The inference call itself failed (bad audio, engine error)
    Transcription(String),

    /// Malformed frame on the wire
    Protocol(String),

    /// Configuration file, environment variable or CLI problems
    Config(String),

    /// Socket or file-system failure
    Io(std::io::Error),
}

impl WyomingError {
    /// Short machine-readable name, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            WyomingError::ModelUnavailable(_) => "model_unavailable",
            WyomingError::Transcription(_) => "transcription_failed",
            WyomingError::Protocol(_) => "protocol_error",
            WyomingError::Config(_) => "config_error",
            WyomingError::Io(_) => "io_error",
        }
    }
}

impl fmt::Display for WyomingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WyomingError::ModelUnavailable(msg) => write!(f, "Model unavailable: {}", msg),
            WyomingError::Transcription(msg) => write!(f, "Transcription failed: {}", msg),
            WyomingError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            WyomingError::Config(msg) => write!(f, "Configuration error: {}", msg),
            WyomingError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for WyomingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WyomingError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for WyomingError {
    fn from(err: std::io::Error) -> Self {
        WyomingError::Io(err)
    }
}

/// JSON failures only happen while decoding frames, so they are protocol errors.
impl From<serde_json::Error> for WyomingError {
    fn from(err: serde_json::Error) -> Self {
        WyomingError::Protocol(format!("JSON parsing error: {}", err))
    }
}

/// Type alias for Results that use our custom error type.
pub type WyomingResult<T> = Result<T, WyomingError>;
