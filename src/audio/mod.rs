//! # Audio Module
//!
//! Everything between the bytes of an `audio-chunk` payload and the samples
//! the model sees.
//!
//! ## Key Components:
//! - **Frame Assembler**: byte accumulator for one utterance plus its announced format
//! - **Session**: per-connection state built around the assembler
//! - **Processor**: WAV packaging, decoding, downmixing and resampling

pub mod buffer; // Utterance byte accumulator
pub mod processor; // WAV packaging and sample conversion
pub mod session; // Per-connection state

pub use buffer::{AudioFormat, AudioFrameAssembler};
pub use session::Session;
