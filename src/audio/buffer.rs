//! # Audio Frame Assembler
//!
//! Accumulates the raw PCM of one utterance between `audio-start` and
//! `audio-stop` and remembers the format the client announced for it.
//!
//! ## Key Properties:
//! - **Opaque bytes**: chunks are stored exactly as received, no decoding or validation
//! - **Order preserving**: the drained buffer is the concatenation of every chunk in arrival order
//! - **One utterance**: `reset` discards audio left over from an utterance that never stopped

use serde::{Deserialize, Serialize};
use std::fmt;
use std::mem;

/// PCM format of an utterance.
///
/// ## Fields:
/// - `rate`: samples per second per channel
/// - `width`: bytes per sample (2 = 16-bit)
/// - `channels`: interleaved channel count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub rate: u32,
    pub width: u16,
    pub channels: u16,
}

impl AudioFormat {
    pub const fn new(rate: u32, width: u16, channels: u16) -> Self {
        Self {
            rate,
            width,
            channels,
        }
    }

    /// Bytes for one sample across all channels.
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.channels as usize
    }

    /// Duration in seconds of `bytes` bytes of audio in this format.
    pub fn duration_secs(&self, bytes: usize) -> f64 {
        let per_second = self.frame_bytes() as f64 * self.rate as f64;
        if per_second == 0.0 {
            0.0
        } else {
            bytes as f64 / per_second
        }
    }
}

/// 16 kHz, 16-bit, mono: what Whisper consumes and what a session assumes
/// until the client says otherwise.
impl Default for AudioFormat {
    fn default() -> Self {
        Self::new(16000, 2, 1)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}Hz/{}B/{}ch", self.rate, self.width, self.channels)
    }
}

/// Byte accumulator for the utterance in progress.
#[derive(Debug, Default)]
pub struct AudioFrameAssembler {
    buffer: Vec<u8>,
    format: AudioFormat,
}

impl AudioFrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a new utterance: empty the buffer and record its format.
    pub fn reset(&mut self, format: AudioFormat) {
        self.buffer.clear();
        self.format = format;
    }

    /// Append one chunk. Empty chunks are accepted and change nothing.
    pub fn append(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Take the accumulated bytes, leaving the buffer empty.
    ///
    /// The format is kept so a later inline `transcribe` can fall back to it.
    pub fn drain(&mut self) -> Vec<u8> {
        mem::take(&mut self.buffer)
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
