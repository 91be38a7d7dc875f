//! # Session State
//!
//! Per-connection state owned by one session handler. Nothing in here is
//! shared between connections.
//!
//! ## Lifecycle:
//! 1. **Created** when the connection is accepted, seeded with the server-wide
//!    language hint and beam size
//! 2. **Collecting** between `audio-start` and `audio-stop`
//! 3. **Idle** after each utterance; the next `audio-start` starts over
//! 4. **Dropped** when the connection closes

use crate::audio::buffer::{AudioFormat, AudioFrameAssembler};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Where the session is within the utterance cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No utterance in progress
    Idle,
    /// `audio-start` seen, chunks are being collected
    Collecting,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Collecting => "collecting",
        }
    }
}

/// State of one client connection.
#[derive(Debug)]
pub struct Session {
    /// Identifier used in log spans
    pub id: Uuid,

    /// Language hint passed to the engine; `None` means auto-detect.
    /// A `transcribe` event carrying a language replaces it.
    pub language: Option<String>,

    /// Beam width passed to the engine on every call
    pub beam_size: usize,

    pub created_at: DateTime<Utc>,

    assembler: AudioFrameAssembler,
    status: SessionStatus,
    utterances: u64,
}

impl Session {
    pub fn new(language: Option<String>, beam_size: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            language,
            beam_size,
            created_at: Utc::now(),
            assembler: AudioFrameAssembler::new(),
            status: SessionStatus::Idle,
            utterances: 0,
        }
    }

    /// Start a new utterance, discarding anything left from an unfinished one.
    pub fn start_utterance(&mut self, format: AudioFormat) {
        if !self.assembler.is_empty() {
            tracing::debug!(
                session_id = %self.id,
                discarded_bytes = self.assembler.len(),
                "Discarding unfinished utterance"
            );
        }
        self.assembler.reset(format);
        self.status = SessionStatus::Collecting;
    }

    pub fn push_audio(&mut self, bytes: &[u8]) {
        self.assembler.append(bytes);
    }

    /// End the utterance and hand back its bytes and format.
    pub fn finish_utterance(&mut self) -> (Vec<u8>, AudioFormat) {
        self.status = SessionStatus::Idle;
        self.utterances += 1;
        (self.assembler.drain(), self.assembler.format())
    }

    /// Format of the last announced utterance (the default before any).
    pub fn format(&self) -> AudioFormat {
        self.assembler.format()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.assembler.len()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Utterances completed on this connection.
    pub fn utterances(&self) -> u64 {
        self.utterances
    }

    pub fn age_secs(&self) -> i64 {
        (Utc::now() - self.created_at).num_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_idle() {
        let session = Session::new(Some("en".to_string()), 5);
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.format(), AudioFormat::default());
        assert_eq!(session.language.as_deref(), Some("en"));
        assert_eq!(session.beam_size, 5);
        assert_eq!(session.utterances(), 0);
        assert!(session.age_secs() >= 0);
    }

    #[test]
    fn test_utterance_cycle() {
        let mut session = Session::new(None, 1);
        session.start_utterance(AudioFormat::new(16000, 2, 1));
        assert_eq!(session.status().as_str(), "collecting");

        session.push_audio(&[1, 2]);
        session.push_audio(&[3, 4]);
        assert_eq!(session.buffered_bytes(), 4);

        let (audio, format) = session.finish_utterance();
        assert_eq!(audio, vec![1, 2, 3, 4]);
        assert_eq!(format, AudioFormat::new(16000, 2, 1));
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(session.buffered_bytes(), 0);
        assert_eq!(session.utterances(), 1);
    }

    #[test]
    fn test_restart_discards_unfinished_audio() {
        let mut session = Session::new(None, 1);
        session.start_utterance(AudioFormat::default());
        session.push_audio(&[7, 7]);
        session.start_utterance(AudioFormat::new(8000, 2, 1));

        let (audio, format) = session.finish_utterance();
        assert!(audio.is_empty());
        assert_eq!(format.rate, 8000);
    }

    #[test]
    fn test_sessions_get_distinct_ids() {
        assert_ne!(Session::new(None, 1).id, Session::new(None, 1).id);
    }
}
