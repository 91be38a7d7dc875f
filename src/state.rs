//! # Application State
//!
//! Counters shared by every connection task and read by the health endpoint.
//!
//! ## Sharing Pattern:
//! `AppState` is cheap to clone. Clones point at the same
//! `Arc<RwLock<AppMetrics>>`, so a session task and an HTTP handler see the
//! same numbers. Locks are held only for the duration of one update.

use crate::config::AppConfig;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct AppState {
    /// Configuration the server was started with (read-only at runtime)
    pub config: Arc<AppConfig>,

    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Counters collected across all sessions.
///
/// ## Fields:
/// - `active_sessions`: connections currently open
/// - `total_sessions`: connections accepted since start
/// - `transcriptions`: transcripts sent, including empty fallbacks
/// - `failed_transcriptions`: transcripts that fell back to empty text
/// - `audio_bytes`: PCM bytes handed to the engine
/// - `processing_ms`: wall time spent in the transcription procedure
/// - `protocol_errors`: connections closed because of a malformed frame
#[derive(Debug, Default, Clone, Serialize)]
pub struct AppMetrics {
    pub active_sessions: u32,
    pub total_sessions: u64,
    pub transcriptions: u64,
    pub failed_transcriptions: u64,
    pub audio_bytes: u64,
    pub processing_ms: u64,
    pub protocol_errors: u64,
}

impl AppMetrics {
    /// Mean time per transcription in milliseconds.
    pub fn average_processing_ms(&self) -> f64 {
        if self.transcriptions > 0 {
            self.processing_ms as f64 / self.transcriptions as f64
        } else {
            0.0
        }
    }
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    // A panic while holding the lock leaves plain counters behind, which are still usable
    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_metrics(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session_opened(&self) {
        let mut metrics = self.write_metrics();
        metrics.active_sessions += 1;
        metrics.total_sessions += 1;
    }

    /// Never goes below zero.
    pub fn session_closed(&self) {
        let mut metrics = self.write_metrics();
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
    }

    /// Record one finished transcription procedure.
    pub fn record_transcription(&self, audio_bytes: usize, duration_ms: u64, succeeded: bool) {
        let mut metrics = self.write_metrics();
        metrics.transcriptions += 1;
        metrics.audio_bytes += audio_bytes as u64;
        metrics.processing_ms += duration_ms;
        if !succeeded {
            metrics.failed_transcriptions += 1;
        }
    }

    pub fn record_protocol_error(&self) {
        self.write_metrics().protocol_errors += 1;
    }

    /// Copy of the current counters.
    pub fn metrics_snapshot(&self) -> AppMetrics {
        self.read_metrics().clone()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_counters() {
        let state = AppState::new(AppConfig::default());
        state.session_opened();
        state.session_opened();
        state.session_closed();

        let metrics = state.metrics_snapshot();
        assert_eq!(metrics.active_sessions, 1);
        assert_eq!(metrics.total_sessions, 2);

        state.session_closed();
        state.session_closed();
        assert_eq!(state.metrics_snapshot().active_sessions, 0);
    }

    #[test]
    fn test_transcription_counters() {
        let state = AppState::new(AppConfig::default());
        state.record_transcription(32000, 120, true);
        state.record_transcription(16000, 80, false);

        let metrics = state.metrics_snapshot();
        assert_eq!(metrics.transcriptions, 2);
        assert_eq!(metrics.failed_transcriptions, 1);
        assert_eq!(metrics.audio_bytes, 48000);
        assert!((metrics.average_processing_ms() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clones_share_metrics() {
        let state = AppState::new(AppConfig::default());
        let clone = state.clone();
        clone.record_protocol_error();
        assert_eq!(state.metrics_snapshot().protocol_errors, 1);
        assert_eq!(AppMetrics::default().average_processing_ms(), 0.0);
    }
}
