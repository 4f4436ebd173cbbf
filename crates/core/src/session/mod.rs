//! Client session state: lifecycle states, status notifications, sink
//! registration, and the automatic reconnection policy.
//!
//! ## Session lifecycle
//!
//! ```text
//! connect()    Disconnected -> Connecting -> Connected
//! play()       Connected | Paused -> Playing
//! pause()      Playing -> Paused
//! stop()       Playing -> Connected
//! disconnect() any -> Disconnected
//! failure      any -> Error (-> reconnect policy -> Disconnected)
//! ```

pub mod track;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::error::{ErrorKind, Result, RtspError};
use crate::media::{RtpFrame, TrackKind};

/// RTSP client session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Playing,
    Paused,
    Error,
}

/// A lifecycle notification delivered to the status sink.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub state: SessionState,
    /// Short human-readable description of the transition or failure.
    pub message: String,
    /// Set when the update reports a failure.
    pub error: Option<ErrorKind>,
}

/// Application callback receiving framed payloads for one track kind.
pub type FrameSink = dyn Fn(RtpFrame) + Send + Sync;

/// Application callback receiving lifecycle transitions.
pub type StatusSink = dyn Fn(&StatusUpdate) + Send + Sync;

/// Registered sinks, shared between the public API and the receiver thread.
///
/// Registration takes the write lock; dispatch clones the `Arc` under the
/// read lock and invokes the callback with no lock held, so a sink may
/// re-register sinks or call `disconnect()` without deadlocking.
/// Re-registration is last-write-wins and is observed by the next dispatch.
pub(crate) struct SinkRegistry {
    video: RwLock<Option<Arc<FrameSink>>>,
    audio: RwLock<Option<Arc<FrameSink>>>,
    metadata: RwLock<Option<Arc<FrameSink>>>,
    status: RwLock<Option<Arc<StatusSink>>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        SinkRegistry {
            video: RwLock::new(None),
            audio: RwLock::new(None),
            metadata: RwLock::new(None),
            status: RwLock::new(None),
        }
    }

    fn slot(&self, kind: TrackKind) -> &RwLock<Option<Arc<FrameSink>>> {
        match kind {
            TrackKind::Video => &self.video,
            TrackKind::Audio => &self.audio,
            TrackKind::Metadata => &self.metadata,
        }
    }

    pub fn set_frame_sink(&self, kind: TrackKind, sink: Option<Arc<FrameSink>>) {
        *self.slot(kind).write() = sink;
        tracing::debug!(kind = kind.as_str(), "frame sink updated");
    }

    pub fn frame_sink(&self, kind: TrackKind) -> Option<Arc<FrameSink>> {
        self.slot(kind).read().clone()
    }

    pub fn set_status_sink(&self, sink: Option<Arc<StatusSink>>) {
        *self.status.write() = sink;
    }

    /// Deliver a status update outside every lock.
    pub fn emit_status(&self, state: SessionState, message: &str, error: Option<ErrorKind>) {
        tracing::debug!(?state, message, ?error, "status");
        let sink = self.status.read().clone();
        if let Some(sink) = sink {
            sink(&StatusUpdate {
                state,
                message: message.to_string(),
                error,
            });
        }
    }
}

/// Automatic reconnection policy applied when the session enters the
/// Error state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectParams {
    pub enabled: bool,
    /// Number of delayed attempts after a failure. 0 disables retries;
    /// a negative value retries without bound.
    pub max_retries: i32,
    pub initial_delay_ms: u64,
    /// Cap applied to the growing delay.
    pub max_delay_ms: u64,
    /// Factor applied to the delay after each failed attempt. Must be
    /// >= 1.0.
    pub backoff_multiplier: f64,
}

impl Default for ReconnectParams {
    fn default() -> Self {
        ReconnectParams {
            enabled: false,
            max_retries: 0,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectParams {
    /// Reject nonsensical parameter combinations before they are stored.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.initial_delay_ms == 0 {
            return Err(RtspError::Config("initial_delay_ms must be non-zero".into()));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(RtspError::Config(
                "max_delay_ms must be >= initial_delay_ms".into(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(RtspError::Config(
                "backoff_multiplier must be finite and >= 1.0".into(),
            ));
        }
        Ok(())
    }

    /// Whether any delayed attempt should run at all.
    pub(crate) fn retries_enabled(&self) -> bool {
        self.enabled && self.max_retries != 0
    }

    /// Infinite schedule of delays: initial, then multiplied and capped.
    /// The caller bounds it by `max_retries`.
    pub(crate) fn delays(&self) -> BackoffSchedule {
        BackoffSchedule {
            next_ms: self.initial_delay_ms,
            max_ms: self.max_delay_ms,
            multiplier: self.backoff_multiplier,
        }
    }
}

pub(crate) struct BackoffSchedule {
    next_ms: u64,
    max_ms: u64,
    multiplier: f64,
}

impl Iterator for BackoffSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next_ms;
        let grown = (self.next_ms as f64 * self.multiplier).round() as u64;
        self.next_ms = grown.min(self.max_ms);
        Some(Duration::from_millis(current))
    }
}
