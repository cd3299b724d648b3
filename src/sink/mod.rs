use std::{fmt, future::Future, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt;

pub(crate) mod error;

use error::{SinkError, SinkResult};

/// Note used to signal presence on the note sink.
pub const PRESENCE_NOTE: u8 = 60;

/// Velocity sent with [`PRESENCE_NOTE`] while the signal is live. `0` is sent otherwise.
pub const PRESENCE_VELOCITY: u8 = 127;

/// Highest heart rate representable on the note sink.
pub const NOTE_MAX_BPM: u8 = 200;

/// Outbound capability driven by the relay.
///
/// The relay owns two sinks and treats them uniformly: levels and presence flags go to the level
/// sink, presence notes and heart-rate notes go to the note sink. Every method has a no-op default
/// so a sink only implements what its wire protocol carries.
///
/// Calls are fire-and-forget. Errors and panics are logged by the relay and never propagate back
/// into the signal path.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Sends a normalized heart-rate level (`bpm / max_hr`, not clamped).
    async fn send_level(&self, _address: &str, _value: f32) -> SinkResult<()> {
        Ok(())
    }

    /// Sends whether a live signal is present.
    async fn send_presence(&self, _address: &str, _present: bool) -> SinkResult<()> {
        Ok(())
    }

    /// Sends a note with the given velocity. A velocity of `0` releases the note.
    async fn send_note(&self, _note: u8, _velocity: u8) -> SinkResult<()> {
        Ok(())
    }
}

/// The pair of sinks driven by the relay.
#[derive(Clone)]
pub struct OutputSinks {
    level: Arc<dyn OutputSink>,
    note: Arc<dyn OutputSink>,
}

impl OutputSinks {
    pub fn new(level: Arc<dyn OutputSink>, note: Arc<dyn OutputSink>) -> Self {
        Self { level, note }
    }
}

impl fmt::Debug for OutputSinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSinks").finish_non_exhaustive()
    }
}

/// Heart rate encoded for the note sink: the ones digit as the note and the tens as velocity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartRateNote {
    note: u8,
    velocity: u8,
}

impl HeartRateNote {
    /// Rounds and clamps `bpm` to `0..=200` before splitting it into digits.
    pub fn from_bpm(bpm: f64) -> Self {
        let bpm = if bpm.is_nan() {
            0
        } else {
            bpm.round().clamp(0.0, NOTE_MAX_BPM as f64) as u8
        };

        Self {
            note: bpm % 10,
            velocity: bpm / 10,
        }
    }

    pub fn note(&self) -> u8 {
        self.note
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub(crate) enum SinkRole {
    Level,
    Note,
}

/// Internal wrapper that provides panic protection and logging for output sinks.
#[derive(Clone)]
pub(crate) struct WrappedOutputSink {
    role: SinkRole,
    sink: Arc<dyn OutputSink>,
}

impl WrappedOutputSink {
    pub fn new(role: SinkRole, sink: Arc<dyn OutputSink>) -> Self {
        Self { role, sink }
    }

    pub fn pair(sinks: OutputSinks) -> (Self, Self) {
        (
            Self::new(SinkRole::Level, sinks.level),
            Self::new(SinkRole::Note, sinks.note),
        )
    }

    async fn guarded(fut: impl Future<Output = SinkResult<()>>) -> SinkResult<()> {
        FutureExt::catch_unwind(AssertUnwindSafe(fut))
            .await
            .map_err(|e| SinkError::Panicked(e.into()))?
    }

    fn log_outcome(&self, operation: &str, result: SinkResult<()>) {
        match result {
            Ok(()) => {}
            Err(e @ SinkError::Panicked(_)) => {
                tracing::error!(sink = %self.role, operation, "{e}");
            }
            Err(e) => {
                tracing::warn!(sink = %self.role, operation, "send failed: {e}");
            }
        }
    }

    pub async fn send_level(self, address: String, value: f32) {
        let result = Self::guarded(self.sink.send_level(&address, value)).await;
        self.log_outcome("send_level", result);
    }

    pub async fn send_presence(self, address: String, present: bool) {
        let result = Self::guarded(self.sink.send_presence(&address, present)).await;
        self.log_outcome("send_presence", result);
    }

    pub async fn send_note(self, note: u8, velocity: u8) {
        let result = Self::guarded(self.sink.send_note(note, velocity)).await;
        self.log_outcome("send_note", result);
    }
}
