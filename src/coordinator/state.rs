use std::fmt;

use chrono::{DateTime, Utc};

use crate::config::SourceType;

/// One heart-rate reading and the time it reached the relay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    bpm: f64,
    received_at: DateTime<Utc>,
}

impl Sample {
    pub(super) fn new(bpm: f64) -> Self {
        Self {
            bpm,
            received_at: Utc::now(),
        }
    }

    /// Returns the heart rate in beats per minute.
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bpm at {}", self.bpm, self.received_at.format("%H:%M:%S%.3f"))
    }
}

/// Two-tier connection status of the relay.
///
/// The engine tier reports whether the active transport is open. The gui tier reports whether a
/// sample arrived within the staleness window. The tiers change independently: a silent but open
/// transport is engine-connected and gui-disconnected, and a sample arriving while the engine is
/// down still raises the gui tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    pub(super) engine_connected: bool,
    pub(super) gui_connected: bool,
    pub(super) source_type: SourceType,
}

impl ConnectionState {
    pub(super) fn new(source_type: SourceType) -> Self {
        Self {
            engine_connected: false,
            gui_connected: false,
            source_type,
        }
    }

    /// Returns `true` if the active transport reports an open connection.
    pub fn is_engine_connected(&self) -> bool {
        self.engine_connected
    }

    /// Returns `true` if a sample arrived within the staleness window.
    pub fn is_gui_connected(&self) -> bool {
        self.gui_connected
    }

    /// Returns the source type samples are currently accepted from.
    pub fn source_type(&self) -> SourceType {
        self.source_type
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tier = |connected: bool| if connected { "up" } else { "down" };
        write!(
            f,
            "{} (engine {}, gui {})",
            self.source_type,
            tier(self.engine_connected),
            tier(self.gui_connected)
        )
    }
}
