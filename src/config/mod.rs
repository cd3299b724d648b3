use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};
use tokio::time;

pub(crate) mod error;

use error::ConfigValidationError;

/// Which signal source feeds the relay.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SourceType {
    /// A wireless heart-rate sensor reached through a
    /// [`SensorTransport`](crate::source::SensorTransport).
    #[default]
    #[serde(alias = "bluetooth")]
    Local,
    /// A remote push feed resolved from a feed identifier.
    #[serde(alias = "widget")]
    Remote,
}

impl SourceType {
    /// Returns the other source type.
    pub fn toggled(self) -> Self {
        match self {
            Self::Local => Self::Remote,
            Self::Remote => Self::Local,
        }
    }
}

/// Relay settings.
///
/// A `Config` is treated as an immutable value: components hold it behind an `Arc` and a new
/// value fully replaces the previous one. Persisting it is up to the embedding application, hence
/// the `serde` impls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    mode: SourceType,
    #[serde(alias = "widget_id")]
    feed_id: String,
    #[serde(alias = "bluetooth_device")]
    device_id: String,
    max_hr: f32,
    sink_host: String,
    sink_port: u16,
    level_address: String,
    presence_address: String,
    note_port: String,
    #[serde(rename = "timeout")]
    timeout_secs: u64,
    #[serde(rename = "status_interval")]
    status_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: SourceType::Local,
            feed_id: String::new(),
            device_id: String::new(),
            max_hr: 200.0,
            sink_host: "127.0.0.1".to_string(),
            sink_port: 9000,
            level_address: "/avatar/parameters/hr_percent".to_string(),
            presence_address: "/avatar/parameters/hr_connected".to_string(),
            note_port: "hroscmidi".to_string(),
            timeout_secs: 10,
            status_interval_secs: 10,
        }
    }
}

impl Config {
    pub const TIMEOUT_MIN_SECS: u64 = 1;
    pub const TIMEOUT_MAX_SECS: u64 = 600;
    pub const STATUS_INTERVAL_MIN_SECS: u64 = 5;
    pub const STATUS_INTERVAL_MAX_SECS: u64 = 10;

    const TIMEOUT_RANGE: RangeInclusive<u64> = Self::TIMEOUT_MIN_SECS..=Self::TIMEOUT_MAX_SECS;
    const STATUS_INTERVAL_RANGE: RangeInclusive<u64> =
        Self::STATUS_INTERVAL_MIN_SECS..=Self::STATUS_INTERVAL_MAX_SECS;

    /// Returns the active source type.
    pub fn mode(&self) -> SourceType {
        self.mode
    }

    /// Returns the identifier used to resolve the remote feed endpoint. Empty when unset.
    pub fn feed_id(&self) -> &str {
        &self.feed_id
    }

    /// Returns the selected local sensor identifier. Empty when no device is selected.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Returns the heart rate that maps to a level of `1.0`.
    pub fn max_hr(&self) -> f32 {
        self.max_hr
    }

    /// Returns the level sink host.
    pub fn sink_host(&self) -> &str {
        &self.sink_host
    }

    /// Returns the level sink port.
    pub fn sink_port(&self) -> u16 {
        self.sink_port
    }

    /// Returns the `host:port` pair of the level sink.
    pub fn sink_addr(&self) -> String {
        format!("{}:{}", self.sink_host, self.sink_port)
    }

    /// Returns the address heart-rate levels are sent to.
    pub fn level_address(&self) -> &str {
        &self.level_address
    }

    /// Returns the address presence updates are sent to.
    pub fn presence_address(&self) -> &str {
        &self.presence_address
    }

    /// Returns the note output port identifier.
    pub fn note_port(&self) -> &str {
        &self.note_port
    }

    /// Returns how long a connection stays live without samples.
    ///
    /// Used both for the sample staleness window and for the remote transport's idle close.
    pub fn timeout(&self) -> time::Duration {
        time::Duration::from_secs(self.timeout_secs)
    }

    /// Returns the period of the presence rebroadcast while the engine is connected.
    pub fn status_interval(&self) -> time::Duration {
        time::Duration::from_secs(self.status_interval_secs)
    }

    /// Sets the active source type.
    ///
    /// Default: [`SourceType::Local`]
    pub fn with_mode(mut self, mode: SourceType) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the remote feed identifier.
    ///
    /// Default: empty
    pub fn with_feed_id(mut self, feed_id: impl Into<String>) -> Self {
        self.feed_id = feed_id.into();
        self
    }

    /// Sets the local sensor identifier.
    ///
    /// Default: empty (auto-selected on the first local switch)
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    /// Sets the heart rate that maps to a level of `1.0`.
    ///
    /// Default: `200`
    pub fn with_max_hr(mut self, max_hr: f32) -> Self {
        self.max_hr = max_hr;
        self
    }

    /// Sets the level sink host.
    ///
    /// Default: `127.0.0.1`
    pub fn with_sink_host(mut self, host: impl Into<String>) -> Self {
        self.sink_host = host.into();
        self
    }

    /// Sets the level sink port.
    ///
    /// Default: `9000`
    pub fn with_sink_port(mut self, port: u16) -> Self {
        self.sink_port = port;
        self
    }

    /// Sets the level address.
    ///
    /// Default: `/avatar/parameters/hr_percent`
    pub fn with_level_address(mut self, address: impl Into<String>) -> Self {
        self.level_address = address.into();
        self
    }

    /// Sets the presence address.
    ///
    /// Default: `/avatar/parameters/hr_connected`
    pub fn with_presence_address(mut self, address: impl Into<String>) -> Self {
        self.presence_address = address.into();
        self
    }

    /// Sets the note output port identifier.
    ///
    /// Default: `hroscmidi`
    pub fn with_note_port(mut self, port: impl Into<String>) -> Self {
        self.note_port = port.into();
        self
    }

    /// Sets the staleness timeout.
    ///
    /// Default: `10` seconds
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Sets the presence rebroadcast interval.
    ///
    /// Default: `10` seconds
    pub fn with_status_interval(mut self, secs: u64) -> Self {
        self.status_interval_secs = secs;
        self
    }

    /// Checks the numeric settings.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !self.max_hr.is_finite() || self.max_hr <= 0.0 {
            return Err(ConfigValidationError::InvalidMaxHr(self.max_hr));
        }

        if !Self::TIMEOUT_RANGE.contains(&self.timeout_secs) {
            return Err(ConfigValidationError::InvalidTimeout);
        }

        if !Self::STATUS_INTERVAL_RANGE.contains(&self.status_interval_secs) {
            return Err(ConfigValidationError::InvalidStatusInterval);
        }

        if self.sink_port == 0 {
            return Err(ConfigValidationError::InvalidSinkPort);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
