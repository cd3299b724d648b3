use thiserror::Error;

use super::Config;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    #[error("Invalid max heart rate {0}, must be a finite value greater than zero")]
    InvalidMaxHr(f32),

    #[error(
        "Invalid staleness timeout, must be between {} and {} seconds",
        Config::TIMEOUT_MIN_SECS,
        Config::TIMEOUT_MAX_SECS
    )]
    InvalidTimeout,

    #[error(
        "Invalid status interval, must be between {} and {} seconds",
        Config::STATUS_INTERVAL_MIN_SECS,
        Config::STATUS_INTERVAL_MAX_SECS
    )]
    InvalidStatusInterval,

    #[error("Invalid sink port, must not be zero")]
    InvalidSinkPort,
}
