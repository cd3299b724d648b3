#![doc = include_str!("../README.md")]

mod config;
/// Exports [`ConnectionCoordinator`], the two-tier [`ConnectionState`] and listener types.
///
/// [`ConnectionCoordinator`]: crate::coordinator::ConnectionCoordinator
/// [`ConnectionState`]: crate::coordinator::ConnectionState
pub mod coordinator;
mod sink;
/// Exports the [`SignalSource`] trait, both source variants and their transport traits.
///
/// [`SignalSource`]: crate::source::SignalSource
pub mod source;
/// Exports [`ModeSupervisor`] and the types describing its phases and updates.
///
/// [`ModeSupervisor`]: crate::supervisor::ModeSupervisor
pub mod supervisor;
mod util;

#[cfg(test)]
mod testing;

pub use config::{Config, SourceType};
pub use sink::{
    HeartRateNote, NOTE_MAX_BPM, OutputSink, OutputSinks, PRESENCE_NOTE, PRESENCE_VELOCITY,
};

/// Error types returned by `hr-relay`.
pub mod error {
    pub use super::config::error::ConfigValidationError;
    pub use super::sink::error::{SinkError, SinkResult};
    pub use super::source::error::{
        FeedConnectionError, FeedConnectionResult, LookupError, LookupResult, SourceError,
        SourceResult, TransportError, TransportResult,
    };
    pub use super::supervisor::error::{SupervisorError, SwitchError};
    pub use super::util::PanicPayload;
}
