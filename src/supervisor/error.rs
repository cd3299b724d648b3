use std::{result, sync::Arc};

use thiserror::Error;

use crate::{config::error::ConfigValidationError, source::error::SourceError};

/// Reason a switch-over could not bring the requested source up.
#[derive(Error, Debug)]
pub enum SwitchError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Sensor scan found no devices")]
    NoDevices,

    #[error("Switch cancelled by shutdown")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error(transparent)]
    InvalidConfig(#[from] ConfigValidationError),

    #[error("Source switch failed: {0}")]
    SwitchFailed(Arc<SwitchError>),
}

pub(super) type Result<T> = result::Result<T, SupervisorError>;
