use std::{io, result};

use thiserror::Error;

use crate::util::PanicPayload;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink Io error, {0}")]
    Io(#[from] io::Error),

    #[error("Sink rejected message, {0}")]
    Rejected(String),

    #[error("`OutputSink` panicked: {0}")]
    Panicked(PanicPayload),
}

pub type SinkResult<T> = result::Result<T, SinkError>;
