use std::{io, result, string::FromUtf8Error};

use fastwebsockets::{OpCode, WebSocketError};
use hyper::http;
use reqwest::StatusCode;
use thiserror::Error;
use tokio_rustls::rustls::pki_types::InvalidDnsNameError;

/// Failure reported by a [`SensorTransport`](super::SensorTransport).
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Sensor scan error, {0}")]
    Scan(String),

    #[error("Sensor device not found, {0}")]
    DeviceNotFound(String),

    #[error("Sensor connect error, device {device_id}, {reason}")]
    Connect { device_id: String, reason: String },

    #[error("Sensor disconnect error, device {device_id}, {reason}")]
    Disconnect { device_id: String, reason: String },
}

pub type TransportResult<T> = result::Result<T, TransportError>;

/// Failure to resolve the streaming endpoint of a remote feed.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Lookup HttpClient error, {0}")]
    HttpClient(reqwest::Error),

    #[error("Lookup Request error, {0}")]
    Request(reqwest::Error),

    #[error("Lookup UnexpectedStatus error, {0}")]
    UnexpectedStatus(StatusCode),

    #[error("Lookup DecodeResponse error, {0}")]
    DecodeResponse(reqwest::Error),

    #[error("Lookup Rpc error, {0}")]
    Rpc(serde_json::Value),

    #[error("No endpoint available for feed")]
    NoEndpoint,
}

pub type LookupResult<T> = result::Result<T, LookupError>;

/// Failure of the remote feed's streaming connection.
#[derive(Error, Debug)]
pub enum FeedConnectionError {
    #[error("InvalidUrl error, {0}")]
    InvalidUrl(http::uri::InvalidUri),

    #[error("UnsupportedScheme error, {0:?}")]
    UnsupportedScheme(Option<String>),

    #[error("MissingHost error")]
    MissingHost,

    #[error("InvalidDnsName error, {0}")]
    InvalidDnsName(InvalidDnsNameError),

    #[error("CreateTcpStream error, {0}")]
    CreateTcpStream(io::Error),

    #[error("ConnectTlsStream error, {0}")]
    ConnectTlsStream(io::Error),

    #[error("HttpUpgradeRequest error, {0}")]
    HttpUpgradeRequest(http::Error),

    #[error("Handshake error, {0}")]
    Handshake(WebSocketError),

    #[error("WriteFrame error, {0}")]
    WriteFrame(WebSocketError),

    #[error("ReadFrame error, {0}")]
    ReadFrame(WebSocketError),

    #[error("DecodeText error, {0}")]
    DecodeText(FromUtf8Error),

    #[error("UnhandledOpCode error, {0:?}")]
    UnhandledOpCode(OpCode),
}

pub type FeedConnectionResult<T> = result::Result<T, FeedConnectionError>;

/// Failure of a [`SignalSource`](super::SignalSource) operation.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Feed(#[from] FeedConnectionError),

    #[error("No sensor device selected")]
    NoDeviceSelected,

    #[error("No feed id configured")]
    NoFeedId,

    #[error("Connect cancelled by a concurrent disconnect")]
    Cancelled,
}

pub type SourceResult<T> = result::Result<T, SourceError>;
