use std::{fmt, sync::Arc};

use async_trait::async_trait;

use crate::config::{Config, SourceType};

pub(crate) mod error;
pub(crate) mod local;
pub(crate) mod remote;

use error::{LookupResult, SourceResult};

pub use local::{
    HEART_RATE_MEASUREMENT_UUID, LocalSensorSource, SensorDevice, SensorEvent, SensorTransport,
    parse_heart_rate_measurement,
};
pub use remote::{
    DEFAULT_LOOKUP_URL, EndpointResolver, FeedConnector, FeedEvent, FeedStream, RemoteFeedSource,
    RpcEndpointResolver, WebSocketFeedConnector,
};

/// A producer of heart-rate samples that can be started and stopped repeatedly.
///
/// Sources report samples and engine state transitions to the
/// [`ConnectionCoordinator`](crate::coordinator::ConnectionCoordinator) they were created with.
/// Both `connect` and `disconnect` may be called at any time: `disconnect` is idempotent and
/// cancels a `connect` still in flight.
#[async_trait]
pub trait SignalSource: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Replaces the config used by subsequent operations. Does not reconnect.
    fn update_config(&self, config: Arc<Config>);

    async fn connect(&self) -> SourceResult<()>;

    async fn disconnect(&self) -> SourceResult<()>;

    /// Returns `true` while the source holds an open connection.
    fn is_connected(&self) -> bool;
}

/// External collaborators needed to build both sources.
#[derive(Clone)]
pub struct SourceTransports {
    sensor: Arc<dyn SensorTransport>,
    resolver: Arc<dyn EndpointResolver>,
    connector: Arc<dyn FeedConnector>,
}

impl SourceTransports {
    pub fn new(
        sensor: Arc<dyn SensorTransport>,
        resolver: Arc<dyn EndpointResolver>,
        connector: Arc<dyn FeedConnector>,
    ) -> Self {
        Self {
            sensor,
            resolver,
            connector,
        }
    }

    /// Uses the JSON-RPC endpoint resolver and the WebSocket connector for the remote feed.
    pub fn with_defaults(sensor: Arc<dyn SensorTransport>) -> LookupResult<Self> {
        Ok(Self::new(
            sensor,
            Arc::new(RpcEndpointResolver::new()?),
            Arc::new(WebSocketFeedConnector),
        ))
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Arc<dyn SensorTransport>,
        Arc<dyn EndpointResolver>,
        Arc<dyn FeedConnector>,
    ) {
        (self.sensor, self.resolver, self.connector)
    }
}

impl fmt::Debug for SourceTransports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceTransports").finish_non_exhaustive()
    }
}
