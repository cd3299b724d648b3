use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::{
    sync::{self, mpsc},
    time,
};

use crate::{
    config::{Config, SourceType},
    coordinator::ConnectionCoordinator,
    util::AbortOnDropHandle,
};

use super::{
    SignalSource,
    error::{
        FeedConnectionError, FeedConnectionResult, LookupError, LookupResult, SourceError,
        SourceResult,
    },
};

mod connection;
pub(crate) mod models;
mod resolver;

pub use connection::WebSocketFeedConnector;
pub use resolver::{DEFAULT_LOOKUP_URL, RpcEndpointResolver};

use models::parse_feed_frame;

/// Resolves a feed identifier into the URL of its streaming endpoint.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    /// Returns the endpoint URL, or an empty string if the feed has none.
    async fn resolve_endpoint(&self, feed_id: &str) -> LookupResult<String>;
}

/// Opens streaming connections to resolved feed endpoints.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    async fn open(&self, url: &str) -> FeedConnectionResult<Box<dyn FeedStream>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// A text frame.
    Message(String),
    /// The peer closed the connection.
    Closed,
}

/// An open feed connection.
#[async_trait]
pub trait FeedStream: Send {
    /// Waits for the next event. Must be cancel safe enough to be raced against timers.
    async fn next_event(&mut self) -> FeedConnectionResult<FeedEvent>;

    /// Starts a graceful close.
    async fn close(&mut self) -> FeedConnectionResult<()>;
}

#[derive(Debug)]
enum ReaderExit {
    Requested,
    Closed,
    IdleTimeout,
    Failed(FeedConnectionError),
}

#[derive(Debug)]
struct FeedConnection {
    disconnect_tx: mpsc::Sender<()>,
    reader: AbortOnDropHandle<()>,
}

#[derive(Debug, Default)]
struct RemoteState {
    // Bumped by every connect and disconnect, see `LocalSensorSource`
    epoch: u64,
    connecting: bool,
    connection: Option<FeedConnection>,
}

/// [`SignalSource`] backed by a remote push feed.
///
/// Connecting resolves the endpoint of the configured feed id and opens a streaming connection.
/// A reader task parses every text frame into a sample and force-closes the connection when no
/// frame arrives within the configured timeout.
pub struct RemoteFeedSource {
    resolver: Arc<dyn EndpointResolver>,
    connector: Arc<dyn FeedConnector>,
    coordinator: Arc<ConnectionCoordinator>,
    config: Mutex<Arc<Config>>,
    state: Arc<Mutex<RemoteState>>,
    // Held while a connection is registered or released and the engine tier is reported, see
    // `LocalSensorSource`
    transitions: Arc<sync::Mutex<()>>,
}

impl RemoteFeedSource {
    /// Upper bound on the graceful close performed by `disconnect`.
    pub const CLOSE_TIMEOUT: time::Duration = time::Duration::from_secs(3);

    pub fn new(
        resolver: Arc<dyn EndpointResolver>,
        connector: Arc<dyn FeedConnector>,
        coordinator: Arc<ConnectionCoordinator>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            resolver,
            connector,
            coordinator,
            config: Mutex::new(config),
            state: Arc::new(Mutex::new(RemoteState::default())),
            transitions: Arc::new(sync::Mutex::new(())),
        }
    }

    fn lock_state(state: &Mutex<RemoteState>) -> MutexGuard<'_, RemoteState> {
        state
            .lock()
            .expect("`RemoteFeedSource` state mutex can't be poisoned")
    }

    fn config(&self) -> Arc<Config> {
        self.config
            .lock()
            .expect("`RemoteFeedSource` config mutex can't be poisoned")
            .clone()
    }

    fn is_current(&self, epoch: u64) -> bool {
        Self::lock_state(&self.state).epoch == epoch
    }

    fn finish_connecting(&self, epoch: u64) {
        let mut state = Self::lock_state(&self.state);
        if state.epoch == epoch {
            state.connecting = false;
        }
    }

    async fn resolve(&self, feed_id: &str) -> SourceResult<String> {
        match self.resolver.resolve_endpoint(feed_id).await {
            Ok(url) if !url.is_empty() => Ok(url),
            Ok(_) => {
                tracing::warn!(feed_id, "feed lookup returned no endpoint");
                Err(LookupError::NoEndpoint.into())
            }
            Err(e) => {
                tracing::warn!(feed_id, "feed lookup failed: {e}");
                Err(LookupError::NoEndpoint.into())
            }
        }
    }

    async fn run_reader(
        mut stream: Box<dyn FeedStream>,
        mut disconnect_rx: mpsc::Receiver<()>,
        idle_timeout: time::Duration,
        coordinator: &ConnectionCoordinator,
    ) -> ReaderExit {
        let new_idle_timer = || Box::pin(time::sleep(idle_timeout));
        let mut idle_timer = new_idle_timer();

        loop {
            tokio::select! {
                Some(_) = disconnect_rx.recv() => {
                    if let Err(e) = stream.close().await {
                        tracing::debug!("feed close failed: {e}");
                    }
                    return ReaderExit::Requested;
                }
                event = stream.next_event() => {
                    // Any frame counts as transport activity
                    idle_timer = new_idle_timer();

                    match event {
                        Ok(FeedEvent::Message(text)) => match parse_feed_frame(&text) {
                            Ok(bpm) => coordinator.on_sample(bpm, SourceType::Remote),
                            Err(e) => tracing::warn!("dropping unparsable feed frame: {e}"),
                        },
                        Ok(FeedEvent::Closed) => return ReaderExit::Closed,
                        Err(e) => return ReaderExit::Failed(e),
                    }
                }
                _ = &mut idle_timer => {
                    if let Err(e) = stream.close().await {
                        tracing::debug!("feed close failed: {e}");
                    }
                    return ReaderExit::IdleTimeout;
                }
            }
        }
    }

    fn spawn_reader(
        &self,
        stream: Box<dyn FeedStream>,
        disconnect_rx: mpsc::Receiver<()>,
        idle_timeout: time::Duration,
        epoch: u64,
    ) -> AbortOnDropHandle<()> {
        let coordinator = self.coordinator.clone();
        let state = self.state.clone();
        let transitions = self.transitions.clone();

        let reader = tokio::spawn(async move {
            let exit = Self::run_reader(stream, disconnect_rx, idle_timeout, &coordinator).await;

            match exit {
                // `disconnect` owns the rest of the teardown
                ReaderExit::Requested => return,
                ReaderExit::Closed => tracing::info!("feed closed by peer"),
                ReaderExit::IdleTimeout => {
                    tracing::warn!("no feed frame within {idle_timeout:?}, connection closed");
                }
                ReaderExit::Failed(e) => tracing::warn!("feed connection failed: {e}"),
            }

            let _transition = transitions.lock().await;

            let released = {
                let mut state = Self::lock_state(&state);
                if state.epoch != epoch {
                    return;
                }
                state.connection.take()
            };

            if released.is_some() {
                coordinator.set_engine_connected(false, SourceType::Remote);
            }
        });

        reader.into()
    }
}

#[async_trait]
impl SignalSource for RemoteFeedSource {
    fn source_type(&self) -> SourceType {
        SourceType::Remote
    }

    fn update_config(&self, config: Arc<Config>) {
        *self
            .config
            .lock()
            .expect("`RemoteFeedSource` config mutex can't be poisoned") = config;
    }

    async fn connect(&self) -> SourceResult<()> {
        let config = self.config();

        if config.feed_id().is_empty() {
            return Err(SourceError::NoFeedId);
        }

        let epoch = {
            let mut state = Self::lock_state(&self.state);
            if state.connection.is_some() || state.connecting {
                tracing::debug!("feed already connected");
                return Ok(());
            }
            state.epoch += 1;
            state.connecting = true;
            state.epoch
        };

        let url = match self.resolve(config.feed_id()).await {
            Ok(url) => url,
            Err(e) => {
                self.finish_connecting(epoch);
                return Err(e);
            }
        };

        if !self.is_current(epoch) {
            tracing::info!("feed connect cancelled before opening");
            return Err(SourceError::Cancelled);
        }

        let mut stream = match self.connector.open(&url).await {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::warn!("failed to open feed connection: {e}");
                self.finish_connecting(epoch);
                return Err(e.into());
            }
        };

        let (disconnect_tx, disconnect_rx) = mpsc::channel::<()>(1);

        let transition = self.transitions.lock().await;

        {
            let mut state = Self::lock_state(&self.state);
            if state.epoch == epoch
                && let Some(stream) = stream.take()
            {
                let reader = self.spawn_reader(stream, disconnect_rx, config.timeout(), epoch);
                state.connecting = false;
                state.connection = Some(FeedConnection {
                    disconnect_tx,
                    reader,
                });
            }
        }

        if let Some(mut stream) = stream {
            drop(transition);

            tracing::info!("feed connect cancelled");
            if let Err(e) = stream.close().await {
                tracing::debug!("feed close failed: {e}");
            }
            return Err(SourceError::Cancelled);
        }

        tracing::info!("feed connected");

        // The reader reports a lost connection only after this, as it needs `transitions`
        self.coordinator.set_engine_connected(true, SourceType::Remote);

        Ok(())
    }

    async fn disconnect(&self) -> SourceResult<()> {
        let connection = {
            let _transition = self.transitions.lock().await;

            let mut state = Self::lock_state(&self.state);
            state.epoch += 1;
            state.connecting = false;
            state.connection.take()
        };

        let Some(FeedConnection {
            disconnect_tx,
            mut reader,
        }) = connection
        else {
            tracing::debug!("feed already disconnected");
            return Ok(());
        };

        // The reader may already be gone
        let _ = disconnect_tx.try_send(());

        tokio::select! {
            _ = &mut reader => {}
            _ = time::sleep(Self::CLOSE_TIMEOUT) => {
                tracing::warn!("feed close timed out, aborting reader");
                reader.abort();
            }
        }

        tracing::info!("feed disconnected");

        let _transition = self.transitions.lock().await;

        // A connect that finished during the close owns the engine tier now
        if !self.is_connected() {
            self.coordinator.set_engine_connected(false, SourceType::Remote);
        }

        Ok(())
    }

    fn is_connected(&self) -> bool {
        Self::lock_state(&self.state).connection.is_some()
    }
}
