use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{
    self,
    broadcast::{self, error::RecvError},
};
use uuid::Uuid;

use crate::{
    config::{Config, SourceType},
    coordinator::ConnectionCoordinator,
    util::AbortOnDropHandle,
};

use super::{
    SignalSource,
    error::{SourceError, SourceResult, TransportResult},
};

/// GATT characteristic carrying heart-rate measurements.
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

/// Decodes a GATT heart-rate measurement.
///
/// The first byte holds flags. When bit 0 is set the value is a little-endian `u16`, otherwise a
/// single byte. Returns `None` if the payload is too short.
pub fn parse_heart_rate_measurement(data: &[u8]) -> Option<f64> {
    let (flags, value) = data.split_first()?;

    if flags & 0x01 == 0 {
        value.first().map(|bpm| *bpm as f64)
    } else {
        let bytes = value.get(..2)?;
        Some(u16::from_le_bytes([bytes[0], bytes[1]]) as f64)
    }
}

/// A sensor found by [`SensorTransport::scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorDevice {
    id: String,
    name: String,
}

impl SensorDevice {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the advertised name. May be empty.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Event published by a connected sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorEvent {
    HeartRate(f64),
    /// The device dropped the connection on its own.
    Disconnected,
}

/// Wireless sensor stack used by [`LocalSensorSource`].
#[async_trait]
pub trait SensorTransport: Send + Sync {
    async fn scan(&self) -> TransportResult<Vec<SensorDevice>>;

    /// Connects to `device_id` and starts publishing [`SensorEvent`]s.
    async fn connect(&self, device_id: &str) -> TransportResult<()>;

    async fn disconnect(&self, device_id: &str) -> TransportResult<()>;

    /// Subscribes to events of the connected device.
    fn notifications(&self) -> broadcast::Receiver<SensorEvent>;
}

#[derive(Debug, Default)]
struct LocalState {
    // Bumped by every connect and disconnect. A pending operation carrying an older epoch lost a
    // race and must not touch the current connection.
    epoch: u64,
    // Device a connect is in flight for
    pending: Option<String>,
    device_id: Option<String>,
    subscription: Option<AbortOnDropHandle<()>>,
}

impl LocalState {
    fn targets(&self, device_id: &str) -> bool {
        self.device_id.as_deref() == Some(device_id) || self.pending.as_deref() == Some(device_id)
    }
}

/// [`SignalSource`] backed by a local wireless sensor.
pub struct LocalSensorSource {
    transport: Arc<dyn SensorTransport>,
    coordinator: Arc<ConnectionCoordinator>,
    config: Mutex<Arc<Config>>,
    state: Arc<Mutex<LocalState>>,
    // Held while a connection is registered or released and the engine tier is reported, so the
    // coordinator sees transitions in the order they happened
    transitions: Arc<sync::Mutex<()>>,
}

impl LocalSensorSource {
    pub fn new(
        transport: Arc<dyn SensorTransport>,
        coordinator: Arc<ConnectionCoordinator>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            transport,
            coordinator,
            config: Mutex::new(config),
            state: Arc::new(Mutex::new(LocalState::default())),
            transitions: Arc::new(sync::Mutex::new(())),
        }
    }

    fn lock_state(state: &Mutex<LocalState>) -> MutexGuard<'_, LocalState> {
        state
            .lock()
            .expect("`LocalSensorSource` state mutex can't be poisoned")
    }

    fn config(&self) -> Arc<Config> {
        self.config
            .lock()
            .expect("`LocalSensorSource` config mutex can't be poisoned")
            .clone()
    }

    /// Returns the id of the connected device.
    pub fn connected_device(&self) -> Option<String> {
        Self::lock_state(&self.state).device_id.clone()
    }

    pub async fn scan(&self) -> SourceResult<Vec<SensorDevice>> {
        let devices = self.transport.scan().await?;

        tracing::debug!(count = devices.len(), "sensor scan finished");

        Ok(devices)
    }

    /// Connects to `device_id`.
    ///
    /// Connecting to the device that is already connected, or being connected, is a no-op.
    /// Connecting to another device disconnects the current one first, so at most one notification
    /// subscription exists.
    pub async fn connect_device(&self, device_id: &str) -> SourceResult<()> {
        let previous = {
            let state = Self::lock_state(&self.state);
            if state.targets(device_id) {
                tracing::debug!(device_id, "sensor already connected");
                return Ok(());
            }
            state.device_id.clone().or_else(|| state.pending.clone())
        };

        if let Some(previous) = previous {
            tracing::info!(current = previous, device_id, "switching sensor device");
            if let Err(e) = self.disconnect().await {
                tracing::warn!("failed to release previous sensor: {e}");
            }
        }

        let epoch = {
            let mut state = Self::lock_state(&self.state);
            // A concurrent call may have claimed the device meanwhile
            if state.targets(device_id) {
                tracing::debug!(device_id, "sensor already connecting");
                return Ok(());
            }
            state.epoch += 1;
            state.pending = Some(device_id.to_string());
            state.epoch
        };

        if let Err(e) = self.transport.connect(device_id).await {
            tracing::warn!(device_id, "sensor connect failed: {e}");

            let mut state = Self::lock_state(&self.state);
            if state.epoch == epoch {
                state.pending = None;
            }
            return Err(e.into());
        }

        let transition = self.transitions.lock().await;

        let events = {
            let mut state = Self::lock_state(&self.state);
            if state.epoch != epoch {
                None
            } else {
                state.pending = None;
                state.device_id = Some(device_id.to_string());
                // Subscribed before the engine tier is raised, so no event is missed
                Some(self.transport.notifications())
            }
        };

        let Some(events) = events else {
            drop(transition);
            return Err(self.release_cancelled(device_id).await);
        };

        tracing::info!(device_id, "sensor connected");

        self.coordinator.set_engine_connected(true, SourceType::Local);

        let subscription = tokio::spawn(Self::forward_events(
            events,
            self.coordinator.clone(),
            self.state.clone(),
            self.transitions.clone(),
            epoch,
        ));
        Self::lock_state(&self.state).subscription = Some(subscription.into());

        Ok(())
    }

    async fn release_cancelled(&self, device_id: &str) -> SourceError {
        tracing::info!(device_id, "sensor connect cancelled");

        if Self::lock_state(&self.state).targets(device_id) {
            // A newer connect to the same device owns the link now
            return SourceError::Cancelled;
        }

        if let Err(e) = self.transport.disconnect(device_id).await {
            tracing::warn!(device_id, "failed to release cancelled sensor: {e}");
        }

        SourceError::Cancelled
    }

    async fn forward_events(
        mut events: broadcast::Receiver<SensorEvent>,
        coordinator: Arc<ConnectionCoordinator>,
        state: Arc<Mutex<LocalState>>,
        transitions: Arc<sync::Mutex<()>>,
        epoch: u64,
    ) {
        loop {
            match events.recv().await {
                Ok(SensorEvent::HeartRate(bpm)) => coordinator.on_sample(bpm, SourceType::Local),
                Ok(SensorEvent::Disconnected) | Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "sensor notifications lagged");
                }
            }
        }

        // The device went away on its own. Release it unless a disconnect already did.
        let _transition = transitions.lock().await;

        let released = {
            let mut state = Self::lock_state(&state);
            if state.epoch != epoch {
                return;
            }
            state.device_id.take().map(|id| (id, state.subscription.take()))
        };

        if let Some((device_id, _own_handle)) = released {
            tracing::warn!(device_id, "sensor connection lost");
            coordinator.set_engine_connected(false, SourceType::Local);
        }
    }
}

#[async_trait]
impl SignalSource for LocalSensorSource {
    fn source_type(&self) -> SourceType {
        SourceType::Local
    }

    fn update_config(&self, config: Arc<Config>) {
        *self
            .config
            .lock()
            .expect("`LocalSensorSource` config mutex can't be poisoned") = config;
    }

    /// Connects to the device selected in the config.
    async fn connect(&self) -> SourceResult<()> {
        let config = self.config();

        if config.device_id().is_empty() {
            return Err(SourceError::NoDeviceSelected);
        }

        self.connect_device(config.device_id()).await
    }

    /// Tears down the transport, then drops the notification subscription.
    async fn disconnect(&self) -> SourceResult<()> {
        let _transition = self.transitions.lock().await;

        let (device_id, subscription) = {
            let mut state = Self::lock_state(&self.state);
            state.epoch += 1;
            state.pending = None;
            (state.device_id.take(), state.subscription.take())
        };

        let Some(device_id) = device_id else {
            tracing::debug!("sensor already disconnected");
            return Ok(());
        };

        let result = self.transport.disconnect(&device_id).await;

        drop(subscription);

        tracing::info!(device_id, "sensor disconnected");

        self.coordinator.set_engine_connected(false, SourceType::Local);

        result.map_err(SourceError::from)
    }

    fn is_connected(&self) -> bool {
        Self::lock_state(&self.state).device_id.is_some()
    }
}

#[cfg(test)]
mod tests;
