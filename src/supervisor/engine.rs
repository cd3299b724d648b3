use std::{
    result,
    sync::{Arc, Mutex},
};

use tokio::sync::broadcast;

use crate::{
    config::{Config, SourceType},
    coordinator::{ConnectionCoordinator, Listener, ListenerRegistry},
    sink::OutputSinks,
    source::{LocalSensorSource, RemoteFeedSource, SignalSource, SourceTransports},
};

use super::{
    error::{Result, SupervisorError, SwitchError},
    state::{
        SupervisorPhase, SupervisorPhaseManager, SupervisorReader, SupervisorReceiver,
        SupervisorTransmitter, SwitchTicket,
    },
};

/// Outcome of a [`ModeSupervisor::switch_to`] request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The requested source is now active.
    Switched(SourceType),
    /// Another switch was in progress, so the request was dropped.
    Ignored,
}

/// Owns the [`ConnectionCoordinator`] and both signal sources, and decides which source is active.
///
/// A switch-over always disconnects before it connects, and at most one switch runs at a time:
/// requests arriving while one is in progress are ignored rather than queued. Phase changes and
/// switch failures are published as [`SupervisorUpdate`](super::SupervisorUpdate)s.
pub struct ModeSupervisor {
    config: Mutex<Arc<Config>>,
    coordinator: Arc<ConnectionCoordinator>,
    local: LocalSensorSource,
    remote: RemoteFeedSource,
    phase_manager: Arc<SupervisorPhaseManager>,
    config_listeners: ListenerRegistry<Arc<Config>>,
}

impl ModeSupervisor {
    /// Validates `config` and builds the coordinator and both sources. Nothing is connected until
    /// [`start`](Self::start) is called.
    pub fn new(
        config: Config,
        transports: SourceTransports,
        sinks: OutputSinks,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let config = Arc::new(config);
        let coordinator = ConnectionCoordinator::new(config.clone(), sinks);
        let (sensor, resolver, connector) = transports.into_parts();

        let local = LocalSensorSource::new(sensor, coordinator.clone(), config.clone());
        let remote =
            RemoteFeedSource::new(resolver, connector, coordinator.clone(), config.clone());

        let (update_tx, _): (SupervisorTransmitter, _) = broadcast::channel(100);
        let phase_manager = SupervisorPhaseManager::new(update_tx);

        Ok(Arc::new(Self {
            config: Mutex::new(config),
            coordinator,
            local,
            remote,
            phase_manager,
            config_listeners: ListenerRegistry::new("config"),
        }))
    }

    /// Returns the config currently in use.
    pub fn config(&self) -> Arc<Config> {
        self.config
            .lock()
            .expect("`ModeSupervisor` config mutex can't be poisoned")
            .clone()
    }

    pub fn coordinator(&self) -> Arc<ConnectionCoordinator> {
        self.coordinator.clone()
    }

    /// Returns a [`SupervisorReader`] interface for accessing the phase and its updates.
    pub fn reader(&self) -> Arc<dyn SupervisorReader> {
        self.phase_manager.clone()
    }

    /// Creates a new [`SupervisorReceiver`] for subscribing to phase changes and switch failures.
    pub fn update_receiver(&self) -> SupervisorReceiver {
        self.phase_manager.update_receiver()
    }

    /// Returns the current [`SupervisorPhase`] as a snapshot.
    pub fn phase(&self) -> SupervisorPhase {
        self.phase_manager.phase_snapshot()
    }

    /// Starts the source selected by the config's mode.
    pub async fn start(&self) -> Result<SwitchOutcome> {
        self.switch_to(self.config().mode()).await
    }

    /// Switches to the other source type. The reference is the active source, or the config's
    /// mode when no source is active.
    pub async fn toggle_mode(&self) -> Result<SwitchOutcome> {
        let current = self
            .phase()
            .active_source()
            .unwrap_or_else(|| self.config().mode());

        self.switch_to(current.toggled()).await
    }

    /// Tears the current source down and brings `mode` up.
    ///
    /// On failure the error is published, the gui tier is lowered and the phase returns to what
    /// it was before the switch. A [`shutdown`](Self::shutdown) during the switch cancels it with
    /// [`SwitchError::Cancelled`], leaving no source connected.
    pub async fn switch_to(&self, mode: SourceType) -> Result<SwitchOutcome> {
        let Some(ticket) = self.phase_manager.begin_switch() else {
            tracing::debug!(%mode, "switch already in progress, request ignored");
            return Ok(SwitchOutcome::Ignored);
        };

        tracing::info!(from = %ticket.previous(), to = %mode, "switching source");

        self.disconnect_sources().await;

        self.phase_manager.advance(&ticket, SupervisorPhase::SwitchingIn);

        if let Err(e) = self.switch_in(mode, &ticket).await {
            return Err(self.fail_switch(mode, &ticket, e));
        }

        if !self
            .phase_manager
            .finish_switch(&ticket, SupervisorPhase::Active(mode))
        {
            // The shutdown that cancelled the switch tears the new source down
            tracing::info!(%mode, "source switch cancelled by shutdown");
            return Err(SupervisorError::SwitchFailed(Arc::new(SwitchError::Cancelled)));
        }

        tracing::info!(%mode, "source active");

        Ok(SwitchOutcome::Switched(mode))
    }

    fn fail_switch(
        &self,
        mode: SourceType,
        ticket: &SwitchTicket,
        e: SwitchError,
    ) -> SupervisorError {
        if matches!(e, SwitchError::Cancelled) {
            tracing::info!(%mode, "source switch cancelled by shutdown");
            self.phase_manager.finish_switch(ticket, ticket.previous());
            return SupervisorError::SwitchFailed(Arc::new(e));
        }

        tracing::error!(%mode, "source switch failed: {e}");

        self.coordinator.set_gui_connected(false);

        let e = Arc::new(e);
        self.phase_manager.report_failure(e.clone());
        self.phase_manager.finish_switch(ticket, ticket.previous());

        SupervisorError::SwitchFailed(e)
    }

    async fn disconnect_sources(&self) {
        let sources: [&dyn SignalSource; 2] = [&self.local, &self.remote];

        for source in sources {
            if let Err(e) = source.disconnect().await {
                tracing::warn!(source = %source.source_type(), "disconnect failed: {e}");
            }
        }

        self.coordinator.disconnect();
    }

    fn ensure_current(&self, ticket: &SwitchTicket) -> result::Result<(), SwitchError> {
        if self.phase_manager.is_current(ticket) {
            Ok(())
        } else {
            Err(SwitchError::Cancelled)
        }
    }

    async fn switch_in(
        &self,
        mode: SourceType,
        ticket: &SwitchTicket,
    ) -> result::Result<(), SwitchError> {
        self.ensure_current(ticket)?;

        let mut config = self.config();
        if config.mode() != mode {
            config = self.apply_config(config.as_ref().clone().with_mode(mode));
        }

        self.coordinator.declare_source(mode);

        match mode {
            SourceType::Local => {
                self.select_device(&config, ticket).await?;
                self.connect_source(&self.local, ticket).await
            }
            SourceType::Remote => self.connect_source(&self.remote, ticket).await,
        }
    }

    async fn connect_source(
        &self,
        source: &dyn SignalSource,
        ticket: &SwitchTicket,
    ) -> result::Result<(), SwitchError> {
        let result = source.connect().await;

        if !self.phase_manager.is_current(ticket) {
            // Connected after the shutdown released the sources
            if let Err(e) = source.disconnect().await {
                tracing::warn!(source = %source.source_type(), "disconnect failed: {e}");
            }
            return Err(SwitchError::Cancelled);
        }

        Ok(result?)
    }

    /// Scans for sensors and keeps the configured device if it is in range, otherwise picks the
    /// first one found and writes it back into the config.
    async fn select_device(
        &self,
        config: &Config,
        ticket: &SwitchTicket,
    ) -> result::Result<(), SwitchError> {
        let devices = self.local.scan().await?;

        self.ensure_current(ticket)?;

        if devices.iter().any(|device| device.id() == config.device_id()) {
            return Ok(());
        }

        let Some(device) = devices.first() else {
            tracing::warn!("sensor scan found no devices");
            return Err(SwitchError::NoDevices);
        };

        tracing::info!(
            device_id = device.id(),
            name = device.name(),
            "selected sensor device"
        );

        self.apply_config(config.clone().with_device_id(device.id()));

        Ok(())
    }

    /// Replaces the config. Connections are left untouched, a new mode takes effect on the next
    /// switch.
    pub fn update_config(&self, config: Config) -> Result<()> {
        config.validate()?;
        self.apply_config(config);

        Ok(())
    }

    fn apply_config(&self, config: Config) -> Arc<Config> {
        let config = Arc::new(config);

        *self
            .config
            .lock()
            .expect("`ModeSupervisor` config mutex can't be poisoned") = config.clone();

        self.coordinator.update_config(config.clone());
        self.local.update_config(config.clone());
        self.remote.update_config(config.clone());

        self.config_listeners.notify(config.clone());

        config
    }

    /// Cancels a switch in progress, disconnects every source, lowers both tiers and returns to
    /// [`SupervisorPhase::Idle`]. Switch requests made meanwhile are ignored.
    pub async fn shutdown(&self) {
        tracing::info!("supervisor shutting down");

        self.phase_manager.begin_shutdown();

        self.disconnect_sources().await;
        self.coordinator.set_gui_connected(false);

        self.phase_manager.end_shutdown();
    }

    /// Registers a listener notified with every new config, including device selections made
    /// during a switch.
    pub fn add_config_listener(&self, listener: Listener<Arc<Config>>) -> bool {
        self.config_listeners.add(listener)
    }

    pub fn remove_config_listener(&self, listener: &Listener<Arc<Config>>) -> bool {
        self.config_listeners.remove(listener)
    }
}
