use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, Weak},
};

use tokio::{runtime::Handle, time};

use crate::{
    config::{Config, SourceType},
    sink::{HeartRateNote, OutputSinks, PRESENCE_NOTE, PRESENCE_VELOCITY, WrappedOutputSink},
    util::{AbortOnDropHandle, LivenessTimer},
};

use super::{
    registry::{Listener, ListenerRegistry},
    state::{ConnectionState, Sample},
};

#[derive(Debug)]
struct CoordinatorState {
    connection: ConnectionState,
    last_sample: Option<Sample>,
    // Bumped on every staleness re-arm and cancel, so an expiry that lost a race is discarded.
    // The timer is only armed or cancelled while this lock is held, so arms happen in epoch order.
    staleness_epoch: u64,
    status_rebroadcast: Option<AbortOnDropHandle<()>>,
}

/// Hub of the relay.
///
/// Owns the latest [`Sample`], the two-tier [`ConnectionState`], the staleness timer, the periodic
/// presence rebroadcast and three listener registries (samples, engine state and gui state). It
/// drives both output sinks.
///
/// All methods are synchronous. The internal lock is only held while the state changes, never
/// while listeners run or sinks are called. Sink calls are spawned on the current Tokio runtime,
/// so state-changing methods must be called from within one.
pub struct ConnectionCoordinator {
    this: Weak<Self>,
    config: Mutex<Arc<Config>>,
    state: Mutex<CoordinatorState>,
    staleness_timer: LivenessTimer,
    level_sink: WrappedOutputSink,
    note_sink: WrappedOutputSink,
    sample_listeners: ListenerRegistry<Sample>,
    connection_listeners: ListenerRegistry<ConnectionState>,
    gui_listeners: ListenerRegistry<bool>,
}

impl ConnectionCoordinator {
    pub fn new(config: Arc<Config>, sinks: OutputSinks) -> Arc<Self> {
        let (level_sink, note_sink) = WrappedOutputSink::pair(sinks);
        let state = CoordinatorState {
            connection: ConnectionState::new(config.mode()),
            last_sample: None,
            staleness_epoch: 0,
            status_rebroadcast: None,
        };

        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            config: Mutex::new(config),
            state: Mutex::new(state),
            staleness_timer: LivenessTimer::new(),
            level_sink,
            note_sink,
            sample_listeners: ListenerRegistry::new("sample"),
            connection_listeners: ListenerRegistry::new("connection"),
            gui_listeners: ListenerRegistry::new("gui"),
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state
            .lock()
            .expect("`ConnectionCoordinator` state mutex can't be poisoned")
    }

    fn lock_config(&self) -> MutexGuard<'_, Arc<Config>> {
        self.config
            .lock()
            .expect("`ConnectionCoordinator` config mutex can't be poisoned")
    }

    /// Returns the config currently in use.
    pub fn config(&self) -> Arc<Config> {
        self.lock_config().clone()
    }

    /// Returns a snapshot of the connection state.
    pub fn state(&self) -> ConnectionState {
        self.lock_state().connection
    }

    /// Returns the most recent accepted sample.
    pub fn last_sample(&self) -> Option<Sample> {
        self.lock_state().last_sample
    }

    /// Replaces the config. Timers, connections and listeners are left untouched; new values apply
    /// from the next sample or state transition on.
    pub fn update_config(&self, config: Arc<Config>) {
        *self.lock_config() = config;
    }

    /// Declares which source type samples are accepted from.
    ///
    /// Called when a new source is about to be started, so samples still in flight from the
    /// previous source are dropped.
    pub fn declare_source(&self, source_type: SourceType) {
        let mut state = self.lock_state();

        if state.connection.source_type == source_type {
            return;
        }
        if state.connection.engine_connected {
            tracing::warn!(
                current = %state.connection.source_type,
                requested = %source_type,
                "declaring a new source while the engine is connected"
            );
        }

        state.connection.source_type = source_type;
    }

    /// Ingests one heart-rate reading coming from `origin`.
    ///
    /// Samples from a source other than the declared one and negative or non-finite values are
    /// dropped. An accepted sample re-arms the staleness timer, raises the gui tier if it was down,
    /// reaches the sample listeners and, while the engine is connected, both sinks.
    pub fn on_sample(&self, bpm: f64, origin: SourceType) {
        if !bpm.is_finite() || bpm < 0.0 {
            tracing::warn!(bpm, %origin, "dropping invalid sample");
            return;
        }

        let config = self.config();

        let (sample, gui_raised, engine_connected) = {
            let mut state = self.lock_state();

            if state.connection.source_type != origin {
                tracing::debug!(
                    %origin,
                    active = %state.connection.source_type,
                    "dropping sample from inactive source"
                );
                return;
            }

            let sample = Sample::new(bpm);
            state.last_sample = Some(sample);
            self.arm_staleness(&mut state, config.timeout());

            let gui_raised = !state.connection.gui_connected;
            state.connection.gui_connected = true;

            (sample, gui_raised, state.connection.engine_connected)
        };

        if gui_raised {
            tracing::info!(%origin, "signal live");
            self.dispatch_presence(&config, true);
            self.gui_listeners.notify(true);
        }

        self.sample_listeners.notify(sample);

        if engine_connected {
            self.dispatch_sample(&config, bpm);
        }
    }

    /// Sets the engine tier.
    ///
    /// Repeating the current value is a no-op, and a disconnect reported by a source type other
    /// than the active one is ignored. On a transition presence is re-sent from the gui tier, the
    /// periodic rebroadcast is started or stopped, and connection listeners are notified.
    pub fn set_engine_connected(&self, connected: bool, source_type: SourceType) {
        let config = self.config();

        let snapshot = {
            let mut state = self.lock_state();

            if state.connection.engine_connected == connected {
                tracing::debug!(connected, %source_type, "engine state unchanged");
                return;
            }
            if !connected && state.connection.source_type != source_type {
                tracing::debug!(
                    %source_type,
                    active = %state.connection.source_type,
                    "ignoring disconnect from inactive source"
                );
                return;
            }

            state.connection.engine_connected = connected;
            state.connection.source_type = source_type;

            if connected {
                state.status_rebroadcast = self.spawn_status_rebroadcast(config.status_interval());
            } else {
                state.status_rebroadcast = None;
            }

            if connected && state.connection.gui_connected {
                self.arm_staleness(&mut state, config.timeout());
            }

            state.connection
        };

        tracing::info!("engine {}: {snapshot}", if connected { "connected" } else { "disconnected" });

        self.dispatch_presence(&config, snapshot.gui_connected);
        self.connection_listeners.notify(snapshot);
    }

    /// Sets the gui tier. A transition re-sends presence and notifies gui listeners. Lowering it
    /// cancels the staleness timer.
    pub fn set_gui_connected(&self, connected: bool) {
        {
            let mut state = self.lock_state();

            if state.connection.gui_connected == connected {
                return;
            }

            state.connection.gui_connected = connected;
            if !connected {
                self.cancel_staleness(&mut state);
            }
        }

        tracing::info!(connected, "gui state changed");

        self.dispatch_presence(&self.config(), connected);
        self.gui_listeners.notify(connected);
    }

    /// Forces the engine tier down and stops both timers. The gui tier is left to the caller.
    pub fn disconnect(&self) {
        let source_type = {
            let mut state = self.lock_state();
            self.cancel_staleness(&mut state);
            state.status_rebroadcast = None;
            state.connection.source_type
        };

        self.set_engine_connected(false, source_type);
    }

    fn on_staleness_expired(&self, epoch: u64) {
        {
            let mut state = self.lock_state();

            if state.staleness_epoch != epoch || !state.connection.gui_connected {
                return;
            }

            state.connection.gui_connected = false;
        }

        tracing::info!("no sample within the staleness window, signal lost");

        self.dispatch_presence(&self.config(), false);
        self.gui_listeners.notify(false);
    }

    fn arm_staleness(&self, state: &mut CoordinatorState, timeout: time::Duration) {
        state.staleness_epoch += 1;

        let epoch = state.staleness_epoch;
        let this = self.this.clone();

        self.staleness_timer.arm(timeout, move || {
            if let Some(coordinator) = this.upgrade() {
                coordinator.on_staleness_expired(epoch);
            }
        });
    }

    fn cancel_staleness(&self, state: &mut CoordinatorState) {
        state.staleness_epoch += 1;
        self.staleness_timer.cancel();
    }

    fn spawn_status_rebroadcast(
        &self,
        period: time::Duration,
    ) -> Option<AbortOnDropHandle<()>> {
        let this = self.this.clone();
        let handle = Handle::try_current()
            .inspect_err(|e| tracing::warn!("status rebroadcast not started: {e}"))
            .ok()?;

        let task = handle.spawn(async move {
            let mut interval = time::interval_at(time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                let Some(coordinator) = this.upgrade() else {
                    return;
                };
                let gui_connected = coordinator.state().gui_connected;
                coordinator.dispatch_presence(&coordinator.config(), gui_connected);
            }
        });

        Some(task.into())
    }

    fn spawn_send(&self, send: impl Future<Output = ()> + Send + 'static) {
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(send);
            }
            Err(e) => tracing::warn!("sink dispatch skipped: {e}"),
        }
    }

    fn dispatch_presence(&self, config: &Config, present: bool) {
        let velocity = if present { PRESENCE_VELOCITY } else { 0 };

        self.spawn_send(
            self.level_sink
                .clone()
                .send_presence(config.presence_address().to_string(), present),
        );
        self.spawn_send(self.note_sink.clone().send_note(PRESENCE_NOTE, velocity));
    }

    fn dispatch_sample(&self, config: &Config, bpm: f64) {
        let level = (bpm / config.max_hr() as f64) as f32;
        let encoded = HeartRateNote::from_bpm(bpm);

        self.spawn_send(
            self.level_sink
                .clone()
                .send_level(config.level_address().to_string(), level),
        );
        self.spawn_send(
            self.note_sink
                .clone()
                .send_note(encoded.note(), encoded.velocity()),
        );
    }

    /// Registers a sample listener. Returns `false` if it was already registered.
    pub fn add_sample_listener(&self, listener: Listener<Sample>) -> bool {
        self.sample_listeners.add(listener)
    }

    pub fn remove_sample_listener(&self, listener: &Listener<Sample>) -> bool {
        self.sample_listeners.remove(listener)
    }

    /// Registers a listener notified on every engine tier transition.
    pub fn add_connection_listener(&self, listener: Listener<ConnectionState>) -> bool {
        self.connection_listeners.add(listener)
    }

    pub fn remove_connection_listener(&self, listener: &Listener<ConnectionState>) -> bool {
        self.connection_listeners.remove(listener)
    }

    /// Registers a listener notified on every gui tier transition.
    pub fn add_gui_listener(&self, listener: Listener<bool>) -> bool {
        self.gui_listeners.add(listener)
    }

    pub fn remove_gui_listener(&self, listener: &Listener<bool>) -> bool {
        self.gui_listeners.remove(listener)
    }
}
