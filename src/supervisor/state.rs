use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::broadcast;

use crate::config::SourceType;

use super::error::SwitchError;

/// Lifecycle phase of the [`ModeSupervisor`](super::ModeSupervisor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SupervisorPhase {
    /// No source has been started, or the supervisor was shut down.
    #[default]
    Idle,
    /// The previous source is being torn down.
    SwitchingOut,
    /// The requested source is being connected.
    SwitchingIn,
    /// The given source is the active one.
    Active(SourceType),
}

impl SupervisorPhase {
    /// Returns `true` while a switch-over is in progress.
    pub fn is_switching(&self) -> bool {
        matches!(self, Self::SwitchingOut | Self::SwitchingIn)
    }

    /// Returns the active source type, if any.
    pub fn active_source(&self) -> Option<SourceType> {
        match self {
            Self::Active(source_type) => Some(*source_type),
            _ => None,
        }
    }
}

impl fmt::Display for SupervisorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::SwitchingOut => write!(f, "Switching out"),
            Self::SwitchingIn => write!(f, "Switching in"),
            Self::Active(source_type) => write!(f, "Active ({source_type})"),
        }
    }
}

/// Update events emitted by the [`ModeSupervisor`](super::ModeSupervisor).
#[derive(Debug, Clone)]
pub enum SupervisorUpdate {
    /// The supervisor phase has changed.
    Phase(SupervisorPhase),
    /// A switch-over failed. The phase update restoring the pre-switch phase follows.
    SwitchFailed(Arc<SwitchError>),
}

impl From<SupervisorPhase> for SupervisorUpdate {
    fn from(value: SupervisorPhase) -> Self {
        Self::Phase(value)
    }
}

pub(crate) type SupervisorTransmitter = broadcast::Sender<SupervisorUpdate>;

/// Receiver for subscribing to [`SupervisorUpdate`]s.
pub type SupervisorReceiver = broadcast::Receiver<SupervisorUpdate>;

/// Read-only access to the supervisor phase and its updates.
pub trait SupervisorReader: Send + Sync + 'static {
    /// Creates a new [`SupervisorReceiver`] for subscribing to supervisor updates.
    fn update_receiver(&self) -> SupervisorReceiver;

    /// Returns the current [`SupervisorPhase`] as a snapshot.
    fn phase_snapshot(&self) -> SupervisorPhase;
}

/// Handed out by [`SupervisorPhaseManager::begin_switch`]. A shutdown invalidates every ticket
/// issued before it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SwitchTicket {
    previous: SupervisorPhase,
    generation: u64,
}

impl SwitchTicket {
    /// Phase the switch started from.
    pub fn previous(&self) -> SupervisorPhase {
        self.previous
    }
}

#[derive(Debug, Default)]
struct PhaseState {
    phase: SupervisorPhase,
    // Bumped by every shutdown
    generation: u64,
    // Stays set until the running switch returns, even after a shutdown cancelled it
    switch_running: bool,
    shutting_down: bool,
}

#[derive(Debug)]
pub(crate) struct SupervisorPhaseManager {
    state: Mutex<PhaseState>,
    update_tx: SupervisorTransmitter,
}

impl SupervisorPhaseManager {
    pub fn new(update_tx: SupervisorTransmitter) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PhaseState::default()),
            update_tx,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, PhaseState> {
        self.state
            .lock()
            .expect("`SupervisorPhaseManager` mutex can't be poisoned")
    }

    fn send(&self, update: SupervisorUpdate) {
        // Ignore no-receivers errors
        let _ = self.update_tx.send(update);
    }

    /// Enters [`SupervisorPhase::SwitchingOut`], or returns `None` if a switch is still running
    /// or a shutdown is in progress.
    pub fn begin_switch(&self) -> Option<SwitchTicket> {
        let mut state_guard = self.lock_state();
        if state_guard.switch_running || state_guard.shutting_down {
            return None;
        }

        let ticket = SwitchTicket {
            previous: state_guard.phase,
            generation: state_guard.generation,
        };

        state_guard.switch_running = true;
        state_guard.phase = SupervisorPhase::SwitchingOut;
        drop(state_guard);

        self.send(SupervisorPhase::SwitchingOut.into());

        Some(ticket)
    }

    /// Returns `false` once a shutdown has cancelled the switch holding `ticket`.
    pub fn is_current(&self, ticket: &SwitchTicket) -> bool {
        self.lock_state().generation == ticket.generation
    }

    /// Moves a running switch to `new_phase`. Returns `false`, changing nothing, if the switch
    /// was cancelled.
    pub fn advance(&self, ticket: &SwitchTicket, new_phase: SupervisorPhase) -> bool {
        let mut state_guard = self.lock_state();
        if state_guard.generation != ticket.generation {
            return false;
        }

        state_guard.phase = new_phase;
        drop(state_guard);

        self.send(new_phase.into());

        true
    }

    /// Ends the switch holding `ticket` in `new_phase`. A cancelled switch leaves the phase to the
    /// shutdown. Returns whether the phase was applied.
    pub fn finish_switch(&self, ticket: &SwitchTicket, new_phase: SupervisorPhase) -> bool {
        let applied = self.advance(ticket, new_phase);
        self.lock_state().switch_running = false;
        applied
    }

    pub fn report_failure(&self, error: Arc<SwitchError>) {
        self.send(SupervisorUpdate::SwitchFailed(error));
    }

    /// Cancels the running switch, if any, and blocks new ones until
    /// [`end_shutdown`](Self::end_shutdown).
    pub fn begin_shutdown(&self) {
        let mut state_guard = self.lock_state();
        state_guard.generation += 1;
        state_guard.shutting_down = true;
    }

    pub fn end_shutdown(&self) {
        let mut state_guard = self.lock_state();
        state_guard.shutting_down = false;
        state_guard.phase = SupervisorPhase::Idle;
        drop(state_guard);

        self.send(SupervisorPhase::Idle.into());
    }
}

impl SupervisorReader for SupervisorPhaseManager {
    fn update_receiver(&self) -> SupervisorReceiver {
        self.update_tx.subscribe()
    }

    fn phase_snapshot(&self) -> SupervisorPhase {
        self.lock_state().phase
    }
}
