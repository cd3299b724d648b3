pub(crate) mod engine;
pub(crate) mod error;
pub(crate) mod state;

pub use engine::{ModeSupervisor, SwitchOutcome};
pub use state::{SupervisorPhase, SupervisorReader, SupervisorReceiver, SupervisorUpdate};
