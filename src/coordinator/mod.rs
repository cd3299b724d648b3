pub(crate) mod engine;
pub(crate) mod registry;
pub(crate) mod state;

pub use engine::ConnectionCoordinator;
pub use registry::{Listener, ListenerRegistry};
pub use state::{ConnectionState, Sample};
