use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    ptr,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::util::PanicPayload;

/// Shared callback handle. Registration identity is the identity of the `Arc`, so the same handle
/// must be kept around to remove it later.
pub type Listener<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Ordered set of listeners of one shape.
///
/// Adding a handle that is already present is a no-op, and removing an absent handle is tolerated.
/// Notification iterates over a snapshot, so listeners may add or remove listeners (including
/// themselves) while being notified. A panicking listener is logged and does not prevent the
/// remaining listeners from running.
pub struct ListenerRegistry<T> {
    name: &'static str,
    listeners: Mutex<Vec<Listener<T>>>,
}

impl<T> ListenerRegistry<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: Mutex::new(Vec::new()),
        }
    }

    fn lock_listeners(&self) -> MutexGuard<'_, Vec<Listener<T>>> {
        self.listeners
            .lock()
            .expect("`ListenerRegistry` mutex can't be poisoned")
    }

    fn same_listener(a: &Listener<T>, b: &Listener<T>) -> bool {
        ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
    }

    /// Registers `listener`. Returns `false` if it was already registered.
    pub fn add(&self, listener: Listener<T>) -> bool {
        let mut listeners = self.lock_listeners();

        if listeners.iter().any(|l| Self::same_listener(l, &listener)) {
            tracing::debug!(registry = self.name, "listener already registered");
            return false;
        }

        listeners.push(listener);
        true
    }

    /// Unregisters `listener`. Returns `false` if it was not registered.
    pub fn remove(&self, listener: &Listener<T>) -> bool {
        let mut listeners = self.lock_listeners();
        let len_before = listeners.len();

        listeners.retain(|l| !Self::same_listener(l, listener));

        listeners.len() != len_before
    }

    pub fn len(&self) -> usize {
        self.lock_listeners().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> ListenerRegistry<T> {
    pub fn notify(&self, value: T) {
        let snapshot = self.lock_listeners().clone();

        for listener in snapshot {
            let value = value.clone();
            if let Err(e) = panic::catch_unwind(AssertUnwindSafe(|| listener(value))) {
                tracing::error!(
                    registry = self.name,
                    "listener panicked: {}",
                    PanicPayload::from(e)
                );
            }
        }
    }
}

impl<T> fmt::Debug for ListenerRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}
