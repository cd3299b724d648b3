use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::time;

use super::AbortOnDropHandle;

#[derive(Debug, Default)]
struct TimerSlot {
    generation: u64,
    pending: Option<AbortOnDropHandle<()>>,
}

/// Cancellable one-shot deadline.
///
/// Re-arming replaces the pending deadline, so at most one expiry callback can be outstanding.
/// A deadline that was replaced or cancelled never fires, even if its sleep already elapsed.
#[derive(Debug, Default)]
pub(crate) struct LivenessTimer {
    slot: Arc<Mutex<TimerSlot>>,
}

impl LivenessTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_slot(slot: &Mutex<TimerSlot>) -> MutexGuard<'_, TimerSlot> {
        slot.lock().expect("`LivenessTimer` mutex can't be poisoned")
    }

    /// Schedules `on_expire` to run after `duration`, cancelling any pending deadline.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn arm<F>(&self, duration: time::Duration, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slot_guard = Self::lock_slot(&self.slot);
        slot_guard.generation += 1;

        let generation = slot_guard.generation;
        let slot = Arc::downgrade(&self.slot);

        let handle = tokio::spawn(Self::expire_after(slot, generation, duration, on_expire));

        // Replacing the previous handle aborts its sleep
        slot_guard.pending = Some(handle.into());
    }

    async fn expire_after<F>(
        slot: Weak<Mutex<TimerSlot>>,
        generation: u64,
        duration: time::Duration,
        on_expire: F,
    ) where
        F: FnOnce() + Send + 'static,
    {
        time::sleep(duration).await;

        let Some(slot) = slot.upgrade() else {
            // Timer was dropped
            return;
        };

        let finished = {
            let mut slot_guard = Self::lock_slot(&slot);
            if slot_guard.generation != generation {
                return;
            }
            slot_guard.pending.take()
        };

        on_expire();

        drop(finished);
    }

    /// Cancels the pending deadline, if any. Calling it repeatedly is a no-op.
    pub fn cancel(&self) {
        let mut slot_guard = Self::lock_slot(&self.slot);
        slot_guard.generation += 1;
        slot_guard.pending = None;
    }

    pub fn is_armed(&self) -> bool {
        Self::lock_slot(&self.slot).pending.is_some()
    }
}
