use std::{
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, ThreadId},
    time::{Duration, Instant},
};

use super::{ElectrodeId, Resource};
use crate::error::{ResourceError, ResourceResult};

#[derive(Default)]
struct Slot {
    locked: bool,
    // Diagnostics only, never consulted by the protocol
    holder: Option<ThreadId>,
}

/// A charging electrode: the production `Resource`.
///
/// The held/unheld flag lives behind a std mutex and waiters park on a condvar,
/// so a blocked MAV costs no CPU. `notify_one` on release hands the electrode to
/// exactly one waiter; a waiter that wakes spuriously re-checks the flag.
pub struct Electrode {
    id: ElectrodeId,
    slot: Mutex<Slot>,
    freed: Condvar,
}

impl Electrode {
    pub fn new(id: ElectrodeId) -> Self {
        Self {
            id,
            slot: Mutex::new(Slot::default()),
            freed: Condvar::new(),
        }
    }

    /// Thread that last claimed the electrode, while it is held.
    pub fn holder(&self) -> Option<ThreadId> {
        self.slot().holder
    }

    // The slot is two plain fields flipped together, a panicking holder can't tear it
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(slot: &mut Slot) {
        slot.locked = true;
        slot.holder = Some(thread::current().id());
    }
}

impl Resource for Electrode {
    fn id(&self) -> ElectrodeId {
        self.id
    }

    fn acquire(&self) {
        let slot = self.slot();
        let mut slot = self
            .freed
            .wait_while(slot, |s| s.locked)
            .unwrap_or_else(PoisonError::into_inner);
        Self::claim(&mut slot);
        tracing::trace!(electrode = %self.id, "acquired");
    }

    fn try_acquire(&self) -> bool {
        let mut slot = self.slot();
        if slot.locked {
            return false;
        }
        Self::claim(&mut slot);
        true
    }

    fn acquire_timeout(&self, timeout: Duration) -> ResourceResult<()> {
        let start = Instant::now();
        let slot = self.slot();
        let (mut slot, res) = self
            .freed
            .wait_timeout_while(slot, timeout, |s| s.locked)
            .unwrap_or_else(PoisonError::into_inner);
        if res.timed_out() && slot.locked {
            return Err(ResourceError::AcquisitionTimeout {
                electrode: self.id,
                waited: start.elapsed(),
                holder: slot.holder,
            });
        }
        Self::claim(&mut slot);
        Ok(())
    }

    fn release(&self) -> ResourceResult<()> {
        let mut slot = self.slot();
        if !slot.locked {
            return Err(ResourceError::NotHeld {
                electrode: self.id,
            });
        }
        let me = thread::current().id();
        if slot.holder != Some(me) {
            tracing::warn!(
                electrode = %self.id,
                holder = ?slot.holder,
                releaser = ?me,
                "electrode released by a thread other than its holder"
            );
        }
        slot.locked = false;
        slot.holder = None;
        drop(slot);
        self.freed.notify_one();
        Ok(())
    }

    fn is_locked(&self) -> bool {
        self.slot().locked
    }
}
