pub mod electrode;
#[cfg(test)]
pub(crate) mod gated;

use std::{fmt, marker::PhantomData, time::Duration};

use crate::error::ResourceResult;

pub use electrode::Electrode;

/// Position of an electrode on the station circle.
///
/// The derived `Ord` is the process-wide acquisition order: whoever needs two
/// electrodes takes the lower id first, so no cycle of waiters can form.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ElectrodeId(pub usize);

impl ElectrodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ElectrodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "electrode {}", self.0)
    }
}

/// Single-holder mutual exclusion slot.
///
/// The contract every implementation honors
/// 1. Mutual Exclusion - `acquire` blocks (never spins) until the slot is free and exactly one waiter claims it
///    per release.
/// 2. No silent double release - `release` on an unheld slot is `ResourceError::NotHeld`, never a no-op.
/// 3. No side effect on failure - a `try_acquire` or `acquire_timeout` that loses leaves the slot untouched.
pub trait Resource: Send + Sync {
    fn id(&self) -> ElectrodeId;
    fn acquire(&self);
    fn try_acquire(&self) -> bool;
    fn acquire_timeout(&self, timeout: Duration) -> ResourceResult<()>;
    fn release(&self) -> ResourceResult<()>;
    fn is_locked(&self) -> bool;

    // Scoped forms: the guard releases on every exit path, unwinding included
    fn lock(&self) -> ResourceGuard<'_, Self> {
        self.acquire();
        ResourceGuard::new(self)
    }
    fn try_lock(&self) -> Option<ResourceGuard<'_, Self>> {
        self.try_acquire().then(|| ResourceGuard::new(self))
    }
    fn lock_timeout(&self, timeout: Duration) -> ResourceResult<ResourceGuard<'_, Self>> {
        self.acquire_timeout(timeout)?;
        Ok(ResourceGuard::new(self))
    }
}

/// Holds one acquisition of `resource` until dropped or explicitly unlocked.
///
/// `!Send`: a holder releases on the thread that acquired.
#[must_use = "dropping the guard releases the electrode immediately"]
pub struct ResourceGuard<'a, R: Resource + ?Sized> {
    resource: &'a R,
    released: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a, R: Resource + ?Sized> ResourceGuard<'a, R> {
    fn new(resource: &'a R) -> Self {
        Self {
            resource,
            released: false,
            _not_send: PhantomData,
        }
    }

    pub fn id(&self) -> ElectrodeId {
        self.resource.id()
    }

    /// Release now and surface a contract violation instead of logging it.
    pub fn unlock(mut self) -> ResourceResult<()> {
        // drop() must not release a second time
        self.released = true;
        self.resource.release()
    }
}

impl<R: Resource + ?Sized> Drop for ResourceGuard<'_, R> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.resource.release() {
            tracing::error!(error = %e, "electrode guard dropped on an unheld electrode");
        }
    }
}

/// Orders a pair by `ElectrodeId`, regardless of which side of the MAV each sits on.
pub fn acquisition_order<'a, R: Resource + ?Sized>(a: &'a R, b: &'a R) -> (&'a R, &'a R) {
    if b.id() < a.id() {
        (b, a)
    } else {
        (a, b)
    }
}
