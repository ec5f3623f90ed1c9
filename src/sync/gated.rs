use std::{
    sync::{Condvar, Mutex, PoisonError},
    time::{Duration, Instant},
};

use super::{Electrode, ElectrodeId, Resource};
use crate::error::{ResourceError, ResourceResult};

/// Electrode whose acquisition is withheld until the test grants a permit.
///
/// One `grant()` lets one acquisition through. Everything past the gate is a
/// real `Electrode`, so release semantics are identical.
pub(crate) struct GatedElectrode {
    inner: Electrode,
    permits: Mutex<usize>,
    granted: Condvar,
}

impl GatedElectrode {
    pub(crate) fn new(id: ElectrodeId) -> Self {
        Self {
            inner: Electrode::new(id),
            permits: Mutex::new(0),
            granted: Condvar::new(),
        }
    }

    pub(crate) fn grant(&self) {
        *self.permits.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        self.granted.notify_one();
    }
}

impl Resource for GatedElectrode {
    fn id(&self) -> ElectrodeId {
        self.inner.id()
    }

    fn acquire(&self) {
        let permits = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        let mut permits = self
            .granted
            .wait_while(permits, |p| *p == 0)
            .unwrap_or_else(PoisonError::into_inner);
        *permits -= 1;
        drop(permits);
        self.inner.acquire();
    }

    fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        if *permits == 0 || !self.inner.try_acquire() {
            return false;
        }
        *permits -= 1;
        true
    }

    fn acquire_timeout(&self, timeout: Duration) -> ResourceResult<()> {
        let start = Instant::now();
        let permits = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut permits, res) = self
            .granted
            .wait_timeout_while(permits, timeout, |p| *p == 0)
            .unwrap_or_else(PoisonError::into_inner);
        if res.timed_out() && *permits == 0 {
            return Err(ResourceError::AcquisitionTimeout {
                electrode: self.id(),
                waited: start.elapsed(),
                holder: self.inner.holder(),
            });
        }
        *permits -= 1;
        drop(permits);
        let res = self
            .inner
            .acquire_timeout(timeout.saturating_sub(start.elapsed()));
        if res.is_err() {
            // Past the gate but not the electrode: the permit goes back
            self.grant();
        }
        res
    }

    fn release(&self) -> ResourceResult<()> {
        self.inner.release()
    }

    fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ResourceError;
    use crate::sync::{gated::GatedElectrode, ElectrodeId, Resource};
    use std::{sync::Arc, thread, time::Duration};

    #[test]
    fn withholds_until_granted() {
        let e = Arc::new(GatedElectrode::new(ElectrodeId(0)));
        assert!(!e.try_acquire());
        let th = thread::spawn({
            let e = e.clone();
            move || {
                let _guard = e.lock();
            }
        });
        thread::sleep(Duration::from_millis(50));
        assert!(!th.is_finished());
        e.grant();
        th.join().unwrap();
        assert!(!e.is_locked());
    }

    #[test]
    fn honors_release_contract() {
        let e = GatedElectrode::new(ElectrodeId(1));
        assert_eq!(
            e.release(),
            Err(ResourceError::NotHeld {
                electrode: ElectrodeId(1)
            })
        );
        e.grant();
        e.grant();
        assert!(e.try_acquire());
        assert!(!e.try_acquire());
        e.release().unwrap();
        assert!(e.try_acquire());
        e.release().unwrap();
    }

    #[test]
    fn permit_survives_inner_timeout() {
        let e = GatedElectrode::new(ElectrodeId(3));
        e.grant();
        e.grant();
        assert!(e.try_acquire());

        // Through the gate, then stuck behind our own hold
        assert!(matches!(
            e.acquire_timeout(Duration::from_millis(20)),
            Err(ResourceError::AcquisitionTimeout { .. })
        ));
        e.release().unwrap();
        assert!(e.try_acquire());
        e.release().unwrap();
    }

    #[test]
    fn times_out_without_permit() {
        let e = GatedElectrode::new(ElectrodeId(2));
        assert!(matches!(
            e.acquire_timeout(Duration::from_millis(20)),
            Err(ResourceError::AcquisitionTimeout { .. })
        ));
        assert!(!e.is_locked());
    }
}
