use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        mpsc, Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use rand::Rng;
use tracing::{debug, info, info_span, warn};

use crate::error::{AgentError, AgentResult, ResourceError};
use crate::sync::{acquisition_order, Resource, ResourceGuard};

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MavId(pub usize);

impl fmt::Display for MavId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MAV {}", self.0)
    }
}

/// Protocol phase of a MAV. `Idle` before start and after it lands for good.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum AgentState {
    #[default]
    Idle = 0,
    Flying = 1,
    Waiting = 2,
    Charging = 3,
}

impl AgentState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Flying,
            2 => Self::Waiting,
            3 => Self::Charging,
            _ => Self::Idle,
        }
    }
}

// Single atomic store per transition, so an observer never sees anything in between
#[derive(Debug, Default)]
struct StateCell(AtomicU8);

impl StateCell {
    fn get(&self) -> AgentState {
        AgentState::from_u8(self.0.load(Ordering::SeqCst))
    }
    fn set(&self, s: AgentState) {
        self.0.store(s as u8, Ordering::SeqCst);
    }
}

/// Cooperative cancellation. The MAV only looks at it between phases.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-MAV timing.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct FlightPlan {
    /// Mission length before landing at the station.
    pub fly: Duration,
    /// Time spent on the pad holding both electrodes.
    pub charge: Duration,
    /// Up to this much extra flight, drawn uniformly per mission.
    pub fly_jitter: Duration,
    /// Bounded wait per electrode. On expiry the MAV gives back what it holds
    /// and goes around for another mission; `None` waits as long as it takes.
    pub patience: Option<Duration>,
}

impl Default for FlightPlan {
    fn default() -> Self {
        Self {
            fly: Duration::from_millis(500),
            charge: Duration::from_millis(1500),
            fly_jitter: Duration::ZERO,
            patience: None,
        }
    }
}

impl FlightPlan {
    pub fn new(fly: Duration, charge: Duration) -> Self {
        Self {
            fly,
            charge,
            ..Self::default()
        }
    }

    fn mission_time(&self, rng: &mut impl Rng) -> Duration {
        if self.fly_jitter.is_zero() {
            self.fly
        } else {
            self.fly
                .saturating_add(rng.gen_range(Duration::ZERO..=self.fly_jitter))
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentReport {
    pub mav: MavId,
    /// Completed charge cycles.
    pub cycles: u64,
    /// Approaches abandoned because `patience` ran out.
    pub aborted_waits: u64,
}

/// How a MAV thread ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentOutcome {
    Finished(AgentReport),
    Faulted(AgentError),
    Panicked,
}

/// A MAV bound to two electrodes, not yet flying.
pub struct Agent<R: Resource> {
    id: MavId,
    left: Arc<R>,
    right: Arc<R>,
    plan: FlightPlan,
    state: Arc<StateCell>,
    stop: StopFlag,
    cycles: Arc<AtomicU64>,
}

impl<R: Resource + 'static> Agent<R> {
    pub fn new(id: MavId, left: Arc<R>, right: Arc<R>, plan: FlightPlan) -> AgentResult<Self> {
        if left.id() == right.id() {
            return Err(AgentError::SameElectrode {
                mav: id,
                electrode: left.id(),
            });
        }
        Ok(Self {
            id,
            left,
            right,
            plan,
            state: Arc::default(),
            stop: StopFlag::default(),
            cycles: Arc::default(),
        })
    }

    pub fn id(&self) -> MavId {
        self.id
    }

    pub fn state(&self) -> AgentState {
        self.state.get()
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Launch the MAV on its own thread.
    pub fn spawn(self) -> AgentResult<AgentHandle> {
        let (tx, done) = mpsc::channel();
        let id = self.id;
        let state = self.state.clone();
        let stop = self.stop.clone();
        let cycles = self.cycles.clone();
        let thread = thread::Builder::new()
            .name(format!("mav-{}", id.0))
            .spawn(move || {
                // A closed channel tells the joiner the thread unwound
                let _ = tx.send(self.run());
            })
            .map_err(|e| AgentError::Spawn {
                mav: id,
                reason: e.to_string(),
            })?;
        Ok(AgentHandle {
            id,
            state,
            stop,
            cycles,
            done,
            thread,
        })
    }

    fn run(self) -> AgentResult<AgentReport> {
        let span = info_span!("mav", id = self.id.0);
        let _enter = span.enter();
        let _landing = Landing(&self.state);
        info!(
            left = %self.left.id(),
            right = %self.right.id(),
            "taking off"
        );

        let mut report = AgentReport {
            mav: self.id,
            cycles: 0,
            aborted_waits: 0,
        };
        let mut rng = rand::thread_rng();
        loop {
            self.state.set(AgentState::Flying);
            debug!("flying");
            thread::sleep(self.plan.mission_time(&mut rng));
            if self.stop.is_stopped() {
                break;
            }

            self.state.set(AgentState::Waiting);
            debug!("waiting for electrodes");
            if self.charge()? {
                report.cycles += 1;
                self.cycles.store(report.cycles, Ordering::SeqCst);
            } else {
                report.aborted_waits += 1;
            }
            if self.stop.is_stopped() {
                break;
            }
        }
        info!(cycles = report.cycles, aborted = report.aborted_waits, "landed");
        Ok(report)
    }

    /// One pass on the pad. `Ok(false)` means the MAV went around without charging.
    fn charge(&self) -> AgentResult<bool> {
        let (first, second) = acquisition_order(&*self.left, &*self.right);
        let Some(first) = self.approach(first)? else {
            return Ok(false);
        };
        let Some(second) = self.approach(second)? else {
            first.unlock()?;
            return Ok(false);
        };

        self.state.set(AgentState::Charging);
        debug!("charging");
        thread::sleep(self.plan.charge);

        // On a failed unlock the other guard still releases as it drops
        second.unlock()?;
        first.unlock()?;
        Ok(true)
    }

    fn approach<'a>(&self, electrode: &'a R) -> AgentResult<Option<ResourceGuard<'a, R>>> {
        let Some(patience) = self.plan.patience else {
            return Ok(Some(electrode.lock()));
        };
        match electrode.lock_timeout(patience) {
            Ok(guard) => Ok(Some(guard)),
            Err(e @ ResourceError::AcquisitionTimeout { .. }) => {
                warn!(error = %e, "going around");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

// Back to Idle on every way out of `run`, unwinding included
struct Landing<'a>(&'a StateCell);

impl Drop for Landing<'_> {
    fn drop(&mut self) {
        self.0.set(AgentState::Idle);
    }
}

/// A running MAV, observable from any thread.
#[derive(Debug)]
pub struct AgentHandle {
    id: MavId,
    state: Arc<StateCell>,
    stop: StopFlag,
    cycles: Arc<AtomicU64>,
    done: mpsc::Receiver<AgentResult<AgentReport>>,
    thread: JoinHandle<()>,
}

impl AgentHandle {
    pub fn id(&self) -> MavId {
        self.id
    }

    pub fn state(&self) -> AgentState {
        self.state.get()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait at most `timeout` for the thread to end. Gives the handle back on timeout.
    pub fn join_timeout(self, timeout: Duration) -> Result<AgentOutcome, Self> {
        let res = match self.done.recv_timeout(timeout) {
            Ok(res) => Some(res),
            Err(mpsc::RecvTimeoutError::Disconnected) => None,
            Err(mpsc::RecvTimeoutError::Timeout) => return Err(self),
        };
        // Result in hand or the thread unwound, either way it is on its way out
        let _ = self.thread.join();
        Ok(match res {
            Some(Ok(report)) => AgentOutcome::Finished(report),
            Some(Err(e)) => {
                tracing::error!(mav = %self.id, error = %e, "MAV faulted");
                AgentOutcome::Faulted(e)
            }
            None => AgentOutcome::Panicked,
        })
    }
}
