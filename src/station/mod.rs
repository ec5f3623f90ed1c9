//! The charging station: electrodes on a circle, MAVs bound to pairs of them.
//!
//! The station only wires things up and manages the fleet's lifecycle. All
//! locking happens inside the MAVs, through the `Resource` contract.

pub mod agent;

use std::{
    collections::HashSet,
    mem,
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{info, warn};

pub use agent::{Agent, AgentHandle, AgentOutcome, AgentReport, AgentState, FlightPlan, MavId, StopFlag};

use crate::error::{StationError, StationResult};
use crate::sync::{Electrode, ElectrodeId, Resource};

/// Which two electrodes each MAV charges from.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Assignment {
    /// MAV `i` takes electrodes `i` and `i + 1`, wrapping around the circle.
    #[default]
    Adjacent,
    /// One `(left, right)` electrode index pair per MAV.
    Explicit(Vec<(usize, usize)>),
}

impl Assignment {
    pub fn pairs(&self, electrode_count: usize, mav_count: usize) -> StationResult<Vec<(usize, usize)>> {
        match self {
            Assignment::Adjacent => {
                if electrode_count == 0 {
                    return Err(StationError::Config("no electrodes to assign".into()));
                }
                Ok((0..mav_count)
                    .map(|i| (i % electrode_count, (i + 1) % electrode_count))
                    .collect())
            }
            Assignment::Explicit(pairs) => {
                if pairs.len() != mav_count {
                    return Err(StationError::Config(format!(
                        "{} electrode pairs for {mav_count} MAVs",
                        pairs.len()
                    )));
                }
                Ok(pairs.clone())
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StationConfig {
    pub electrode_count: usize,
    pub mav_count: usize,
    /// Shared by every MAV.
    pub plan: FlightPlan,
    pub assignment: Assignment,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            electrode_count: 5,
            mav_count: 5,
            plan: FlightPlan::default(),
            assignment: Assignment::Adjacent,
        }
    }
}

/// What every MAV that landed did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShutdownReport {
    pub outcomes: Vec<(MavId, AgentOutcome)>,
}

impl ShutdownReport {
    pub fn total_cycles(&self) -> u64 {
        self.outcomes
            .iter()
            .filter_map(|(_, o)| match o {
                AgentOutcome::Finished(r) => Some(r.cycles),
                _ => None,
            })
            .sum()
    }

    /// MAVs that ended on a fault or a panic rather than a clean landing.
    pub fn faulted(&self) -> Vec<MavId> {
        self.outcomes
            .iter()
            .filter(|(_, o)| !matches!(o, AgentOutcome::Finished(_)))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.faulted().is_empty()
    }
}

enum Fleet<R: Resource> {
    Grounded(Vec<Agent<R>>),
    Airborne(Vec<AgentHandle>),
    Landed,
}

pub struct Station<R: Resource = Electrode> {
    electrodes: Vec<Arc<R>>,
    fleet: Fleet<R>,
}

impl Station<Electrode> {
    pub fn new(config: StationConfig) -> StationResult<Self> {
        let pairs = config
            .assignment
            .pairs(config.electrode_count, config.mav_count)?;
        let electrodes = (0..config.electrode_count)
            .map(|i| Arc::new(Electrode::new(ElectrodeId(i))))
            .collect();
        Self::with_electrodes(electrodes, &pairs, config.plan)
    }
}

impl<R: Resource + 'static> Station<R> {
    /// Build a station over any electrode implementation. `pairs[i]` indexes
    /// into `electrodes` for MAV `i`.
    pub fn with_electrodes(
        electrodes: Vec<Arc<R>>,
        pairs: &[(usize, usize)],
        plan: FlightPlan,
    ) -> StationResult<Self> {
        if electrodes.len() < 2 {
            return Err(StationError::Config(format!(
                "need at least 2 electrodes, got {}",
                electrodes.len()
            )));
        }
        if pairs.is_empty() {
            return Err(StationError::Config("no MAVs to serve".into()));
        }
        // The acquisition order is only total if ids are unique
        let mut seen = HashSet::new();
        if let Some(dup) = electrodes.iter().map(|e| e.id()).find(|id| !seen.insert(*id)) {
            return Err(StationError::Config(format!("{dup} appears twice")));
        }

        let agents = pairs
            .iter()
            .enumerate()
            .map(|(i, &(l, r))| {
                let (Some(left), Some(right)) = (electrodes.get(l), electrodes.get(r)) else {
                    return Err(StationError::Config(format!(
                        "MAV {i} bound to ({l}, {r}) but the station has {} electrodes",
                        electrodes.len()
                    )));
                };
                Ok(Agent::new(MavId(i), left.clone(), right.clone(), plan.clone())?)
            })
            .collect::<StationResult<Vec<_>>>()?;

        Ok(Self {
            electrodes,
            fleet: Fleet::Grounded(agents),
        })
    }

    pub fn electrodes(&self) -> &[Arc<R>] {
        &self.electrodes
    }

    pub fn is_running(&self) -> bool {
        matches!(self.fleet, Fleet::Airborne(_))
    }

    /// Current phase of every MAV, for whoever is drawing the station.
    pub fn states(&self) -> Vec<(MavId, AgentState)> {
        match &self.fleet {
            Fleet::Grounded(agents) => agents.iter().map(|a| (a.id(), a.state())).collect(),
            Fleet::Airborne(handles) => handles.iter().map(|h| (h.id(), h.state())).collect(),
            Fleet::Landed => Vec::new(),
        }
    }

    /// Launch every MAV and return immediately.
    pub fn start(&mut self) -> StationResult<()> {
        let agents = match mem::replace(&mut self.fleet, Fleet::Landed) {
            Fleet::Grounded(agents) => agents,
            other => {
                self.fleet = other;
                return Err(StationError::AlreadyStarted);
            }
        };
        info!(mavs = agents.len(), electrodes = self.electrodes.len(), "opening station");

        let mut handles = Vec::with_capacity(agents.len());
        for agent in agents {
            match agent.spawn() {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    // Whatever launched lands on its own; the station stays closed
                    handles.iter().for_each(AgentHandle::stop);
                    return Err(e.into());
                }
            }
        }
        self.fleet = Fleet::Airborne(handles);
        Ok(())
    }

    /// Raise every stop flag, then wait for the fleet against a single
    /// deadline `timeout` from now (`Duration::MAX` waits indefinitely).
    ///
    /// MAVs still out at the deadline are a liveness fault:
    /// `ShutdownTimeout` names them and carries the report of those that did
    /// land. The stragglers stay with the station, so `states()` still shows
    /// them and a later `stop_and_join` can collect them.
    pub fn stop_and_join(&mut self, timeout: Duration) -> StationResult<ShutdownReport> {
        let handles = match mem::replace(&mut self.fleet, Fleet::Landed) {
            Fleet::Airborne(handles) => handles,
            other => {
                self.fleet = other;
                return Err(StationError::NotRunning);
            }
        };
        handles.iter().for_each(AgentHandle::stop);
        info!(mavs = handles.len(), ?timeout, "closing station");

        let deadline = Instant::now().checked_add(timeout);
        let mut outcomes = Vec::with_capacity(handles.len());
        let mut stuck = Vec::new();
        for handle in handles {
            let id = handle.id();
            let wait = deadline.map_or(Duration::MAX, |d| d.saturating_duration_since(Instant::now()));
            match handle.join_timeout(wait) {
                Ok(outcome) => outcomes.push((id, outcome)),
                Err(handle) => {
                    warn!(mav = %id, state = ?handle.state(), "did not land before the deadline");
                    stuck.push(handle);
                }
            }
        }
        let report = ShutdownReport { outcomes };
        if stuck.is_empty() {
            return Ok(report);
        }
        let mavs = stuck.iter().map(AgentHandle::id).collect();
        self.fleet = Fleet::Airborne(stuck);
        Err(StationError::ShutdownTimeout { mavs, report })
    }
}

impl<R: Resource> Drop for Station<R> {
    fn drop(&mut self) {
        if let Fleet::Airborne(handles) = &self.fleet {
            handles.iter().for_each(AgentHandle::stop);
        }
    }
}
