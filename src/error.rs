use std::thread::ThreadId;
use std::time::Duration;

use thiserror::Error;

use crate::station::{MavId, ShutdownReport};
use crate::sync::ElectrodeId;

/// Violations of the acquisition contract and bounded-wait expiry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Release on an electrode nobody holds. Always a protocol bug upstream.
    #[error("{electrode} released while not held")]
    NotHeld { electrode: ElectrodeId },

    #[error("gave up on {electrode} after {waited:?} (held by {holder:?})")]
    AcquisitionTimeout {
        electrode: ElectrodeId,
        waited: Duration,
        holder: Option<ThreadId>,
    },
}

pub type ResourceResult<T> = Result<T, ResourceError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error("{mav} bound to {electrode} twice")]
    SameElectrode { mav: MavId, electrode: ElectrodeId },

    #[error("could not launch {mav}: {reason}")]
    Spawn { mav: MavId, reason: String },
}

pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StationError {
    #[error("station configuration error: {0}")]
    Config(String),

    #[error("station already started")]
    AlreadyStarted,

    #[error("station is not running")]
    NotRunning,

    /// Liveness fault: `mavs` were still running at the join deadline.
    /// `report` holds whatever the rest of the fleet ended with, faults included.
    #[error("{} MAV(s) did not stop in time: {mavs:?}", mavs.len())]
    ShutdownTimeout {
        mavs: Vec<MavId>,
        report: ShutdownReport,
    },

    #[error(transparent)]
    Agent(#[from] AgentError),
}

pub type StationResult<T> = Result<T, StationError>;
