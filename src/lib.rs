//! A charging station shared by a fleet of MAVs.
//!
//! Electrodes sit evenly around a circle. Each MAV flies a mission, lands,
//! takes the two electrodes it is bound to, charges, gives them back and
//! takes off again. Neighbouring MAVs compete for the electrode between
//! them.
//!
//! - [`sync`]: the electrode as a blocking single-holder lock with a
//!   scope guard, and the global id order that rules out circular wait.
//! - [`station`]: the MAV state machine (`Flying -> Waiting -> Charging`)
//!   and the station that launches and lands the fleet.
//!
//! ```rust,ignore
//! let mut station = Station::new(StationConfig::default())?;
//! station.start()?;
//! // ... watch station.states() ...
//! let report = station.stop_and_join(Duration::from_secs(5))?;
//! ```
//!
//! Enable the `serde` feature for `Serialize`/`Deserialize` on the
//! configuration types.

pub mod error;
pub mod station;
pub mod sync;

pub use error::{AgentError, ResourceError, StationError};
pub use station::{AgentState, Assignment, FlightPlan, MavId, Station, StationConfig};
pub use sync::{Electrode, ElectrodeId, Resource, ResourceGuard};
