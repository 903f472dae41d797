//! Fleet orchestration
//!
//! The [`Supervisor`] owns every agent and its session; the [`Scheduler`]
//! borrows them once per tick to sample positions and advance timers.

pub mod scheduler;
pub mod supervisor;

use crate::agent::Agent;
use crate::protocol::Position;
use crate::session::Session;
use crate::transport::Transport;
use std::collections::BTreeMap;

pub use scheduler::{Scheduler, TickSummary};
pub use supervisor::{
    AgentHealth, FleetHealth, FleetStatus, Supervisor, SupervisorHandle, SupervisorSettings,
};

/// What the supervisor needs to bring one agent up
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSpec {
    pub id: String,
    pub display_name: String,
    pub position: Position,
}

impl AgentSpec {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, position: Position) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            position,
        }
    }
}

/// An agent paired with the session that publishes for it
pub struct FleetUnit<T: Transport> {
    pub agent: Agent,
    pub session: Session<T>,
}

/// All units of a fleet, keyed and iterated by agent id
pub type FleetUnits<T> = BTreeMap<String, FleetUnit<T>>;
