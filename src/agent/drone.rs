//! Simulated drone: identity plus a randomly walking position

use crate::protocol::codec::quantize_coordinate;
use crate::protocol::{AgentIdentity, Position, PositionReport};
use rand::{thread_rng, Rng};

/// Largest per-axis displacement of one random-walk step, in degrees
pub const STEP_DEGREES: f64 = 0.001;

/// Starting point used when a deployment does not configure one
pub const DEFAULT_START: Position = Position {
    latitude_deg: 48.8581824,
    longitude_deg: 2.2127304,
};

/// One simulated mobile entity.
///
/// The agent owns its position and nothing else; sequence numbers belong to
/// the session so the agent stays free of transport concerns.
#[derive(Debug, Clone)]
pub struct Agent {
    identity: AgentIdentity,
    position: Position,
}

impl Agent {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        initial_position: Position,
    ) -> Self {
        Self {
            identity: AgentIdentity::new(id, display_name),
            position: initial_position.normalized(),
        }
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn id(&self) -> &str {
        &self.identity.id
    }

    pub fn display_name(&self) -> &str {
        &self.identity.display_name
    }

    /// Read-only snapshot of the current position
    pub fn current_position(&self) -> Position {
        self.position
    }

    /// Move by a uniform random offset of at most [`STEP_DEGREES`] per axis
    pub fn step(&mut self) {
        self.step_with(&mut thread_rng());
    }

    /// [`Agent::step`] with a caller-supplied random source
    pub fn step_with<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let moved = Position::new(
            self.position.latitude_deg + rng.gen_range(-STEP_DEGREES..=STEP_DEGREES),
            self.position.longitude_deg + rng.gen_range(-STEP_DEGREES..=STEP_DEGREES),
        );
        self.position = moved.normalized();
    }

    /// Build a report from the current position without mutating anything.
    ///
    /// Coordinates are snapped to the frame's fixed-point grid so the report
    /// equals what a consumer decodes.
    pub fn sample(&self, sequence_number: u32, now_epoch_seconds: u32) -> PositionReport {
        PositionReport {
            agent_id: self.identity.id.clone(),
            sequence_number,
            timestamp_epoch_seconds: now_epoch_seconds,
            latitude_deg: quantize_coordinate(self.position.latitude_deg),
            longitude_deg: quantize_coordinate(self.position.longitude_deg),
        }
    }
}
