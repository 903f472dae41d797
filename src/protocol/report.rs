//! Position report value types
//!
//! Identity and reports are immutable once built. `Position` is the only
//! mutable piece of an agent and is owned exclusively by that agent.

use serde::{Deserialize, Serialize};

/// Valid latitude range in decimal degrees
pub const LATITUDE_RANGE: std::ops::RangeInclusive<f64> = -90.0..=90.0;

/// Valid longitude range in decimal degrees
pub const LONGITUDE_RANGE: std::ops::RangeInclusive<f64> = -180.0..=180.0;

/// Immutable identity of a simulated agent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Opaque unique identifier, carried in every frame
    pub id: String,
    /// Human-readable name, never sent over the metered link
    pub display_name: String,
}

impl AgentIdentity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Point-in-time geographic position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
}

impl Position {
    pub fn new(latitude_deg: f64, longitude_deg: f64) -> Self {
        Self {
            latitude_deg,
            longitude_deg,
        }
    }

    /// True when both coordinates are finite and inside their valid ranges
    pub fn is_valid(&self) -> bool {
        LATITUDE_RANGE.contains(&self.latitude_deg) && LONGITUDE_RANGE.contains(&self.longitude_deg)
    }

    /// Clamp latitude to the poles and wrap longitude across the antimeridian
    pub fn normalized(self) -> Self {
        let latitude_deg = self.latitude_deg.clamp(-90.0, 90.0);
        let mut longitude_deg = self.longitude_deg;
        if !LONGITUDE_RANGE.contains(&longitude_deg) {
            longitude_deg = (longitude_deg + 180.0).rem_euclid(360.0) - 180.0;
        }
        Self {
            latitude_deg,
            longitude_deg,
        }
    }
}

/// One sampled position of one agent, ready for encoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    pub agent_id: String,
    /// Per-agent counter, wraps at `u32::MAX`
    pub sequence_number: u32,
    /// Seconds since the Unix epoch
    pub timestamp_epoch_seconds: u32,
    pub latitude_deg: f64,
    pub longitude_deg: f64,
}

impl PositionReport {
    pub fn position(&self) -> Position {
        Position::new(self.latitude_deg, self.longitude_deg)
    }
}

/// Current wall-clock time as u32 epoch seconds, saturating past 2106
pub fn epoch_seconds_now() -> u32 {
    let secs = chrono::Utc::now().timestamp();
    u32::try_from(secs.max(0)).unwrap_or(u32::MAX)
}
