//! dronefleet - bandwidth-constrained drone position telemetry over MQTT
//!
//! A fleet of simulated drones samples positions on a shared cadence and
//! publishes them as compact binary frames. Each drone owns a [`Session`]
//! that keeps a bounded drop-oldest queue and reconnects with capped
//! exponential backoff, so a broken link never stalls sampling.
//!
//! # Overview
//!
//! - [`protocol`] - position reports, the binary frame codec, topics
//! - [`agent`] - simulated drones
//! - [`session`] - per-agent link state machine and frame queue
//! - [`transport`] - the transport seam and its rumqttc implementation
//! - [`fleet`] - scheduler and supervisor
//! - [`observability`] - logging, metrics and health endpoints
//!
//! # Quick Start
//!
//! ```rust
//! use dronefleet::protocol::codec::quantize_coordinate;
//! use dronefleet::protocol::{decode, encode, PositionReport};
//!
//! let report = PositionReport {
//!     agent_id: "drone-1".to_string(),
//!     sequence_number: 0,
//!     timestamp_epoch_seconds: 1_700_000_000,
//!     latitude_deg: quantize_coordinate(48.8581824),
//!     longitude_deg: quantize_coordinate(2.2127304),
//! };
//!
//! let frame = encode(&report).unwrap();
//! let json = serde_json::to_vec(&report).unwrap();
//! assert!(frame.len() < json.len());
//! assert_eq!(decode(&frame).unwrap(), report);
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod fleet;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod testing;
pub mod transport;

pub use agent::Agent;
pub use config::{ConfigError, FleetConfig};
pub use error::{FleetError, FleetResult};
pub use fleet::{FleetHealth, FleetStatus, Supervisor, SupervisorHandle, SupervisorSettings};
pub use protocol::*;
pub use session::{Session, SessionConfig, SessionState};
pub use transport::{MqttTransport, MqttTransportFactory, Transport, TransportFactory};
