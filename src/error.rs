//! Error types for fleet operations
//!
//! Only start-up and configuration can fail outward. Once the fleet runs,
//! every failure turns into a session state change, a log line or a counter.

use crate::config::ConfigError;
use crate::protocol::CodecError;
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for fleet operations
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Agent '{agent_id}' is defined more than once")]
    DuplicateAgent { agent_id: String },

    #[error("Agent '{agent_id}' has an invalid position ({latitude}, {longitude})")]
    InvalidPosition {
        agent_id: String,
        latitude: f64,
        longitude: f64,
    },

    #[error("Fleet has no agents")]
    NoAgents,

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl FleetError {
    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Errors caused by the operator's input rather than the environment
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            FleetError::Config(_)
                | FleetError::Codec(_)
                | FleetError::DuplicateAgent { .. }
                | FleetError::InvalidPosition { .. }
                | FleetError::NoAgents
                | FleetError::Transport(TransportError::InvalidBrokerUrl(_))
        )
    }
}

/// Result type alias for fleet operations
pub type FleetResult<T> = Result<T, FleetError>;
