//! Fleet configuration
//!
//! Loaded from a TOML file, or, when no file exists, from the environment
//! variables a single-drone deployment has always used (`MQTT_HOST`,
//! `MQTT_PORT`, `UUID`, `NAME`).

use crate::agent::DEFAULT_START;
use crate::fleet::AgentSpec;
use crate::protocol::codec::check_agent_id;
use crate::protocol::{canonicalize_topic, validate_publish_topic, PayloadFormat, Position};
use crate::session::{BackoffPolicy, SessionConfig, DEFAULT_QUEUE_CAPACITY};
use crate::transport::DeliveryQos;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Files tried, in order, when no path is given
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["fleet.toml", "config/fleet.toml"];

/// Complete fleet configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FleetConfig {
    pub broker: BrokerSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
}

/// Broker connection and publish settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// `mqtt://host:port` or `mqtts://host:port`
    pub broker_url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default)]
    pub qos: DeliveryQos,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Time allowed for the broker to acknowledge a connection
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl BrokerSection {
    pub fn new(broker_url: impl Into<String>) -> Self {
        Self {
            broker_url: broker_url.into(),
            username_env: None,
            password_env: None,
            topic: default_topic(),
            qos: DeliveryQos::default(),
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }

    pub fn username(&self) -> Option<String> {
        self.username_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }

    pub fn password(&self) -> Option<String> {
        self.password_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// Cadence and reconnect admission settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerSection {
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// How often backoff timers are checked between ticks
    #[serde(default = "default_timer_resolution")]
    pub timer_resolution_ms: u64,
    /// Gap between the initial connects of consecutive agents
    #[serde(default = "default_connect_stagger")]
    pub connect_stagger_ms: u64,
    /// Sessions allowed in `Connecting` at the same time
    #[serde(default = "default_max_concurrent_connects")]
    pub max_concurrent_connects: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            timer_resolution_ms: default_timer_resolution(),
            connect_stagger_ms: default_connect_stagger(),
            max_concurrent_connects: default_max_concurrent_connects(),
        }
    }
}

/// Per-session queue, backoff and encoding settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    #[serde(default)]
    pub payload_format: PayloadFormat,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            jitter: default_jitter(),
            payload_format: PayloadFormat::default(),
        }
    }
}

/// Health endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_health_port")]
    pub port: u16,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_health_port(),
        }
    }
}

/// One `[[agents]]` entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentEntry {
    /// Generated when omitted
    pub id: Option<String>,
    pub name: String,
    #[serde(default = "default_latitude")]
    pub latitude: f64,
    #[serde(default = "default_longitude")]
    pub longitude: f64,
}

fn default_topic() -> String {
    crate::protocol::DEFAULT_POSITION_TOPIC.to_string()
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_tick_interval() -> u64 {
    5
}

fn default_timer_resolution() -> u64 {
    250
}

fn default_connect_stagger() -> u64 {
    200
}

fn default_max_concurrent_connects() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_backoff_base() -> u64 {
    1_000
}

fn default_backoff_max() -> u64 {
    60_000
}

fn default_jitter() -> f64 {
    0.2
}

fn default_true() -> bool {
    true
}

fn default_health_port() -> u16 {
    8080
}

fn default_latitude() -> f64 {
    DEFAULT_START.latitude_deg
}

fn default_longitude() -> f64 {
    DEFAULT_START.longitude_deg
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnvVar { name: String, value: String },
    #[error("Invalid agent ID format: {0}")]
    InvalidAgentId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl FleetConfig {
    /// Load from an explicit file, the first default path that exists, or
    /// the legacy environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }
        match Self::find_default_file() {
            Some(found) => Self::load_from_file(&found),
            None => Self::from_legacy_env(),
        }
    }

    fn find_default_file() -> Option<PathBuf> {
        DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.is_file())
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse, fill in generated ids and validate
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: FleetConfig = toml::from_str(content)?;
        config.assign_missing_ids();
        config.broker.topic = canonicalize_topic(&config.broker.topic);
        config.validate()?;
        Ok(config)
    }

    /// Single-agent configuration from the process environment
    pub fn from_legacy_env() -> Result<Self, ConfigError> {
        Self::from_env_lookup(|name| std::env::var(name).ok())
    }

    /// Single-agent configuration from `MQTT_HOST`, `MQTT_PORT`, `UUID`,
    /// `NAME` and optional `LATITUDE`/`LONGITUDE`
    pub fn from_env_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required =
            |name: &str| lookup(name).ok_or_else(|| ConfigError::EnvVarNotFound(name.to_string()));
        let parsed = |name: &str, value: String| {
            value.trim().parse::<f64>().map_err(|_| ConfigError::InvalidEnvVar {
                name: name.to_string(),
                value,
            })
        };

        let host = required("MQTT_HOST")?;
        let port_raw = required("MQTT_PORT")?;
        let port: u16 = port_raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidEnvVar {
                name: "MQTT_PORT".to_string(),
                value: port_raw.clone(),
            })?;
        let id = required("UUID")?;
        let name = required("NAME")?;
        let latitude = match lookup("LATITUDE") {
            Some(value) => parsed("LATITUDE", value)?,
            None => default_latitude(),
        };
        let longitude = match lookup("LONGITUDE") {
            Some(value) => parsed("LONGITUDE", value)?,
            None => default_longitude(),
        };

        let config = FleetConfig {
            broker: BrokerSection::new(format!("mqtt://{host}:{port}")),
            scheduler: SchedulerSection::default(),
            session: SessionSection::default(),
            health: HealthSection::default(),
            agents: vec![AgentEntry {
                id: Some(id),
                name,
                latitude,
                longitude,
            }],
        };
        config.validate()?;
        Ok(config)
    }

    fn assign_missing_ids(&mut self) {
        for agent in &mut self.agents {
            if agent.id.is_none() {
                agent.id = Some(uuid::Uuid::new_v4().to_string());
            }
        }
    }

    /// Check every section for values the fleet cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.broker.broker_url).map_err(|e| {
            ConfigError::InvalidConfig(format!(
                "broker_url '{}' is not a valid URL: {e}",
                self.broker.broker_url
            ))
        })?;
        validate_publish_topic(&self.broker.topic)
            .map_err(|e| ConfigError::InvalidConfig(format!("topic: {e}")))?;

        if self.broker.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "connect_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.scheduler.tick_interval_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "tick_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.scheduler.timer_resolution_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "timer_resolution_ms must be greater than 0".to_string(),
            ));
        }
        if self.scheduler.max_concurrent_connects == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_concurrent_connects must be at least 1".to_string(),
            ));
        }
        if self.session.queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        self.backoff_policy()
            .validate()
            .map_err(ConfigError::InvalidConfig)?;

        if self.agents.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "at least one [[agents]] entry is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for agent in &self.agents {
            let id = agent.id.as_deref().unwrap_or_default();
            validate_agent_id(id)?;
            if !seen.insert(id) {
                return Err(ConfigError::InvalidAgentId(format!(
                    "Agent ID '{id}' is used more than once"
                )));
            }
            if !Position::new(agent.latitude, agent.longitude).is_valid() {
                return Err(ConfigError::InvalidConfig(format!(
                    "agent '{id}' starts outside valid coordinates ({}, {})",
                    agent.latitude, agent.longitude
                )));
            }
        }

        Ok(())
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.session.backoff_base_ms),
            Duration::from_millis(self.session.backoff_max_ms),
            self.session.jitter,
        )
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            topic: self.broker.topic.clone(),
            qos: self.broker.qos,
            queue_capacity: self.session.queue_capacity,
            backoff: self.backoff_policy(),
            payload_format: self.session.payload_format,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.tick_interval_secs)
    }

    pub fn timer_resolution(&self) -> Duration {
        Duration::from_millis(self.scheduler.timer_resolution_ms)
    }

    pub fn connect_stagger(&self) -> Duration {
        Duration::from_millis(self.scheduler.connect_stagger_ms)
    }

    /// Agent specs for the supervisor; ids have been assigned by loading
    pub fn agent_specs(&self) -> Vec<AgentSpec> {
        self.agents
            .iter()
            .map(|agent| AgentSpec {
                id: agent.id.clone().unwrap_or_default(),
                display_name: agent.name.clone(),
                position: Position::new(agent.latitude, agent.longitude),
            })
            .collect()
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[broker]
broker_url = "mqtt://localhost:1883"

[[agents]]
id = "A1"
name = "Alpha"
"#;
        Self::from_toml_str(toml_content).expect("Test config should parse")
    }
}

/// Agent ids must match `[a-zA-Z0-9._-]+` and fit the frame's length prefix
fn validate_agent_id(agent_id: &str) -> Result<(), ConfigError> {
    crate::protocol::validate_agent_id(agent_id)
        .map_err(|e| ConfigError::InvalidAgentId(format!("'{agent_id}': {e}")))?;
    check_agent_id(agent_id).map_err(|e| ConfigError::InvalidAgentId(e.to_string()))?;

    Ok(())
}
