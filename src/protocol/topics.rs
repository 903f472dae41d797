//! Topic canonicalization and agent ID validation
//!
//! Publish topics are normalised once at configuration time so every session
//! of a deployment publishes to byte-identical topic strings.

use thiserror::Error;

/// Well-known topic position frames are published to
pub const DEFAULT_POSITION_TOPIC: &str = "drone/position";

/// Normalise a publish topic.
///
/// Surrounding whitespace is trimmed, runs of `/` collapse to one and a
/// trailing `/` is dropped. A leading `/` is kept when present since MQTT
/// treats `/a` and `a` as different topics.
pub fn canonicalize_topic(topic: &str) -> String {
    let mut result = topic.to_string();
    loop {
        let next = canonicalize_pass(&result);
        if next == result {
            return result;
        }
        result = next;
    }
}

fn canonicalize_pass(topic: &str) -> String {
    let mut result = topic.trim().to_string();

    while result.contains("//") {
        result = result.replace("//", "/");
    }

    if result.len() > 1 && result.ends_with('/') {
        result.pop();
    }

    result
}

/// Check a canonical topic is usable for publishing
pub fn validate_publish_topic(topic: &str) -> Result<(), ValidationError> {
    if topic.is_empty() || topic == "/" {
        return Err(ValidationError::EmptyTopic);
    }
    if let Some(ch) = topic.chars().find(|c| matches!(c, '+' | '#' | '\0')) {
        return Err(ValidationError::InvalidTopicChar(ch));
    }
    Ok(())
}

pub fn validate_agent_id(agent_id: &str) -> Result<(), ValidationError> {
    if agent_id.is_empty() {
        return Err(ValidationError::EmptyAgentId);
    }

    for ch in agent_id.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(ValidationError::InvalidAgentIdChar(ch));
        }
    }

    Ok(())
}

/// Validation errors for identifiers and topics
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Agent ID cannot be empty")]
    EmptyAgentId,
    #[error("Agent ID contains invalid character: '{0}'")]
    InvalidAgentIdChar(char),
    #[error("Topic cannot be empty")]
    EmptyTopic,
    #[error("Publish topic contains invalid character: '{0}'")]
    InvalidTopicChar(char),
}
