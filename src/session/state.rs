//! Pure session state and transition rules
//!
//! The impure half, talking to the transport and the queue, lives in
//! [`super::session`].

use super::backoff::BackoffPolicy;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Connection lifecycle of one session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    /// Initial state, and the terminal state after shutdown
    Disconnected,
    /// Attempt in flight; `attempt` counts the failures that preceded it
    Connecting { attempt: u32 },
    /// Link up, frames drain as they are enqueued
    Connected,
    /// Waiting out `delay` before retry number `attempt`
    Backoff {
        attempt: u32,
        delay: Duration,
        retry_at: Instant,
    },
}

/// Serializable state label for health reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStateKind {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

impl SessionState {
    pub fn kind(&self) -> SessionStateKind {
        match self {
            SessionState::Disconnected => SessionStateKind::Disconnected,
            SessionState::Connecting { .. } => SessionStateKind::Connecting,
            SessionState::Connected => SessionStateKind::Connected,
            SessionState::Backoff { .. } => SessionStateKind::Backoff,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(self, SessionState::Connecting { .. })
    }

    /// Backoff attempt number, if backing off
    pub fn backoff_attempt(&self) -> Option<u32> {
        match self {
            SessionState::Backoff { attempt, .. } => Some(*attempt),
            _ => None,
        }
    }

    /// True when a backoff timer has elapsed at `now`
    pub fn reconnect_due(&self, now: Instant) -> bool {
        matches!(self, SessionState::Backoff { retry_at, .. } if *retry_at <= now)
    }

    /// Failure count to carry into a new connection attempt, or `None` if
    /// `connect` must be a no-op in this state
    pub fn connect_attempt(&self, now: Instant) -> Option<u32> {
        match self {
            SessionState::Disconnected => Some(0),
            SessionState::Backoff {
                attempt, retry_at, ..
            } if *retry_at <= now => Some(*attempt),
            _ => None,
        }
    }

    /// Backoff attempt and nominal delay to enter after a failure in this
    /// state, or `None` when the failure is irrelevant here
    pub fn failure_backoff(&self, policy: &BackoffPolicy) -> Option<(u32, Duration)> {
        match self {
            SessionState::Disconnected => None,
            SessionState::Connected => Some((1, policy.delay_for_attempt(1))),
            SessionState::Connecting { attempt } => {
                let next = attempt.saturating_add(1);
                Some((next, policy.delay_for_attempt(next)))
            }
            SessionState::Backoff { attempt, delay, .. } => {
                Some((attempt.saturating_add(1), policy.next_delay(*delay)))
            }
        }
    }
}
