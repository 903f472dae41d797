//! Per-agent publishing session
//!
//! A [`Session`] owns one transport and one bounded [`FrameQueue`]. It is a
//! synchronous state machine: it never reads the clock and never awaits.
//! Callers pass `now` into every operation, and transport outcomes are fed
//! back in through [`Session::deliver`].
//!
//! Failures never escape. Encoding errors are counted and the report
//! dropped, transport errors move the session into backoff, and a full queue
//! evicts its oldest frame.

use super::backoff::BackoffPolicy;
use super::queue::{FrameQueue, QueuedFrame};
use super::state::{SessionState, SessionStateKind};
use crate::observability::metrics::metrics;
use crate::protocol::{PayloadFormat, PositionReport, DEFAULT_POSITION_TOPIC};
use crate::session_span;
use crate::transport::{DeliveryQos, SessionEvent, Transport, TransportEvent};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Default bound on frames held while the link is down
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Settings shared by every session of a fleet
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub topic: String,
    pub qos: DeliveryQos,
    pub queue_capacity: usize,
    pub backoff: BackoffPolicy,
    pub payload_format: PayloadFormat,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_POSITION_TOPIC.to_string(),
            qos: DeliveryQos::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backoff: BackoffPolicy::default(),
            payload_format: PayloadFormat::default(),
        }
    }
}

/// Lifetime counters of one session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub reports_enqueued: u64,
    pub frames_published: u64,
    pub bytes_published: u64,
    pub frames_evicted: u64,
    pub encode_failures: u64,
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub connections_established: u64,
    pub publish_failures: u64,
    pub disconnects: u64,
    pub last_connected_at: Option<DateTime<Utc>>,
}

/// Read-only view of a session for health reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub agent_id: String,
    pub state: SessionStateKind,
    pub backoff_attempt: Option<u32>,
    pub queue_depth: usize,
    pub queue_capacity: usize,
    pub next_sequence: u32,
    pub stats: SessionStats,
}

pub struct Session<T: Transport> {
    agent_id: String,
    display_name: String,
    topic: String,
    qos: DeliveryQos,
    payload_format: PayloadFormat,
    backoff: BackoffPolicy,
    state: SessionState,
    queue: FrameQueue,
    transport: T,
    next_sequence: u32,
    stats: SessionStats,
    closed: bool,
}

impl<T: Transport> Session<T> {
    pub fn new(agent_id: impl Into<String>, config: SessionConfig, transport: T) -> Self {
        let agent_id = agent_id.into();
        Self {
            display_name: agent_id.clone(),
            agent_id,
            topic: config.topic,
            qos: config.qos,
            payload_format: config.payload_format,
            backoff: config.backoff,
            state: SessionState::Disconnected,
            queue: FrameQueue::new(config.queue_capacity),
            transport,
            next_sequence: 0,
            stats: SessionStats::default(),
            closed: false,
        }
    }

    /// Name carried by the JSON payload; defaults to the agent id
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// Sequence numbers waiting in the queue, oldest first
    pub fn queued_sequences(&self) -> Vec<u32> {
        self.queue.sequence_numbers()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sequence number the next report will carry
    pub fn peek_next_sequence(&self) -> u32 {
        self.next_sequence
    }

    /// Claim the next sequence number. Wraps at `u32::MAX`.
    pub fn next_sequence(&mut self) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        sequence
    }

    /// True when a backoff delay has run out and `tick` would reconnect
    pub fn reconnect_due(&self, now: Instant) -> bool {
        !self.closed && self.state.reconnect_due(now)
    }

    /// Encode `report` and queue it, draining straight away when connected.
    /// Never fails and never blocks.
    pub fn enqueue(&mut self, report: &PositionReport, now: Instant) {
        if self.closed {
            debug!(agent_id = %self.agent_id, "Session closed, report dropped");
            return;
        }
        self.stats.reports_enqueued += 1;

        let payload = match self.payload_format.encode(report, &self.display_name) {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.encode_failures += 1;
                metrics().encode_failed();
                warn!(
                    agent_id = %self.agent_id,
                    sequence = report.sequence_number,
                    error = %e,
                    "Report could not be encoded, dropped"
                );
                return;
            }
        };
        metrics().frame_encoded(payload.len());

        let evicted = self.queue.push_back(QueuedFrame {
            sequence_number: report.sequence_number,
            payload,
        });
        if let Some(evicted) = evicted {
            self.stats.frames_evicted += 1;
            metrics().frame_evicted();
            debug!(
                agent_id = %self.agent_id,
                evicted_sequence = evicted.sequence_number,
                queue_depth = self.queue.len(),
                "Queue full, oldest frame dropped"
            );
        }

        if self.state.is_connected() {
            self.drain(now);
        }
    }

    /// Publish queued frames oldest first while connected. Returns how many
    /// frames went out.
    pub fn drain(&mut self, now: Instant) -> usize {
        let mut sent = 0;
        while self.state.is_connected() {
            let Some(frame) = self.queue.pop_front() else {
                break;
            };
            let len = frame.payload.len();

            match self
                .transport
                .publish(&self.topic, frame.payload.clone(), self.qos)
            {
                Ok(()) => {
                    sent += 1;
                    self.stats.frames_published += 1;
                    self.stats.bytes_published += len as u64;
                    metrics().frame_published(len);
                }
                Err(e) => {
                    self.stats.publish_failures += 1;
                    metrics().publish_failed();
                    if !self.queue.push_front(frame) {
                        self.stats.frames_evicted += 1;
                        metrics().frame_evicted();
                    }
                    self.enter_backoff(now, &e.to_string());
                }
            }
        }

        if sent > 0 {
            debug!(
                agent_id = %self.agent_id,
                sent,
                queue_depth = self.queue.len(),
                "Drained queue"
            );
        }
        sent
    }

    /// Start a connection attempt. A no-op unless disconnected or the backoff
    /// delay has expired. Returns whether an attempt was made.
    pub fn connect(&mut self, now: Instant) -> bool {
        if self.closed {
            return false;
        }
        let Some(attempt) = self.state.connect_attempt(now) else {
            return false;
        };

        let span = session_span!(agent_id = %self.agent_id, attempt);
        let _enter = span.enter();

        self.state = SessionState::Connecting { attempt };
        self.stats.connect_attempts += 1;
        metrics().connection_attempt();
        info!(queue_depth = self.queue.len(), "Connecting");

        if let Err(e) = self.transport.connect() {
            self.enter_backoff(now, &e.to_string());
        }
        true
    }

    /// Advance timers: reconnect once a backoff delay has elapsed. Returns
    /// whether an attempt was made.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.reconnect_due(now) {
            self.connect(now)
        } else {
            false
        }
    }

    /// Route a tagged transport event, dropping it when it belongs to a
    /// connection this session has already released
    pub fn deliver(&mut self, event: SessionEvent, now: Instant) -> bool {
        let current = self.transport.connection_id();
        if event.connection_id != current {
            debug!(
                agent_id = %self.agent_id,
                event_connection = event.connection_id,
                current_connection = current,
                "Stale transport event ignored"
            );
            return false;
        }
        self.handle_event(event.event, now);
        true
    }

    /// Apply one transport notification
    pub fn handle_event(&mut self, event: TransportEvent, now: Instant) {
        if self.closed {
            return;
        }

        match (self.state.kind(), event) {
            (SessionStateKind::Connecting, TransportEvent::Connected) => {
                let span = session_span!(agent_id = %self.agent_id);
                let _enter = span.enter();

                self.state = SessionState::Connected;
                self.stats.connections_established += 1;
                self.stats.last_connected_at = Some(Utc::now());
                metrics().connection_established();
                info!(queue_depth = self.queue.len(), "Connected");
                self.drain(now);
            }
            (
                SessionStateKind::Connecting | SessionStateKind::Backoff,
                TransportEvent::ConnectFailed(reason),
            ) => self.enter_backoff(now, &reason),
            (
                SessionStateKind::Connected
                | SessionStateKind::Connecting
                | SessionStateKind::Backoff,
                TransportEvent::Disconnected(reason),
            ) => self.enter_backoff(now, &reason),
            (
                SessionStateKind::Connected
                | SessionStateKind::Connecting
                | SessionStateKind::Backoff,
                TransportEvent::PublishFailed(reason),
            ) => {
                self.stats.publish_failures += 1;
                metrics().publish_failed();
                self.enter_backoff(now, &reason);
            }
            (state, event) => {
                debug!(
                    agent_id = %self.agent_id,
                    ?state,
                    ?event,
                    "Event does not apply in current state"
                );
            }
        }
    }

    /// Release the transport and drop queued frames. Safe in any state and
    /// idempotent; the session stays `Disconnected` afterwards.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.transport.disconnect();
        self.state = SessionState::Disconnected;
        let dropped = self.queue.clear();
        info!(agent_id = %self.agent_id, dropped, "Session shut down");
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            agent_id: self.agent_id.clone(),
            state: self.state.kind(),
            backoff_attempt: self.state.backoff_attempt(),
            queue_depth: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            next_sequence: self.next_sequence,
            stats: self.stats.clone(),
        }
    }

    fn enter_backoff(&mut self, now: Instant, reason: &str) {
        let Some((attempt, delay)) = self.state.failure_backoff(&self.backoff) else {
            return;
        };

        match self.state.kind() {
            SessionStateKind::Connecting => {
                self.stats.connect_failures += 1;
                metrics().connection_failed();
            }
            SessionStateKind::Connected => {
                self.stats.disconnects += 1;
                metrics().connection_lost();
            }
            _ => {}
        }

        self.transport.disconnect();
        let wait = self.backoff.jittered(delay, &mut rand::thread_rng());
        self.state = SessionState::Backoff {
            attempt,
            delay,
            retry_at: now + wait,
        };

        warn!(
            agent_id = %self.agent_id,
            attempt,
            delay_ms = wait.as_millis() as u64,
            queue_depth = self.queue.len(),
            reason,
            "Link down, backing off"
        );
    }
}
