//! Per-tick sampling and reconnect admission

use super::{FleetUnit, FleetUnits};
use crate::observability::metrics::metrics;
use crate::scheduler_span;
use crate::transport::Transport;
use rand::{thread_rng, Rng};
use std::time::Instant;
use tracing::debug;

/// Outcome of one scheduler pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub sampled: usize,
    pub reconnects_started: usize,
    pub reconnects_deferred: usize,
}

/// Drives every agent of a fleet on a shared cadence.
///
/// Sampling never depends on link state. Reconnects are admitted only while
/// fewer than `max_concurrent_connects` sessions are `Connecting`; the rest
/// wait for a later pass. The pass starts at a rotating offset so the same
/// agents are not always the ones kept waiting.
#[derive(Debug)]
pub struct Scheduler {
    max_concurrent_connects: usize,
    cursor: usize,
}

impl Scheduler {
    pub fn new(max_concurrent_connects: usize) -> Self {
        Self {
            max_concurrent_connects: max_concurrent_connects.max(1),
            cursor: 0,
        }
    }

    pub fn max_concurrent_connects(&self) -> usize {
        self.max_concurrent_connects
    }

    /// Sessions currently waiting on a connection attempt
    pub fn connecting_count<T: Transport>(units: &FleetUnits<T>) -> usize {
        units
            .values()
            .filter(|unit| unit.session.state().is_connecting())
            .count()
    }

    /// Free connection slots right now
    pub fn available_permits<T: Transport>(&self, units: &FleetUnits<T>) -> usize {
        self.max_concurrent_connects
            .saturating_sub(Self::connecting_count(units))
    }

    /// One cadence tick: step and sample every agent, enqueue the reports,
    /// then advance every session
    pub fn tick<T: Transport>(
        &mut self,
        units: &mut FleetUnits<T>,
        now: Instant,
        epoch_seconds: u32,
    ) -> TickSummary {
        self.tick_with(units, now, epoch_seconds, &mut thread_rng())
    }

    /// [`Scheduler::tick`] with a caller-supplied random source for movement
    pub fn tick_with<T: Transport, R: Rng + ?Sized>(
        &mut self,
        units: &mut FleetUnits<T>,
        now: Instant,
        epoch_seconds: u32,
        rng: &mut R,
    ) -> TickSummary {
        let span = scheduler_span!(agents = units.len());
        let _enter = span.enter();
        let started = Instant::now();

        for unit in units.values_mut() {
            unit.agent.step_with(&mut *rng);
            let sequence = unit.session.next_sequence();
            let report = unit.agent.sample(sequence, epoch_seconds);
            metrics().report_sampled();
            unit.session.enqueue(&report, now);
        }

        let mut summary = self.advance_sessions(units, now);
        summary.sampled = units.len();
        metrics().tick_completed(started.elapsed());

        debug!(
            sampled = summary.sampled,
            reconnects_started = summary.reconnects_started,
            reconnects_deferred = summary.reconnects_deferred,
            "Tick complete"
        );
        summary
    }

    /// Advance backoff timers, starting due reconnects within the
    /// concurrency limit. Does not sample.
    pub fn advance_sessions<T: Transport>(
        &mut self,
        units: &mut FleetUnits<T>,
        now: Instant,
    ) -> TickSummary {
        let mut summary = TickSummary::default();
        if units.is_empty() {
            return summary;
        }

        let mut in_flight = Self::connecting_count(units);
        let start = self.cursor % units.len();
        self.cursor = (start + 1) % units.len();

        let mut ordered: Vec<&mut FleetUnit<T>> = units.values_mut().collect();
        ordered.rotate_left(start);

        for unit in ordered {
            if !unit.session.reconnect_due(now) {
                continue;
            }
            if in_flight >= self.max_concurrent_connects {
                summary.reconnects_deferred += 1;
                metrics().reconnect_deferred();
                continue;
            }
            if unit.session.tick(now) {
                summary.reconnects_started += 1;
                if unit.session.state().is_connecting() {
                    in_flight += 1;
                }
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, DEFAULT_START};
    use crate::session::{BackoffPolicy, Session, SessionConfig, SessionState};
    use crate::testing::{ConnectBehavior, MockHandle, MockTransport};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;

    const EPOCH: u32 = 1_700_000_000;

    fn units(ids: &[&str], behavior: ConnectBehavior) -> (FleetUnits<MockTransport>, Vec<MockHandle>) {
        let config = SessionConfig {
            queue_capacity: 4,
            backoff: BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(60), 0.0),
            ..SessionConfig::default()
        };
        let mut units = FleetUnits::new();
        let mut handles = Vec::new();
        for id in ids {
            let transport = MockTransport::detached(*id).with_behavior(behavior);
            handles.push(transport.handle());
            units.insert(
                id.to_string(),
                FleetUnit {
                    agent: Agent::new(*id, *id, DEFAULT_START),
                    session: Session::new(*id, config.clone(), transport),
                },
            );
        }
        (units, handles)
    }

    /// Put every session into an expired backoff
    fn fail_all(units: &mut FleetUnits<MockTransport>, now: Instant) {
        for unit in units.values_mut() {
            unit.session.connect(now);
            unit.session.handle_event(
                crate::transport::TransportEvent::ConnectFailed("down".into()),
                now,
            );
        }
    }

    #[test]
    fn test_tick_samples_every_agent_once() {
        let now = Instant::now();
        let (mut units, _) = units(&["A1", "B2", "C3"], ConnectBehavior::Hang);
        let mut scheduler = Scheduler::new(8);
        let mut rng = StdRng::seed_from_u64(7);

        for expected in 1..=3u32 {
            let summary = scheduler.tick_with(&mut units, now, EPOCH, &mut rng);
            assert_eq!(summary.sampled, 3);
            for unit in units.values() {
                assert_eq!(unit.session.peek_next_sequence(), expected);
                assert_eq!(unit.session.stats().reports_enqueued, u64::from(expected));
            }
        }
    }

    #[test]
    fn test_tick_moves_agents() {
        let now = Instant::now();
        let (mut units, _) = units(&["A1"], ConnectBehavior::Hang);
        let mut scheduler = Scheduler::new(1);
        let mut rng = StdRng::seed_from_u64(11);

        scheduler.tick_with(&mut units, now, EPOCH, &mut rng);

        let position = units["A1"].agent.current_position();
        assert_ne!(position, DEFAULT_START);
        assert!((position.latitude_deg - DEFAULT_START.latitude_deg).abs() <= 0.001 + 1e-12);
    }

    #[test]
    fn test_tick_does_not_start_initial_connects() {
        let now = Instant::now();
        let (mut units, handles) = units(&["A1"], ConnectBehavior::Succeed);
        let mut scheduler = Scheduler::new(8);

        scheduler.tick(&mut units, now, EPOCH);

        assert_eq!(handles[0].connect_calls(), 0);
        assert_eq!(units["A1"].session.state(), &SessionState::Disconnected);
    }

    #[test]
    fn test_due_reconnects_limited_by_permits() {
        let start = Instant::now();
        let (mut units, handles) = units(&["A1", "B2", "C3", "D4"], ConnectBehavior::Hang);
        fail_all(&mut units, start);
        let mut scheduler = Scheduler::new(2);

        let later = start + Duration::from_secs(2);
        let summary = scheduler.advance_sessions(&mut units, later);

        assert_eq!(summary.reconnects_started, 2);
        assert_eq!(summary.reconnects_deferred, 2);
        assert_eq!(Scheduler::connecting_count(&units), 2);
        assert_eq!(scheduler.available_permits(&units), 0);
        let calls: u32 = handles.iter().map(|h| h.connect_calls()).sum();
        assert_eq!(calls, 4 + 2);

        // Nothing more is admitted while the two attempts hang
        let summary = scheduler.advance_sessions(&mut units, later);
        assert_eq!(summary.reconnects_started, 0);
        assert_eq!(summary.reconnects_deferred, 2);
    }

    #[test]
    fn test_refused_attempts_do_not_hold_permits() {
        let start = Instant::now();
        let (mut units, handles) = units(&["A1", "B2", "C3"], ConnectBehavior::Refuse);
        fail_all(&mut units, start);
        let mut scheduler = Scheduler::new(1);

        // Refused attempts never occupy a slot, so every due session retries
        let summary = scheduler.advance_sessions(&mut units, start + Duration::from_secs(2));
        assert_eq!(summary.reconnects_started, 3);
        assert!(handles.iter().all(|h| h.connect_calls() == 2));
    }

    #[test]
    fn test_not_due_sessions_untouched() {
        let start = Instant::now();
        let (mut units, handles) = units(&["A1"], ConnectBehavior::Hang);
        fail_all(&mut units, start);
        let mut scheduler = Scheduler::new(1);

        let summary = scheduler.advance_sessions(&mut units, start + Duration::from_millis(500));
        assert_eq!(summary, TickSummary::default());
        assert_eq!(handles[0].connect_calls(), 1);
    }

    #[test]
    fn test_zero_limit_raised_to_one() {
        assert_eq!(Scheduler::new(0).max_concurrent_connects(), 1);
    }
}
