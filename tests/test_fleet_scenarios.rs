//! End-to-end fleet behaviour over mock transports
//!
//! Each scenario drives a real supervisor and scheduler with explicit
//! timestamps, so nothing here sleeps or depends on a broker.


use dronefleet::fleet::FleetStatus;
use dronefleet::session::{SessionState, SessionStateKind};
use dronefleet::testing::ConnectBehavior;
use dronefleet::transport::{SessionEvent, TransportEvent};
use std::time::{Duration, Instant};
use test_helpers::*;

#[test]
fn test_six_ticks_against_failing_transport() {
    let start = Instant::now();
    let (mut fleet, _factory) = started_fleet(&["A1"], ConnectBehavior::Fail, 4, start);

    run_ticks(&mut fleet, start, 1, 6);

    let session = fleet.session("A1").unwrap();
    assert!(matches!(session.state(), SessionState::Backoff { .. }));
    assert_eq!(session.peek_next_sequence(), 6);
    assert_eq!(session.stats().reports_enqueued, 6);
    assert_eq!(session.queue_depth(), 4);
    assert_eq!(session.queued_sequences(), vec![2, 3, 4, 5]);
    assert_eq!(session.stats().frames_evicted, 2);
    assert_eq!(session.stats().frames_published, 0);
}

#[test]
fn test_sampling_continues_without_connectivity() {
    let start = Instant::now();
    let (mut fleet, _factory) =
        started_fleet(&["A1", "B2", "C3"], ConnectBehavior::Fail, 4, start);

    for tick in 1..=10u32 {
        run_ticks(&mut fleet, start, tick, 1);
        for id in ["A1", "B2", "C3"] {
            let session = fleet.session(id).unwrap();
            assert_eq!(session.peek_next_sequence(), tick, "agent {id}");
            assert!(!session.state().is_connected());
        }
    }

    let health = fleet.health();
    assert_eq!(health.status, FleetStatus::Down);
    assert_eq!(health.queued_frames, 3 * 4);
}

#[test]
fn test_backoff_delays_grow_to_cap() {
    let start = Instant::now();
    let (mut fleet, factory) = started_fleet(&["A1"], ConnectBehavior::Fail, 4, start);

    let mut delays = Vec::new();
    let mut now = start;
    for _ in 0..10 {
        let SessionState::Backoff {
            delay, retry_at, ..
        } = fleet.session("A1").unwrap().state().clone()
        else {
            panic!("expected backoff");
        };
        delays.push(delay);
        now = now.max(retry_at);
        fleet.advance(now);
        fleet.process_pending_events(now);
    }

    assert!(delays.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(delays[0], Duration::from_secs(1));
    assert_eq!(*delays.last().unwrap(), Duration::from_secs(60));
    assert_eq!(factory.handle("A1").unwrap().connect_calls(), 11);
}

#[test]
fn test_recovers_and_flushes_backlog_in_order() {
    let start = Instant::now();
    let (mut fleet, factory) = started_fleet(&["A1"], ConnectBehavior::Fail, 4, start);
    run_ticks(&mut fleet, start, 1, 6);

    factory.set_behavior_all(ConnectBehavior::Succeed);

    let mut ticks = 6;
    while !fleet.session("A1").unwrap().state().is_connected() {
        ticks += 1;
        assert!(ticks <= 20, "session never reconnected");
        run_ticks(&mut fleet, start, ticks, 1);
    }

    let session = fleet.session("A1").unwrap();
    assert_eq!(session.queue_depth(), 0);

    let published = published_sequences(&factory.handle("A1").unwrap());
    let last = session.peek_next_sequence() - 1;
    assert_eq!(published.len(), 4);
    assert_eq!(*published.last().unwrap(), last);
    assert!(published.windows(2).all(|pair| pair[1] == pair[0] + 1));

    // Once connected, each tick publishes its sample straight away
    run_ticks(&mut fleet, start, ticks + 1, 1);
    let published = published_sequences(&factory.handle("A1").unwrap());
    assert_eq!(*published.last().unwrap(), last + 1);
    assert_eq!(fleet.health().status, FleetStatus::Healthy);
}

#[test]
fn test_backoff_resets_after_successful_connect() {
    let start = Instant::now();
    let (mut fleet, factory) = started_fleet(&["A1"], ConnectBehavior::Fail, 8, start);
    run_ticks(&mut fleet, start, 1, 1);
    assert_eq!(
        fleet.session("A1").unwrap().state().backoff_attempt(),
        Some(2)
    );

    factory.set_behavior_all(ConnectBehavior::Succeed);
    let now = run_ticks(&mut fleet, start, 2, 1);
    assert!(fleet.session("A1").unwrap().state().is_connected());

    let handle = factory.handle("A1").unwrap();
    fleet.deliver(
        SessionEvent {
            agent_id: "A1".to_string(),
            connection_id: handle.connection_id(),
            event: TransportEvent::Disconnected("keep-alive timeout".to_string()),
        },
        now,
    );

    match fleet.session("A1").unwrap().state() {
        SessionState::Backoff { attempt, delay, .. } => {
            assert_eq!(*attempt, 1);
            assert_eq!(*delay, Duration::from_secs(1));
        }
        other => panic!("expected backoff, got {other:?}"),
    }
    assert_eq!(fleet.session("A1").unwrap().stats().disconnects, 1);
}

#[test]
fn test_stale_event_from_replaced_connection_ignored() {
    let start = Instant::now();
    let (mut fleet, factory) = started_fleet(&["A1"], ConnectBehavior::Succeed, 4, start);
    let handle = factory.handle("A1").unwrap();
    let old_connection = handle.connection_id();

    fleet.deliver(
        SessionEvent {
            agent_id: "A1".to_string(),
            connection_id: old_connection,
            event: TransportEvent::Disconnected("reset".to_string()),
        },
        start,
    );
    let now = start + Duration::from_secs(2);
    fleet.advance(now);
    fleet.process_pending_events(now);
    assert!(fleet.session("A1").unwrap().state().is_connected());

    // A late failure from the first connection must not touch the new one
    let applied = fleet.deliver(
        SessionEvent {
            agent_id: "A1".to_string(),
            connection_id: old_connection,
            event: TransportEvent::Disconnected("late".to_string()),
        },
        now,
    );
    assert!(!applied);
    assert!(fleet.session("A1").unwrap().state().is_connected());
}

#[test]
fn test_one_failing_agent_does_not_affect_others() {
    let start = Instant::now();
    let (mut fleet, factory) = started_fleet(&["A1", "B2"], ConnectBehavior::Succeed, 4, start);
    factory
        .handle("B2")
        .unwrap()
        .set_fail_publishes(true);

    run_ticks(&mut fleet, start, 1, 3);

    let health = fleet.health();
    assert_eq!(health.status, FleetStatus::Degraded);
    assert_eq!(
        health.agent("A1").unwrap().session.state,
        SessionStateKind::Connected
    );
    assert_eq!(
        health.agent("B2").unwrap().session.state,
        SessionStateKind::Backoff
    );
    assert_eq!(
        published_sequences(&factory.handle("A1").unwrap()),
        vec![0, 1, 2]
    );
    assert_eq!(fleet.session("B2").unwrap().peek_next_sequence(), 3);
}

#[test]
fn test_shutdown_stops_everything() {
    let start = Instant::now();
    let (mut fleet, factory) = started_fleet(&["A1", "B2"], ConnectBehavior::Succeed, 4, start);
    run_ticks(&mut fleet, start, 1, 2);

    fleet.shutdown();
    fleet.shutdown();

    let published_before = factory.handle("A1").unwrap().published_count();
    run_ticks(&mut fleet, start, 3, 2);

    for id in ["A1", "B2"] {
        let handle = factory.handle(id).unwrap();
        assert_eq!(handle.disconnect_calls(), 1, "agent {id}");
        assert!(!handle.is_connected());
        let session = fleet.session(id).unwrap();
        assert_eq!(session.state(), &SessionState::Disconnected);
        assert_eq!(session.queue_depth(), 0);
    }
    assert_eq!(
        factory.handle("A1").unwrap().published_count(),
        published_before
    );
    assert_eq!(fleet.handle().health().status, FleetStatus::Stopped);
}

#[test]
fn test_broker_rejected_publish_backs_off_only_that_agent() {
    let start = Instant::now();
    let (mut fleet, factory) = started_fleet(&["A1", "B2"], ConnectBehavior::Succeed, 4, start);
    let a1 = factory.handle("A1").unwrap();
    a1.set_reject_publishes(true);

    run_ticks(&mut fleet, start, 1, 1);

    let session = fleet.session("A1").unwrap();
    assert_eq!(session.state().kind(), SessionStateKind::Backoff);
    assert_eq!(session.stats().publish_failures, 1);
    assert!(fleet.session("B2").unwrap().state().is_connected());
    assert_eq!(fleet.health().status, FleetStatus::Degraded);

    a1.set_reject_publishes(false);
    run_ticks(&mut fleet, start, 2, 1);

    assert!(fleet.session("A1").unwrap().state().is_connected());
    assert_eq!(published_sequences(&a1).last(), Some(&1));
}
