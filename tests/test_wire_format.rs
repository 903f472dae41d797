//! Wire format tests from a consumer's point of view
//!
//! What a subscriber receives must decode to exactly what the fleet sampled,
//! and the binary frame must stay much smaller than the JSON it replaced.

use dronefleet::agent::{Agent, DEFAULT_START};
use dronefleet::protocol::{decode, decode_any, encode, CodecError, PayloadFormat};
use dronefleet::session::{Session, SessionConfig};
use dronefleet::testing::{ConnectBehavior, MockTransport};
use dronefleet::transport::TransportEvent;
use std::time::Instant;

const UUID_ID: &str = "5f1b3c2e-8a4d-4e7f-9b2a-1c3d5e7f9a0b";

#[test]
fn test_sampled_report_survives_the_wire() {
    let mut agent = Agent::new(UUID_ID, "Tour Eiffel", DEFAULT_START);
    agent.step();
    let report = agent.sample(41, 1_531_604_906);

    let frame = encode(&report).unwrap();
    assert_eq!(decode(&frame).unwrap(), report);
    assert_eq!(decode_any(&frame).unwrap(), report);
}

#[test]
fn test_binary_frame_is_much_smaller_than_json() {
    let agent = Agent::new(UUID_ID, "Tour Eiffel", DEFAULT_START);
    let report = agent.sample(u32::MAX, u32::MAX);

    let binary = PayloadFormat::Binary.encode(&report, agent.display_name()).unwrap();
    let json = PayloadFormat::Json.encode(&report, agent.display_name()).unwrap();

    assert_eq!(binary.len(), 18 + UUID_ID.len());
    assert!(
        binary.len() * 2 < json.len(),
        "binary {} vs json {}",
        binary.len(),
        json.len()
    );
}

#[test]
fn test_long_identity_never_truncated() {
    let long_id = "d".repeat(300);
    let agent = Agent::new(long_id.as_str(), "long", DEFAULT_START);
    let report = agent.sample(0, 0);

    assert_eq!(
        encode(&report),
        Err(CodecError::IdTooLong { len: 300, max: 255 })
    );
}

#[test]
fn test_session_publishes_decodable_frames() {
    let now = Instant::now();
    let transport = MockTransport::detached("A1").with_behavior(ConnectBehavior::Hang);
    let handle = transport.handle();
    let mut session = Session::new("A1", SessionConfig::default(), transport);
    let mut agent = Agent::new("A1", "Alpha", DEFAULT_START);

    session.connect(now);
    session.handle_event(TransportEvent::Connected, now);

    for _ in 0..3 {
        agent.step();
        let report = agent.sample(session.next_sequence(), 1_531_604_906);
        session.enqueue(&report, now);
    }

    let frames = handle.published();
    assert_eq!(frames.len(), 3);
    for (expected, frame) in frames.iter().enumerate() {
        assert_eq!(frame.topic, "drone/position");
        let report = decode(&frame.payload).unwrap();
        assert_eq!(report.agent_id, "A1");
        assert_eq!(report.sequence_number, expected as u32);
    }
}
