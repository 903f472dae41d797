//! Pure classification of rumqttc event-loop output

use rumqttc::v5::mqttbytes::v5::{Packet, PubAckReason, PubRecReason};
use rumqttc::v5::Event;

/// What an event-loop event means for the link
#[derive(Debug, Clone, PartialEq)]
pub enum LinkRoute {
    /// Broker accepted the connection
    ConnectionAcknowledged,
    /// Broker closed the connection
    Disconnected(String),
    /// Publish acknowledgement traffic
    Delivery,
    /// Broker refused a publish in its acknowledgement
    PublishRejected(String),
    /// Anything else incoming: pings, acks we did not ask about
    Infrastructure,
    /// Our own outgoing packets
    Outgoing,
}

/// Route an event-loop event (pure)
pub fn route_event(event: &Event) -> LinkRoute {
    match event {
        Event::Incoming(packet) => route_packet(packet),
        Event::Outgoing(_) => LinkRoute::Outgoing,
    }
}

fn route_packet(packet: &Packet) -> LinkRoute {
    match packet {
        Packet::ConnAck(_) => LinkRoute::ConnectionAcknowledged,
        Packet::Disconnect(disconnect) => {
            LinkRoute::Disconnected(format!("broker sent disconnect: {disconnect:?}"))
        }
        Packet::PubAck(ack) => match ack.reason {
            PubAckReason::Success | PubAckReason::NoMatchingSubscribers => LinkRoute::Delivery,
            reason => LinkRoute::PublishRejected(format!("PubAck {reason:?} for packet {}", ack.pkid)),
        },
        Packet::PubRec(rec) => match rec.reason {
            PubRecReason::Success | PubRecReason::NoMatchingSubscribers => LinkRoute::Delivery,
            reason => LinkRoute::PublishRejected(format!("PubRec {reason:?} for packet {}", rec.pkid)),
        },
        Packet::PubComp(_) => LinkRoute::Delivery,
        _ => LinkRoute::Infrastructure,
    }
}
