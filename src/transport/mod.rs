//! Transport layer for position publishing
//!
//! This module provides the transport abstraction consumed by sessions and
//! the MQTT implementation used in production.
//!
//! Transports never block the caller. `connect` only starts an attempt; its
//! outcome, and any later loss of the connection, arrive asynchronously as
//! [`SessionEvent`]s on the channel handed to the transport at creation.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

pub mod mqtt;

/// Delivery guarantee requested for each published frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DeliveryQos {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for DeliveryQos {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DeliveryQos::AtMostOnce),
            1 => Ok(DeliveryQos::AtLeastOnce),
            2 => Ok(DeliveryQos::ExactlyOnce),
            other => Err(format!("QoS must be 0, 1 or 2, got {other}")),
        }
    }
}

impl From<DeliveryQos> for u8 {
    fn from(qos: DeliveryQos) -> Self {
        match qos {
            DeliveryQos::AtMostOnce => 0,
            DeliveryQos::AtLeastOnce => 1,
            DeliveryQos::ExactlyOnce => 2,
        }
    }
}

/// Transport failures surfaced synchronously
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),
    #[error("Publishing failed: {0}")]
    PublishFailed(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Transport closed")]
    Closed,
}

/// Asynchronous connection notifications
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The broker acknowledged the connection
    Connected,
    /// The attempt failed or timed out before being acknowledged
    ConnectFailed(String),
    /// An established connection was lost
    Disconnected(String),
    /// A frame accepted earlier could not be delivered
    PublishFailed(String),
}

/// A transport event tagged with its origin
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub agent_id: String,
    /// Connection the event belongs to; see [`Transport::connection_id`]
    pub connection_id: u64,
    pub event: TransportEvent,
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Create the channel every transport of a fleet reports into
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Capability a session drives.
///
/// Implementations must be non-blocking and keep publish order FIFO for the
/// lifetime of one connection.
pub trait Transport: Send {
    /// Start a connection attempt. Success or failure is reported later as a
    /// `Connected` or `ConnectFailed` event; an `Err` here means the attempt
    /// could not even be started.
    fn connect(&mut self) -> Result<(), TransportError>;

    /// Hand one frame to the connection
    fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: DeliveryQos,
    ) -> Result<(), TransportError>;

    /// Drop the current connection, cancelling any attempt in flight.
    /// Idempotent.
    fn disconnect(&mut self);

    /// Identifier of the current connection. Changes on every `connect` and
    /// `disconnect`, so events from a released connection can be recognised
    /// as stale.
    fn connection_id(&self) -> u64;
}

/// Builds one transport per agent
pub trait TransportFactory {
    type Transport: Transport;

    fn create(
        &self,
        agent_id: &str,
        events: EventSender,
    ) -> Result<Self::Transport, TransportError>;
}

pub use mqtt::{MqttTransport, MqttTransportFactory};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_conversions() {
        assert_eq!(DeliveryQos::try_from(0), Ok(DeliveryQos::AtMostOnce));
        assert_eq!(DeliveryQos::try_from(1), Ok(DeliveryQos::AtLeastOnce));
        assert_eq!(DeliveryQos::try_from(2), Ok(DeliveryQos::ExactlyOnce));
        assert!(DeliveryQos::try_from(3).is_err());
        assert_eq!(u8::from(DeliveryQos::ExactlyOnce), 2);
        assert_eq!(DeliveryQos::default(), DeliveryQos::AtLeastOnce);
    }

    #[test]
    fn test_qos_serde_as_integer() {
        let qos: DeliveryQos = serde_json::from_str("0").unwrap();
        assert_eq!(qos, DeliveryQos::AtMostOnce);
        assert_eq!(serde_json::to_string(&DeliveryQos::AtLeastOnce).unwrap(), "1");
        assert!(serde_json::from_str::<DeliveryQos>("7").is_err());
    }

    #[test]
    fn test_transport_error_display() {
        let errors = vec![
            TransportError::ConnectFailed("refused".to_string()),
            TransportError::PublishFailed("closed".to_string()),
            TransportError::InvalidBrokerUrl("nope".to_string()),
            TransportError::NotConnected,
            TransportError::Closed,
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }

    #[tokio::test]
    async fn test_event_channel_delivers_in_order() {
        let (tx, mut rx) = event_channel();
        for (i, event) in [TransportEvent::Connected, TransportEvent::Disconnected("x".into())]
            .into_iter()
            .enumerate()
        {
            tx.send(SessionEvent {
                agent_id: "A1".to_string(),
                connection_id: i as u64,
                event,
            })
            .unwrap();
        }

        assert_eq!(rx.recv().await.unwrap().event, TransportEvent::Connected);
        assert_eq!(rx.recv().await.unwrap().connection_id, 1);
    }
}
