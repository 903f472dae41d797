//! Impure half of the MQTT transport
//!
//! Each `connect` builds a fresh rumqttc client and event loop and spawns a
//! task that polls it. The task reports the ConnAck (or its absence within
//! the connect timeout) and any later loss of the link as [`SessionEvent`]s,
//! then exits. Reconnecting is the session's decision, never rumqttc's.

use super::connection::{configure_mqtt_options, parse_broker_url, to_mqtt_qos, MIN_CHANNEL_CAPACITY};
use super::events::{route_event, LinkRoute};
use crate::config::BrokerSection;
use crate::transport::{
    DeliveryQos, EventSender, SessionEvent, Transport, TransportError, TransportEvent,
    TransportFactory,
};
use bytes::Bytes;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Where a poll task reports to
#[derive(Debug, Clone)]
struct LinkContext {
    agent_id: String,
    connection_id: u64,
    events: EventSender,
}

impl LinkContext {
    fn emit(&self, event: TransportEvent) {
        // The receiver only goes away when the supervisor is gone
        let _ = self.events.send(SessionEvent {
            agent_id: self.agent_id.clone(),
            connection_id: self.connection_id,
            event,
        });
    }
}

/// MQTT transport for one agent
pub struct MqttTransport {
    agent_id: String,
    broker: BrokerSection,
    events: EventSender,
    channel_capacity: usize,
    client: Option<AsyncClient>,
    poll_task: Option<JoinHandle<()>>,
    connection_id: u64,
}

impl MqttTransport {
    pub fn new(
        agent_id: impl Into<String>,
        broker: BrokerSection,
        channel_capacity: usize,
        events: EventSender,
    ) -> Result<Self, TransportError> {
        parse_broker_url(&broker.broker_url)?;
        Ok(Self {
            agent_id: agent_id.into(),
            broker,
            events,
            channel_capacity: channel_capacity.max(MIN_CHANNEL_CAPACITY),
            client: None,
            poll_task: None,
            connection_id: 0,
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn release(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        self.client = None;
    }
}

impl Transport for MqttTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.release();
        self.connection_id += 1;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::ConnectFailed(format!("no async runtime: {e}")))?;
        let options = configure_mqtt_options(&self.agent_id, self.connection_id, &self.broker)?;
        let (client, event_loop) = AsyncClient::new(options, self.channel_capacity);

        let link = LinkContext {
            agent_id: self.agent_id.clone(),
            connection_id: self.connection_id,
            events: self.events.clone(),
        };
        let timeout = self.broker.connect_timeout();
        debug!(
            agent_id = %self.agent_id,
            connection_id = self.connection_id,
            broker = %self.broker.broker_url,
            "Starting MQTT connection"
        );

        self.poll_task = Some(runtime.spawn(drive_connection(event_loop, link, timeout)));
        self.client = Some(client);
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: DeliveryQos,
    ) -> Result<(), TransportError> {
        let client = self.client.as_ref().ok_or(TransportError::NotConnected)?;
        if self.poll_task.as_ref().map_or(true, |task| task.is_finished()) {
            return Err(TransportError::Closed);
        }
        client
            .try_publish(topic.to_string(), to_mqtt_qos(qos), false, payload)
            .map_err(|e| TransportError::PublishFailed(e.to_string()))
    }

    fn disconnect(&mut self) {
        if self.client.is_some() || self.poll_task.is_some() {
            debug!(
                agent_id = %self.agent_id,
                connection_id = self.connection_id,
                "Releasing MQTT connection"
            );
        }
        self.release();
        self.connection_id += 1;
    }

    fn connection_id(&self) -> u64 {
        self.connection_id
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.release();
    }
}

/// Poll one connection until it ends
async fn drive_connection(mut event_loop: EventLoop, link: LinkContext, timeout: Duration) {
    match tokio::time::timeout(timeout, wait_for_connack(&mut event_loop)).await {
        Ok(Ok(())) => {
            info!(agent_id = %link.agent_id, "MQTT connection acknowledged");
            link.emit(TransportEvent::Connected);
        }
        Ok(Err(reason)) => {
            link.emit(TransportEvent::ConnectFailed(reason));
            return;
        }
        Err(_) => {
            link.emit(TransportEvent::ConnectFailed(format!(
                "no ConnAck within {}s",
                timeout.as_secs()
            )));
            return;
        }
    }

    loop {
        match event_loop.poll().await {
            Ok(event) => match route_event(&event) {
                LinkRoute::Disconnected(reason) => {
                    warn!(agent_id = %link.agent_id, %reason, "Broker closed the connection");
                    link.emit(TransportEvent::Disconnected(reason));
                    return;
                }
                LinkRoute::PublishRejected(reason) => {
                    warn!(agent_id = %link.agent_id, %reason, "Broker rejected a publish");
                    link.emit(TransportEvent::PublishFailed(reason));
                }
                route => trace!(agent_id = %link.agent_id, ?route, "MQTT event"),
            },
            Err(e) => {
                warn!(agent_id = %link.agent_id, error = %e, "MQTT connection lost");
                link.emit(TransportEvent::Disconnected(e.to_string()));
                return;
            }
        }
    }
}

/// Poll until the broker acknowledges the connection
async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), String> {
    loop {
        match event_loop.poll().await {
            Ok(event) => {
                if route_event(&event) == LinkRoute::ConnectionAcknowledged {
                    return Ok(());
                }
            }
            Err(e) => return Err(e.to_string()),
        }
    }
}

/// Builds [`MqttTransport`]s sharing one broker configuration
#[derive(Debug, Clone)]
pub struct MqttTransportFactory {
    broker: BrokerSection,
    channel_capacity: usize,
}

impl MqttTransportFactory {
    /// `channel_capacity` bounds frames buffered inside rumqttc per agent
    pub fn new(broker: BrokerSection, channel_capacity: usize) -> Self {
        Self {
            broker,
            channel_capacity,
        }
    }
}

impl TransportFactory for MqttTransportFactory {
    type Transport = MqttTransport;

    fn create(&self, agent_id: &str, events: EventSender) -> Result<MqttTransport, TransportError> {
        MqttTransport::new(agent_id, self.broker.clone(), self.channel_capacity, events)
    }
}
