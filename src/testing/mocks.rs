//! Mock implementations for testing
//!
//! [`MockTransport`] stands in for the MQTT link. It records every call and
//! answers connection attempts according to a scripted [`ConnectBehavior`],
//! reporting outcomes on the same event channel a real transport would.

use crate::transport::{
    DeliveryQos, EventSender, SessionEvent, Transport, TransportError, TransportEvent,
    TransportFactory,
};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// How the mock answers `connect`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Report `Connected` right away
    #[default]
    Succeed,
    /// Report `ConnectFailed` right away
    Fail,
    /// Report nothing; the test decides the outcome
    Hang,
    /// Refuse synchronously with an error
    Refuse,
}

/// One frame handed to the mock
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedFrame {
    pub topic: String,
    pub payload: Bytes,
    pub qos: DeliveryQos,
    pub connection_id: u64,
}

#[derive(Debug, Default)]
struct MockState {
    behavior: ConnectBehavior,
    /// Overrides `behavior` for the next attempts, front first
    scripted: VecDeque<ConnectBehavior>,
    fail_publishes: bool,
    reject_publishes: bool,
    connected: bool,
    connection_id: u64,
    connect_calls: u32,
    disconnect_calls: u32,
    published: Vec<PublishedFrame>,
}

/// Shared view of a [`MockTransport`], kept by tests after the transport
/// has been moved into a session
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_behavior(&self, behavior: ConnectBehavior) {
        self.lock().behavior = behavior;
    }

    /// Queue behaviours for the next attempts only
    pub fn script(&self, behaviors: impl IntoIterator<Item = ConnectBehavior>) {
        self.lock().scripted.extend(behaviors);
    }

    pub fn set_fail_publishes(&self, fail: bool) {
        self.lock().fail_publishes = fail;
    }

    /// Accept publishes, then report each one as refused by the broker
    pub fn set_reject_publishes(&self, reject: bool) {
        self.lock().reject_publishes = reject;
    }

    pub fn connect_calls(&self) -> u32 {
        self.lock().connect_calls
    }

    pub fn disconnect_calls(&self) -> u32 {
        self.lock().disconnect_calls
    }

    pub fn connection_id(&self) -> u64 {
        self.lock().connection_id
    }

    /// True after a successful connect and before the next disconnect
    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn published(&self) -> Vec<PublishedFrame> {
        self.lock().published.clone()
    }

    pub fn published_count(&self) -> usize {
        self.lock().published.len()
    }
}

/// Scriptable transport recording connect and publish calls
#[derive(Debug)]
pub struct MockTransport {
    agent_id: String,
    events: Option<EventSender>,
    handle: MockHandle,
}

impl MockTransport {
    /// A transport reporting into `events`
    pub fn new(agent_id: impl Into<String>, events: EventSender) -> Self {
        Self {
            agent_id: agent_id.into(),
            events: Some(events),
            handle: MockHandle::default(),
        }
    }

    /// A transport with no event channel; outcomes are fed to the session
    /// by hand
    pub fn detached(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            events: None,
            handle: MockHandle::default(),
        }
    }

    pub fn with_behavior(self, behavior: ConnectBehavior) -> Self {
        self.handle.set_behavior(behavior);
        self
    }

    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }

    fn emit(&self, connection_id: u64, event: TransportEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(SessionEvent {
                agent_id: self.agent_id.clone(),
                connection_id,
                event,
            });
        }
    }
}

impl Transport for MockTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        let (behavior, connection_id) = {
            let mut state = self.handle.lock();
            state.connect_calls += 1;
            state.connection_id += 1;
            state.connected = false;
            let behavior = state.scripted.pop_front().unwrap_or(state.behavior);
            if behavior == ConnectBehavior::Succeed {
                state.connected = true;
            }
            (behavior, state.connection_id)
        };

        match behavior {
            ConnectBehavior::Succeed => self.emit(connection_id, TransportEvent::Connected),
            ConnectBehavior::Fail => self.emit(
                connection_id,
                TransportEvent::ConnectFailed("connection refused".to_string()),
            ),
            ConnectBehavior::Hang => {}
            ConnectBehavior::Refuse => {
                return Err(TransportError::ConnectFailed(
                    "connection refused".to_string(),
                ))
            }
        }
        Ok(())
    }

    fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: DeliveryQos,
    ) -> Result<(), TransportError> {
        let (connection_id, rejected) = {
            let mut state = self.handle.lock();
            if state.fail_publishes {
                return Err(TransportError::PublishFailed("broken pipe".to_string()));
            }
            let connection_id = state.connection_id;
            state.published.push(PublishedFrame {
                topic: topic.to_string(),
                payload,
                qos,
                connection_id,
            });
            (connection_id, state.reject_publishes)
        };
        if rejected {
            self.emit(
                connection_id,
                TransportEvent::PublishFailed("PubAck NotAuthorized".to_string()),
            );
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = self.handle.lock();
        state.disconnect_calls += 1;
        state.connected = false;
        state.connection_id += 1;
    }

    fn connection_id(&self) -> u64 {
        self.handle.lock().connection_id
    }
}

/// Factory handing out [`MockTransport`]s and remembering their handles
#[derive(Debug, Clone, Default)]
pub struct MockTransportFactory {
    behavior: ConnectBehavior,
    handles: Arc<Mutex<HashMap<String, MockHandle>>>,
}

impl MockTransportFactory {
    pub fn new(behavior: ConnectBehavior) -> Self {
        Self {
            behavior,
            handles: Arc::default(),
        }
    }

    /// Handle of the transport created for `agent_id`
    pub fn handle(&self, agent_id: &str) -> Option<MockHandle> {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(agent_id)
            .cloned()
    }

    /// Change the behaviour of every transport created so far
    pub fn set_behavior_all(&self, behavior: ConnectBehavior) {
        for handle in self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
        {
            handle.set_behavior(behavior);
        }
    }
}

impl TransportFactory for MockTransportFactory {
    type Transport = MockTransport;

    fn create(&self, agent_id: &str, events: EventSender) -> Result<MockTransport, TransportError> {
        let transport = MockTransport::new(agent_id, events).with_behavior(self.behavior);
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(agent_id.to_string(), transport.handle());
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::event_channel;

    #[test]
    fn test_succeeding_connect_emits_connected() {
        let (tx, mut rx) = event_channel();
        let mut transport = MockTransport::new("A1", tx);

        transport.connect().unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.agent_id, "A1");
        assert_eq!(event.event, TransportEvent::Connected);
        assert_eq!(event.connection_id, transport.connection_id());
    }

    #[test]
    fn test_scripted_behaviors_take_precedence() {
        let (tx, mut rx) = event_channel();
        let mut transport = MockTransport::new("A1", tx);
        transport
            .handle()
            .script([ConnectBehavior::Fail, ConnectBehavior::Hang]);

        transport.connect().unwrap();
        assert!(matches!(
            rx.try_recv().unwrap().event,
            TransportEvent::ConnectFailed(_)
        ));

        transport.connect().unwrap();
        assert!(rx.try_recv().is_err());

        transport.connect().unwrap();
        assert_eq!(rx.try_recv().unwrap().event, TransportEvent::Connected);
        assert_eq!(transport.handle().connect_calls(), 3);
    }

    #[test]
    fn test_refuse_is_synchronous() {
        let mut transport = MockTransport::detached("A1").with_behavior(ConnectBehavior::Refuse);
        assert!(transport.connect().is_err());
    }

    #[test]
    fn test_publish_recorded_or_failed() {
        let mut transport = MockTransport::detached("A1");
        let handle = transport.handle();

        transport
            .publish("drone/position", Bytes::from_static(b"x"), DeliveryQos::AtMostOnce)
            .unwrap();
        handle.set_fail_publishes(true);
        assert!(transport
            .publish("drone/position", Bytes::from_static(b"y"), DeliveryQos::AtMostOnce)
            .is_err());

        let published = handle.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload, Bytes::from_static(b"x"));
    }

    #[test]
    fn test_disconnect_changes_connection_id() {
        let mut transport = MockTransport::detached("A1");
        let before = transport.connection_id();
        transport.disconnect();
        assert_ne!(transport.connection_id(), before);
        assert_eq!(transport.handle().disconnect_calls(), 1);
    }

    #[test]
    fn test_factory_tracks_handles() {
        let (tx, _rx) = event_channel();
        let factory = MockTransportFactory::new(ConnectBehavior::Fail);
        let _transport = factory.create("A1", tx).unwrap();

        assert!(factory.handle("A1").is_some());
        assert!(factory.handle("B2").is_none());
        factory.set_behavior_all(ConnectBehavior::Succeed);
    }
}
