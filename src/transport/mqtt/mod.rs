//! MQTT v5 transport built on rumqttc
//!
//! Pure functions are kept apart from I/O:
//!
//! - [`connection`] - broker URL parsing and option building
//! - [`events`] - classification of event-loop output
//! - [`client`] - the transport itself: per-attempt client and poll task
//!
//! # Usage
//!
//! ```rust,no_run
//! use dronefleet::config::BrokerSection;
//! use dronefleet::transport::{event_channel, MqttTransportFactory, TransportFactory};
//!
//! # tokio_test::block_on(async {
//! let (events, _rx) = event_channel();
//! let factory = MqttTransportFactory::new(BrokerSection::new("mqtt://localhost:1883"), 64);
//! let _transport = factory.create("drone-1", events)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod events;

pub use client::{MqttTransport, MqttTransportFactory};
pub use connection::{configure_mqtt_options, parse_broker_url, to_mqtt_qos};
pub use events::{route_event, LinkRoute};
