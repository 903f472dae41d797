//! Pure MQTT option building
//!
//! Everything here is deterministic apart from the client id suffix, so it
//! can be tested without a broker.

use crate::config::BrokerSection;
use crate::transport::{DeliveryQos, TransportError};
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use url::Url;

/// Smallest request channel handed to rumqttc
pub const MIN_CHANNEL_CAPACITY: usize = 10;

/// Frames are a few dozen bytes; anything near this is not ours
const MAX_PACKET_SIZE: u32 = 16 * 1024;

/// Host, port and TLS flag from a broker URL
pub fn parse_broker_url(broker_url: &str) -> Result<(String, u16, bool), TransportError> {
    let url =
        Url::parse(broker_url).map_err(|_| TransportError::InvalidBrokerUrl(broker_url.to_string()))?;

    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(TransportError::InvalidBrokerUrl(broker_url.to_string())),
    };
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| TransportError::InvalidBrokerUrl(broker_url.to_string()))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok((host.to_string(), port, tls))
}

/// Client id for one connection attempt.
///
/// The suffix keeps a reconnect from colliding with the broker's view of
/// the previous, possibly half-open, connection.
pub fn client_id(agent_id: &str, connection_id: u64) -> String {
    format!("drone-{agent_id}-{connection_id}")
}

/// Build rumqttc options for one connection attempt
pub fn configure_mqtt_options(
    agent_id: &str,
    connection_id: u64,
    broker: &BrokerSection,
) -> Result<MqttOptions, TransportError> {
    let (host, port, tls) = parse_broker_url(&broker.broker_url)?;
    let mut mqtt_options = MqttOptions::new(client_id(agent_id, connection_id), host, port);

    if tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = broker.username() {
        let password = broker.password().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(broker.keep_alive());
    mqtt_options.set_clean_start(true);
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    Ok(mqtt_options)
}

pub fn to_mqtt_qos(qos: DeliveryQos) -> QoS {
    match qos {
        DeliveryQos::AtMostOnce => QoS::AtMostOnce,
        DeliveryQos::AtLeastOnce => QoS::AtLeastOnce,
        DeliveryQos::ExactlyOnce => QoS::ExactlyOnce,
    }
}
