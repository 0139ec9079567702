//! Pure connection configuration and state logic for the MQTT client
//!
//! This module contains pure functions for building client options, mapping
//! quality-of-service levels and classifying connection failures.

use crate::config::{MqttSection, SessionConfig};
use crate::error::ConnectError;
use crate::transport::{ConnectionState, QosLevel};
use rumqttc::v5::mqttbytes::v5::Filter;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{ConnectionError, MqttOptions};
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum packet size accepted from the broker
const MAX_PACKET_SIZE: u32 = 256 * 1024;

/// Build a unique client identifier from the configured prefix
///
/// A fresh identifier per connection attempt keeps the broker from treating
/// a reconnect as a session takeover of a still-open connection.
pub fn generate_client_id(prefix: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{millis}-{}", &suffix[..8])
}

/// Pure function to configure MQTT options from session and client settings
pub fn configure_mqtt_options(session: &SessionConfig, settings: &MqttSection) -> MqttOptions {
    let client_id = generate_client_id(&settings.client_id_prefix);
    let mut options = MqttOptions::new(client_id, session.host.clone(), session.port);

    options.set_keep_alive(settings.keep_alive());
    options.set_clean_start(true);
    options.set_max_packet_size(Some(MAX_PACKET_SIZE));

    if let Some((username, password)) = settings.credentials() {
        options.set_credentials(username, password);
    }

    options
}

/// Map the transport-neutral QoS level to rumqttc's
pub fn to_mqtt_qos(qos: QosLevel) -> QoS {
    match qos {
        QosLevel::AtMostOnce => QoS::AtMostOnce,
        QosLevel::AtLeastOnce => QoS::AtLeastOnce,
        QosLevel::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Build the subscription filter, mapping self-echo exclusion to No Local
pub fn build_filter(topic_filter: &str, qos: QosLevel, exclude_self_published: bool) -> Filter {
    let mut filter = Filter::new(topic_filter, to_mqtt_qos(qos));
    filter.nolocal = exclude_self_published;
    filter
}

/// Classify an event loop failure that happened before CONNACK
pub fn classify_connect_failure(error: &ConnectionError) -> ConnectError {
    match error {
        ConnectionError::ConnectionRefused(code) => {
            ConnectError::HandshakeRejected(format!("{code:?}"))
        }
        other => ConnectError::Unreachable(other.to_string()),
    }
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Connection attempt started
    Started,
    /// CONNACK received from broker
    ConnAckReceived,
    /// Broker sent DISCONNECT
    DisconnectedByBroker,
    /// Network or protocol error
    NetworkError(String),
    /// Local teardown
    ClosedLocally,
}

/// Determine next state after a connection event (pure function)
pub fn determine_next_state(event: ConnectionEvent) -> ConnectionState {
    match event {
        ConnectionEvent::Started => ConnectionState::Connecting,
        ConnectionEvent::ConnAckReceived => ConnectionState::Connected,
        ConnectionEvent::DisconnectedByBroker => {
            ConnectionState::Disconnected("Broker disconnected".to_string())
        }
        ConnectionEvent::NetworkError(error) => ConnectionState::Disconnected(error),
        ConnectionEvent::ClosedLocally => {
            ConnectionState::Disconnected("Client disconnected".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionConfig {
        SessionConfig::new("10.0.0.5", 1883, "room/1")
    }

    #[test]
    fn test_client_ids_are_unique() {
        let a = generate_client_id("chat");
        let b = generate_client_id("chat");
        assert!(a.starts_with("chat-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = configure_mqtt_options(&session(), &MqttSection::default());
        assert_eq!(
            options.broker_address(),
            ("10.0.0.5".to_string(), 1883)
        );
        assert!(options.client_id().starts_with("mqtt-chat-"));
        assert!(options.clean_start());
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(to_mqtt_qos(QosLevel::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(to_mqtt_qos(QosLevel::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(to_mqtt_qos(QosLevel::ExactlyOnce), QoS::ExactlyOnce);
    }

    #[test]
    fn test_build_filter_sets_no_local() {
        let filter = build_filter("room/1", QosLevel::ExactlyOnce, true);
        assert_eq!(filter.path, "room/1");
        assert_eq!(filter.qos, QoS::ExactlyOnce);
        assert!(filter.nolocal);

        let filter = build_filter("room/1", QosLevel::AtLeastOnce, false);
        assert!(!filter.nolocal);
    }

    #[test]
    fn test_state_transitions() {
        assert_eq!(
            determine_next_state(ConnectionEvent::Started),
            ConnectionState::Connecting
        );
        assert_eq!(
            determine_next_state(ConnectionEvent::ConnAckReceived),
            ConnectionState::Connected
        );
        assert_eq!(
            determine_next_state(ConnectionEvent::NetworkError("reset".to_string())),
            ConnectionState::Disconnected("reset".to_string())
        );
        assert!(matches!(
            determine_next_state(ConnectionEvent::DisconnectedByBroker),
            ConnectionState::Disconnected(_)
        ));
        assert!(matches!(
            determine_next_state(ConnectionEvent::ClosedLocally),
            ConnectionState::Disconnected(_)
        ));
    }
}
