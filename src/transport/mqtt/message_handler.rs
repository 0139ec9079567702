//! Pure message routing logic for MQTT events
//!
//! This module turns rumqttc events into routing decisions the event loop
//! acts on. Nothing here performs I/O.

use crate::error::{PublishError, SubscribeError};
use crate::protocol::{MessageId, MESSAGE_ID_PROPERTY};
use crate::transport::BusMessage;
use rumqttc::v5::mqttbytes::v5::{Packet, Publish, PublishProperties};
use rumqttc::v5::{ConnectionError, Event, StateError};
use rumqttc::Outgoing;

/// Pure routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route an MQTT event to the matching action (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(packet) => match packet {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => {
                    EventRoute::MessageReceived(Self::to_bus_message(publish))
                }
                // rumqttc only emits acks that carry a success reason; refusals
                // surface as errors from `poll`, see `classify_ack_failure`
                Packet::PubAck(ack) => EventRoute::PublishAcknowledged { pkid: ack.pkid },
                Packet::PubComp(comp) => EventRoute::PublishAcknowledged { pkid: comp.pkid },
                Packet::SubAck(suback) => EventRoute::SubscriptionAcknowledged { pkid: suback.pkid },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                other => EventRoute::Infrastructure(format!("{other:?}")),
            },
            Event::Outgoing(outgoing) => match outgoing {
                Outgoing::Publish(pkid) => EventRoute::PublishWritten { pkid: *pkid },
                Outgoing::PubRel(pkid) => EventRoute::PublishReleased { pkid: *pkid },
                Outgoing::Subscribe(pkid) => EventRoute::SubscribeWritten { pkid: *pkid },
                _ => EventRoute::OutgoingEvent,
            },
        }
    }

    /// Convert an incoming PUBLISH to a transport-neutral message (pure function)
    pub fn to_bus_message(publish: &Publish) -> BusMessage {
        BusMessage {
            topic: String::from_utf8_lossy(&publish.topic).to_string(),
            payload: publish.payload.clone(),
            message_id: publish.properties.as_ref().and_then(Self::extract_message_id),
            retain: publish.retain,
        }
    }

    /// Read the sender-assigned message id from user properties (pure function)
    pub fn extract_message_id(properties: &PublishProperties) -> Option<MessageId> {
        properties
            .user_properties
            .iter()
            .find(|(key, _)| key == MESSAGE_ID_PROPERTY)
            .and_then(|(_, value)| MessageId::parse(value))
    }

    /// Build publish properties carrying the message id (pure function)
    pub fn build_publish_properties(message_id: Option<MessageId>) -> PublishProperties {
        let mut properties = PublishProperties::default();
        if let Some(id) = message_id {
            properties
                .user_properties
                .push((MESSAGE_ID_PROPERTY.to_string(), id.to_string()));
        }
        properties
    }

    /// Recognize a refused acknowledgment in an event loop error (pure function)
    ///
    /// rumqttc checks ack reason codes itself and fails `poll` instead of
    /// emitting the ack. The error carries no packet id.
    pub fn classify_ack_failure(error: &ConnectionError) -> Option<AckFailure> {
        let ConnectionError::MqttState(state) = error else {
            return None;
        };

        match state {
            StateError::PubAckFail { reason } => Some(AckFailure::Publish(
                PublishError::Rejected(format!("{reason:?}")),
            )),
            StateError::PubRecFail { reason } => Some(AckFailure::Publish(
                PublishError::Rejected(format!("{reason:?}")),
            )),
            StateError::PubCompFail { reason } => Some(AckFailure::PublishCompletion(
                PublishError::Rejected(format!("{reason:?}")),
            )),
            StateError::SubFail { reason } => Some(AckFailure::Subscribe(
                SubscribeError::Rejected(format!("{reason:?}")),
            )),
            _ => None,
        }
    }
}

/// A request the broker refused, as reported through an event loop error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckFailure {
    /// PUBACK or PUBREC refused a publish awaiting its first acknowledgment
    Publish(PublishError),
    /// PUBCOMP refused a QoS 2 publish that already passed PUBREC
    PublishCompletion(PublishError),
    /// SUBACK refused a subscription
    Subscribe(SubscribeError),
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageReceived(BusMessage),
    /// A PUBLISH left the client with this packet id
    PublishWritten { pkid: u16 },
    /// A PUBREL left the client; the QoS 2 publish now awaits PUBCOMP
    PublishReleased { pkid: u16 },
    /// Final acknowledgment of a publish (PUBACK or PUBCOMP)
    PublishAcknowledged { pkid: u16 },
    /// A SUBSCRIBE left the client with this packet id
    SubscribeWritten { pkid: u16 },
    /// SUBACK granting the subscription
    SubscriptionAcknowledged { pkid: u16 },
    /// Broker sent DISCONNECT
    Disconnected,
    /// Infrastructure event (PingResp, PubRec, etc.)
    Infrastructure(String),
    /// Other outgoing event (handled automatically)
    OutgoingEvent,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, PubAck, PubAckReason,
        PubComp, PubCompReason, PubRec, PubRecReason, SubAck, SubscribeReasonCode,
    };
    use rumqttc::v5::mqttbytes::QoS;

    fn publish_packet(properties: Option<PublishProperties>) -> Publish {
        Publish {
            dup: false,
            qos: QoS::ExactlyOnce,
            retain: false,
            topic: Bytes::from("room/1"),
            pkid: 1,
            payload: Bytes::from("hello"),
            properties,
        }
    }

    #[test]
    fn test_route_connack_and_disconnect() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        ));

        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&disconnect),
            EventRoute::Disconnected
        ));
    }

    #[test]
    fn test_route_publish_without_message_id() {
        let event = Event::Incoming(Packet::Publish(publish_packet(None)));
        match MessageHandler::route_mqtt_event(&event) {
            EventRoute::MessageReceived(message) => {
                assert_eq!(message.topic, "room/1");
                assert_eq!(message.payload, Bytes::from("hello"));
                assert_eq!(message.message_id, None);
                assert!(!message.retain);
            }
            other => panic!("Expected MessageReceived, got {other:?}"),
        }
    }

    #[test]
    fn test_message_id_round_trips_through_properties() {
        let id = MessageId::new();
        let properties = MessageHandler::build_publish_properties(Some(id));
        let event = Event::Incoming(Packet::Publish(publish_packet(Some(properties))));

        match MessageHandler::route_mqtt_event(&event) {
            EventRoute::MessageReceived(message) => assert_eq!(message.message_id, Some(id)),
            other => panic!("Expected MessageReceived, got {other:?}"),
        }
    }

    #[test]
    fn test_unparseable_message_id_is_ignored() {
        let mut properties = PublishProperties::default();
        properties
            .user_properties
            .push((MESSAGE_ID_PROPERTY.to_string(), "garbage".to_string()));
        assert_eq!(MessageHandler::extract_message_id(&properties), None);
    }

    #[test]
    fn test_route_outgoing_publish_and_subscribe() {
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Publish(4))),
            EventRoute::PublishWritten { pkid: 4 }
        ));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Subscribe(2))),
            EventRoute::SubscribeWritten { pkid: 2 }
        ));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::PingReq)),
            EventRoute::OutgoingEvent
        ));
    }

    #[test]
    fn test_route_publish_acknowledgments() {
        let puback = Event::Incoming(Packet::PubAck(PubAck {
            pkid: 3,
            reason: PubAckReason::Success,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&puback),
            EventRoute::PublishAcknowledged { pkid: 3 }
        ));

        let pubrec = Event::Incoming(Packet::PubRec(PubRec {
            pkid: 5,
            reason: PubRecReason::Success,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&pubrec),
            EventRoute::Infrastructure(_)
        ));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::PubRel(5))),
            EventRoute::PublishReleased { pkid: 5 }
        ));

        let pubcomp = Event::Incoming(Packet::PubComp(PubComp {
            pkid: 5,
            reason: PubCompReason::Success,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&pubcomp),
            EventRoute::PublishAcknowledged { pkid: 5 }
        ));
    }

    #[test]
    fn test_route_suback() {
        let granted = Event::Incoming(Packet::SubAck(SubAck {
            pkid: 1,
            return_codes: vec![SubscribeReasonCode::Success(QoS::ExactlyOnce)],
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&granted),
            EventRoute::SubscriptionAcknowledged { pkid: 1 }
        ));
    }

    #[test]
    fn test_classify_refused_acknowledgments() {
        let cases = [
            (
                StateError::PubAckFail {
                    reason: PubAckReason::QuotaExceeded,
                },
                AckFailure::Publish(PublishError::Rejected("QuotaExceeded".to_string())),
            ),
            (
                StateError::PubRecFail {
                    reason: PubRecReason::NotAuthorized,
                },
                AckFailure::Publish(PublishError::Rejected("NotAuthorized".to_string())),
            ),
            (
                StateError::PubCompFail {
                    reason: PubCompReason::PacketIdentifierNotFound,
                },
                AckFailure::PublishCompletion(PublishError::Rejected(
                    "PacketIdentifierNotFound".to_string(),
                )),
            ),
            (
                StateError::SubFail {
                    reason: SubscribeReasonCode::NotAuthorized,
                },
                AckFailure::Subscribe(SubscribeError::Rejected("NotAuthorized".to_string())),
            ),
        ];

        for (state, expected) in cases {
            let error = ConnectionError::MqttState(state);
            assert_eq!(MessageHandler::classify_ack_failure(&error), Some(expected));
        }
    }

    #[test]
    fn test_other_errors_are_not_ack_failures() {
        let io = ConnectionError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert_eq!(MessageHandler::classify_ack_failure(&io), None);

        let unsolicited = ConnectionError::MqttState(StateError::Unsolicited(4));
        assert_eq!(MessageHandler::classify_ack_failure(&unsolicited), None);
    }
}
