//! Transport layer for chat sessions
//!
//! This module provides the broker connection abstraction and its MQTT
//! implementation. The abstraction enables dependency injection so sessions
//! can be tested against an in-memory broker.

use crate::config::SessionConfig;
use crate::error::{ConnectError, PublishError, SubscribeError};
use crate::observability::metrics::metrics;
use crate::protocol::MessageId;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::warn;

pub mod mqtt;

/// Quality-of-service level requested for a publish or subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QosLevel {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Interest in a topic filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic_filter: String,
    pub qos: QosLevel,
    /// Ask the broker not to echo this client's own publishes back ("No Local")
    pub exclude_self_published: bool,
}

impl Subscription {
    /// Subscription used by chat sessions: exactly-once, no local echo
    pub fn chat(topic: impl Into<String>) -> Self {
        Self {
            topic_filter: topic.into(),
            qos: QosLevel::ExactlyOnce,
            exclude_self_published: true,
        }
    }
}

/// Raw message delivered by the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
    /// Sender-assigned identifier, when the publisher attached one
    pub message_id: Option<MessageId>,
    pub retain: bool,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            message_id: None,
            retain: false,
        }
    }

    pub fn with_message_id(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }
}

/// Connection state as seen by the owner of a [`BrokerConnection`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection has been attempted yet
    Idle,
    /// Waiting for the broker to accept the handshake
    Connecting,
    /// Ready for publish and subscribe
    Connected,
    /// Connection ended with reason
    Disconnected(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Broker connection abstraction
///
/// An implementation maintains at most one live network session. Each
/// successful [`connect`](BrokerConnection::connect) hands back the inbound
/// stream for that session; the stream is never restarted, and a new
/// connection yields a new stream.
#[async_trait::async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Establish a session, tearing down any existing one first
    async fn connect(&mut self, config: &SessionConfig) -> Result<InboundStream, ConnectError>;

    /// Register interest in a topic filter
    async fn subscribe(&self, subscription: &Subscription) -> Result<(), SubscribeError>;

    /// Publish one message and wait for the acknowledgment matching `qos`
    ///
    /// Never retried here; retry policy belongs to the caller.
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QosLevel,
        message_id: Option<MessageId>,
    ) -> Result<(), PublishError>;

    /// Tear down the current session, closing its inbound stream
    async fn disconnect(&mut self);

    /// Current connection state
    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state().is_connected()
    }
}

/// Create the bounded channel between a connection's reader and its consumer
pub fn inbound_channel(capacity: usize) -> (InboundSender, InboundStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (InboundSender { tx }, InboundStream { rx })
}

/// Reader side of the inbound channel, held by the connection's network task
#[derive(Debug, Clone)]
pub struct InboundSender {
    tx: mpsc::Sender<BusMessage>,
}

impl InboundSender {
    /// Hand a message to the consumer
    ///
    /// When the buffer is full the reader waits for space rather than
    /// dropping the message. Returns false once the consumer is gone.
    pub async fn deliver(&self, message: BusMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(message)) => {
                metrics().record_backpressure();
                warn!(
                    topic = %message.topic,
                    capacity = self.tx.max_capacity(),
                    "Inbound buffer full, waiting for consumer"
                );
                self.tx.send(message).await.is_ok()
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Ordered, non-restartable sequence of raw inbound messages
///
/// Ends when the connection that produced it goes away.
#[derive(Debug)]
pub struct InboundStream {
    rx: mpsc::Receiver<BusMessage>,
}

impl InboundStream {
    /// Wait for the next message; `None` once the connection has closed
    pub async fn next(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }

    /// Stop accepting new messages while still draining buffered ones
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Type alias for the production transport
pub type MqttTransport = mqtt::MqttConnection;
