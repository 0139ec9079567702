//! Mock implementations for testing
//!
//! Provides an in-memory [`BrokerConnection`] so sessions can be exercised
//! without a running MQTT broker.

use crate::config::SessionConfig;
use crate::error::{ConnectError, PublishError, SubscribeError};
use crate::protocol::MessageId;
use crate::transport::{
    inbound_channel, BrokerConnection, BusMessage, ConnectionState, InboundSender, InboundStream,
    QosLevel, Subscription,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A publish recorded by [`MockBroker`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QosLevel,
    pub message_id: Option<MessageId>,
}

impl PublishedMessage {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).to_string()
    }
}

/// Failure a [`MockBroker`] produces on the next connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    Unreachable,
    HandshakeRejected,
    Timeout,
}

impl ConnectFailure {
    fn to_error(self, config: &SessionConfig) -> ConnectError {
        match self {
            ConnectFailure::Unreachable => ConnectError::Unreachable(format!(
                "mock: no route to {}:{}",
                config.host, config.port
            )),
            ConnectFailure::HandshakeRejected => {
                ConnectError::HandshakeRejected("mock: NotAuthorized".to_string())
            }
            ConnectFailure::Timeout => ConnectError::Timeout(Duration::from_secs(5)),
        }
    }
}

#[derive(Debug)]
struct MockBrokerState {
    connection_state: Mutex<ConnectionState>,
    inbound: Mutex<Option<InboundSender>>,
    configs: Mutex<Vec<SessionConfig>>,
    subscriptions: Mutex<Vec<Subscription>>,
    published: Mutex<Vec<PublishedMessage>>,
    connect_failure: Mutex<Option<ConnectFailure>>,
    subscribe_failure: Mutex<Option<SubscribeError>>,
    publish_failure: Mutex<Option<PublishError>>,
    echo_ignores_no_local: AtomicBool,
    disconnects: AtomicUsize,
    feed_capacity: usize,
}

/// In-memory broker connection
///
/// Clones share state, so a test can keep a handle while a
/// [`SessionManager`](crate::session::SessionManager) owns another.
/// Publishes are echoed back to matching subscriptions unless the
/// subscription excludes self-published messages.
#[derive(Debug, Clone)]
pub struct MockBroker {
    state: Arc<MockBrokerState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockBroker {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    /// Mock whose inbound buffer holds `feed_capacity` messages
    pub fn with_capacity(feed_capacity: usize) -> Self {
        Self {
            state: Arc::new(MockBrokerState {
                connection_state: Mutex::new(ConnectionState::Idle),
                inbound: Mutex::new(None),
                configs: Mutex::new(Vec::new()),
                subscriptions: Mutex::new(Vec::new()),
                published: Mutex::new(Vec::new()),
                connect_failure: Mutex::new(None),
                subscribe_failure: Mutex::new(None),
                publish_failure: Mutex::new(None),
                echo_ignores_no_local: AtomicBool::new(false),
                disconnects: AtomicUsize::new(0),
                feed_capacity,
            }),
        }
    }

    /// Mock that echoes every publish, even to No Local subscriptions
    pub fn echoing_all() -> Self {
        let broker = Self::new();
        broker
            .state
            .echo_ignores_no_local
            .store(true, Ordering::Relaxed);
        broker
    }

    pub fn fail_next_connect(&self, failure: ConnectFailure) {
        *lock(&self.state.connect_failure) = Some(failure);
    }

    pub fn fail_next_subscribe(&self, error: SubscribeError) {
        *lock(&self.state.subscribe_failure) = Some(error);
    }

    /// Fail every publish with `error` until [`clear_failures`](Self::clear_failures)
    pub fn fail_publishes(&self, error: PublishError) {
        *lock(&self.state.publish_failure) = Some(error);
    }

    pub fn clear_failures(&self) {
        *lock(&self.state.connect_failure) = None;
        *lock(&self.state.subscribe_failure) = None;
        *lock(&self.state.publish_failure) = None;
    }

    /// Deliver a raw payload on the first subscribed topic
    pub async fn inject(&self, payload: impl Into<Bytes>) -> bool {
        let topic = lock(&self.state.subscriptions)
            .first()
            .map(|subscription| subscription.topic_filter.clone())
            .unwrap_or_else(|| "mock/topic".to_string());
        self.inject_message(BusMessage::new(topic, payload)).await
    }

    /// Deliver a bus message to the live session; false when none is open
    pub async fn inject_message(&self, message: BusMessage) -> bool {
        let sender = lock(&self.state.inbound).clone();
        match sender {
            Some(sender) => sender.deliver(message).await,
            None => false,
        }
    }

    /// Simulate the broker dropping the connection
    pub fn close_stream(&self) {
        lock(&self.state.inbound).take();
        *lock(&self.state.connection_state) =
            ConnectionState::Disconnected("mock: connection reset".to_string());
    }

    pub fn configs(&self) -> Vec<SessionConfig> {
        lock(&self.state.configs).clone()
    }

    /// Number of connect attempts, failed ones included
    pub fn connect_count(&self) -> usize {
        lock(&self.state.configs).len()
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.disconnects.load(Ordering::Relaxed)
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        lock(&self.state.subscriptions).clone()
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.state.published).clone()
    }

    fn echo_target(&self, topic: &str) -> Option<InboundSender> {
        let ignore_no_local = self.state.echo_ignores_no_local.load(Ordering::Relaxed);
        let echoes = lock(&self.state.subscriptions).iter().any(|subscription| {
            topic_matches(&subscription.topic_filter, topic)
                && (ignore_no_local || !subscription.exclude_self_published)
        });
        if echoes {
            lock(&self.state.inbound).clone()
        } else {
            None
        }
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// MQTT filter matching for `+` and `#` wildcards
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[async_trait]
impl BrokerConnection for MockBroker {
    async fn connect(&mut self, config: &SessionConfig) -> Result<InboundStream, ConnectError> {
        self.disconnect().await;
        lock(&self.state.configs).push(config.clone());

        if let Some(failure) = lock(&self.state.connect_failure).take() {
            let error = failure.to_error(config);
            *lock(&self.state.connection_state) = ConnectionState::Disconnected(error.to_string());
            return Err(error);
        }

        let (sender, stream) = inbound_channel(self.state.feed_capacity);
        *lock(&self.state.inbound) = Some(sender);
        *lock(&self.state.connection_state) = ConnectionState::Connected;
        Ok(stream)
    }

    async fn subscribe(&self, subscription: &Subscription) -> Result<(), SubscribeError> {
        if !self.is_connected() {
            return Err(SubscribeError::NotConnected);
        }
        if let Some(error) = lock(&self.state.subscribe_failure).take() {
            return Err(error);
        }

        lock(&self.state.subscriptions).push(subscription.clone());
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QosLevel,
        message_id: Option<MessageId>,
    ) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }
        if let Some(error) = lock(&self.state.publish_failure).clone() {
            return Err(error);
        }

        lock(&self.state.published).push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.clone(),
            qos,
            message_id,
        });

        if let Some(sender) = self.echo_target(topic) {
            let mut echo = BusMessage::new(topic, payload);
            echo.message_id = message_id;
            sender.deliver(echo).await;
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        if lock(&self.state.inbound).take().is_some() {
            self.state.disconnects.fetch_add(1, Ordering::Relaxed);
        }
        lock(&self.state.subscriptions).clear();
        let mut state = lock(&self.state.connection_state);
        if state.is_connected() {
            *state = ConnectionState::Disconnected("Client disconnected".to_string());
        }
    }

    fn state(&self) -> ConnectionState {
        lock(&self.state.connection_state).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig::new("10.0.0.5", 1883, "room/1")
    }

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("room/1", "room/1"));
        assert!(topic_matches("room/+", "room/1"));
        assert!(topic_matches("room/#", "room/1/typing"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("room/1", "room/2"));
        assert!(!topic_matches("room/+", "room/1/typing"));
    }

    #[tokio::test]
    async fn test_echo_respects_no_local() {
        let mut broker = MockBroker::new();
        let mut inbound = broker.connect(&config()).await.unwrap();
        broker
            .subscribe(&Subscription::chat("room/1"))
            .await
            .unwrap();

        broker
            .publish("room/1", Bytes::from("hi"), QosLevel::ExactlyOnce, None)
            .await
            .unwrap();
        broker.inject("from peer").await;

        let message = inbound.next().await.unwrap();
        assert_eq!(message.payload, Bytes::from("from peer"));
    }

    #[tokio::test]
    async fn test_echo_without_no_local() {
        let mut broker = MockBroker::new();
        let mut inbound = broker.connect(&config()).await.unwrap();
        let subscription = Subscription {
            exclude_self_published: false,
            ..Subscription::chat("room/1")
        };
        broker.subscribe(&subscription).await.unwrap();

        let id = MessageId::new();
        broker
            .publish("room/1", Bytes::from("hi"), QosLevel::ExactlyOnce, Some(id))
            .await
            .unwrap();

        let echo = inbound.next().await.unwrap();
        assert_eq!(echo.payload, Bytes::from("hi"));
        assert_eq!(echo.message_id, Some(id));
    }

    #[tokio::test]
    async fn test_connect_failure_is_one_shot() {
        let mut broker = MockBroker::new();
        broker.fail_next_connect(ConnectFailure::Unreachable);

        assert!(matches!(
            broker.connect(&config()).await,
            Err(ConnectError::Unreachable(_))
        ));
        assert!(broker.connect(&config()).await.is_ok());
        assert_eq!(broker.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_close_stream_ends_inbound_and_publishes() {
        let mut broker = MockBroker::new();
        let mut inbound = broker.connect(&config()).await.unwrap();

        broker.close_stream();

        assert!(inbound.next().await.is_none());
        assert_eq!(
            broker
                .publish("room/1", Bytes::from("hi"), QosLevel::ExactlyOnce, None)
                .await,
            Err(PublishError::NotConnected)
        );
    }
}
