//! Impure I/O operations for the MQTT connection
//!
//! This module owns the rumqttc client and its event loop task. The task is
//! the single network reader for a connection: it forwards inbound messages
//! to the connection's [`InboundStream`], resolves acknowledgment waiters and
//! reports state changes. It never reconnects; when the broker session ends
//! the task stops, the inbound stream closes and outstanding requests fail.

use super::ack_tracker::AckTracker;
use super::connection::{
    build_filter, classify_connect_failure, configure_mqtt_options, determine_next_state,
    to_mqtt_qos, ConnectionEvent,
};
use super::message_handler::{AckFailure, EventRoute, MessageHandler};
use crate::config::{MqttSection, SessionConfig};
use crate::error::{ConnectError, PublishError, SubscribeError};
use crate::observability::metrics::metrics;
use crate::protocol::MessageId;
use crate::transport::{
    inbound_channel, BrokerConnection, ConnectionState, InboundSender, InboundStream, QosLevel,
    Subscription,
};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Capacity of rumqttc's request channel
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Time allowed for the event loop task to stop after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type SharedTracker = Arc<StdMutex<AckTracker>>;
type HandshakeSender = oneshot::Sender<Result<(), ConnectError>>;

/// State belonging to one live broker session
struct LiveSession {
    client: Arc<Mutex<AsyncClient>>,
    event_loop_handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// MQTT v5 broker connection backed by rumqttc
pub struct MqttConnection {
    settings: MqttSection,
    session: Option<LiveSession>,
    tracker: SharedTracker,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl MqttConnection {
    pub fn new(settings: MqttSection) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        Self {
            settings,
            session: None,
            tracker: Arc::new(StdMutex::new(AckTracker::new())),
            state_tx,
            state_rx,
        }
    }

    /// Watch connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    fn tracker(tracker: &SharedTracker) -> std::sync::MutexGuard<'_, AckTracker> {
        // A poisoned tracker still holds valid waiters; keep using it
        tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn live_client(&self) -> Option<&Arc<Mutex<AsyncClient>>> {
        if !self.state_rx.borrow().is_connected() {
            return None;
        }
        self.session.as_ref().map(|session| &session.client)
    }

    /// Wait for the handshake outcome reported by the event loop
    async fn wait_for_handshake(
        handshake_rx: oneshot::Receiver<Result<(), ConnectError>>,
        timeout: Duration,
    ) -> Result<(), ConnectError> {
        match tokio::time::timeout(timeout, handshake_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ConnectError::Unreachable(
                "event loop stopped before the handshake completed".to_string(),
            )),
            Err(_) => Err(ConnectError::Timeout(timeout)),
        }
    }

    /// Run the event loop until shutdown or the broker session ends
    async fn run_event_loop(
        mut event_loop: EventLoop,
        mut shutdown_rx: watch::Receiver<bool>,
        mut handshake_tx: Option<HandshakeSender>,
        inbound: InboundSender,
        tracker: SharedTracker,
        state_tx: watch::Sender<ConnectionState>,
    ) {
        let end_state = loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping MQTT event loop");
                        break determine_next_state(ConnectionEvent::ClosedLocally);
                    }
                }
                event_result = event_loop.poll() => {
                    match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            if let Some(state) = Self::process_event_route(
                                route,
                                &mut handshake_tx,
                                &inbound,
                                &tracker,
                                &state_tx,
                            )
                            .await
                            {
                                break state;
                            }
                        }
                        Err(e) => {
                            if let Some(tx) = handshake_tx.take() {
                                let _ = tx.send(Err(classify_connect_failure(&e)));
                            } else if let Some(failure) = MessageHandler::classify_ack_failure(&e) {
                                // rumqttc drops the network after a refused ack
                                Self::reject_waiter(&tracker, failure);
                            } else {
                                error!(error = %e, "MQTT event loop error");
                            }
                            break determine_next_state(ConnectionEvent::NetworkError(e.to_string()));
                        }
                    }
                }
            }
        };

        Self::tracker(&tracker).fail_all();
        metrics().set_connected(false);
        let _ = state_tx.send(end_state);
        info!("MQTT event loop stopped");
        // Dropping `inbound` here closes the session's inbound stream
    }

    /// Act on one routed event; returns the final state when the loop must stop
    async fn process_event_route(
        route: EventRoute,
        handshake_tx: &mut Option<HandshakeSender>,
        inbound: &InboundSender,
        tracker: &SharedTracker,
        state_tx: &watch::Sender<ConnectionState>,
    ) -> Option<ConnectionState> {
        match route {
            EventRoute::ConnectionAcknowledged => {
                let _ = state_tx.send(determine_next_state(ConnectionEvent::ConnAckReceived));
                metrics().set_connected(true);
                if let Some(tx) = handshake_tx.take() {
                    let _ = tx.send(Ok(()));
                }
                None
            }
            EventRoute::MessageReceived(message) => {
                debug!(topic = %message.topic, bytes = message.payload.len(), "Received MQTT message");
                if !inbound.deliver(message).await {
                    warn!("Inbound consumer gone, stopping MQTT event loop");
                    return Some(determine_next_state(ConnectionEvent::ClosedLocally));
                }
                None
            }
            EventRoute::PublishWritten { pkid } => {
                Self::tracker(tracker).publish_written(pkid);
                None
            }
            EventRoute::PublishReleased { pkid } => {
                Self::tracker(tracker).publish_released(pkid);
                None
            }
            EventRoute::PublishAcknowledged { pkid } => {
                Self::tracker(tracker).publish_acknowledged(pkid);
                None
            }
            EventRoute::SubscribeWritten { pkid } => {
                Self::tracker(tracker).subscribe_written(pkid);
                None
            }
            EventRoute::SubscriptionAcknowledged { pkid } => {
                Self::tracker(tracker).subscribe_acknowledged(pkid);
                None
            }
            EventRoute::Disconnected => {
                warn!("Broker closed the MQTT session");
                Some(determine_next_state(ConnectionEvent::DisconnectedByBroker))
            }
            EventRoute::Infrastructure(event) => {
                tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event);
                None
            }
            EventRoute::OutgoingEvent => None,
        }
    }

    /// Answer the request a broker refusal belongs to
    fn reject_waiter(tracker: &SharedTracker, failure: AckFailure) {
        let mut tracker = Self::tracker(tracker);
        let answered = match failure.clone() {
            AckFailure::Publish(error) => tracker.reject_publish(false, error),
            AckFailure::PublishCompletion(error) => tracker.reject_publish(true, error),
            AckFailure::Subscribe(error) => tracker.reject_subscribe(error),
        };
        warn!(?failure, answered, "Broker refused a request, closing connection");
    }

    /// Stop the event loop task, giving it a short grace period
    async fn teardown(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        {
            let client = session.client.lock().await;
            if let Err(e) = client.try_disconnect() {
                debug!(error = %e, "Disconnect request not delivered");
            }
        }
        let _ = session.shutdown_tx.send(true);

        let mut handle = session.event_loop_handle;
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
            Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!(error = %e, "Event loop task ended with error"),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!("Event loop task didn't shut down gracefully, forcing abort");
                handle.abort();
            }
        }

        Self::tracker(&self.tracker).fail_all();
        let _ = self
            .state_tx
            .send(determine_next_state(ConnectionEvent::ClosedLocally));
    }
}

#[async_trait]
impl BrokerConnection for MqttConnection {
    async fn connect(&mut self, config: &SessionConfig) -> Result<InboundStream, ConnectError> {
        self.teardown().await;

        config.validate()?;
        self.settings.validate()?;

        let options = configure_mqtt_options(config, &self.settings);
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = inbound_channel(self.settings.feed_capacity);
        let (handshake_tx, handshake_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let _ = self
            .state_tx
            .send(determine_next_state(ConnectionEvent::Started));
        metrics().record_connection_attempt();
        info!(host = %config.host, port = config.port, "Connecting to MQTT broker");

        let span = crate::mqtt_span!(
            operation = "event_loop",
            host = %config.host,
            port = config.port
        );
        let handle = tokio::spawn(
            Self::run_event_loop(
                event_loop,
                shutdown_rx,
                Some(handshake_tx),
                inbound_tx,
                self.tracker.clone(),
                self.state_tx.clone(),
            )
            .instrument(span),
        );

        self.session = Some(LiveSession {
            client: Arc::new(Mutex::new(client)),
            event_loop_handle: handle,
            shutdown_tx,
        });

        let timeout = self.settings.connect_timeout();
        if let Err(e) = Self::wait_for_handshake(handshake_rx, timeout).await {
            metrics().record_connection_failure();
            error!(host = %config.host, port = config.port, error = %e, "MQTT connection failed");
            self.teardown().await;
            let _ = self.state_tx.send(ConnectionState::Disconnected(e.to_string()));
            return Err(e);
        }

        info!(host = %config.host, port = config.port, "Connected to MQTT broker");
        Ok(inbound_rx)
    }

    async fn subscribe(&self, subscription: &Subscription) -> Result<(), SubscribeError> {
        let client = self.live_client().ok_or(SubscribeError::NotConnected)?;

        let filter = build_filter(
            &subscription.topic_filter,
            subscription.qos,
            subscription.exclude_self_published,
        );

        let waiter = {
            let client = client.lock().await;
            let waiter = Self::tracker(&self.tracker).register_subscribe();
            if let Err(e) = client.subscribe_many(vec![filter]).await {
                Self::tracker(&self.tracker).cancel_last_subscribe();
                debug!(error = %e, "Subscribe request not enqueued");
                return Err(SubscribeError::NotConnected);
            }
            waiter
        };

        let timeout = self.settings.subscribe_timeout();
        let outcome = tokio::time::timeout(timeout, waiter).await;
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SubscribeError::NotConnected),
            Err(_) => {
                Self::tracker(&self.tracker).prune_abandoned();
                Err(SubscribeError::Timeout(timeout))
            }
        };

        match &result {
            Ok(()) => info!(
                topic_filter = %subscription.topic_filter,
                qos = ?subscription.qos,
                no_local = subscription.exclude_self_published,
                "Subscribed"
            ),
            Err(e) => error!(topic_filter = %subscription.topic_filter, error = %e, "Subscribe failed"),
        }
        result
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QosLevel,
        message_id: Option<MessageId>,
    ) -> Result<(), PublishError> {
        let client = self.live_client().ok_or(PublishError::NotConnected)?;
        let properties = MessageHandler::build_publish_properties(message_id);

        // Registration and enqueue happen under the client lock so waiter
        // order always matches request order
        let waiter = {
            let client = client.lock().await;
            let waiter = Self::tracker(&self.tracker).register_publish(qos);
            if let Err(e) = client
                .publish_with_properties(topic, to_mqtt_qos(qos), false, payload, properties)
                .await
            {
                Self::tracker(&self.tracker).cancel_last_publish();
                debug!(error = %e, "Publish request not enqueued");
                return Err(PublishError::NotConnected);
            }
            waiter
        };

        let timeout = self.settings.publish_timeout();
        // The waiter is dropped with the elapsed timeout, so pruning below
        // releases its tracker entry
        let outcome = tokio::time::timeout(timeout, waiter).await;
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PublishError::NotConnected),
            Err(_) => {
                Self::tracker(&self.tracker).prune_abandoned();
                Err(PublishError::Timeout(timeout))
            }
        }
    }

    async fn disconnect(&mut self) {
        self.teardown().await;
        info!("MQTT connection closed");
    }

    fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }
}

impl Drop for MqttConnection {
    fn drop(&mut self) {
        // Async disconnect isn't possible here; make sure the task stops
        if let Some(session) = self.session.take() {
            let _ = session.shutdown_tx.send(true);
            session.event_loop_handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_handshake_success() {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(Ok(()));
        });

        let result = MqttConnection::wait_for_handshake(rx, Duration::from_millis(200)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_handshake_timeout() {
        let (tx, rx) = oneshot::channel::<Result<(), ConnectError>>();
        let result = MqttConnection::wait_for_handshake(rx, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ConnectError::Timeout(_))));
        drop(tx);
    }

    #[tokio::test]
    async fn test_wait_for_handshake_rejected() {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(ConnectError::HandshakeRejected("NotAuthorized".to_string())));
        let result = MqttConnection::wait_for_handshake(rx, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(ConnectError::HandshakeRejected(_))));
    }

    #[tokio::test]
    async fn test_wait_for_handshake_event_loop_gone() {
        let (tx, rx) = oneshot::channel::<Result<(), ConnectError>>();
        drop(tx);
        let result = MqttConnection::wait_for_handshake(rx, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(ConnectError::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_initial_state_is_idle() {
        let connection = MqttConnection::new(MqttSection::default());
        assert_eq!(connection.state(), ConnectionState::Idle);
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn test_operations_fail_without_connection() {
        let connection = MqttConnection::new(MqttSection::default());

        let publish = connection
            .publish("room/1", Bytes::from("hi"), QosLevel::ExactlyOnce, None)
            .await;
        assert_eq!(publish, Err(PublishError::NotConnected));

        let subscribe = connection.subscribe(&Subscription::chat("room/1")).await;
        assert_eq!(subscribe, Err(SubscribeError::NotConnected));
    }

    #[tokio::test]
    async fn test_disconnect_without_connection() {
        let mut connection = MqttConnection::new(MqttSection::default());
        connection.disconnect().await;
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config_before_network() {
        let mut connection = MqttConnection::new(MqttSection::default());
        let result = connection
            .connect(&SessionConfig::new("localhost", 0, "room/1"))
            .await;
        assert!(matches!(result, Err(ConnectError::InvalidConfig(_))));
        assert_eq!(connection.state(), ConnectionState::Idle);
    }
}
