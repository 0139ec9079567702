//! Chat session manager
//!
//! The single point of configuration and use for one chat session. The
//! manager exclusively owns the broker connection, the conversation log and
//! the delivery feed; callers only ever get snapshots or send requests.

use super::feed::DeliveryFeed;
use super::log::{ConversationLog, LogSnapshot};
use super::observer::{LogObserver, ObserverHub, SessionEvent, SessionState};
use crate::config::SessionConfig;
use crate::error::{ConnectResult, PublishError, SendError};
use crate::observability::metrics::metrics;
use crate::protocol::{is_blank, Message};
use crate::transport::{BrokerConnection, QosLevel, Subscription};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{error, info, warn, Instrument};

/// Everything that belongs to one configured session
struct ActiveSession {
    config: SessionConfig,
    log: Arc<ConversationLog>,
    feed: DeliveryFeed,
}

/// Manages one chat session over an injected broker connection
pub struct SessionManager<C>
where
    C: BrokerConnection,
{
    connection: C,
    hub: Arc<ObserverHub>,
    session: Option<ActiveSession>,
}

impl<C> SessionManager<C>
where
    C: BrokerConnection,
{
    pub fn new(connection: C) -> Self {
        Self {
            connection,
            hub: Arc::new(ObserverHub::new()),
            session: None,
        }
    }

    /// Get the connection instance for testing
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// Start a session, replacing any existing one
    ///
    /// The previous session's feed is stopped and its connection released
    /// before the new connection is attempted. On success the session is
    /// subscribed to `config.topic` at exactly-once with self-echo excluded,
    /// and starts from an empty log.
    pub async fn configure(&mut self, config: SessionConfig) -> ConnectResult<()> {
        let span = crate::session_span!(
            operation = "configure",
            host = %config.host,
            port = config.port,
            topic = %config.topic
        );
        self.configure_session(config).instrument(span).await
    }

    async fn configure_session(&mut self, config: SessionConfig) -> ConnectResult<()> {
        self.teardown().await;
        config.validate()?;

        let inbound = self.connection.connect(&config).await.map_err(|e| {
            error!(error = %e, "Failed to connect");
            e
        })?;

        let subscription = Subscription::chat(&config.topic);
        if let Err(e) = self.connection.subscribe(&subscription).await {
            error!(error = %e, "Failed to subscribe");
            self.connection.disconnect().await;
            return Err(e.into());
        }

        let log = Arc::new(ConversationLog::with_hub(self.hub.clone()));
        self.hub
            .broadcast(SessionEvent::Snapshot(LogSnapshot::empty()));
        self.hub.set_state(SessionState::Connected {
            topic: config.topic.clone(),
        });

        let feed = DeliveryFeed::spawn(inbound, log.clone(), self.hub.clone(), &config.topic);
        metrics().record_session_configured();
        info!("Chat session configured");

        self.session = Some(ActiveSession { config, log, feed });
        Ok(())
    }

    /// Publish `text` to the session topic, then record it in the log
    ///
    /// Blank text is rejected before any network effect. The outgoing entry
    /// is appended only after the broker confirmed the publish, so a failed
    /// send never leaves an entry behind.
    pub async fn send(&self, text: &str) -> Result<(), SendError> {
        if is_blank(text) {
            return Err(SendError::EmptyMessage);
        }
        let session = self.session.as_ref().ok_or(SendError::NotConfigured)?;
        if !self.hub.state().is_connected() {
            warn!(topic = %session.config.topic, "Send attempted on a disconnected session");
            return Err(PublishError::NotConnected.into());
        }

        let message = Message::outgoing(text)?;
        let message_id = message.id();
        let started = Instant::now();

        let published = self
            .connection
            .publish(
                &session.config.topic,
                Bytes::copy_from_slice(text.as_bytes()),
                QosLevel::ExactlyOnce,
                Some(message_id),
            )
            .await;

        if let Err(e) = published {
            metrics().record_publish_failure();
            warn!(
                topic = %session.config.topic,
                message_id = %message_id,
                error = %e,
                "Publish failed, message not logged"
            );
            return Err(e.into());
        }

        metrics().record_message_published(started.elapsed());
        let seq = session.log.append(message);
        info!(
            topic = %session.config.topic,
            seq,
            message_id = %message_id,
            direction = "outgoing",
            "Message sent"
        );
        Ok(())
    }

    /// Subscribe to log snapshots and state changes
    ///
    /// The first event is a snapshot of the current log.
    pub fn observe_log(&self) -> LogObserver {
        match &self.session {
            Some(session) => session.log.observe(),
            None => self
                .hub
                .register(SessionEvent::Snapshot(LogSnapshot::empty())),
        }
    }

    /// Current log contents; empty when no session is configured
    pub fn snapshot(&self) -> LogSnapshot {
        self.session
            .as_ref()
            .map(|session| session.log.snapshot())
            .unwrap_or_default()
    }

    pub fn state(&self) -> SessionState {
        self.hub.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.hub.watch_state()
    }

    pub fn current_config(&self) -> Option<&SessionConfig> {
        self.session.as_ref().map(|session| &session.config)
    }

    pub fn is_configured(&self) -> bool {
        self.session.is_some()
    }

    /// End the current session and release the connection
    pub async fn shutdown(&mut self) {
        if self.session.is_some() {
            self.teardown().await;
            info!("Chat session shut down");
        }
    }

    /// Stop the feed, then release the connection
    async fn teardown(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        session.feed.stop().await;
        self.connection.disconnect().await;
        self.hub.set_state(SessionState::Unconfigured);
        info!(topic = %session.config.topic, entries = session.log.len(), "Session torn down");
    }
}
