//! Background delivery of inbound broker messages into the conversation log
//!
//! Exactly one feed task runs per connection. It reads the connection's
//! inbound stream in arrival order, decodes each payload and appends it to
//! the log. A payload that can't be decoded is logged and skipped; it never
//! ends the feed.

use super::log::ConversationLog;
use super::observer::{ObserverHub, SessionState};
use crate::observability::metrics::metrics;
use crate::protocol::{is_blank, Direction, Message, MessageId};
use crate::transport::{BusMessage, InboundStream};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

/// Why an inbound payload was skipped
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("Payload is empty")]
    Empty,
}

/// Decode an inbound bus message into an incoming chat message (pure function)
///
/// The sender's message id is reused when present so redeliveries collapse
/// into one log entry.
pub fn decode_message(message: &BusMessage) -> Result<Message, DecodeError> {
    let text = std::str::from_utf8(&message.payload)?;
    if is_blank(text) {
        return Err(DecodeError::Empty);
    }

    let id = message.message_id.unwrap_or_else(MessageId::new);
    Message::new(id, Direction::Incoming, text).map_err(|_| DecodeError::Empty)
}

/// How the feed task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedExit {
    /// Stop signal received
    Stopped,
    /// The connection closed its inbound stream
    StreamClosed,
}

/// Handle to the running feed task
pub struct DeliveryFeed {
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<FeedExit>>,
}

impl DeliveryFeed {
    /// Start the feed task for one connection's inbound stream
    pub fn spawn(
        inbound: InboundStream,
        log: Arc<ConversationLog>,
        hub: Arc<ObserverHub>,
        topic: &str,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let span = crate::session_span!(operation = "delivery_feed", topic = %topic);
        let handle = tokio::spawn(Self::run(inbound, stop_rx, log, hub).instrument(span));

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    async fn run(
        mut inbound: InboundStream,
        mut stop_rx: watch::Receiver<bool>,
        log: Arc<ConversationLog>,
        hub: Arc<ObserverHub>,
    ) -> FeedExit {
        debug!("Delivery feed started");

        let exit = loop {
            tokio::select! {
                biased;
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break FeedExit::Stopped;
                    }
                }
                next = inbound.next() => match next {
                    Some(message) => Self::deliver(&message, &log),
                    None => break FeedExit::StreamClosed,
                },
            }
        };

        match exit {
            FeedExit::Stopped => {
                inbound.close();
                debug!("Delivery feed stopped");
            }
            FeedExit::StreamClosed => {
                warn!("Inbound stream closed, session disconnected");
                hub.set_state(SessionState::Disconnected {
                    reason: "Broker connection closed".to_string(),
                });
            }
        }
        exit
    }

    fn deliver(bus_message: &BusMessage, log: &ConversationLog) {
        metrics().record_message_received();

        let message = match decode_message(bus_message) {
            Ok(message) => message,
            Err(e) => {
                metrics().record_decode_failure();
                warn!(
                    topic = %bus_message.topic,
                    bytes = bus_message.payload.len(),
                    error = %e,
                    "Skipping undecodable payload"
                );
                return;
            }
        };

        let message_id = message.id();
        let outcome = log.insert(message);
        if !outcome.is_duplicate() {
            info!(
                topic = %bus_message.topic,
                seq = outcome.seq(),
                message_id = %message_id,
                direction = "incoming",
                retained = bus_message.retain,
                "Message received"
            );
        }
    }

    /// True once the task has ended on its own or after [`stop`](Self::stop)
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal the task to stop and wait for it
    pub async fn stop(mut self) -> Option<FeedExit> {
        let _ = self.stop_tx.send(true);
        let handle = self.handle.take()?;
        match handle.await {
            Ok(exit) => Some(exit),
            Err(e) => {
                warn!(error = %e, "Delivery feed task failed");
                None
            }
        }
    }
}

impl Drop for DeliveryFeed {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}
