//! Error types for chat sessions
//!
//! Validation failures are reported synchronously before any network effect.
//! Network failures on the send path are surfaced to the caller; nothing here
//! is retried automatically.

use crate::config::ConfigError;
use crate::protocol::MessageError;
use std::time::Duration;
use thiserror::Error;

/// Failure to establish a session with the broker
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Invalid session configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Broker unreachable: {0}")]
    Unreachable(String),

    #[error("Broker rejected the handshake: {0}")]
    HandshakeRejected(String),

    #[error("Timed out after {0:?} waiting for the broker to accept the connection")]
    Timeout(Duration),

    #[error("Connected but subscription failed: {0}")]
    Subscribe(#[from] SubscribeError),
}

/// Failure to register a subscription
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("Not connected to a broker")]
    NotConnected,

    #[error("Broker rejected the subscription: {0}")]
    Rejected(String),

    #[error("Timed out after {0:?} waiting for subscription acknowledgment")]
    Timeout(Duration),
}

/// Failure to publish one message
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("Not connected to a broker")]
    NotConnected,

    #[error("Broker rejected the publish: {0}")]
    Rejected(String),

    #[error("Timed out after {0:?} waiting for publish acknowledgment")]
    Timeout(Duration),
}

/// Failure of [`SessionManager::send`](crate::session::SessionManager::send)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("Message text cannot be empty")]
    EmptyMessage,

    #[error("Session is not configured")]
    NotConfigured,

    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl From<MessageError> for SendError {
    fn from(error: MessageError) -> Self {
        match error {
            MessageError::EmptyText => SendError::EmptyMessage,
        }
    }
}

impl SendError {
    /// True when the failure happened before anything reached the network
    pub fn is_local(&self) -> bool {
        matches!(self, SendError::EmptyMessage | SendError::NotConfigured)
    }
}

/// Result type for session configuration
pub type ConnectResult<T> = Result<T, ConnectError>;
