//! Chat message types
//!
//! This module defines the immutable message value exchanged between peers and
//! the log entry that pairs a message with its position in the conversation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Opaque message identifier used as the deduplication key
///
/// Identifiers are assigned when a message is created, never derived from
/// its text, so two messages with identical text remain distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse an identifier carried on the wire
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(Self)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Which side of the conversation produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Sent by this session
    Outgoing,
    /// Received from the peer
    Incoming,
}

/// Errors raised when constructing a message
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("Message text cannot be empty or whitespace-only")]
    EmptyText,
}

/// Immutable chat message
///
/// # Examples
/// ```
/// use mqtt_chat::protocol::{Direction, Message};
///
/// let message = Message::outgoing("hi").unwrap();
/// assert_eq!(message.direction(), Direction::Outgoing);
/// assert_eq!(message.text(), "hi");
///
/// assert!(Message::outgoing("   ").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    direction: Direction,
    text: String,
    /// Wall-clock creation time, informational only
    created_at: DateTime<Utc>,
}

impl Message {
    /// Build a message with an explicit identifier, rejecting blank text
    pub fn new(
        id: MessageId,
        direction: Direction,
        text: impl Into<String>,
    ) -> Result<Self, MessageError> {
        let text = text.into();
        if is_blank(&text) {
            return Err(MessageError::EmptyText);
        }

        Ok(Self {
            id,
            direction,
            text,
            created_at: Utc::now(),
        })
    }

    /// Build a new outgoing message with a fresh identifier
    pub fn outgoing(text: impl Into<String>) -> Result<Self, MessageError> {
        Self::new(MessageId::new(), Direction::Outgoing, text)
    }

    /// Build a new incoming message with a fresh identifier
    pub fn incoming(text: impl Into<String>) -> Result<Self, MessageError> {
        Self::new(MessageId::new(), Direction::Incoming, text)
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// A message together with the sequence number the log assigned to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Insertion position, starting at 0 for each session
    pub seq: u64,
    pub message: Message,
}

impl LogEntry {
    pub fn id(&self) -> MessageId {
        self.message.id()
    }

    pub fn direction(&self) -> Direction {
        self.message.direction()
    }

    pub fn text(&self) -> &str {
        self.message.text()
    }
}

/// True when text has no visible content
pub fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}
