//! MQTT Chat - peer-to-peer chat sessions over an MQTT broker
//!
//! Two parties exchange text messages on a shared topic with exactly-once
//! delivery. This crate provides the session core: the broker connection,
//! the session manager, the conversation log and the delivery feed that
//! merges outgoing and incoming messages into one ordered, duplicate-free
//! conversation.
//!
//! # Overview
//!
//! - [`transport`] - Broker connection abstraction and its MQTT v5 implementation
//! - [`session`] - Session manager, conversation log, delivery feed and observers
//! - [`protocol`] - Message types and topic validation
//! - [`config`] - Session and client configuration
//! - [`observability`] - Structured logging and metrics
//! - [`testing`] - In-memory broker for tests
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mqtt_chat::config::{MqttSection, SessionConfig};
//! use mqtt_chat::session::{SessionEvent, SessionManager};
//! use mqtt_chat::transport::MqttTransport;
//!
//! # tokio_test::block_on(async {
//! let mut manager = SessionManager::new(MqttTransport::new(MqttSection::default()));
//! manager
//!     .configure(SessionConfig::new("10.0.0.5", 1883, "room/1"))
//!     .await?;
//!
//! let mut observer = manager.observe_log();
//! manager.send("hi").await?;
//!
//! while let Some(event) = observer.next().await {
//!     if let SessionEvent::Snapshot(snapshot) = event {
//!         for entry in &snapshot {
//!             println!("{} {:?} {}", entry.seq, entry.direction(), entry.text());
//!         }
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{ChatConfig, ConfigError, MqttSection, SessionConfig};
pub use error::{ConnectError, PublishError, SendError, SubscribeError};
pub use protocol::{Direction, LogEntry, Message, MessageId};
pub use session::{
    ConversationLog, LogObserver, LogSnapshot, SessionEvent, SessionManager, SessionState,
};
pub use transport::{BrokerConnection, MqttTransport, QosLevel, Subscription};
