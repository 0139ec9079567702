//! Chat session management
//!
//! - [`manager`] - Configuration, sending and teardown of one session
//! - [`log`] - Ordered, duplicate-free conversation log
//! - [`feed`] - Background delivery of inbound messages into the log
//! - [`observer`] - Snapshot and state fan-out to observers
//!
//! Data flows from [`SessionManager::send`] through the broker connection,
//! back in through the connection's inbound stream, through the
//! [`DeliveryFeed`] into the [`ConversationLog`], and out to every
//! [`LogObserver`] as a [`LogSnapshot`].

pub mod feed;
pub mod log;
pub mod manager;
pub mod observer;

pub use feed::{decode_message, DecodeError, DeliveryFeed, FeedExit};
pub use log::{AppendOutcome, ConversationLog, LogSnapshot};
pub use manager::SessionManager;
pub use observer::{LogObserver, ObserverHub, SessionEvent, SessionState};
