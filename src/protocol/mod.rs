//! Chat message types and topic rules
//!
//! Payloads travel as plain UTF-8 text; the message identifier rides
//! alongside as an MQTT v5 user property (see [`MESSAGE_ID_PROPERTY`]).

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;

/// User property key carrying the sender-assigned message identifier
pub const MESSAGE_ID_PROPERTY: &str = "message-id";
