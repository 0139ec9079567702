//! MQTT v5 broker connection
//!
//! The implementation separates pure functions from I/O operations:
//!
//! - [`connection`] - Pure option building, QoS mapping and state transitions
//! - [`message_handler`] - Pure routing of rumqttc events
//! - [`ack_tracker`] - Matching acknowledgments to waiting publishers
//! - [`client`] - Impure I/O operations and coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_chat::config::{MqttSection, SessionConfig};
//! use mqtt_chat::transport::mqtt::MqttConnection;
//! use mqtt_chat::transport::{BrokerConnection, QosLevel, Subscription};
//!
//! # tokio_test::block_on(async {
//! let mut connection = MqttConnection::new(MqttSection::default());
//! let config = SessionConfig::new("localhost", 1883, "room/1");
//! let mut inbound = connection.connect(&config).await?;
//! connection.subscribe(&Subscription::chat("room/1")).await?;
//! connection
//!     .publish("room/1", "hello".into(), QosLevel::ExactlyOnce, None)
//!     .await?;
//! while let Some(message) = inbound.next().await {
//!     println!("{:?}", message.payload);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod ack_tracker;
pub mod client;
pub mod connection;
pub mod message_handler;

pub use ack_tracker::AckTracker;
pub use client::MqttConnection;
pub use connection::{configure_mqtt_options, ConnectionEvent};
pub use message_handler::{EventRoute, MessageHandler};
