//! Testing utilities and mock implementations
//!
//! Lets chat sessions be tested without a running MQTT broker.

pub mod mocks;

pub use mocks::*;
