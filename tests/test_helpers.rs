//! Test helpers and utilities for integration tests

use mqtt_chat::config::SessionConfig;
use mqtt_chat::session::{LogSnapshot, SessionManager, SessionState};
use mqtt_chat::testing::MockBroker;
use std::time::Duration;

/// How long to wait for background delivery before failing a test
#[allow(dead_code)]
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Session config used across the scenario tests
#[allow(dead_code)]
pub fn room_config() -> SessionConfig {
    SessionConfig::new("10.0.0.5", 1883, "room/1")
}

/// Manager configured against a fresh mock broker, plus a handle to the broker
#[allow(dead_code)]
pub async fn configured_manager() -> (SessionManager<MockBroker>, MockBroker) {
    configured_manager_with(MockBroker::new()).await
}

#[allow(dead_code)]
pub async fn configured_manager_with(
    broker: MockBroker,
) -> (SessionManager<MockBroker>, MockBroker) {
    let mut manager = SessionManager::new(broker.clone());
    manager
        .configure(room_config())
        .await
        .expect("mock configure should succeed");
    (manager, broker)
}

/// Wait until the log holds at least `len` entries
#[allow(dead_code)]
pub async fn wait_for_log_len(manager: &SessionManager<MockBroker>, len: usize) -> LogSnapshot {
    tokio::time::timeout(DELIVERY_TIMEOUT, async {
        loop {
            let snapshot = manager.snapshot();
            if snapshot.len() >= len {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("log never reached {len} entries"))
}

/// Wait until the session reports a disconnection
#[allow(dead_code)]
pub async fn wait_for_disconnect(manager: &SessionManager<MockBroker>) -> SessionState {
    let mut state = manager.watch_state();
    tokio::time::timeout(DELIVERY_TIMEOUT, async {
        loop {
            let current = state.borrow_and_update().clone();
            if matches!(current, SessionState::Disconnected { .. }) {
                return current;
            }
            if state.changed().await.is_err() {
                panic!("session state channel closed");
            }
        }
    })
    .await
    .expect("session never reported a disconnection")
}
