//! Fan-out of log snapshots and session state to observers

use super::log::LogSnapshot;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};

/// Session-level state visible to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No session has been configured, or the last one was torn down
    Unconfigured,
    /// Connected and subscribed to `topic`
    Connected { topic: String },
    /// The broker connection ended; sends fail until reconfigured
    Disconnected { reason: String },
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected { .. })
    }
}

/// Event delivered to a [`LogObserver`]
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Full ordered copy of the log after an append
    Snapshot(LogSnapshot),
    StateChanged(SessionState),
}

/// Registry of observers plus the current session state
///
/// Shared by every log a session manager creates, so observers survive
/// reconfiguration.
pub struct ObserverHub {
    observers: Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>,
    state: watch::Sender<SessionState>,
}

impl ObserverHub {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::Unconfigured);
        Self {
            observers: Mutex::new(Vec::new()),
            state,
        }
    }

    fn observers(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<SessionEvent>>> {
        self.observers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an observer whose first event is `initial`
    pub fn register(&self, initial: SessionEvent) -> LogObserver {
        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive, so this cannot fail
        let _ = tx.send(initial);
        self.observers().push(tx);
        LogObserver { rx }
    }

    /// Deliver an event to every live observer, pruning dropped ones
    pub fn broadcast(&self, event: SessionEvent) {
        self.observers()
            .retain(|observer| observer.send(event.clone()).is_ok());
    }

    /// Record a state change and tell observers about it
    pub fn set_state(&self, state: SessionState) {
        let mut observers = self.observers();
        let previous = self.state.send_replace(state.clone());
        if previous != state {
            observers.retain(|observer| {
                observer
                    .send(SessionEvent::StateChanged(state.clone()))
                    .is_ok()
            });
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Watch state changes without receiving log snapshots
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        let mut observers = self.observers();
        observers.retain(|observer| !observer.is_closed());
        observers.len()
    }
}

impl Default for ObserverHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of a session's log, one event per change
///
/// Each observer has its own queue, so a slow observer never delays the log
/// or other observers.
#[derive(Debug)]
pub struct LogObserver {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl LogObserver {
    /// Wait for the next event; `None` once the session manager is gone
    pub async fn next(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already queued
    pub fn try_next(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next snapshot, skipping state changes
    pub async fn next_snapshot(&mut self) -> Option<LogSnapshot> {
        while let Some(event) = self.rx.recv().await {
            if let SessionEvent::Snapshot(snapshot) = event {
                return Some(snapshot);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_delivers_initial_event_first() {
        let hub = ObserverHub::new();
        let mut observer = hub.register(SessionEvent::Snapshot(LogSnapshot::empty()));
        hub.set_state(SessionState::Connected {
            topic: "room/1".to_string(),
        });

        assert_eq!(
            observer.next().await,
            Some(SessionEvent::Snapshot(LogSnapshot::empty()))
        );
        assert_eq!(
            observer.next().await,
            Some(SessionEvent::StateChanged(SessionState::Connected {
                topic: "room/1".to_string()
            }))
        );
    }

    #[test]
    fn test_dropped_observers_are_pruned() {
        let hub = ObserverHub::new();
        let kept = hub.register(SessionEvent::Snapshot(LogSnapshot::empty()));
        let dropped = hub.register(SessionEvent::Snapshot(LogSnapshot::empty()));
        assert_eq!(hub.observer_count(), 2);

        drop(dropped);
        hub.broadcast(SessionEvent::Snapshot(LogSnapshot::empty()));
        assert_eq!(hub.observer_count(), 1);
        drop(kept);
    }

    #[test]
    fn test_repeated_state_is_not_rebroadcast() {
        let hub = ObserverHub::new();
        let mut observer = hub.register(SessionEvent::StateChanged(hub.state()));
        assert!(observer.try_next().is_some());

        hub.set_state(SessionState::Unconfigured);
        assert!(observer.try_next().is_none());

        let reason = "connection closed".to_string();
        hub.set_state(SessionState::Disconnected { reason });
        assert!(matches!(
            observer.try_next(),
            Some(SessionEvent::StateChanged(SessionState::Disconnected { .. }))
        ));
        assert!(!hub.state().is_connected());
    }

    #[tokio::test]
    async fn test_next_snapshot_skips_state_events() {
        let hub = ObserverHub::new();
        let mut observer = hub.register(SessionEvent::StateChanged(SessionState::Unconfigured));
        hub.broadcast(SessionEvent::Snapshot(LogSnapshot::empty()));

        let snapshot = observer.next_snapshot().await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_watch_state() {
        let hub = ObserverHub::new();
        let mut watcher = hub.watch_state();
        hub.set_state(SessionState::Connected {
            topic: "room/1".to_string(),
        });
        watcher.changed().await.unwrap();
        assert!(watcher.borrow().is_connected());
    }
}
