//! Ordered, duplicate-free conversation log
//!
//! All mutation goes through a single exclusive section that assigns the
//! sequence number, stores the entry and notifies observers. Readers get
//! immutable snapshots that share storage with the log until the next append.

use super::observer::{LogObserver, ObserverHub, SessionEvent};
use crate::observability::metrics::metrics;
use crate::protocol::{Direction, LogEntry, Message, MessageId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Point-in-time copy of the log
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogSnapshot {
    entries: Arc<Vec<LogEntry>>,
}

impl LogSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LogEntry> {
        self.entries.iter()
    }

    pub fn get(&self, seq: u64) -> Option<&LogEntry> {
        usize::try_from(seq).ok().and_then(|i| self.entries.get(i))
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    /// Entries with a sequence number of at least `seq`
    pub fn since(&self, seq: u64) -> &[LogEntry] {
        let start = usize::try_from(seq)
            .unwrap_or(usize::MAX)
            .min(self.entries.len());
        &self.entries[start..]
    }
}

impl<'a> IntoIterator for &'a LogSnapshot {
    type Item = &'a LogEntry;
    type IntoIter = std::slice::Iter<'a, LogEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Result of inserting a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Stored at this sequence number
    Appended(u64),
    /// A message with the same id was already stored at this sequence number
    Duplicate(u64),
}

impl AppendOutcome {
    pub fn seq(self) -> u64 {
        match self {
            AppendOutcome::Appended(seq) | AppendOutcome::Duplicate(seq) => seq,
        }
    }

    pub fn is_duplicate(self) -> bool {
        matches!(self, AppendOutcome::Duplicate(_))
    }
}

#[derive(Default)]
struct LogState {
    entries: Arc<Vec<LogEntry>>,
    index: HashMap<MessageId, u64>,
}

/// Thread-safe conversation log for one session
pub struct ConversationLog {
    state: Mutex<LogState>,
    hub: Arc<ObserverHub>,
}

impl ConversationLog {
    /// Standalone log with its own observer registry
    pub fn new() -> Self {
        Self::with_hub(Arc::new(ObserverHub::new()))
    }

    /// Log that notifies the observers registered on `hub`
    pub fn with_hub(hub: Arc<ObserverHub>) -> Self {
        Self {
            state: Mutex::new(LogState::default()),
            hub,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        // Appends never leave the state half-written, so a poisoned lock is still consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a message and return its sequence number
    ///
    /// Appending a message whose id is already present changes nothing and
    /// returns the original sequence number.
    pub fn append(&self, message: Message) -> u64 {
        self.insert(message).seq()
    }

    /// Append a message, reporting whether it was a duplicate
    pub fn insert(&self, message: Message) -> AppendOutcome {
        let mut state = self.lock();
        let id = message.id();

        if let Some(&seq) = state.index.get(&id) {
            metrics().record_duplicate_suppressed();
            debug!(message_id = %id, seq, "Duplicate message ignored");
            return AppendOutcome::Duplicate(seq);
        }

        let seq = state.entries.len() as u64;
        state.index.insert(id, seq);
        Arc::make_mut(&mut state.entries).push(LogEntry { seq, message });

        self.hub.broadcast(SessionEvent::Snapshot(LogSnapshot {
            entries: Arc::clone(&state.entries),
        }));

        AppendOutcome::Appended(seq)
    }

    /// Consistent point-in-time copy of every entry
    pub fn snapshot(&self) -> LogSnapshot {
        LogSnapshot {
            entries: Arc::clone(&self.lock().entries),
        }
    }

    /// Register an observer that starts from the current contents
    pub fn observe(&self) -> LogObserver {
        let state = self.lock();
        self.hub.register(SessionEvent::Snapshot(LogSnapshot {
            entries: Arc::clone(&state.entries),
        }))
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.lock().index.contains_key(&id)
    }

    /// Number of entries in each direction
    pub fn count_by_direction(&self, direction: Direction) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|entry| entry.direction() == direction)
            .count()
    }
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self::new()
    }
}
