//! Merge/apply layer.
//!
//! Folds delta pages into local per-session state. Merging is idempotent and
//! order-insensitive: records are positioned by `seq`, an existing record is
//! only replaced by a strictly newer edit, and applying the same page twice
//! changes nothing the second time.

use crate::error::{SyncError, SyncResult};
use chatsync_protocol::{CreateCursor, Message, MessageId, ResourceKey, Timestamp};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// A message composed locally that the server has not confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    /// Client deduplication key; the confirmed record carries the same value.
    pub local_id: String,
    /// Opaque ciphertext.
    pub content: Vec<u8>,
    /// Local creation time.
    pub created_at: Timestamp,
}

/// Local message storage the sync cycle merges into.
///
/// Calls are blocking; the engine invokes them off the async executor.
pub trait MessageStore: Send + Sync {
    /// Merges `records` into the state for `key`.
    ///
    /// Returns the number of records that were inserted or replaced.
    fn merge(&self, key: &ResourceKey, records: &[Message]) -> SyncResult<usize>;

    /// Cursor just before the oldest confirmed record held for `key`.
    fn oldest_cursor(&self, key: &ResourceKey) -> SyncResult<Option<CreateCursor>>;

    /// Records an optimistic local message.
    fn insert_pending(&self, key: &ResourceKey, pending: PendingMessage) -> SyncResult<()>;
}

#[derive(Debug, Default)]
struct SessionState {
    confirmed: BTreeMap<u64, Message>,
    by_id: HashMap<MessageId, u64>,
    pending: BTreeMap<String, PendingMessage>,
}

impl SessionState {
    fn apply(&mut self, record: &Message) -> bool {
        if let Some(seq) = self.by_id.get(&record.id).copied() {
            return match self.confirmed.get_mut(&seq) {
                Some(existing) if record.is_newer_than(existing) => {
                    *existing = record.clone();
                    true
                }
                Some(_) => false,
                None => {
                    self.confirmed.insert(seq, record.clone());
                    true
                }
            };
        }

        if let Some(local_id) = &record.local_id {
            self.pending.remove(local_id);
        }
        self.by_id.insert(record.id.clone(), record.seq);
        self.confirmed.insert(record.seq, record.clone());
        true
    }
}

/// In-memory message store.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    sessions: RwLock<HashMap<ResourceKey, SessionState>>,
}

impl MemoryMessageStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Confirmed messages for `key`, ordered by `seq`.
    pub fn messages(&self, key: &ResourceKey) -> Vec<Message> {
        self.sessions
            .read()
            .get(key)
            .map(|s| s.confirmed.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Unconfirmed local messages for `key`, ordered by local creation time.
    pub fn pending(&self, key: &ResourceKey) -> Vec<PendingMessage> {
        let mut pending: Vec<_> = self
            .sessions
            .read()
            .get(key)
            .map(|s| s.pending.values().cloned().collect())
            .unwrap_or_default();
        pending.sort_by(|a, b| (a.created_at, &a.local_id).cmp(&(b.created_at, &b.local_id)));
        pending
    }

    /// Number of confirmed messages held for `key`.
    pub fn len(&self, key: &ResourceKey) -> usize {
        self.sessions
            .read()
            .get(key)
            .map_or(0, |s| s.confirmed.len())
    }
}

impl MessageStore for MemoryMessageStore {
    fn merge(&self, key: &ResourceKey, records: &[Message]) -> SyncResult<usize> {
        if let Some(stray) = records.iter().find(|m| &m.session_id != key) {
            return Err(SyncError::InvalidArgument(format!(
                "record {} belongs to another session",
                stray.id
            )));
        }

        let mut sessions = self.sessions.write();
        let session = sessions.entry(key.clone()).or_default();
        Ok(records.iter().filter(|m| session.apply(m)).count())
    }

    fn oldest_cursor(&self, key: &ResourceKey) -> SyncResult<Option<CreateCursor>> {
        Ok(self.sessions.read().get(key).and_then(|s| {
            s.confirmed
                .values()
                .map(Message::create_cursor)
                .min()
        }))
    }

    fn insert_pending(&self, key: &ResourceKey, pending: PendingMessage) -> SyncResult<()> {
        let mut sessions = self.sessions.write();
        let session = sessions.entry(key.clone()).or_default();
        let already_confirmed = session
            .confirmed
            .values()
            .any(|m| m.local_id.as_deref() == Some(pending.local_id.as_str()));
        if !already_confirmed {
            session.pending.insert(pending.local_id.clone(), pending);
        }
        Ok(())
    }
}
