//! Change log storage.
//!
//! The change log is an ordered store of message records per session. The
//! production store lives behind the [`ChangeLog`] trait; [`MemoryChangeLog`]
//! is the reference implementation used by tests and the demo server.

use crate::auth::{Caller, CallerId};
use crate::error::{ServerError, ServerResult};
use chatsync_protocol::{
    CreateCursor, Message, MessageId, NewMessage, ResourceKey, Timestamp, UpdateCursor,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Bound;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Range scans over a session's records.
///
/// Both scans return at most `limit` records. Callers that need to know
/// whether more exist ask for one extra.
pub trait ChangeLog: Send + Sync {
    /// Returns true if the session exists.
    fn contains(&self, key: &ResourceKey) -> bool;

    /// Records admitted by `after`, ascending by `(updatedAt, id)`,
    /// optionally restricted to those admitted by `created_before`.
    fn scan_updated(
        &self,
        key: &ResourceKey,
        after: &UpdateCursor,
        created_before: Option<&CreateCursor>,
        limit: usize,
    ) -> ServerResult<Vec<Message>>;

    /// Records admitted by `before` (all records if `None`), descending by
    /// `(createdAt, seq)`.
    fn scan_created(
        &self,
        key: &ResourceKey,
        before: Option<&CreateCursor>,
        limit: usize,
    ) -> ServerResult<Vec<Message>>;
}

/// Decides whether a caller may read a session.
pub trait AccessPolicy: Send + Sync {
    /// Returns true if `caller` may read `key`.
    fn can_read(&self, caller: &Caller, key: &ResourceKey) -> bool;
}

/// Policy that lets everyone read everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenAccess;

impl AccessPolicy for OpenAccess {
    fn can_read(&self, _caller: &Caller, _key: &ResourceKey) -> bool {
        true
    }
}

/// Milliseconds since the Unix epoch, from the system clock.
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Timestamp
}

/// One session's records plus its scan indexes.
#[derive(Default)]
struct SessionLog {
    members: HashSet<CallerId>,
    /// Records by seq. Seqs start at 1 and are dense.
    records: BTreeMap<u64, Message>,
    by_updated: BTreeMap<(Timestamp, MessageId), u64>,
    by_created: BTreeSet<(Timestamp, u64)>,
    by_id: HashMap<MessageId, u64>,
    by_local_id: HashMap<String, u64>,
}

impl SessionLog {
    fn next_seq(&self) -> u64 {
        self.records.keys().next_back().map_or(1, |seq| seq + 1)
    }

    /// `updatedAt` for a write of `id` requested at `at`.
    ///
    /// The resulting `(updatedAt, id)` sorts after every key already in the
    /// session, so any cursor a client holds admits the write. Ties with the
    /// newest record are kept when the id already sorts after it.
    fn stamp(&self, at: Timestamp, id: &MessageId) -> Timestamp {
        let Some((newest, newest_id)) = self.by_updated.keys().next_back() else {
            return at;
        };
        let candidate = at.max(*newest);
        if (candidate, id) > (*newest, newest_id) {
            candidate
        } else {
            newest.saturating_add(1)
        }
    }

    fn insert(&mut self, message: Message) {
        let seq = message.seq;
        self.by_updated
            .insert((message.updated_at, message.id.clone()), seq);
        self.by_created.insert((message.created_at, seq));
        self.by_id.insert(message.id.clone(), seq);
        if let Some(local_id) = &message.local_id {
            self.by_local_id.insert(local_id.clone(), seq);
        }
        self.records.insert(seq, message);
    }
}

/// In-memory change log.
///
/// Also acts as an [`AccessPolicy`] based on per-session membership:
/// anonymous callers (auth disabled) may read every session, devices only the
/// sessions they are members of.
pub struct MemoryChangeLog {
    sessions: RwLock<HashMap<ResourceKey, SessionLog>>,
}

impl MemoryChangeLog {
    /// Creates an empty change log.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a session readable by `members`. Existing sessions gain the
    /// new members.
    pub fn create_session(&self, key: ResourceKey, members: impl IntoIterator<Item = CallerId>) {
        let mut sessions = self.sessions.write();
        sessions.entry(key).or_default().members.extend(members);
    }

    /// Appends a message, assigning its id and seq.
    ///
    /// A message whose `local_id` already exists in the session is a resend;
    /// the stored record is returned unchanged.
    ///
    /// Ids start with the zero-padded seq, so appends at the same instant
    /// share an `updatedAt`. A `created_at` older than the session's newest
    /// `updatedAt` keeps its creation time but is stamped as a new change.
    pub fn append(&self, key: &ResourceKey, message: NewMessage) -> ServerResult<Message> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(key).ok_or(ServerError::NotFound)?;

        if let Some(local_id) = &message.local_id {
            if let Some(existing) = session
                .by_local_id
                .get(local_id)
                .and_then(|seq| session.records.get(seq))
            {
                return Ok(existing.clone());
            }
        }

        let seq = session.next_seq();
        let id = MessageId::new(format!("{seq:010}-{}", Uuid::new_v4().simple()));
        let updated_at = session.stamp(message.created_at, &id);
        let record = Message {
            id,
            session_id: key.clone(),
            seq,
            local_id: message.local_id,
            content: message.content,
            created_at: message.created_at,
            updated_at,
        };
        session.insert(record.clone());
        Ok(record)
    }

    /// Replaces a message's content.
    ///
    /// `updatedAt` is at least `at` and moves past the session's newest
    /// change, so the edit is visible to every incremental query issued
    /// before it, even when `at` lags behind.
    pub fn edit(
        &self,
        key: &ResourceKey,
        id: &MessageId,
        content: Vec<u8>,
        at: Timestamp,
    ) -> ServerResult<Message> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(key).ok_or(ServerError::NotFound)?;
        let seq = *session.by_id.get(id).ok_or(ServerError::NotFound)?;
        let updated_at = session.stamp(at, id);
        let record = session.records.get_mut(&seq).ok_or_else(|| {
            ServerError::Internal(format!("index points at missing seq {seq}"))
        })?;

        session
            .by_updated
            .remove(&(record.updated_at, record.id.clone()));
        record.updated_at = updated_at;
        record.content = content;
        let edited = record.clone();
        session
            .by_updated
            .insert((updated_at, edited.id.clone()), seq);
        Ok(edited)
    }

    /// Number of records in a session.
    pub fn len(&self, key: &ResourceKey) -> usize {
        self.sessions
            .read()
            .get(key)
            .map_or(0, |session| session.records.len())
    }

    /// Keys of all sessions, sorted.
    pub fn session_keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<_> = self.sessions.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for MemoryChangeLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeLog for MemoryChangeLog {
    fn contains(&self, key: &ResourceKey) -> bool {
        self.sessions.read().contains_key(key)
    }

    fn scan_updated(
        &self,
        key: &ResourceKey,
        after: &UpdateCursor,
        created_before: Option<&CreateCursor>,
        limit: usize,
    ) -> ServerResult<Vec<Message>> {
        let sessions = self.sessions.read();
        let session = sessions.get(key).ok_or(ServerError::NotFound)?;

        let lower = match &after.id {
            Some(id) => Bound::Excluded((after.updated_at, id.clone())),
            None => match after.updated_at.checked_add(1) {
                Some(next) => Bound::Included((next, MessageId::new(""))),
                None => return Ok(Vec::new()),
            },
        };

        Ok(session
            .by_updated
            .range((lower, Bound::Unbounded))
            .filter_map(|(_, seq)| session.records.get(seq))
            .filter(|m| created_before.map_or(true, |before| before.admits(m)))
            .take(limit)
            .cloned()
            .collect())
    }

    fn scan_created(
        &self,
        key: &ResourceKey,
        before: Option<&CreateCursor>,
        limit: usize,
    ) -> ServerResult<Vec<Message>> {
        let sessions = self.sessions.read();
        let session = sessions.get(key).ok_or(ServerError::NotFound)?;

        let upper = match before {
            // Seqs start at 1, so (t, 0) sorts before every record at t.
            Some(cursor) => Bound::Excluded((cursor.created_at, cursor.seq.unwrap_or(0))),
            None => Bound::Unbounded,
        };

        Ok(session
            .by_created
            .range((Bound::Unbounded, upper))
            .rev()
            .filter_map(|(_, seq)| session.records.get(seq))
            .take(limit)
            .cloned()
            .collect())
    }
}

impl AccessPolicy for MemoryChangeLog {
    fn can_read(&self, caller: &Caller, key: &ResourceKey) -> bool {
        match caller {
            Caller::Anonymous => true,
            Caller::Device(id) => self
                .sessions
                .read()
                .get(key)
                .is_some_and(|session| session.members.contains(id)),
        }
    }
}
