//! Compound page cursors.
//!
//! A bare timestamp cannot address a page edge when several records share
//! that timestamp: a strict `>` skips unseen siblings and a `>=` re-fetches
//! seen ones. Each cursor therefore carries an optional secondary key. When
//! the secondary key is absent the cursor degrades to a plain timestamp
//! comparison, which keeps old clients working.

use crate::message::{Message, MessageId, Timestamp};
use serde::{Deserialize, Serialize};

/// Position in `(updatedAt, id)` order. Records strictly after it are admitted.
///
/// Ordering is lexicographic over `(updated_at, id)` with a missing id sorting
/// first, so a cursor without a tie-break admits every sibling at its
/// timestamp boundary that a tie-broken cursor at the same timestamp would.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UpdateCursor {
    /// Boundary `updatedAt`.
    pub updated_at: Timestamp,
    /// Id of the last record seen at `updated_at`.
    pub id: Option<MessageId>,
}

impl UpdateCursor {
    /// Cursor admitting every record with `updatedAt > updated_at`.
    pub fn at(updated_at: Timestamp) -> Self {
        Self {
            updated_at,
            id: None,
        }
    }

    /// Cursor positioned exactly on a record.
    pub fn after_record(updated_at: Timestamp, id: MessageId) -> Self {
        Self {
            updated_at,
            id: Some(id),
        }
    }

    /// Returns true if `message` lies strictly after this cursor.
    pub fn admits(&self, message: &Message) -> bool {
        match &self.id {
            Some(id) => (message.updated_at, &message.id) > (self.updated_at, id),
            None => message.updated_at > self.updated_at,
        }
    }
}

/// Position in `(createdAt, seq)` order. Records strictly before it are admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CreateCursor {
    /// Boundary `createdAt`.
    pub created_at: Timestamp,
    /// Sequence number of the oldest record already held at `created_at`.
    pub seq: Option<u64>,
}

impl CreateCursor {
    /// Cursor admitting every record with `createdAt < created_at`.
    pub fn at(created_at: Timestamp) -> Self {
        Self {
            created_at,
            seq: None,
        }
    }

    /// Cursor positioned exactly on a record.
    pub fn before_record(created_at: Timestamp, seq: u64) -> Self {
        Self {
            created_at,
            seq: Some(seq),
        }
    }

    /// Returns true if `message` lies strictly before this cursor.
    pub fn admits(&self, message: &Message) -> bool {
        match self.seq {
            Some(seq) => (message.created_at, message.seq) < (self.created_at, seq),
            None => message.created_at < self.created_at,
        }
    }
}
