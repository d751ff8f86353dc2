//! Message records.

use crate::cursor::{CreateCursor, UpdateCursor};
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

/// Longest accepted resource key.
const MAX_KEY_LEN: usize = 128;

/// Identifier of a synchronizable unit, typically one conversation.
///
/// Keys are restricted to URL-safe characters (`A-Z a-z 0-9 - _ . ~`) so they
/// can be placed in a request path without escaping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Creates a resource key, validating its characters.
    pub fn new(key: impl Into<String>) -> ProtocolResult<Self> {
        let key = key.into();
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(ProtocolError::invalid(format!(
                "resource key must be 1..={MAX_KEY_LEN} bytes"
            )));
        }
        if !key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~'))
        {
            return Err(ProtocolError::invalid(
                "resource key contains characters outside [A-Za-z0-9-_.~]",
            ));
        }
        Ok(Self(key))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ResourceKey {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ResourceKey> for String {
    fn from(key: ResourceKey) -> Self {
        key.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned opaque message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wraps an identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single message record as stored in the change log.
///
/// # Invariants
///
/// - `seq` is strictly increasing within a session and never reused
/// - `updated_at >= created_at`
/// - `content` is ciphertext and is never interpreted
/// - only `content` and `updated_at` change after creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Server-assigned identifier.
    pub id: MessageId,
    /// Session (resource) this message belongs to.
    pub session_id: ResourceKey,
    /// Per-session sequence number.
    pub seq: u64,
    /// Client-assigned deduplication key, if the sender provided one.
    pub local_id: Option<String>,
    /// Opaque ciphertext.
    pub content: Vec<u8>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last modification time.
    pub updated_at: Timestamp,
}

impl Message {
    /// Returns the cursor addressing this record in `updatedAt` order.
    pub fn update_cursor(&self) -> UpdateCursor {
        UpdateCursor::after_record(self.updated_at, self.id.clone())
    }

    /// Returns the cursor addressing this record in `createdAt` order.
    pub fn create_cursor(&self) -> CreateCursor {
        CreateCursor::before_record(self.created_at, self.seq)
    }

    /// Returns true if this record carries a strictly newer edit than `other`.
    pub fn is_newer_than(&self, other: &Message) -> bool {
        self.updated_at > other.updated_at
    }
}

/// A message submitted for insertion into the change log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Client-assigned deduplication key.
    pub local_id: Option<String>,
    /// Opaque ciphertext.
    pub content: Vec<u8>,
    /// Creation time.
    pub created_at: Timestamp,
}

impl NewMessage {
    /// Creates a new message without a local id.
    pub fn new(content: Vec<u8>, created_at: Timestamp) -> Self {
        Self {
            local_id: None,
            content,
            created_at,
        }
    }

    /// Sets the client deduplication key.
    pub fn with_local_id(mut self, local_id: impl Into<String>) -> Self {
        self.local_id = Some(local_id.into());
        self
    }
}
