//! JSON wire format for the delta query endpoint.
//!
//! ```text
//! GET /resources/{resourceKey}/messages?updatedAfter=<ms>&before=<ms>&limit=<1..150>
//!
//! { "messages": [{ "id", "seq", "localId"?, "content", "createdAt", "updatedAt" }],
//!   "hasMore": bool, "oldestTimestamp"?, "newestTimestamp"? }
//! ```
//!
//! `content` travels as standard base64. The two timestamp bounds are present
//! only when `messages` is non-empty.

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{Message, MessageId, ResourceKey, Timestamp};
use crate::page::DeltaPage;
use serde::{Deserialize, Serialize};

/// A message as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    /// Server-assigned identifier.
    pub id: MessageId,
    /// Per-session sequence number.
    pub seq: u64,
    /// Client deduplication key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    /// Base64 ciphertext.
    #[serde(with = "base64_content")]
    pub content: Vec<u8>,
    /// Creation time.
    pub created_at: Timestamp,
    /// Last modification time.
    pub updated_at: Timestamp,
}

impl WireMessage {
    /// Attaches the session the message was fetched from.
    pub fn into_message(self, session_id: ResourceKey) -> ProtocolResult<Message> {
        if self.updated_at < self.created_at {
            return Err(ProtocolError::Decode(format!(
                "message {} has updatedAt before createdAt",
                self.id
            )));
        }
        Ok(Message {
            id: self.id,
            session_id,
            seq: self.seq,
            local_id: self.local_id,
            content: self.content,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            seq: message.seq,
            local_id: message.local_id.clone(),
            content: message.content.clone(),
            created_at: message.created_at,
            updated_at: message.updated_at,
        }
    }
}

/// Response body of the delta query endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesResponse {
    /// Records in query order.
    pub messages: Vec<WireMessage>,
    /// Whether another page exists.
    pub has_more: bool,
    /// Smallest `createdAt` in `messages`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest_timestamp: Option<Timestamp>,
    /// Largest `updatedAt` in `messages`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newest_timestamp: Option<Timestamp>,
}

impl MessagesResponse {
    /// Converts a page to its wire form.
    pub fn from_page(page: &DeltaPage) -> Self {
        Self {
            messages: page.records.iter().map(WireMessage::from).collect(),
            has_more: page.has_more,
            oldest_timestamp: page.oldest_timestamp,
            newest_timestamp: page.newest_timestamp,
        }
    }

    /// Converts back into a page for `session_id`.
    ///
    /// Timestamp bounds are recomputed from the records rather than trusted.
    pub fn into_page(self, session_id: &ResourceKey) -> ProtocolResult<DeltaPage> {
        let has_more = self.has_more;
        let records = self
            .messages
            .into_iter()
            .map(|m| m.into_message(session_id.clone()))
            .collect::<ProtocolResult<Vec<_>>>()?;
        Ok(DeltaPage::new(records, has_more))
    }

    /// Encodes to JSON bytes.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

mod base64_content {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
