//! Delta query results.

use crate::cursor::{CreateCursor, UpdateCursor};
use crate::message::{Message, Timestamp};

/// One bounded window of the change log.
///
/// A page is not the full change set. `has_more` tells the caller another
/// request is needed to reach completeness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaPage {
    /// Records in query order.
    pub records: Vec<Message>,
    /// Whether more records exist beyond this page.
    pub has_more: bool,
    /// Smallest `createdAt` in the page.
    pub oldest_timestamp: Option<Timestamp>,
    /// Largest `updatedAt` in the page.
    pub newest_timestamp: Option<Timestamp>,
}

impl DeltaPage {
    /// Builds a page, deriving the timestamp bounds from its records.
    pub fn new(records: Vec<Message>, has_more: bool) -> Self {
        let oldest_timestamp = records.iter().map(|m| m.created_at).min();
        let newest_timestamp = records.iter().map(|m| m.updated_at).max();
        Self {
            records,
            has_more,
            oldest_timestamp,
            newest_timestamp,
        }
    }

    /// An empty, final page.
    pub fn empty() -> Self {
        Self::new(Vec::new(), false)
    }

    /// Number of records in the page.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the page holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Cursor just past the most recently modified record in the page.
    ///
    /// Feeding it back as `updatedAfter` continues an incremental walk
    /// without skipping or repeating same-timestamp siblings.
    pub fn newest_cursor(&self) -> Option<UpdateCursor> {
        self.records
            .iter()
            .map(Message::update_cursor)
            .max()
    }

    /// Cursor just before the oldest created record in the page.
    pub fn oldest_cursor(&self) -> Option<CreateCursor> {
        self.records.iter().map(Message::create_cursor).min()
    }
}
