//! Delta query parameters and validation.

use crate::cursor::{CreateCursor, UpdateCursor};
use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{MessageId, Timestamp};
use serde::{Deserialize, Serialize};

/// Largest page a single delta query may request.
pub const MAX_PAGE_LIMIT: u32 = 150;

/// Page size used when the caller does not specify one.
pub const DEFAULT_PAGE_LIMIT: u32 = 150;

/// How a delta query walks the change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Most recent records, newest first.
    Bootstrap,
    /// Records modified after a cursor, oldest modification first.
    Incremental,
    /// Records created before a cursor, newest first.
    Backfill,
    /// Incremental restricted to records created before a cursor.
    Range,
}

/// A validated delta query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaQuery {
    /// Lower bound in `(updatedAt, id)` order.
    pub updated_after: Option<UpdateCursor>,
    /// Upper bound in `(createdAt, seq)` order.
    pub before: Option<CreateCursor>,
    /// Maximum number of records to return.
    pub limit: u32,
}

impl DeltaQuery {
    /// Query for the most recent records.
    pub fn bootstrap() -> Self {
        Self {
            updated_after: None,
            before: None,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }

    /// Query for records modified after `cursor`.
    pub fn incremental(cursor: UpdateCursor) -> Self {
        Self {
            updated_after: Some(cursor),
            ..Self::bootstrap()
        }
    }

    /// Query for records created before `cursor`.
    pub fn backfill(cursor: CreateCursor) -> Self {
        Self {
            before: Some(cursor),
            ..Self::bootstrap()
        }
    }

    /// Sets the page limit.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the creation-time upper bound.
    pub fn with_before(mut self, cursor: CreateCursor) -> Self {
        self.before = Some(cursor);
        self
    }

    /// Returns the mode selected by the present bounds.
    pub fn mode(&self) -> QueryMode {
        match (&self.updated_after, &self.before) {
            (None, None) => QueryMode::Bootstrap,
            (Some(_), None) => QueryMode::Incremental,
            (None, Some(_)) => QueryMode::Backfill,
            (Some(_), Some(_)) => QueryMode::Range,
        }
    }

    /// Checks the limit bounds.
    pub fn validate(&self) -> ProtocolResult<()> {
        check_limit(self.limit)
    }

    /// Renders the query as URL query pairs, in a stable order.
    ///
    /// The default limit is omitted. Values are not percent-encoded.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(5);
        if let Some(cursor) = &self.updated_after {
            pairs.push(("updatedAfter", cursor.updated_at.to_string()));
            if let Some(id) = &cursor.id {
                pairs.push(("afterId", id.as_str().to_string()));
            }
        }
        if let Some(cursor) = &self.before {
            pairs.push(("before", cursor.created_at.to_string()));
            if let Some(seq) = cursor.seq {
                pairs.push(("beforeSeq", seq.to_string()));
            }
        }
        if self.limit != DEFAULT_PAGE_LIMIT {
            pairs.push(("limit", self.limit.to_string()));
        }
        pairs
    }
}

impl Default for DeltaQuery {
    fn default() -> Self {
        Self::bootstrap()
    }
}

/// Raw query string parameters as received at the HTTP boundary.
///
/// Everything is kept as text so malformed values surface as
/// [`ProtocolError::InvalidArgument`] instead of a framework rejection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaParams {
    /// `updatedAfter=<ms>`
    pub updated_after: Option<String>,
    /// `afterId=<id>` tie-break for `updatedAfter`
    pub after_id: Option<String>,
    /// `before=<ms>`
    pub before: Option<String>,
    /// `beforeSeq=<seq>` tie-break for `before`
    pub before_seq: Option<String>,
    /// `limit=<1..=150>`
    pub limit: Option<String>,
}

impl DeltaParams {
    /// Parses and validates the parameters into a query.
    ///
    /// Nothing is partially accepted: any bad parameter rejects the whole query.
    pub fn parse(&self) -> ProtocolResult<DeltaQuery> {
        let updated_after = self
            .updated_after
            .as_deref()
            .map(|v| parse_timestamp("updatedAfter", v))
            .transpose()?;
        let before = self
            .before
            .as_deref()
            .map(|v| parse_timestamp("before", v))
            .transpose()?;

        let after_id = match self.after_id.as_deref() {
            Some("") => return Err(ProtocolError::invalid("afterId must not be empty")),
            Some(id) => Some(MessageId::new(id)),
            None => None,
        };
        let before_seq = self
            .before_seq
            .as_deref()
            .map(|v| {
                v.parse::<u64>()
                    .map_err(|_| ProtocolError::invalid(format!("beforeSeq is not a sequence number: {v:?}")))
            })
            .transpose()?;

        if after_id.is_some() && updated_after.is_none() {
            return Err(ProtocolError::invalid("afterId requires updatedAfter"));
        }
        if before_seq.is_some() && before.is_none() {
            return Err(ProtocolError::invalid("beforeSeq requires before"));
        }

        let limit = match self.limit.as_deref() {
            Some(v) => v
                .parse::<u32>()
                .map_err(|_| ProtocolError::invalid(format!("limit is not a number: {v:?}")))?,
            None => DEFAULT_PAGE_LIMIT,
        };
        check_limit(limit)?;

        Ok(DeltaQuery {
            updated_after: updated_after.map(|updated_at| UpdateCursor {
                updated_at,
                id: after_id,
            }),
            before: before.map(|created_at| CreateCursor {
                created_at,
                seq: before_seq,
            }),
            limit,
        })
    }
}

fn parse_timestamp(name: &str, value: &str) -> ProtocolResult<Timestamp> {
    let ts = value
        .parse::<Timestamp>()
        .map_err(|_| ProtocolError::invalid(format!("{name} is not a millisecond timestamp: {value:?}")))?;
    if ts < 0 {
        return Err(ProtocolError::invalid(format!("{name} must not be negative")));
    }
    Ok(ts)
}

fn check_limit(limit: u32) -> ProtocolResult<()> {
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(ProtocolError::invalid(format!(
            "limit must be within 1..={MAX_PAGE_LIMIT}, got {limit}"
        )));
    }
    Ok(())
}
