//! Delta query service.

use crate::auth::Caller;
use crate::change_log::{AccessPolicy, ChangeLog};
use crate::error::{ServerError, ServerResult};
use chatsync_protocol::{DeltaPage, DeltaQuery, QueryMode, ResourceKey};
use std::sync::Arc;
use tracing::debug;

/// Translates delta queries into bounded, ordered slices of the change log.
///
/// `has_more` is computed exactly by fetching one record past the limit, so a
/// page that happens to end on the last record reports `false`.
pub struct DeltaQueryService {
    log: Arc<dyn ChangeLog>,
    access: Arc<dyn AccessPolicy>,
}

impl DeltaQueryService {
    /// Creates a service over a change log and an access policy.
    pub fn new(log: Arc<dyn ChangeLog>, access: Arc<dyn AccessPolicy>) -> Self {
        Self { log, access }
    }

    /// Answers one delta query.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if the limit is out of range
    /// - `NotFound` if the session is unknown or `caller` may not read it;
    ///   the two cases are indistinguishable
    pub fn query(
        &self,
        caller: &Caller,
        key: &ResourceKey,
        query: &DeltaQuery,
    ) -> ServerResult<DeltaPage> {
        query.validate()?;

        if !self.log.contains(key) || !self.access.can_read(caller, key) {
            return Err(ServerError::NotFound);
        }

        let limit = query.limit as usize;
        let lookahead = limit + 1;
        let mode = query.mode();
        let mut records = match (mode, &query.updated_after) {
            (QueryMode::Incremental | QueryMode::Range, Some(after)) => {
                self.log
                    .scan_updated(key, after, query.before.as_ref(), lookahead)?
            }
            _ => self.log.scan_created(key, query.before.as_ref(), lookahead)?,
        };

        let has_more = records.len() > limit;
        records.truncate(limit);

        debug!(
            resource = %key,
            ?mode,
            returned = records.len(),
            has_more,
            "delta query"
        );
        Ok(DeltaPage::new(records, has_more))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CallerId;
    use crate::change_log::MemoryChangeLog;
    use chatsync_protocol::{CreateCursor, NewMessage, UpdateCursor};

    fn key() -> ResourceKey {
        ResourceKey::new("room").unwrap()
    }

    fn service_with(n: i64) -> (Arc<MemoryChangeLog>, DeltaQueryService) {
        let log = Arc::new(MemoryChangeLog::new());
        log.create_session(key(), []);
        for i in 0..n {
            log.append(&key(), NewMessage::new(vec![i as u8], 10_000 + i))
                .unwrap();
        }
        let service = DeltaQueryService::new(log.clone(), log.clone());
        (log, service)
    }

    #[test]
    fn bootstrap_returns_most_recent_descending() {
        let (_, service) = service_with(10);
        let page = service
            .query(&Caller::Anonymous, &key(), &DeltaQuery::bootstrap().with_limit(3))
            .unwrap();
        let seqs: Vec<_> = page.records.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![10, 9, 8]);
        assert!(page.has_more);
        assert_eq!(page.oldest_timestamp, Some(10_007));
        assert_eq!(page.newest_timestamp, Some(10_009));
    }

    #[test]
    fn exactly_full_last_page_has_no_more() {
        let (_, service) = service_with(150);
        let page = service
            .query(&Caller::Anonymous, &key(), &DeltaQuery::bootstrap())
            .unwrap();
        assert_eq!(page.len(), 150);
        assert!(!page.has_more);
    }

    #[test]
    fn page_past_the_end_has_more() {
        let (_, service) = service_with(151);
        let page = service
            .query(&Caller::Anonymous, &key(), &DeltaQuery::bootstrap())
            .unwrap();
        assert_eq!(page.len(), 150);
        assert!(page.has_more);
        assert_eq!(page.records.last().map(|m| m.seq), Some(2));
    }

    #[test]
    fn bootstrap_then_incremental_is_empty() {
        let (_, service) = service_with(20);
        let boot = service
            .query(&Caller::Anonymous, &key(), &DeltaQuery::bootstrap())
            .unwrap();
        let newest = boot.newest_timestamp.unwrap();

        let delta = service
            .query(
                &Caller::Anonymous,
                &key(),
                &DeltaQuery::incremental(UpdateCursor::at(newest)),
            )
            .unwrap();
        assert!(delta.is_empty());
        assert!(!delta.has_more);
        assert_eq!(delta.newest_timestamp, None);
    }

    #[test]
    fn edit_after_bootstrap_is_the_only_delta() {
        let (log, service) = service_with(150);
        let boot = service
            .query(&Caller::Anonymous, &key(), &DeltaQuery::bootstrap())
            .unwrap();
        assert_eq!(boot.len(), 150);
        assert!(!boot.has_more);

        let target = boot.records[75].clone();
        log.edit(&key(), &target.id, b"edited".to_vec(), 20_000)
            .unwrap();

        let delta = service
            .query(
                &Caller::Anonymous,
                &key(),
                &DeltaQuery::incremental(UpdateCursor::at(boot.newest_timestamp.unwrap())),
            )
            .unwrap();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta.records[0].id, target.id);
        assert_eq!(delta.records[0].content, b"edited".to_vec());
    }

    #[test]
    fn backfill_pages_through_history() {
        let (_, service) = service_with(7);
        let first = service
            .query(&Caller::Anonymous, &key(), &DeltaQuery::bootstrap().with_limit(3))
            .unwrap();

        let mut before = first.oldest_cursor().unwrap();
        let mut seqs: Vec<u64> = first.records.iter().map(|m| m.seq).collect();
        loop {
            let page = service
                .query(
                    &Caller::Anonymous,
                    &key(),
                    &DeltaQuery::backfill(before).with_limit(3),
                )
                .unwrap();
            seqs.extend(page.records.iter().map(|m| m.seq));
            match (page.has_more, page.oldest_cursor()) {
                (true, Some(next)) => before = next,
                _ => break,
            }
        }
        assert_eq!(seqs, vec![7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn range_intersects_both_bounds() {
        let (log, service) = service_with(6);
        let records = log.scan_created(&key(), None, 10).unwrap();
        for m in &records {
            log.edit(&key(), &m.id, vec![0], 50_000).unwrap();
        }

        let query = DeltaQuery::incremental(UpdateCursor::at(49_999))
            .with_before(CreateCursor::at(10_003));
        let page = service.query(&Caller::Anonymous, &key(), &query).unwrap();
        let mut seqs: Vec<_> = page.records.iter().map(|m| m.seq).collect();
        seqs.sort_unstable();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(page
            .records
            .windows(2)
            .all(|w| (w[0].updated_at, &w[0].id) < (w[1].updated_at, &w[1].id)));
    }

    #[test]
    fn invalid_limit_rejected_before_lookup() {
        let (_, service) = service_with(1);
        let unknown = ResourceKey::new("unknown").unwrap();
        let result = service.query(
            &Caller::Anonymous,
            &unknown,
            &DeltaQuery::bootstrap().with_limit(0),
        );
        assert!(matches!(result, Err(ServerError::InvalidArgument(_))));
    }

    #[test]
    fn unknown_and_forbidden_look_the_same() {
        let log = Arc::new(MemoryChangeLog::new());
        let member = CallerId::random();
        log.create_session(key(), [member]);
        let service = DeltaQueryService::new(log.clone(), log);

        let stranger = Caller::Device(CallerId::random());
        let forbidden = service
            .query(&stranger, &key(), &DeltaQuery::bootstrap())
            .unwrap_err();
        let missing = service
            .query(
                &Caller::Device(member),
                &ResourceKey::new("ghost").unwrap(),
                &DeltaQuery::bootstrap(),
            )
            .unwrap_err();

        assert_eq!(forbidden.to_string(), missing.to_string());
        assert_eq!(forbidden.status_code(), missing.status_code());
        assert!(service
            .query(&Caller::Device(member), &key(), &DeltaQuery::bootstrap())
            .is_ok());
    }
}
