//! The delta sync cycle.
//!
//! One cycle brings a resource's local state up to date:
//!
//! 1. No watermark: fetch a bootstrap page (most recent records).
//! 2. Watermark present: fetch incremental pages from the watermark cursor,
//!    following `hasMore`, up to `max_pages_per_cycle`.
//! 3. Merge every page before fetching the next.
//! 4. Advance the watermark once, after the last merge succeeded.
//!
//! A failed fetch or merge ends the cycle without touching the watermark, so
//! the next cycle refetches from the same position. Merging is idempotent,
//! which makes that refetch harmless.
//!
//! Cycles and backfill steps for the same key take the same per-key gate, so
//! they never fetch concurrently.

use crate::coordinator::{CycleOutcome, CycleReport, CycleRunner};
use crate::error::{SyncError, SyncResult};
use crate::merge::MessageStore;
use crate::transport::DeltaSource;
use crate::watermark::{Watermark, WatermarkStore};
use async_trait::async_trait;
use chatsync_protocol::{DeltaPage, DeltaQuery, Message, ResourceKey, UpdateCursor};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Statistics about sync cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that finished successfully.
    pub cycles_completed: u64,
    /// Cycles that ended with an error.
    pub cycles_failed: u64,
    /// Pages fetched, including backfill.
    pub pages_fetched: u64,
    /// Records received, including backfill.
    pub records_fetched: u64,
    /// Records inserted or replaced locally.
    pub records_changed: u64,
    /// Last successful cycle.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of one backfill step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    /// Records received.
    pub fetched: usize,
    /// Records inserted or replaced locally.
    pub changed: usize,
    /// Whether older history remains on the server.
    pub has_more: bool,
}

/// Runs blocking store calls off the async executor.
async fn blocking<T, F>(f: F) -> SyncResult<T>
where
    F: FnOnce() -> SyncResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SyncError::Internal(format!("storage task failed: {e}")))?
}

/// [`CycleRunner`] that fetches from a [`DeltaSource`] into a
/// [`MessageStore`] and tracks progress in a [`WatermarkStore`].
pub struct DeltaSyncCycle {
    source: Arc<dyn DeltaSource>,
    store: Arc<dyn MessageStore>,
    watermarks: Arc<dyn WatermarkStore>,
    page_limit: u32,
    max_pages: u32,
    stats: RwLock<SyncStats>,
    gates: Mutex<HashMap<ResourceKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl DeltaSyncCycle {
    /// Creates a cycle runner.
    pub fn new(
        source: Arc<dyn DeltaSource>,
        store: Arc<dyn MessageStore>,
        watermarks: Arc<dyn WatermarkStore>,
        page_limit: u32,
        max_pages: u32,
    ) -> Self {
        Self {
            source,
            store,
            watermarks,
            page_limit,
            max_pages: max_pages.max(1),
            stats: RwLock::new(SyncStats::default()),
            gates: Mutex::new(HashMap::new()),
        }
    }

    fn gate(&self, key: &ResourceKey) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.gates.lock().entry(key.clone()).or_default())
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Fetches and merges one page of history older than anything held
    /// locally. The watermark is not touched.
    ///
    /// Waits for a cycle running on the same key to finish first.
    pub async fn backfill(&self, key: &ResourceKey) -> SyncResult<BackfillReport> {
        let _gate = self.gate(key).lock_owned().await;
        let store = Arc::clone(&self.store);
        let k = key.clone();
        let oldest = blocking(move || store.oldest_cursor(&k)).await?;

        let query = match oldest {
            Some(cursor) => DeltaQuery::backfill(cursor),
            None => DeltaQuery::bootstrap(),
        }
        .with_limit(self.page_limit);

        let page = self.source.fetch(key, &query).await?;
        let fetched = page.len();
        let has_more = page.has_more;
        let changed = self.merge(key, page.records).await?;
        self.record_page(fetched, changed);

        debug!(resource = %key, fetched, changed, has_more, "backfill page merged");
        Ok(BackfillReport {
            fetched,
            changed,
            has_more,
        })
    }

    async fn sync(&self, key: &ResourceKey) -> CycleOutcome {
        let watermarks = Arc::clone(&self.watermarks);
        let k = key.clone();
        let start = blocking(move || watermarks.get(&k)).await?;

        let mut report = CycleReport {
            watermark: start.clone(),
            ..CycleReport::default()
        };
        let mut newest: Option<UpdateCursor> = None;

        match start {
            None => {
                let query = DeltaQuery::bootstrap().with_limit(self.page_limit);
                let page = self.source.fetch(key, &query).await?;
                newest = page.newest_cursor();
                self.apply(key, page, &mut report).await?;
            }
            Some(mark) => {
                let mut cursor = mark.cursor();
                loop {
                    let query = DeltaQuery::incremental(cursor.clone()).with_limit(self.page_limit);
                    let page = self.source.fetch(key, &query).await?;
                    let Some(next) = page.newest_cursor() else {
                        report.pages += 1;
                        self.record_page(0, 0);
                        break;
                    };
                    let has_more = page.has_more;
                    self.apply(key, page, &mut report).await?;
                    cursor = next.clone();
                    newest = Some(next);

                    if !has_more {
                        break;
                    }
                    if report.pages >= self.max_pages {
                        warn!(
                            resource = %key,
                            pages = report.pages,
                            "page cap reached; remaining changes wait for the next cycle"
                        );
                        break;
                    }
                }
            }
        }

        if let Some(cursor) = newest {
            let watermarks = Arc::clone(&self.watermarks);
            let k = key.clone();
            let mark = Watermark::from(cursor);
            let advanced = blocking(move || watermarks.set(&k, mark)).await?;
            if advanced {
                let watermarks = Arc::clone(&self.watermarks);
                let k = key.clone();
                report.watermark = blocking(move || watermarks.get(&k)).await?;
            }
        }
        Ok(report)
    }

    async fn apply(
        &self,
        key: &ResourceKey,
        page: DeltaPage,
        report: &mut CycleReport,
    ) -> SyncResult<()> {
        let fetched = page.len();
        let changed = self.merge(key, page.records).await?;
        report.pages += 1;
        report.fetched += fetched;
        report.changed += changed;
        self.record_page(fetched, changed);
        Ok(())
    }

    async fn merge(&self, key: &ResourceKey, records: Vec<Message>) -> SyncResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let store = Arc::clone(&self.store);
        let k = key.clone();
        blocking(move || store.merge(&k, &records)).await
    }

    fn record_page(&self, fetched: usize, changed: usize) {
        let mut stats = self.stats.write();
        stats.pages_fetched += 1;
        stats.records_fetched += fetched as u64;
        stats.records_changed += changed as u64;
    }
}

#[async_trait]
impl CycleRunner for DeltaSyncCycle {
    async fn run_cycle(&self, key: &ResourceKey) -> CycleOutcome {
        let gate = self.gate(key).lock_owned().await;
        let outcome = self.sync(key).await;
        drop(gate);
        let mut stats = self.stats.write();
        match &outcome {
            Ok(_) => {
                stats.cycles_completed += 1;
                stats.last_sync_time = Some(Instant::now());
                stats.last_error = None;
            }
            Err(e) => {
                stats.cycles_failed += 1;
                stats.last_error = Some(e.to_string());
            }
        }
        outcome
    }
}
