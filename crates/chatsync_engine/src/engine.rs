//! Sync engine facade.

use crate::config::SyncConfig;
use crate::coordinator::{CoordinatorSet, CoordinatorState, CycleReport};
use crate::cycle::{BackfillReport, DeltaSyncCycle, SyncStats};
use crate::error::SyncResult;
use crate::merge::MessageStore;
use crate::prefetch::{PrefetchOrchestrator, PrefetchReport, ResourceDirectory};
use crate::transport::DeltaSource;
use crate::watermark::WatermarkStore;
use chatsync_protocol::ResourceKey;
use std::sync::Arc;
use tracing::debug;

/// The client-side sync engine.
///
/// Wires a [`DeltaSource`], a [`MessageStore`] and a [`WatermarkStore`] into
/// per-key single-flight coordinators. All methods that start work must be
/// called from within a Tokio runtime.
///
/// # Example
///
/// ```rust,ignore
/// let engine = SyncEngine::new(config, transport, store, watermarks)
///     .with_directory(directory);
///
/// // Push notification: background refresh, failures are logged.
/// engine.invalidate(&key);
///
/// // Pull-to-refresh: wait and surface the error.
/// let report = engine.sync_now(&key).await?;
/// ```
pub struct SyncEngine {
    config: SyncConfig,
    cycle: Arc<DeltaSyncCycle>,
    coordinators: Arc<CoordinatorSet>,
    prefetch: Option<PrefetchOrchestrator>,
}

impl SyncEngine {
    /// Creates a new sync engine.
    pub fn new(
        config: SyncConfig,
        source: Arc<dyn DeltaSource>,
        store: Arc<dyn MessageStore>,
        watermarks: Arc<dyn WatermarkStore>,
    ) -> Self {
        let cycle = Arc::new(DeltaSyncCycle::new(
            source,
            store,
            watermarks,
            config.page_limit,
            config.max_pages_per_cycle,
        ));
        let coordinators = Arc::new(CoordinatorSet::new(cycle.clone()));
        Self {
            config,
            cycle,
            coordinators,
            prefetch: None,
        }
    }

    /// Enables prefetch on [`SyncEngine::on_foreground`].
    pub fn with_directory(mut self, directory: Arc<dyn ResourceDirectory>) -> Self {
        self.prefetch = Some(PrefetchOrchestrator::new(
            directory,
            Arc::clone(&self.coordinators),
            self.config.prefetch.clone(),
        ));
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Requests a background sync of `key`.
    pub fn invalidate(&self, key: &ResourceKey) {
        self.coordinators.get_or_create(key).invalidate();
    }

    /// Syncs `key` and waits for the outcome.
    pub async fn sync_now(&self, key: &ResourceKey) -> SyncResult<CycleReport> {
        self.coordinators
            .get_or_create(key)
            .invalidate_and_await()
            .await
    }

    /// Fetches one page of history older than what is held locally.
    pub async fn backfill(&self, key: &ResourceKey) -> SyncResult<BackfillReport> {
        self.cycle.backfill(key).await
    }

    /// Handles the app becoming live again.
    pub async fn on_foreground(&self) -> PrefetchReport {
        match &self.prefetch {
            Some(prefetch) => prefetch.on_liveness().await,
            None => {
                debug!("no resource directory; prefetch skipped");
                PrefetchReport::Skipped
            }
        }
    }

    /// Returns the coordinator state for `key`, if it was ever synced.
    pub fn state(&self, key: &ResourceKey) -> Option<CoordinatorState> {
        self.coordinators.get(key).map(|c| c.state())
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.cycle.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::merge::MemoryMessageStore;
    use crate::transport::MockSource;
    use crate::watermark::MemoryWatermarkStore;
    use chatsync_protocol::{DeltaPage, Message, MessageId};

    fn key() -> ResourceKey {
        ResourceKey::new("k").unwrap()
    }

    fn engine(source: Arc<MockSource>) -> (SyncEngine, Arc<MemoryMessageStore>) {
        let store = Arc::new(MemoryMessageStore::new());
        let engine = SyncEngine::new(
            SyncConfig::new("http://unused"),
            source,
            store.clone(),
            Arc::new(MemoryWatermarkStore::new()),
        );
        (engine, store)
    }

    #[tokio::test]
    async fn sync_now_surfaces_errors() {
        let source = Arc::new(MockSource::new());
        source.push_response(Err(SyncError::Unauthorized("expired".into())));
        let (engine, _) = engine(source);

        let err = engine.sync_now(&key()).await.unwrap_err();
        assert!(matches!(err, SyncError::Unauthorized(_)));
        assert_eq!(engine.state(&key()), Some(CoordinatorState::Idle));
        assert_eq!(engine.stats().cycles_failed, 1);
    }

    #[tokio::test]
    async fn invalidate_runs_in_background() {
        let source = Arc::new(MockSource::new());
        source.push_response(Ok(DeltaPage::new(
            vec![Message {
                id: MessageId::new("m1"),
                session_id: key(),
                seq: 1,
                local_id: None,
                content: vec![1],
                created_at: 1,
                updated_at: 1,
            }],
            false,
        )));
        let (engine, store) = engine(source);

        engine.invalidate(&key());
        // The foreground sync coalesces into the pending background run.
        engine.sync_now(&key()).await.unwrap();
        assert_eq!(store.len(&key()), 1);
        assert_eq!(engine.stats().cycles_completed, 1);
    }

    #[tokio::test]
    async fn backfill_waits_for_running_cycle() {
        let source = Arc::new(MockSource::new());
        source.set_latency(std::time::Duration::from_millis(50));
        let (engine, _) = engine(source.clone());

        let started = std::time::Instant::now();
        let (cycle_key, backfill_key) = (key(), key());
        let (cycle, backfill) = tokio::join!(engine.sync_now(&cycle_key), engine.backfill(&backfill_key));
        cycle.unwrap();
        backfill.unwrap();

        // Two fetches that never overlap.
        assert_eq!(source.requests().len(), 2);
        assert!(started.elapsed() >= std::time::Duration::from_millis(100));
    }

    #[tokio::test]
    async fn foreground_without_directory_is_skipped() {
        let (engine, _) = engine(Arc::new(MockSource::new()));
        assert_eq!(engine.on_foreground().await, PrefetchReport::Skipped);
        assert_eq!(engine.state(&key()), None);
    }
}
