//! Prefetch orchestrator.
//!
//! When the app becomes live again, warm the handful of resources the user
//! is most likely to open next. Every wait here is bounded and none of them
//! cancels work: a timeout only stops *waiting*, the spawned runs keep going
//! and still merge and advance their watermarks.

use crate::config::PrefetchConfig;
use crate::coordinator::{CoordinatorSet, CycleTicket};
use crate::error::SyncResult;
use async_trait::async_trait;
use chatsync_protocol::ResourceKey;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Source of the resources worth prefetching.
#[async_trait]
pub trait ResourceDirectory: Send + Sync + 'static {
    /// Resource keys, highest priority first.
    async fn priority_resources(&self) -> SyncResult<Vec<ResourceKey>>;
}

/// Outcome of one prefetch trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefetchReport {
    /// The resource list was unavailable; no run was requested.
    Skipped,
    /// Every selected resource settled in time.
    Completed {
        /// Runs that succeeded.
        succeeded: usize,
        /// Runs that failed.
        failed: usize,
    },
    /// The settle deadline passed; runs continue in the background.
    TimedOut {
        /// Runs requested.
        requested: usize,
    },
}

/// Warms the highest-priority resources on a liveness trigger.
pub struct PrefetchOrchestrator {
    directory: Arc<dyn ResourceDirectory>,
    coordinators: Arc<CoordinatorSet>,
    config: PrefetchConfig,
}

impl PrefetchOrchestrator {
    /// Creates an orchestrator.
    pub fn new(
        directory: Arc<dyn ResourceDirectory>,
        coordinators: Arc<CoordinatorSet>,
        config: PrefetchConfig,
    ) -> Self {
        Self {
            directory,
            coordinators,
            config,
        }
    }

    /// Handles a liveness trigger.
    ///
    /// Failures are logged, never returned.
    pub async fn on_liveness(&self) -> PrefetchReport {
        let Some(keys) = self.resource_list().await else {
            return PrefetchReport::Skipped;
        };

        let mut seen = HashSet::new();
        let selected: Vec<ResourceKey> = keys
            .into_iter()
            .filter(|key| seen.insert(key.clone()))
            .take(self.config.max_resources)
            .collect();
        if selected.is_empty() {
            return PrefetchReport::Completed {
                succeeded: 0,
                failed: 0,
            };
        }

        let tickets: Vec<CycleTicket> = selected
            .iter()
            .map(|key| self.coordinators.get_or_create(key).ticket())
            .collect();
        let requested = tickets.len();
        debug!(resources = requested, "prefetch requested");

        match timeout(
            self.config.settle_timeout,
            join_all(tickets.into_iter().map(CycleTicket::wait)),
        )
        .await
        {
            Ok(outcomes) => {
                let mut failed = 0;
                for (key, outcome) in selected.iter().zip(&outcomes) {
                    if let Err(e) = outcome {
                        failed += 1;
                        warn!(resource = %key, error = %e, "prefetch sync failed");
                    }
                }
                PrefetchReport::Completed {
                    succeeded: requested - failed,
                    failed,
                }
            }
            Err(_) => {
                info!(
                    resources = requested,
                    timeout = ?self.config.settle_timeout,
                    "prefetch did not settle in time; runs continue in background"
                );
                PrefetchReport::TimedOut { requested }
            }
        }
    }

    async fn resource_list(&self) -> Option<Vec<ResourceKey>> {
        let directory = Arc::clone(&self.directory);
        let mut listing = tokio::spawn(async move { directory.priority_resources().await });

        match timeout(self.config.resource_list_timeout, &mut listing).await {
            Ok(Ok(Ok(keys))) => Some(keys),
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "resource list failed; skipping prefetch");
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, "resource list task failed; skipping prefetch");
                None
            }
            Err(_) => {
                listing.abort();
                info!(
                    timeout = ?self.config.resource_list_timeout,
                    "resource list timed out; skipping prefetch"
                );
                None
            }
        }
    }
}
