//! Transport layer abstraction for delta fetches.

use crate::error::SyncResult;
use async_trait::async_trait;
use chatsync_protocol::{DeltaPage, DeltaQuery, ResourceKey};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// Fetches one page of a resource's change log.
///
/// This trait abstracts the network layer so the sync cycle can be driven by
/// HTTP, an in-process server, or a scripted mock.
#[async_trait]
pub trait DeltaSource: Send + Sync {
    /// Executes `query` against `key`.
    async fn fetch(&self, key: &ResourceKey, query: &DeltaQuery) -> SyncResult<DeltaPage>;
}

/// A scripted source for testing.
///
/// Responses are returned in the order they were queued. Once the queue is
/// empty every fetch returns an empty final page.
#[derive(Debug, Default)]
pub struct MockSource {
    responses: Mutex<VecDeque<SyncResult<DeltaPage>>>,
    requests: Mutex<Vec<(ResourceKey, DeltaQuery)>>,
    latency: Mutex<Option<Duration>>,
}

impl MockSource {
    /// Creates a mock with no queued responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn push_response(&self, response: SyncResult<DeltaPage>) {
        self.responses.lock().push_back(response);
    }

    /// Delays every fetch by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<(ResourceKey, DeltaQuery)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl DeltaSource for MockSource {
    async fn fetch(&self, key: &ResourceKey, query: &DeltaQuery) -> SyncResult<DeltaPage> {
        self.requests.lock().push((key.clone(), query.clone()));
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(DeltaPage::empty()))
    }
}
