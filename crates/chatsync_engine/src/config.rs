//! Configuration for the sync engine.

use chatsync_protocol::DEFAULT_PAGE_LIMIT;
use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Server URL.
    pub server_url: String,
    /// Page size requested from the server.
    pub page_limit: u32,
    /// Upper bound on incremental pages fetched in one cycle.
    pub max_pages_per_cycle: u32,
    /// Request timeout.
    pub request_timeout: Duration,
    /// Prefetch configuration.
    pub prefetch: PrefetchConfig,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            page_limit: DEFAULT_PAGE_LIMIT,
            max_pages_per_cycle: 64,
            request_timeout: Duration::from_secs(30),
            prefetch: PrefetchConfig::default(),
        }
    }

    /// Sets the page size.
    pub fn with_page_limit(mut self, limit: u32) -> Self {
        self.page_limit = limit;
        self
    }

    /// Sets the per-cycle page cap.
    pub fn with_max_pages_per_cycle(mut self, pages: u32) -> Self {
        self.max_pages_per_cycle = pages;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the prefetch configuration.
    pub fn with_prefetch(mut self, prefetch: PrefetchConfig) -> Self {
        self.prefetch = prefetch;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// Configuration for the prefetch orchestrator.
#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    /// How many resources to warm on each trigger.
    pub max_resources: usize,
    /// How long to wait for the selected resources to settle.
    pub settle_timeout: Duration,
    /// How long to wait for the resource list before skipping prefetch.
    pub resource_list_timeout: Duration,
}

impl PrefetchConfig {
    /// Sets the number of resources to warm.
    pub fn with_max_resources(mut self, max: usize) -> Self {
        self.max_resources = max;
        self
    }

    /// Sets the settle timeout.
    pub fn with_settle_timeout(mut self, timeout: Duration) -> Self {
        self.settle_timeout = timeout;
        self
    }

    /// Sets the resource list timeout.
    pub fn with_resource_list_timeout(mut self, timeout: Duration) -> Self {
        self.resource_list_timeout = timeout;
        self
    }
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            max_resources: 5,
            settle_timeout: Duration::from_secs(5),
            resource_list_timeout: Duration::from_secs(3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = SyncConfig::new("https://chat.example.com");
        assert_eq!(config.page_limit, 150);
        assert_eq!(config.max_pages_per_cycle, 64);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.prefetch.max_resources, 5);
        assert_eq!(config.prefetch.settle_timeout, Duration::from_secs(5));
        assert_eq!(config.prefetch.resource_list_timeout, Duration::from_secs(3));
    }

    #[test]
    fn builder() {
        let config = SyncConfig::new("http://localhost:8080")
            .with_page_limit(20)
            .with_max_pages_per_cycle(4)
            .with_request_timeout(Duration::from_secs(2))
            .with_prefetch(PrefetchConfig::default().with_max_resources(2));

        assert_eq!(config.server_url, "http://localhost:8080");
        assert_eq!(config.page_limit, 20);
        assert_eq!(config.max_pages_per_cycle, 4);
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.prefetch.max_resources, 2);
    }
}
