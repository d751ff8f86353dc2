//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted behind [`HttpClient`] so the
//! transport can run over any HTTP library, or over an in-process router in
//! tests.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::DeltaSource;
use async_trait::async_trait;
use chatsync_protocol::{DeltaPage, DeltaQuery, MessagesResponse, ResourceKey};
use parking_lot::RwLock;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

/// HTTP client abstraction.
///
/// Implementations perform a single `GET`. A connection-level failure is
/// reported as `Err`; any response the server produced, including error
/// statuses, is `Ok`.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a `GET` with an optional bearer token.
    async fn get(&self, url: &Url, bearer: Option<&str>) -> Result<HttpResponse, String>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// HTTP-based delta source for `GET /resources/{key}/messages`.
pub struct HttpTransport<C: HttpClient> {
    /// Base URL of the server (e.g., "https://chat.example.com/api").
    base_url: Url,
    client: C,
    bearer: RwLock<Option<String>>,
    timeout: Duration,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `base_url` is not an absolute URL that can
    /// carry a path.
    pub fn new(base_url: &str, client: C) -> SyncResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SyncError::InvalidArgument(format!("server url {base_url:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::InvalidArgument(format!(
                "server url {base_url} cannot carry a path"
            )));
        }
        Ok(Self {
            base_url,
            client,
            bearer: RwLock::new(None),
            timeout: Duration::from_secs(30),
        })
    }

    /// Creates a transport from the engine configuration.
    pub fn from_config(config: &SyncConfig, client: C) -> SyncResult<Self> {
        Ok(Self::new(&config.server_url, client)?.with_timeout(config.request_timeout))
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the bearer token sent with every request.
    pub fn set_bearer(&self, token: impl Into<String>) {
        *self.bearer.write() = Some(token.into());
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Builds the request URL for `query` against `key`.
    pub fn messages_url(&self, key: &ResourceKey, query: &DeltaQuery) -> SyncResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SyncError::Internal("base url lost its path".into()))?
            .pop_if_empty()
            .extend(["resources", key.as_str(), "messages"]);

        let pairs = query.to_pairs();
        if pairs.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(pairs);
        }
        Ok(url)
    }
}

fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned())
}

#[async_trait]
impl<C: HttpClient> DeltaSource for HttpTransport<C> {
    async fn fetch(&self, key: &ResourceKey, query: &DeltaQuery) -> SyncResult<DeltaPage> {
        query.validate()?;
        let url = self.messages_url(key, query)?;
        let bearer = self.bearer.read().clone();

        let response = tokio::time::timeout(self.timeout, self.client.get(&url, bearer.as_deref()))
            .await
            .map_err(|_| {
                SyncError::TransientFetchFailure(format!(
                    "request timed out after {:?}",
                    self.timeout
                ))
            })?
            .map_err(SyncError::TransientFetchFailure)?;

        match response.status {
            200 => {
                let body = MessagesResponse::from_json(&response.body)
                    .map_err(|e| SyncError::Protocol(e.to_string()))?;
                Ok(body.into_page(key)?)
            }
            400 => Err(SyncError::InvalidArgument(error_message(&response.body))),
            401 | 403 => Err(SyncError::Unauthorized(error_message(&response.body))),
            404 => Err(SyncError::NotFound),
            status => Err(SyncError::TransientFetchFailure(format!(
                "server returned {status}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsync_protocol::{CreateCursor, MessageId, UpdateCursor};
    use parking_lot::Mutex;

    /// Replies with a fixed response and remembers what it was asked.
    struct FixedClient {
        response: Result<HttpResponse, String>,
        seen: Mutex<Vec<(String, Option<String>)>>,
    }

    impl FixedClient {
        fn new(status: u16, body: &str) -> Self {
            Self {
                response: Ok(HttpResponse {
                    status,
                    body: body.as_bytes().to_vec(),
                }),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl HttpClient for FixedClient {
        async fn get(&self, url: &Url, bearer: Option<&str>) -> Result<HttpResponse, String> {
            self.seen
                .lock()
                .push((url.to_string(), bearer.map(str::to_string)));
            self.response.clone()
        }
    }

    struct StalledClient;

    #[async_trait]
    impl HttpClient for StalledClient {
        async fn get(&self, _url: &Url, _bearer: Option<&str>) -> Result<HttpResponse, String> {
            std::future::pending().await
        }
    }

    fn key() -> ResourceKey {
        ResourceKey::new("team.chat").unwrap()
    }

    #[test]
    fn urls() {
        let transport = HttpTransport::new("http://host:8080/api/", FixedClient::new(200, "")).unwrap();
        let url = transport
            .messages_url(&key(), &DeltaQuery::bootstrap())
            .unwrap();
        assert_eq!(url.as_str(), "http://host:8080/api/resources/team.chat/messages");

        let query = DeltaQuery::incremental(UpdateCursor::after_record(5, MessageId::new("a b")))
            .with_before(CreateCursor::at(9))
            .with_limit(10);
        let url = transport.messages_url(&key(), &query).unwrap();
        assert_eq!(
            url.as_str(),
            "http://host:8080/api/resources/team.chat/messages?updatedAfter=5&afterId=a+b&before=9&limit=10"
        );
    }

    #[test]
    fn rejects_bad_base() {
        assert!(HttpTransport::new("not a url", FixedClient::new(200, "")).is_err());
        assert!(HttpTransport::new("mailto:ops@example.com", FixedClient::new(200, "")).is_err());
    }

    #[tokio::test]
    async fn decodes_page_and_sends_bearer() {
        let body = r#"{"messages":[{"id":"m1","seq":1,"content":"aGk=","createdAt":10,"updatedAt":12}],"hasMore":false,"oldestTimestamp":10,"newestTimestamp":12}"#;
        let transport = HttpTransport::new("http://host", FixedClient::new(200, body)).unwrap();
        transport.set_bearer("tok");

        let page = transport.fetch(&key(), &DeltaQuery::bootstrap()).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page.records[0].content, b"hi".to_vec());
        assert_eq!(page.records[0].session_id, key());
        assert_eq!(page.newest_timestamp, Some(12));

        let seen = transport.client.seen.lock();
        assert_eq!(seen[0].1.as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn maps_statuses() {
        let cases = [
            (400, r#"{"error":"invalid argument: limit"}"#),
            (401, r#"{"error":"unauthorized"}"#),
            (404, r#"{"error":"resource not found"}"#),
            (503, "unavailable"),
            (200, "{not json"),
        ];
        let mut errors = Vec::new();
        for (status, body) in cases {
            let transport = HttpTransport::new("http://host", FixedClient::new(status, body)).unwrap();
            errors.push(transport.fetch(&key(), &DeltaQuery::bootstrap()).await.unwrap_err());
        }

        assert_eq!(errors[0], SyncError::InvalidArgument("invalid argument: limit".into()));
        assert!(matches!(errors[1], SyncError::Unauthorized(_)));
        assert_eq!(errors[2], SyncError::NotFound);
        assert!(errors[3].is_transient());
        assert!(matches!(errors[4], SyncError::Protocol(_)));
    }

    #[tokio::test]
    async fn invalid_query_never_hits_the_network() {
        let transport = HttpTransport::new("http://host", FixedClient::new(200, "{}")).unwrap();
        let err = transport
            .fetch(&key(), &DeltaQuery::bootstrap().with_limit(500))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidArgument(_)));
        assert!(transport.client.seen.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_request_times_out() {
        let transport = HttpTransport::new("http://host", StalledClient)
            .unwrap()
            .with_timeout(Duration::from_secs(1));
        let err = transport
            .fetch(&key(), &DeltaQuery::bootstrap())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
