//! HTTP binding.
//!
//! | Method | Path                              | Body                      |
//! |--------|-----------------------------------|---------------------------|
//! | GET    | `/health`                         | `ok`                      |
//! | GET    | `/resources/{key}/messages`       | [`MessagesResponse`] JSON |
//!
//! Errors are returned as `{"error": "<message>"}` with the status from
//! [`ServerError::status_code`].

use crate::error::{ServerError, ServerResult};
use crate::server::SyncServer;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chatsync_protocol::{DeltaParams, MessagesResponse};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Builds the router for a server.
pub fn router(server: Arc<SyncServer>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/resources/:resource_key/messages", get(get_messages))
        .with_state(server)
}

async fn get_messages(
    State(server): State<Arc<SyncServer>>,
    Path(resource_key): Path<String>,
    Query(params): Query<DeltaParams>,
    headers: HeaderMap,
) -> Result<Json<MessagesResponse>, ServerError> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    server
        .handle_messages(&resource_key, &params, authorization)
        .map(Json)
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Binds the configured address and serves until `shutdown` resolves.
pub async fn serve<F>(server: Arc<SyncServer>, shutdown: F) -> ServerResult<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(server.config().bind_addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(server))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chatsync_protocol::{NewMessage, ResourceKey};
    use tower::ServiceExt;

    fn seeded() -> Arc<SyncServer> {
        let server = SyncServer::new(ServerConfig::default());
        let log = server.change_log().unwrap();
        let key = ResourceKey::new("lobby").unwrap();
        log.create_session(key.clone(), []);
        for i in 0..4 {
            log.append(&key, NewMessage::new(vec![i], 1_000 + i64::from(i)))
                .unwrap();
        }
        Arc::new(server)
    }

    async fn get(server: Arc<SyncServer>, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router(server)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if !bytes.starts_with(b"{") {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    #[tokio::test]
    async fn health() {
        let (status, _) = get(seeded(), "/health").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn bootstrap_over_http() {
        let (status, body) = get(seeded(), "/resources/lobby/messages?limit=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["hasMore"], true);
        assert_eq!(body["newestTimestamp"], 1_003);
        assert_eq!(body["oldestTimestamp"], 1_002);
    }

    #[tokio::test]
    async fn empty_page_omits_bounds() {
        let (status, body) = get(seeded(), "/resources/lobby/messages?updatedAfter=5000").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["hasMore"], false);
        assert!(body.get("newestTimestamp").is_none());
        assert!(body.get("oldestTimestamp").is_none());
    }

    #[tokio::test]
    async fn bad_limit_is_400() {
        let (status, body) = get(seeded(), "/resources/lobby/messages?limit=151").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("limit"));
    }

    #[tokio::test]
    async fn unknown_resource_is_404() {
        let (status, _) = get(seeded(), "/resources/attic/messages").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_token_is_401() {
        let server = Arc::new(SyncServer::new(
            ServerConfig::default().with_auth(b"secret".to_vec()),
        ));
        let (status, _) = get(server, "/resources/lobby/messages").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
