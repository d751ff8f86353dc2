//! Main sync server.

use crate::auth::TokenValidator;
use crate::change_log::{AccessPolicy, ChangeLog, MemoryChangeLog};
use crate::config::ServerConfig;
use crate::delta::DeltaQueryService;
use crate::error::ServerResult;
use crate::handler::{HandlerContext, RequestHandler};
use chatsync_protocol::{DeltaParams, MessagesResponse};
use std::sync::Arc;

/// The delta query server.
///
/// Owns the handler stack for `GET /resources/{key}/messages`. The HTTP layer
/// in [`crate::router`] is a thin adapter over [`SyncServer::handle_messages`].
///
/// # Example
///
/// ```
/// use chatsync_protocol::{DeltaParams, NewMessage, ResourceKey};
/// use chatsync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// let key = ResourceKey::new("general").unwrap();
/// let log = server.change_log().unwrap();
/// log.create_session(key.clone(), []);
/// log.append(&key, NewMessage::new(b"hi".to_vec(), 1)).unwrap();
///
/// let response = server
///     .handle_messages("general", &DeltaParams::default(), None)
///     .unwrap();
/// assert_eq!(response.messages.len(), 1);
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
    memory: Option<Arc<MemoryChangeLog>>,
}

impl SyncServer {
    /// Creates a server backed by an empty in-memory change log.
    pub fn new(config: ServerConfig) -> Self {
        let log = Arc::new(MemoryChangeLog::new());
        let mut server = Self::with_store(config, log.clone(), log.clone());
        server.memory = Some(log);
        server
    }

    /// Creates a server over an existing change log and access policy.
    pub fn with_store(
        config: ServerConfig,
        log: Arc<dyn ChangeLog>,
        access: Arc<dyn AccessPolicy>,
    ) -> Self {
        let service = DeltaQueryService::new(log, access);
        let context = Arc::new(HandlerContext::new(config, service));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self {
            handler,
            context,
            memory: None,
        }
    }

    /// Handles a delta request.
    pub fn handle_messages(
        &self,
        resource_key: &str,
        params: &DeltaParams,
        authorization: Option<&str>,
    ) -> ServerResult<MessagesResponse> {
        self.handler
            .handle_messages(resource_key, params, authorization)
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.context.config
    }

    /// Returns the token validator, if auth is enabled.
    pub fn token_validator(&self) -> Option<&TokenValidator> {
        self.context.validator()
    }

    /// Returns the in-memory change log, if the server was built with
    /// [`SyncServer::new`].
    pub fn change_log(&self) -> Option<&MemoryChangeLog> {
        self.memory.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CallerId;
    use chatsync_protocol::{NewMessage, ResourceKey};

    #[test]
    fn edits_show_up_incrementally() {
        let server = SyncServer::new(ServerConfig::default());
        let log = server.change_log().unwrap();
        let key = ResourceKey::new("room-1").unwrap();
        log.create_session(key.clone(), []);
        let first = log.append(&key, NewMessage::new(b"a".to_vec(), 10)).unwrap();
        log.append(&key, NewMessage::new(b"b".to_vec(), 11)).unwrap();

        let boot = server
            .handle_messages("room-1", &DeltaParams::default(), None)
            .unwrap();
        let newest = boot.newest_timestamp.unwrap();

        log.edit(&key, &first.id, b"a2".to_vec(), 50).unwrap();

        let params = DeltaParams {
            updated_after: Some(newest.to_string()),
            ..Default::default()
        };
        let delta = server.handle_messages("room-1", &params, None).unwrap();
        assert_eq!(delta.messages.len(), 1);
        assert_eq!(delta.messages[0].content, b"a2".to_vec());
    }

    #[test]
    fn custom_store_has_no_memory_log() {
        let log = Arc::new(MemoryChangeLog::new());
        let server = SyncServer::with_store(ServerConfig::default(), log.clone(), log);
        assert!(server.change_log().is_none());
        assert!(server.token_validator().is_none());
    }

    #[test]
    fn auth_enabled_exposes_validator() {
        let server = SyncServer::new(ServerConfig::default().with_auth(b"k".to_vec()));
        let caller = CallerId::random();
        let token = server.token_validator().unwrap().create_token(caller).unwrap();
        assert_eq!(
            server.token_validator().unwrap().validate_token(&token).unwrap(),
            caller
        );
    }
}
