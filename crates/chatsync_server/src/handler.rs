//! Request handlers for the delta endpoint.

use crate::auth::{AuthConfig, Caller, TokenValidator};
use crate::config::ServerConfig;
use crate::delta::DeltaQueryService;
use crate::error::{ServerError, ServerResult};
use chatsync_protocol::{DeltaParams, MessagesResponse, ResourceKey};
use std::sync::Arc;
use tracing::debug;

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Delta query service (shared across all handlers).
    pub service: DeltaQueryService,
    validator: Option<TokenValidator>,
}

impl HandlerContext {
    /// Creates a new handler context.
    ///
    /// A token validator is built only when the configuration carries a secret.
    pub fn new(config: ServerConfig, service: DeltaQueryService) -> Self {
        let validator = config.auth_secret.as_ref().map(|secret| {
            TokenValidator::new(AuthConfig::new(secret.clone()).with_expiry(config.token_expiry))
        });
        Self {
            config,
            service,
            validator,
        }
    }

    /// Returns the token validator, if auth is enabled.
    pub fn validator(&self) -> Option<&TokenValidator> {
        self.validator.as_ref()
    }

    fn authenticate(&self, authorization: Option<&str>) -> ServerResult<Caller> {
        match &self.validator {
            Some(validator) => validator.authenticate(authorization).map(Caller::Device),
            None => Ok(Caller::Anonymous),
        }
    }
}

/// Handler for delta requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles `GET /resources/{key}/messages`.
    ///
    /// Checks run in a fixed order: credentials, then query parameters, then
    /// the resource. A key that is not even well-formed is reported as
    /// `NotFound`, like any other key the caller cannot see.
    pub fn handle_messages(
        &self,
        resource_key: &str,
        params: &DeltaParams,
        authorization: Option<&str>,
    ) -> ServerResult<MessagesResponse> {
        let caller = self.context.authenticate(authorization)?;
        let query = params.parse()?;
        let key = ResourceKey::new(resource_key).map_err(|_| ServerError::NotFound)?;

        let page = self.context.service.query(&caller, &key, &query)?;
        debug!(resource = %key, records = page.len(), has_more = page.has_more, "served delta page");
        Ok(MessagesResponse::from_page(&page))
    }
}
