//! Bearer token authentication.
//!
//! Tokens are signed with HMAC-SHA256 and carry their issue time so they can
//! expire.
//!
//! ## Token Format
//!
//! - 16 bytes: caller id
//! - 8 bytes: issue timestamp (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature over the first 24 bytes
//!
//! Total: 56 bytes, standard base64 for transport.

use crate::error::{ServerError, ServerResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_LEN: usize = 56;
const SIGNED_LEN: usize = 24;

/// Identity of an authenticated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallerId(Uuid);

impl CallerId {
    /// Creates a random caller id.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps raw bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for CallerId {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| ServerError::InvalidArgument(format!("invalid caller id: {e}")))
    }
}

/// Who is making a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    /// No credentials; only possible when auth is disabled.
    Anonymous,
    /// A device presenting a valid token.
    Device(CallerId),
}

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and validates bearer tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Issues a token for `caller`, valid from now.
    pub fn create_token(&self, caller: CallerId) -> ServerResult<String> {
        self.create_token_at(caller, unix_millis())
    }

    fn create_token_at(&self, caller: CallerId, issued_at: u64) -> ServerResult<String> {
        let mut token = Vec::with_capacity(TOKEN_LEN);
        token.extend_from_slice(caller.as_bytes());
        token.extend_from_slice(&issued_at.to_be_bytes());

        let signature = self.mac(&token)?.finalize().into_bytes();
        token.extend_from_slice(&signature);
        Ok(STANDARD.encode(token))
    }

    /// Validates a base64 token and returns the caller it was issued to.
    pub fn validate_token(&self, token: &str) -> ServerResult<CallerId> {
        let raw = STANDARD
            .decode(token.trim())
            .map_err(|_| ServerError::Unauthorized("malformed token".into()))?;
        if raw.len() != TOKEN_LEN {
            return Err(ServerError::Unauthorized("invalid token length".into()));
        }

        let (signed, signature) = raw.split_at(SIGNED_LEN);
        self.mac(signed)?
            .verify_slice(signature)
            .map_err(|_| ServerError::Unauthorized("invalid signature".into()))?;

        let (caller_bytes, ts_bytes) = signed.split_at(16);
        let mut caller = [0u8; 16];
        caller.copy_from_slice(caller_bytes);
        let mut ts = [0u8; 8];
        ts.copy_from_slice(ts_bytes);

        let issued_at = u64::from_be_bytes(ts);
        let expiry_millis = self.config.token_expiry.as_millis() as u64;
        if unix_millis() > issued_at.saturating_add(expiry_millis) {
            return Err(ServerError::Unauthorized("token expired".into()));
        }

        Ok(CallerId::from_bytes(caller))
    }

    /// Resolves an `Authorization` header value to a caller.
    pub fn authenticate(&self, authorization: Option<&str>) -> ServerResult<CallerId> {
        let header =
            authorization.ok_or_else(|| ServerError::Unauthorized("missing credentials".into()))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ServerError::Unauthorized("expected a bearer token".into()))?;
        self.validate_token(token)
    }

    fn mac(&self, data: &[u8]) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key: {e}")))?;
        mac.update(data);
        Ok(mac)
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
