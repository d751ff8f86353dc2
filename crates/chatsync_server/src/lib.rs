//! # chatsync Server
//!
//! Reference delta query server for chatsync.
//!
//! This crate provides:
//! - The `ChangeLog` storage seam and an in-memory implementation
//! - The delta query service (bootstrap, incremental, backfill, range)
//! - Bearer token authentication (HMAC-SHA256)
//! - An axum router exposing `GET /resources/{key}/messages`
//!
//! # Architecture
//!
//! The server never interprets message content. It stores ciphertext blobs
//! with ordering metadata and answers bounded, ordered slices of the change
//! log. Everything below the router is framework-agnostic, so the same
//! [`SyncServer`] can be driven in-process by tests.
//!
//! # Access
//!
//! Unknown sessions and sessions the caller may not read are reported the same
//! way (`404`), so the endpoint never reveals which keys exist.
//!
//! ```rust,ignore
//! use chatsync_server::{ServerConfig, SyncServer};
//!
//! let server = Arc::new(SyncServer::new(ServerConfig::default().with_auth(secret)));
//! chatsync_server::serve(server, shutdown_signal()).await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod auth;
mod change_log;
mod config;
mod delta;
mod error;
mod handler;
mod http;
mod server;

pub use auth::{AuthConfig, Caller, CallerId, TokenValidator};
pub use change_log::{now_millis, AccessPolicy, ChangeLog, MemoryChangeLog, OpenAccess};
pub use config::ServerConfig;
pub use delta::DeltaQueryService;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use http::{router, serve};
pub use server::SyncServer;
