//! # chatsync Protocol
//!
//! Message records and delta query types shared by the chatsync server and
//! client engine.
//!
//! This crate provides:
//! - `Message` records with opaque ciphertext content
//! - Compound cursors (`UpdateCursor`, `CreateCursor`) for page boundaries
//! - `DeltaQuery` validation and mode selection
//! - `DeltaPage` results and the JSON wire format
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Query modes
//!
//! | `updatedAfter` | `before` | mode        | order                     |
//! |----------------|----------|-------------|---------------------------|
//! | set            | unset    | incremental | ascending by `updatedAt`  |
//! | unset          | set      | backfill    | descending by `createdAt` |
//! | set            | set      | range       | ascending by `updatedAt`  |
//! | unset          | unset    | bootstrap   | descending by `createdAt` |

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cursor;
mod error;
mod message;
mod page;
mod query;
mod wire;

pub use cursor::{CreateCursor, UpdateCursor};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{Message, MessageId, NewMessage, ResourceKey, Timestamp};
pub use page::DeltaPage;
pub use query::{DeltaParams, DeltaQuery, QueryMode, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use wire::{MessagesResponse, WireMessage};
