//! # chatsync Engine
//!
//! Client-side delta sync engine for chatsync.
//!
//! This crate provides:
//! - Delta transport abstraction and an HTTP transport
//! - Monotonic sync watermarks (in-memory and file-backed)
//! - An idempotent merge/apply layer with optimistic local messages
//! - A single-flight coordinator per resource key
//! - A prefetch orchestrator for liveness triggers
//!
//! ## Architecture
//!
//! Every trigger (push notification, pull-to-refresh, app foreground) is an
//! *invalidation* of a resource key. Invalidations go through that key's
//! [`SyncCoordinator`], which runs at most one [`DeltaSyncCycle`] at a time
//! and guarantees that an invalidation arriving mid-run is served by a
//! follow-up run.
//!
//! ```text
//! trigger ─▶ SyncCoordinator ─▶ DeltaSyncCycle ─▶ DeltaSource (HTTP)
//!                                     │
//!                                     ├─▶ MessageStore   (merge)
//!                                     └─▶ WatermarkStore (advance)
//! ```
//!
//! ## Key Invariants
//!
//! - At most one cycle in flight per key; backfill waits for it
//! - At least one cycle after every invalidation
//! - A watermark never moves backwards
//! - Merging the same page twice is a no-op
//! - Timeouts stop waiting; they never cancel a run

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
mod cycle;
mod engine;
mod error;
mod http;
mod merge;
mod prefetch;
mod transport;
mod watermark;

pub use config::{PrefetchConfig, SyncConfig};
pub use coordinator::{
    CoordinatorSet, CoordinatorState, CycleOutcome, CycleReport, CycleRunner, CycleTicket,
    SyncCoordinator,
};
pub use cycle::{BackfillReport, DeltaSyncCycle, SyncStats};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpResponse, HttpTransport};
pub use merge::{MemoryMessageStore, MessageStore, PendingMessage};
pub use prefetch::{PrefetchOrchestrator, PrefetchReport, ResourceDirectory};
pub use transport::{DeltaSource, MockSource};
pub use watermark::{FileWatermarkStore, MemoryWatermarkStore, Watermark, WatermarkStore};
