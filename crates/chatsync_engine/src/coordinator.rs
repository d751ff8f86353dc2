//! Single-flight sync coordinator.
//!
//! One coordinator per resource key guarantees at most one sync cycle in
//! flight for that key while never losing an invalidation:
//!
//! ```text
//!            invalidate                  run starts
//!   Idle ──────────────────▶ PendingRun ───────────────▶ Running
//!    ▲                          ▲                          │  │
//!    │   run ends               │ run ends                 │  │ invalidate
//!    └──────────────────────────┼──────────────────────────┘  ▼
//!                               └──────────── RunningWithPendingInvalidation
//! ```
//!
//! Invalidations in `PendingRun` or `RunningWithPendingInvalidation` coalesce.
//! A caller waiting on a ticket observes the outcome of the first run that
//! *starts* after it registered, so a waiter that arrives mid-run is served
//! by the follow-up run.

use crate::error::{SyncError, SyncResult};
use crate::watermark::Watermark;
use async_trait::async_trait;
use chatsync_protocol::ResourceKey;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// No run scheduled.
    Idle,
    /// A run is scheduled but has not started.
    PendingRun,
    /// A run is in flight.
    Running,
    /// A run is in flight and another must follow it.
    RunningWithPendingInvalidation,
}

/// Summary of one completed sync cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Pages fetched.
    pub pages: u32,
    /// Records received.
    pub fetched: usize,
    /// Records inserted or replaced locally.
    pub changed: usize,
    /// Watermark after the cycle, if any.
    pub watermark: Option<Watermark>,
}

/// Result delivered to every caller coalesced into a run.
pub type CycleOutcome = SyncResult<CycleReport>;

/// Executes one sync cycle for a key.
#[async_trait]
pub trait CycleRunner: Send + Sync + 'static {
    /// Fetches, merges and advances the watermark for `key`.
    async fn run_cycle(&self, key: &ResourceKey) -> CycleOutcome;
}

struct Inner {
    state: CoordinatorState,
    waiters: Vec<oneshot::Sender<CycleOutcome>>,
    runs: u64,
}

/// Per-key single-flight coordinator.
pub struct SyncCoordinator {
    key: ResourceKey,
    runner: Arc<dyn CycleRunner>,
    inner: Mutex<Inner>,
}

/// Handle to the outcome of the run an invalidation was coalesced into.
///
/// Dropping a ticket does not cancel the run.
#[must_use = "a ticket does nothing unless awaited"]
pub struct CycleTicket {
    rx: oneshot::Receiver<CycleOutcome>,
}

impl CycleTicket {
    /// Waits for the run to finish.
    pub async fn wait(self) -> CycleOutcome {
        self.rx
            .await
            .unwrap_or_else(|_| Err(SyncError::Internal("coordinator dropped the run".into())))
    }
}

impl SyncCoordinator {
    /// Creates an idle coordinator for `key`.
    pub fn new(key: ResourceKey, runner: Arc<dyn CycleRunner>) -> Arc<Self> {
        Arc::new(Self {
            key,
            runner,
            inner: Mutex::new(Inner {
                state: CoordinatorState::Idle,
                waiters: Vec::new(),
                runs: 0,
            }),
        })
    }

    /// The key this coordinator serializes.
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Current state.
    pub fn state(&self) -> CoordinatorState {
        self.inner.lock().state
    }

    /// Number of runs completed so far.
    pub fn runs_completed(&self) -> u64 {
        self.inner.lock().runs
    }

    /// Requests a run without waiting for it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn invalidate(self: &Arc<Self>) {
        self.schedule(None);
    }

    /// Requests a run and returns a ticket for its outcome.
    ///
    /// The request is registered before this returns, so it is never lost
    /// even if the ticket is dropped unawaited.
    pub fn ticket(self: &Arc<Self>) -> CycleTicket {
        let (tx, rx) = oneshot::channel();
        self.schedule(Some(tx));
        CycleTicket { rx }
    }

    /// Requests a run and waits for its outcome.
    pub async fn invalidate_and_await(self: &Arc<Self>) -> CycleOutcome {
        self.ticket().wait().await
    }

    fn schedule(self: &Arc<Self>, waiter: Option<oneshot::Sender<CycleOutcome>>) {
        let mut inner = self.inner.lock();
        if let Some(waiter) = waiter {
            inner.waiters.push(waiter);
        }

        match inner.state {
            CoordinatorState::Idle => {
                let handle = match tokio::runtime::Handle::try_current() {
                    Ok(handle) => handle,
                    Err(e) => {
                        warn!(resource = %self.key, error = %e, "no runtime to run sync cycle");
                        let outcome = Err(SyncError::Internal(format!("no async runtime: {e}")));
                        for waiter in inner.waiters.drain(..) {
                            let _ = waiter.send(outcome.clone());
                        }
                        return;
                    }
                };
                inner.state = CoordinatorState::PendingRun;
                drop(inner);

                debug!(resource = %self.key, "sync scheduled");
                let this = Arc::clone(self);
                handle.spawn(async move { this.drive().await });
            }
            CoordinatorState::PendingRun => {
                debug!(resource = %self.key, "invalidation coalesced into pending run");
            }
            CoordinatorState::Running => {
                inner.state = CoordinatorState::RunningWithPendingInvalidation;
                debug!(resource = %self.key, "follow-up run queued");
            }
            CoordinatorState::RunningWithPendingInvalidation => {
                debug!(resource = %self.key, "invalidation coalesced into follow-up run");
            }
        }
    }

    async fn drive(self: Arc<Self>) {
        loop {
            let waiters = self.begin_run();
            debug!(resource = %self.key, waiters = waiters.len(), "sync cycle started");

            let outcome = AssertUnwindSafe(self.runner.run_cycle(&self.key))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(SyncError::Internal("sync cycle panicked".into())));

            match &outcome {
                Ok(report) => debug!(
                    resource = %self.key,
                    pages = report.pages,
                    changed = report.changed,
                    "sync cycle finished"
                ),
                Err(e) => debug!(resource = %self.key, error = %e, "sync cycle failed"),
            }

            for waiter in waiters {
                let _ = waiter.send(outcome.clone());
            }

            if !self.end_run() {
                return;
            }
        }
    }

    fn begin_run(&self) -> Vec<oneshot::Sender<CycleOutcome>> {
        let mut inner = self.inner.lock();
        inner.state = CoordinatorState::Running;
        std::mem::take(&mut inner.waiters)
    }

    /// Returns true if another run must follow immediately.
    fn end_run(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.runs += 1;
        match inner.state {
            CoordinatorState::RunningWithPendingInvalidation => {
                inner.state = CoordinatorState::PendingRun;
                true
            }
            _ => {
                inner.state = CoordinatorState::Idle;
                false
            }
        }
    }
}

/// Lazily created coordinators, one per key.
pub struct CoordinatorSet {
    runner: Arc<dyn CycleRunner>,
    coordinators: Mutex<HashMap<ResourceKey, Arc<SyncCoordinator>>>,
}

impl CoordinatorSet {
    /// Creates an empty set whose coordinators share `runner`.
    pub fn new(runner: Arc<dyn CycleRunner>) -> Self {
        Self {
            runner,
            coordinators: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the coordinator for `key`, creating it on first use.
    pub fn get_or_create(&self, key: &ResourceKey) -> Arc<SyncCoordinator> {
        let mut coordinators = self.coordinators.lock();
        Arc::clone(
            coordinators
                .entry(key.clone())
                .or_insert_with(|| SyncCoordinator::new(key.clone(), Arc::clone(&self.runner))),
        )
    }

    /// Returns the coordinator for `key` if one exists.
    pub fn get(&self, key: &ResourceKey) -> Option<Arc<SyncCoordinator>> {
        self.coordinators.lock().get(key).cloned()
    }

    /// Number of coordinators created.
    pub fn len(&self) -> usize {
        self.coordinators.lock().len()
    }

    /// Returns true if no coordinator was created yet.
    pub fn is_empty(&self) -> bool {
        self.coordinators.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use tokio::sync::{mpsc, Semaphore};

    /// Runner whose cycles block until the test releases them.
    struct GatedRunner {
        gate: Semaphore,
        started: mpsc::UnboundedSender<u32>,
        calls: AtomicU32,
        active: AtomicUsize,
        max_active: AtomicUsize,
        fail_on: Option<u32>,
        panic_on: Option<u32>,
    }

    impl GatedRunner {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<u32>) {
            Self::with_faults(None, None)
        }

        fn with_faults(
            fail_on: Option<u32>,
            panic_on: Option<u32>,
        ) -> (Arc<Self>, mpsc::UnboundedReceiver<u32>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let runner = Arc::new(Self {
                gate: Semaphore::new(0),
                started: tx,
                calls: AtomicU32::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                fail_on,
                panic_on,
            });
            (runner, rx)
        }

        fn release(&self) {
            self.gate.add_permits(1);
        }
    }

    #[async_trait]
    impl CycleRunner for GatedRunner {
        async fn run_cycle(&self, _key: &ResourceKey) -> CycleOutcome {
            let run = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            let _ = self.started.send(run);

            let permit = self.gate.acquire().await;
            if let Ok(permit) = permit {
                permit.forget();
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.panic_on == Some(run) {
                panic!("cycle {run} exploded");
            }
            if self.fail_on == Some(run) {
                return Err(SyncError::TransientFetchFailure("offline".into()));
            }
            Ok(CycleReport {
                pages: run,
                ..CycleReport::default()
            })
        }
    }

    fn coordinator(runner: Arc<GatedRunner>) -> Arc<SyncCoordinator> {
        SyncCoordinator::new(ResourceKey::new("room").unwrap(), runner)
    }

    #[tokio::test]
    async fn burst_while_idle_runs_once() {
        let (runner, mut started) = GatedRunner::new();
        let coord = coordinator(runner.clone());

        let tickets: Vec<_> = (0..10).map(|_| coord.ticket()).collect();
        assert_eq!(coord.state(), CoordinatorState::PendingRun);

        assert_eq!(started.recv().await, Some(1));
        runner.release();
        for ticket in tickets {
            assert_eq!(ticket.wait().await.unwrap().pages, 1);
        }

        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coord.runs_completed(), 1);
        assert_eq!(coord.state(), CoordinatorState::Idle);
    }

    #[tokio::test]
    async fn waiters_during_run_get_the_next_run() {
        let (runner, mut started) = GatedRunner::new();
        let coord = coordinator(runner.clone());

        let first = coord.ticket();
        assert_eq!(started.recv().await, Some(1));
        assert_eq!(coord.state(), CoordinatorState::Running);

        let second = coord.ticket();
        let third = coord.ticket();
        coord.invalidate();
        assert_eq!(
            coord.state(),
            CoordinatorState::RunningWithPendingInvalidation
        );

        runner.release();
        assert_eq!(first.wait().await.unwrap().pages, 1);

        // The follow-up has started but is still gated.
        assert_eq!(started.recv().await, Some(2));
        assert_eq!(coord.runs_completed(), 1);

        runner.release();
        assert_eq!(second.wait().await.unwrap().pages, 2);
        assert_eq!(third.wait().await.unwrap().pages, 2);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(runner.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_ticket_still_runs() {
        let (runner, mut started) = GatedRunner::new();
        let coord = coordinator(runner.clone());

        drop(coord.ticket());
        assert_eq!(started.recv().await, Some(1));
        runner.release();

        let next = coord.ticket();
        assert_eq!(started.recv().await, Some(2));
        runner.release();
        assert_eq!(next.wait().await.unwrap().pages, 2);
    }

    #[tokio::test]
    async fn failure_returns_to_idle_without_retry() {
        let (runner, mut started) = GatedRunner::with_faults(Some(1), None);
        let coord = coordinator(runner.clone());

        let ticket = coord.ticket();
        started.recv().await;
        runner.release();
        let err = ticket.wait().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(coord.state(), CoordinatorState::Idle);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);

        let retry = coord.ticket();
        started.recv().await;
        runner.release();
        assert!(retry.wait().await.is_ok());
    }

    #[tokio::test]
    async fn panic_is_reported_and_coordinator_recovers() {
        let (runner, mut started) = GatedRunner::with_faults(None, Some(1));
        let coord = coordinator(runner.clone());

        let ticket = coord.ticket();
        started.recv().await;
        runner.release();
        assert!(matches!(ticket.wait().await, Err(SyncError::Internal(_))));
        assert_eq!(coord.state(), CoordinatorState::Idle);

        let next = coord.ticket();
        started.recv().await;
        runner.release();
        assert_eq!(next.wait().await.unwrap().pages, 2);
    }

    #[test]
    fn outside_runtime_fails_waiters() {
        let (runner, _started) = GatedRunner::new();
        let coord = coordinator(runner);
        let ticket = coord.ticket();
        assert_eq!(coord.state(), CoordinatorState::Idle);

        let outcome = futures::executor::block_on(ticket.wait());
        assert!(matches!(outcome, Err(SyncError::Internal(_))));
    }

    #[tokio::test]
    async fn set_creates_once_per_key() {
        let (runner, _started) = GatedRunner::new();
        let set = CoordinatorSet::new(runner);
        let a = ResourceKey::new("a").unwrap();

        assert!(set.is_empty());
        let first = set.get_or_create(&a);
        let again = set.get_or_create(&a);
        assert!(Arc::ptr_eq(&first, &again));
        set.get_or_create(&ResourceKey::new("b").unwrap());
        assert_eq!(set.len(), 2);
        assert!(set.get(&ResourceKey::new("c").unwrap()).is_none());
    }
}
