//! Testing utilities for the `jobcore` job queue.
//!
//! A [`ManualClock`] for deterministic time control, two canned
//! handlers (`EchoHandler`, `FlakyHandler`) covering the common
//! happy-path and retry-then-succeed shapes, and a [`TestHarness`] that
//! wires a [`jobcore_memory::LocalJobStore`] + [`JobManager`] + `Worker`
//! together so integration tests don't each hand-roll the plumbing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobcore::{
    ExecutionContext, Handler, HandlerOutcome, HandlerRegistry, HandlerRegistryBuilder, JobError,
    JobManager, TimeSource, Worker, WorkerBuilder, WorkerConfig, WorkerHandle,
};
use jobcore_memory::LocalJobStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// A clock under direct test control. Starts at the Unix epoch unless
/// constructed with [`ManualClock::at`]; advance it with [`ManualClock::set`]
/// or [`ManualClock::advance`].
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn at(t: DateTime<Utc>) -> Arc<Self> {
        Arc::new(ManualClock(Mutex::new(t)))
    }

    pub fn epoch() -> Arc<Self> {
        Self::at(DateTime::from_timestamp(0, 0).unwrap())
    }

    pub fn set(&self, t: DateTime<Utc>) {
        *self.0.lock().unwrap() = t;
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.0.lock().unwrap();
        *guard = *guard + delta;
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Deserializes a `String` request and returns it uppercased. The
/// simplest possible handler for exercising the happy path.
pub struct EchoHandler;

#[async_trait]
impl Handler<String, String> for EchoHandler {
    async fn execute(
        &self,
        request: String,
        _ctx: &ExecutionContext,
        _cancel: &CancellationToken,
    ) -> HandlerOutcome<String> {
        HandlerOutcome::Success(request.to_uppercase())
    }
}

/// Fails with a retryable error on the first `fail_times` attempts,
/// then succeeds with `"ok"`. Useful for exercising retry/backoff
/// without a handler that has to be told which attempt it's on.
pub struct FlakyHandler {
    attempts: AtomicUsize,
    fail_times: usize,
}

impl FlakyHandler {
    pub fn new(fail_times: usize) -> Self {
        FlakyHandler {
            attempts: AtomicUsize::new(0),
            fail_times,
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler<(), String> for FlakyHandler {
    async fn execute(
        &self,
        _request: (),
        _ctx: &ExecutionContext,
        _cancel: &CancellationToken,
    ) -> HandlerOutcome<String> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_times {
            HandlerOutcome::Failure(JobError::new("FLAKY_FAILURE", "simulated failure"))
        } else {
            HandlerOutcome::Success("ok".to_string())
        }
    }
}

/// Wires a [`LocalJobStore`], a [`JobManager`], and (once started) a
/// running `Worker` behind a [`ManualClock`], so a test gets a working
/// queue in one call instead of assembling store/manager/registry by
/// hand.
pub struct TestHarness {
    pub store: Arc<LocalJobStore>,
    pub clock: Arc<ManualClock>,
    pub manager: JobManager,
    config: WorkerConfig,
}

impl TestHarness {
    pub fn new(config: WorkerConfig) -> Self {
        let clock = ManualClock::epoch();
        let store = Arc::new(LocalJobStore::with_clock(clock.clone()));
        let manager = JobManager::new(
            store.clone(),
            clock.clone(),
            config.default_max_retries,
            config.retry_delay_base_seconds,
        );
        TestHarness {
            store,
            clock,
            manager,
            config,
        }
    }

    /// Start a full worker (producer + consumer + recovery loop) against
    /// this harness's store and clock, dispatching through `registry`.
    pub fn start_worker(&self, registry: HandlerRegistry) -> WorkerHandle {
        WorkerBuilder::new(self.store.clone(), registry, self.config.clone())
            .with_clock(self.clock.clone())
            .build()
            .start()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new(WorkerConfig::default())
    }
}

/// Convenience re-export so a test only needs `jobcore_testing::*` to
/// start building a registry, without a separate `jobcore` import.
pub fn registry_builder() -> HandlerRegistryBuilder {
    HandlerRegistry::builder()
}
