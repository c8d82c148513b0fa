//! End-to-end scenarios S1–S6 from the testable-properties section,
//! plus the numbered properties not already covered by unit tests in
//! `job.rs`, `manager.rs`, and `registry.rs`.

use crate::job::{HttpContextSnapshot, JobError, JobStatus};
use crate::manager::JobManager;
use crate::registry::{ExecutionContext, Handler, HandlerOutcome, HandlerRegistry};
use crate::store::JobStore;
use crate::test_support::InMemoryStore;
use crate::time::{SystemClock, TimeSource};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Echo;

#[async_trait]
impl Handler<String, String> for Echo {
    async fn execute(
        &self,
        request: String,
        _ctx: &ExecutionContext,
        _cancel: &CancellationToken,
    ) -> HandlerOutcome<String> {
        HandlerOutcome::Success(request.to_uppercase())
    }
}

/// Fails with `BOOM` on the first `fail_times` attempts, then succeeds
/// returning `"ok"`.
struct FlakyThenSucceeds {
    attempts: AtomicUsize,
    fail_times: usize,
}

impl FlakyThenSucceeds {
    fn new(fail_times: usize) -> Self {
        FlakyThenSucceeds {
            attempts: AtomicUsize::new(0),
            fail_times,
        }
    }
}

#[async_trait]
impl Handler<(), String> for FlakyThenSucceeds {
    async fn execute(
        &self,
        _request: (),
        _ctx: &ExecutionContext,
        _cancel: &CancellationToken,
    ) -> HandlerOutcome<String> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_times {
            HandlerOutcome::Failure(JobError::new("BOOM", "simulated failure"))
        } else {
            HandlerOutcome::Success("ok".to_string())
        }
    }
}

struct AlwaysFails;

#[async_trait]
impl Handler<(), String> for AlwaysFails {
    async fn execute(
        &self,
        _request: (),
        _ctx: &ExecutionContext,
        _cancel: &CancellationToken,
    ) -> HandlerOutcome<String> {
        HandlerOutcome::Failure(JobError::new("BOOM", "simulated failure"))
    }
}

fn manager_with(store: Arc<dyn JobStore>, base_seconds: f64) -> JobManager {
    JobManager::new(store, Arc::new(SystemClock), 3, base_seconds)
}

/// S1 — Happy path: submit, run to completion via direct dispatch (no
/// background loops needed to prove the manager/registry contract).
#[tokio::test]
async fn s1_happy_path() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::default());
    let manager = manager_with(store.clone(), 2.0);
    let registry = HandlerRegistry::builder().with_body("echo", Echo).build();

    let job = manager
        .submit("echo", b"\"hello\"".to_vec(), HttpContextSnapshot::default(), Some(0))
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Queued);

    let claimed = manager.claim_next(Uuid::new_v4()).await.unwrap().unwrap();
    let cancel = CancellationToken::new();
    let result = registry.dispatch(&claimed, &cancel).await.unwrap();
    manager.process_success(claimed.id, result).await.unwrap();

    let done = manager.get_job(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    let value: String = serde_json::from_slice(&done.result.unwrap()).unwrap();
    assert_eq!(value, "HELLO");
    assert!(done.completed_at.unwrap() >= done.started_at.unwrap());
    assert!(done.started_at.unwrap() >= done.created_at);
}

/// S2 — Retry then success: fails on attempts 1 and 2, succeeds on 3.
#[tokio::test]
async fn s2_retry_then_success() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::default());
    let manager = manager_with(store.clone(), 0.01);
    let registry = HandlerRegistry::builder()
        .without_body("flaky", FlakyThenSucceeds::new(2))
        .build();

    let job = manager
        .submit("flaky", Vec::new(), HttpContextSnapshot::default(), Some(3))
        .await
        .unwrap();

    for _ in 0..3 {
        // Scheduled jobs become eligible immediately since the backoff
        // base is tiny; a real deployment would wait out retry_delay_until.
        let claimed = loop {
            if let Some(j) = manager.claim_next(Uuid::new_v4()).await.unwrap() {
                break j;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        };
        let cancel = CancellationToken::new();
        match registry.dispatch(&claimed, &cancel).await {
            Ok(bytes) => manager.process_success(claimed.id, bytes).await.unwrap(),
            Err(err) => manager.process_failure(claimed.id, err).await.unwrap(),
        }
    }

    let done = manager.get_job(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.retry_count, 2);
    let result: String = serde_json::from_slice(&done.result.unwrap()).unwrap();
    assert_eq!(result, "ok");
    assert_eq!(done.error.as_ref().unwrap().code, "BOOM");
}

/// S3 — Retry exhaustion: handler always fails, `max_retries = 2`.
#[tokio::test]
async fn s3_retry_exhaustion() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::default());
    let manager = manager_with(store.clone(), 0.01);
    let registry = HandlerRegistry::builder()
        .without_body("always_fails", AlwaysFails)
        .build();

    let job = manager
        .submit("always_fails", Vec::new(), HttpContextSnapshot::default(), Some(2))
        .await
        .unwrap();

    for _ in 0..3 {
        let claimed = loop {
            if let Some(j) = manager.claim_next(Uuid::new_v4()).await.unwrap() {
                break j;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        };
        match registry.dispatch(&claimed, &CancellationToken::new()).await {
            Ok(bytes) => manager.process_success(claimed.id, bytes).await.unwrap(),
            Err(err) => manager.process_failure(claimed.id, err).await.unwrap(),
        }
        let current = manager.get_job(job.id).await.unwrap();
        if current.status == JobStatus::Failed {
            break;
        }
    }

    let done = manager.get_job(job.id).await.unwrap();
    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.retry_count, 2);
    assert_eq!(done.error.as_ref().unwrap().code, "BOOM");
}

/// S4 — Idempotent submission: a second submit with the same id, before
/// the first completes, returns the original job untouched.
#[tokio::test]
async fn s4_idempotent_submission() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::default());
    let manager = manager_with(store, 2.0);
    let id = Uuid::new_v4();

    let first = manager
        .submit(
            "echo",
            b"\"a\"".to_vec(),
            HttpContextSnapshot {
                job_id: Some(id),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();
    let second = manager
        .submit(
            "echo",
            b"\"b\"".to_vec(),
            HttpContextSnapshot {
                job_id: Some(id),
                ..Default::default()
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.payload, b"\"a\"".to_vec());
}

/// S5 — Concurrent claim: ten workers race for one eligible job; exactly
/// one wins.
#[tokio::test]
async fn s5_concurrent_claim() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::default());
    let manager = Arc::new(manager_with(store, 2.0));
    let job = manager
        .submit("echo", b"\"x\"".to_vec(), HttpContextSnapshot::default(), None)
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let manager = manager.clone();
        tasks.push(tokio::spawn(
            async move { manager.claim_next(Uuid::new_v4()).await.unwrap() },
        ));
    }

    let mut winners = 0;
    let mut winning_worker = None;
    for task in tasks {
        if let Some(claimed) = task.await.unwrap() {
            winners += 1;
            winning_worker = claimed.worker_id;
            assert_eq!(claimed.id, job.id);
        }
    }

    assert_eq!(winners, 1);
    let reloaded = manager.get_job(job.id).await.unwrap();
    assert_eq!(reloaded.worker_id, winning_worker);
    assert_eq!(reloaded.status, JobStatus::InProgress);
}

/// S6 — Recovery: a job stuck InProgress past the threshold is requeued
/// with an incremented retry_count; a second sweep is a no-op.
#[tokio::test]
async fn s6_recovery() {
    let store = Arc::new(InMemoryStore::recoverable());
    let manager = manager_with(store.clone(), 2.0);

    let job = manager
        .submit("echo", b"\"x\"".to_vec(), HttpContextSnapshot::default(), Some(3))
        .await
        .unwrap();
    let claimed = manager.claim_next(Uuid::new_v4()).await.unwrap().unwrap();
    assert_eq!(claimed.status, JobStatus::InProgress);

    let threshold = SystemClock.now() + chrono::Duration::seconds(1);
    // started_at is "now" (<=), so any future threshold makes it stuck.
    let count = store.recover_stuck_jobs(threshold, Some(3)).await.unwrap();
    assert_eq!(count, 1);

    let reloaded = manager.get_job(job.id).await.unwrap();
    assert_eq!(reloaded.status, JobStatus::Queued);
    assert!(reloaded.worker_id.is_none());
    assert_eq!(reloaded.retry_count, 1);

    let second_sweep = store.recover_stuck_jobs(threshold, Some(3)).await.unwrap();
    assert_eq!(second_sweep, 0);
}

/// Property 9 — a Scheduled job whose retry_delay_until is in the
/// future is never returned by claim.
#[tokio::test]
async fn property_scheduled_invisibility() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::default());
    let manager = manager_with(store, 2.0);
    let job = manager
        .submit("always_fails", Vec::new(), HttpContextSnapshot::default(), Some(3))
        .await
        .unwrap();
    manager.claim_next(Uuid::new_v4()).await.unwrap();
    manager
        .process_failure(job.id, JobError::new("BOOM", "x"))
        .await
        .unwrap();

    let reloaded = manager.get_job(job.id).await.unwrap();
    assert_eq!(reloaded.status, JobStatus::Scheduled);
    assert!(reloaded.retry_delay_until.unwrap() > SystemClock.now());

    let claim_attempt = manager.claim_next(Uuid::new_v4()).await.unwrap();
    assert!(claim_attempt.is_none());
}

/// Property 8 — ordering under claim prefers the earlier `created_at`.
#[tokio::test]
async fn property_ordering_under_claim() {
    let store: Arc<dyn JobStore> = Arc::new(InMemoryStore::default());
    let manager = manager_with(store.clone(), 2.0);

    let older = manager
        .submit("echo", b"\"older\"".to_vec(), HttpContextSnapshot::default(), None)
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    manager
        .submit("echo", b"\"newer\"".to_vec(), HttpContextSnapshot::default(), None)
        .await
        .unwrap();

    let first_claim = manager.claim_next(Uuid::new_v4()).await.unwrap().unwrap();
    assert_eq!(first_claim.id, older.id);
}
