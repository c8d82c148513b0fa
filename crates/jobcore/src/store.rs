//! The storage contract: a single trait two backends satisfy
//! ([`jobcore-memory`]'s `LocalJobStore` and [`jobcore-postgres`]'s
//! `PgJobStore`), covering per-job CRUD, atomic claim, and optional
//! stuck-job recovery.

use crate::error::CoreResult;
use crate::job::Job;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A job returned by a successful claim: already transitioned to
/// `InProgress` and owned by the claiming worker. Kept as a distinct
/// alias (rather than bare `Job`) so call sites read as "this came out
/// of a claim," matching the registry's policy-light naming.
pub type ClaimedJob = Job;

/// Persistence + atomic-claim contract. Implementations must provide
/// true atomicity for `claim_next_job_for_worker` (or loop
/// compare-and-set and treat a conflict as "check the next candidate,"
/// never as a successful claim).
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Fails with `JobCreateFailed`/`JobStoreError` if
    /// `job.id` already exists.
    async fn create_job(&self, job: Job) -> CoreResult<()>;

    /// Fetch a job by id. `JobNotFound` if absent.
    async fn get_job_by_id(&self, id: Uuid) -> CoreResult<Job>;

    /// Compare-and-set update against the stored snapshot (matched by
    /// `job.version`). A concurrent modification surfaces as
    /// `JobUpdateConflict`, never as a silent overwrite.
    async fn update_job(&self, job: Job) -> CoreResult<()>;

    /// Atomically select one eligible job (no worker held; Queued, or
    /// due-Scheduled) ordered by `createdAt`/`available_at` ascending,
    /// and return it already transitioned to `InProgress` owned by
    /// `worker_id`. `Ok(None)` means nothing eligible — not an error.
    async fn claim_next_job_for_worker(&self, worker_id: Uuid) -> CoreResult<Option<ClaimedJob>>;

    /// Whether this backend can run [`JobStore::recover_stuck_jobs`].
    fn supports_job_recovery(&self) -> bool;

    /// Reclaim every job `InProgress` with `started_at < threshold`:
    /// requeue (incrementing `retry_count`) if retries remain, else
    /// fail with recovery exhaustion. Returns the count acted upon.
    /// Calling this when [`JobStore::supports_job_recovery`] is false is
    /// a programming error.
    async fn recover_stuck_jobs(
        &self,
        threshold: DateTime<Utc>,
        max_retries_override: Option<u32>,
    ) -> CoreResult<u64>;
}
