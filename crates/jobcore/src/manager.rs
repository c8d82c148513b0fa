//! Submission, claim delegation, and success/failure processing —
//! everything that turns a `Job` from one lifecycle state into the
//! next, reading through a [`JobStore`] and an injected [`TimeSource`].

use crate::error::{CoreResult, ErrorCode};
use crate::job::{HttpContextSnapshot, Job, JobError, JobStatus};
use crate::store::JobStore;
use crate::time::SharedClock;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct JobManager {
    store: Arc<dyn JobStore>,
    clock: SharedClock,
    default_max_retries: u32,
    retry_delay_base_seconds: f64,
}

impl JobManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        clock: SharedClock,
        default_max_retries: u32,
        retry_delay_base_seconds: f64,
    ) -> Self {
        JobManager {
            store,
            clock,
            default_max_retries,
            retry_delay_base_seconds,
        }
    }

    /// Submit new work. Idempotent on `ctx.job_id`: if that id already
    /// exists, the stored job is returned unchanged rather than
    /// creating a duplicate. `max_retries` overrides the manager's
    /// default when provided (submitting with `Some(0)` disables
    /// retries entirely).
    pub async fn submit(
        &self,
        job_name: impl Into<String>,
        payload: Vec<u8>,
        ctx: HttpContextSnapshot,
        max_retries: Option<u32>,
    ) -> CoreResult<Job> {
        if let Some(existing_id) = ctx.job_id {
            if let Ok(existing) = self.store.get_job_by_id(existing_id).await {
                return Ok(existing);
            }
        }
        let id = ctx.job_id.unwrap_or_else(Uuid::new_v4);
        let now = self.clock.now();
        let job = Job::new_queued(
            id,
            job_name,
            payload,
            ctx,
            max_retries.unwrap_or(self.default_max_retries),
            now,
        );
        match self.store.create_job(job.clone()).await {
            Ok(()) => Ok(job),
            Err(err) if err.code() == ErrorCode::JobCreateFailed => {
                // Lost a creation race against another submitter using
                // the same idempotency key: fall back to the winner's
                // row instead of propagating the conflict.
                self.store.get_job_by_id(id).await
            }
            Err(err) => Err(err),
        }
    }

    /// Delegate to the store's atomic claim.
    pub async fn claim_next(&self, worker_id: Uuid) -> CoreResult<Option<Job>> {
        self.store.claim_next_job_for_worker(worker_id).await
    }

    pub async fn get_job(&self, id: Uuid) -> CoreResult<Job> {
        self.store.get_job_by_id(id).await
    }

    /// Record a successful completion.
    pub async fn process_success(&self, job_id: Uuid, result: Vec<u8>) -> CoreResult<()> {
        let job = self.store.get_job_by_id(job_id).await?;
        let now = self.clock.now();
        let mut next = job.transition(JobStatus::Completed, now)?;
        next.result = Some(result);
        next.worker_id = None;
        self.store.update_job(next).await
    }

    /// Record a failure. Schedules a retry with exponential backoff if
    /// the error is retryable and the budget allows; otherwise
    /// transitions straight to `Failed`.
    pub async fn process_failure(&self, job_id: Uuid, error: JobError) -> CoreResult<()> {
        let job = self.store.get_job_by_id(job_id).await?;
        let now = self.clock.now();

        if error.retryable && job.retry_count < job.max_retries {
            // InProgress can only exit to Failed; a retry is modeled as
            // passing through Failed on the way back to Scheduled (the
            // job observably passes through Failed, matching the store's
            // CAS history) rather than a direct InProgress -> Scheduled
            // edge, which the state machine doesn't permit.
            let failed = job.transition(JobStatus::Failed, now)?;
            let mut next = failed.transition(JobStatus::Scheduled, now)?;
            next.completed_at = None;
            next.retry_count += 1;
            let delay_secs = self.retry_delay_base_seconds * 2f64.powi(next.retry_count as i32);
            next.retry_delay_until =
                Some(now + chrono::Duration::milliseconds((delay_secs * 1000.0) as i64));
            next.worker_id = None;
            next.error = Some(error);
            self.store.update_job(next).await
        } else {
            let mut next = job.transition(JobStatus::Failed, now)?;
            next.worker_id = None;
            next.error = Some(error);
            self.store.update_job(next).await
        }
    }

    /// Administrative cancellation. Not exposed via `submit`/`process*`
    /// per the design notes' resolved Open Question: `Canceled` is
    /// reachable, but only through a privileged path, not the ordinary
    /// job lifecycle API.
    pub async fn cancel(&self, job_id: Uuid) -> CoreResult<()> {
        let job = self.store.get_job_by_id(job_id).await?;
        let now = self.clock.now();
        let mut next = job.transition(JobStatus::Canceled, now)?;
        next.worker_id = None;
        self.store.update_job(next).await
    }
}
