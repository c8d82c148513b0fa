//! Minimal in-memory [`JobStore`] used only by this crate's own unit
//! tests. The real local backend lives in the `jobcore-memory` crate;
//! it can't be a dev-dependency here without a cycle, so the core's own
//! tests get a small, self-contained stand-in with the same
//! compare-and-set discipline.

use crate::error::{CoreError, CoreResult};
use crate::job::{Job, JobStatus};
use crate::store::{ClaimedJob, JobStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
    recoverable: bool,
}

impl InMemoryStore {
    /// A store that advertises and implements `recoverStuckJobs`, for
    /// exercising the recovery loop and property 7 without pulling in
    /// the `jobcore-postgres` backend.
    pub fn recoverable() -> Self {
        InMemoryStore {
            jobs: Mutex::new(HashMap::new()),
            recoverable: true,
        }
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn create_job(&self, job: Job) -> CoreResult<()> {
        let mut guard = self.jobs.lock().unwrap();
        if guard.contains_key(&job.id) {
            return Err(CoreError::new(
                crate::error::ErrorCode::JobCreateFailed,
                format!("job {} already exists", job.id),
            ));
        }
        guard.insert(job.id, job);
        Ok(())
    }

    async fn get_job_by_id(&self, id: Uuid) -> CoreResult<Job> {
        self.jobs
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::job_not_found(id))
    }

    async fn update_job(&self, job: Job) -> CoreResult<()> {
        let mut guard = self.jobs.lock().unwrap();
        match guard.get(&job.id) {
            None => Err(CoreError::job_not_found(job.id)),
            Some(current) if current.version != job.version => {
                Err(CoreError::update_conflict(job.id))
            }
            Some(current) => {
                let mut stored = job;
                stored.version = current.version + 1;
                guard.insert(stored.id, stored);
                Ok(())
            }
        }
    }

    async fn claim_next_job_for_worker(&self, worker_id: Uuid) -> CoreResult<Option<ClaimedJob>> {
        let mut guard = self.jobs.lock().unwrap();
        let now = Utc::now();
        let candidate_id = guard
            .values()
            .filter(|j| j.is_eligible(now))
            .min_by_key(|j| j.available_at())
            .map(|j| j.id);
        let Some(id) = candidate_id else {
            return Ok(None);
        };
        let job = guard.get(&id).unwrap().clone();
        let mut claimed = job.claim(worker_id, now)?;
        claimed.version = job.version + 1;
        guard.insert(id, claimed.clone());
        Ok(Some(claimed))
    }

    fn supports_job_recovery(&self) -> bool {
        self.recoverable
    }

    async fn recover_stuck_jobs(
        &self,
        threshold: DateTime<Utc>,
        max_retries_override: Option<u32>,
    ) -> CoreResult<u64> {
        if !self.recoverable {
            return Err(CoreError::programming_error(
                "InMemoryStore does not support recovery",
            ));
        }
        let mut guard = self.jobs.lock().unwrap();
        let now = Utc::now();
        let stuck_ids: Vec<Uuid> = guard
            .values()
            .filter(|j| {
                j.status == JobStatus::InProgress && j.started_at.map(|s| s < threshold).unwrap_or(false)
            })
            .map(|j| j.id)
            .collect();

        let mut count = 0;
        for id in stuck_ids {
            let job = guard.get(&id).unwrap().clone();
            let max_retries = max_retries_override.unwrap_or(job.max_retries);
            // A stuck job is first walked through Failed (InProgress ->
            // Failed is the only legal exit from InProgress) and from
            // there either back to Queued for another attempt or left
            // Failed once the retry budget is spent.
            let mut recovered = if job.retry_count < max_retries {
                let failed = job.transition(JobStatus::Failed, now)?;
                let mut requeued = failed.transition(JobStatus::Queued, now)?;
                requeued.retry_count += 1;
                requeued.worker_id = None;
                requeued.completed_at = None;
                requeued
            } else {
                let mut next = job.transition(JobStatus::Failed, now)?;
                next.worker_id = None;
                next.error = Some(crate::job::JobError::new(
                    "RECOVERY_EXHAUSTED",
                    format!("job {id} exceeded max retries while stuck in progress"),
                ));
                next
            };
            recovered.version = job.version + 1;
            guard.insert(id, recovered);
            count += 1;
        }
        Ok(count)
    }
}
