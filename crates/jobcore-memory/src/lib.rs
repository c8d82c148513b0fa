//! `LocalJobStore`: a single-process [`JobStore`] backed by
//! `dashmap::DashMap`, for single-node deployments and for
//! `jobcore-testing`'s harness. No cross-instance visibility, so it
//! does not support stuck-job recovery — a crashed single process takes
//! every in-flight job down with it, and there is no second instance to
//! reclaim them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use jobcore::{ClaimedJob, CoreError, CoreResult, Job, JobStore, SharedClock};
use tracing::debug;
use uuid::Uuid;

pub struct LocalJobStore {
    jobs: DashMap<Uuid, Job>,
    clock: SharedClock,
}

impl Default for LocalJobStore {
    fn default() -> Self {
        LocalJobStore {
            jobs: DashMap::new(),
            clock: jobcore::time::system_clock(),
        }
    }
}

impl LocalJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an injected clock instead of the real wall clock, so claim
    /// eligibility and recovery thresholds can be driven deterministically
    /// in tests (see `jobcore_testing::ManualClock`).
    pub fn with_clock(clock: SharedClock) -> Self {
        LocalJobStore {
            jobs: DashMap::new(),
            clock,
        }
    }
}

#[async_trait]
impl JobStore for LocalJobStore {
    async fn create_job(&self, job: Job) -> CoreResult<()> {
        match self.jobs.entry(job.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(CoreError::new(
                jobcore::ErrorCode::JobCreateFailed,
                format!("job {} already exists", job.id),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(job);
                Ok(())
            }
        }
    }

    async fn get_job_by_id(&self, id: Uuid) -> CoreResult<Job> {
        self.jobs
            .get(&id)
            .map(|entry| entry.clone())
            .ok_or_else(|| CoreError::job_not_found(id))
    }

    async fn update_job(&self, job: Job) -> CoreResult<()> {
        let mut entry = self
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| CoreError::job_not_found(job.id))?;
        if entry.version != job.version {
            return Err(CoreError::update_conflict(job.id));
        }
        let mut stored = job;
        stored.version = entry.version + 1;
        *entry = stored;
        Ok(())
    }

    /// Scans every job for eligibility, picks the earliest by
    /// `available_at`, and claims it with a compare-and-set on
    /// `version`; on conflict (another worker won the race on the same
    /// entry between scan and claim) it retries the scan rather than
    /// surfacing the conflict to the caller. A busy single process keeps
    /// this scan small enough in practice that a secondary ordering
    /// index isn't worth the bookkeeping.
    async fn claim_next_job_for_worker(&self, worker_id: Uuid) -> CoreResult<Option<ClaimedJob>> {
        let now = self.clock.now();
        loop {
            let candidate_id = self
                .jobs
                .iter()
                .filter(|entry| entry.is_eligible(now))
                .min_by_key(|entry| entry.available_at())
                .map(|entry| entry.id);

            let Some(id) = candidate_id else {
                return Ok(None);
            };

            let mut entry = match self.jobs.get_mut(&id) {
                Some(e) => e,
                None => continue,
            };
            if !entry.is_eligible(now) {
                // Lost the race to another worker since the scan; try again.
                debug!(job_id = %id, "lost claim race, rescanning");
                continue;
            }
            let mut claimed = entry.claim(worker_id, now)?;
            claimed.version = entry.version + 1;
            *entry = claimed.clone();
            return Ok(Some(claimed));
        }
    }

    fn supports_job_recovery(&self) -> bool {
        false
    }

    async fn recover_stuck_jobs(
        &self,
        _threshold: DateTime<Utc>,
        _max_retries_override: Option<u32>,
    ) -> CoreResult<u64> {
        Err(CoreError::programming_error(
            "LocalJobStore does not support distributed job recovery",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobcore::HttpContextSnapshot;

    fn job(id: Uuid, now: DateTime<Utc>) -> Job {
        Job::new_queued(id, "echo", b"hi".to_vec(), HttpContextSnapshot::default(), 3, now)
    }

    #[tokio::test]
    async fn create_then_claim_transitions_to_in_progress() {
        let store = LocalJobStore::new();
        let id = Uuid::new_v4();
        store.create_job(job(id, Utc::now())).await.unwrap();

        let claimed = store
            .claim_next_job_for_worker(Uuid::new_v4())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.status, jobcore::JobStatus::InProgress);

        let again = store.claim_next_job_for_worker(Uuid::new_v4()).await.unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn update_job_detects_stale_version() {
        let store = LocalJobStore::new();
        let id = Uuid::new_v4();
        let original = job(id, Utc::now());
        store.create_job(original.clone()).await.unwrap();

        let stale = original.clone();
        store.update_job(original).await.unwrap();
        let err = store.update_job(stale).await.unwrap_err();
        assert_eq!(err.code(), jobcore::ErrorCode::JobUpdateConflict);
    }

    #[tokio::test]
    async fn recovery_is_unsupported() {
        let store = LocalJobStore::new();
        assert!(!store.supports_job_recovery());
        let err = store.recover_stuck_jobs(Utc::now(), None).await.unwrap_err();
        assert_eq!(err.code(), jobcore::ErrorCode::ProgrammingError);
    }

    #[tokio::test]
    async fn with_clock_drives_claim_eligibility() {
        use std::sync::{Arc, Mutex};

        struct Manual(Mutex<DateTime<Utc>>);
        impl jobcore::TimeSource for Manual {
            fn now(&self) -> DateTime<Utc> {
                *self.0.lock().unwrap()
            }
        }

        let epoch = DateTime::from_timestamp(0, 0).unwrap();
        let clock = Arc::new(Manual(Mutex::new(epoch)));
        let store = LocalJobStore::with_clock(clock.clone());

        let id = Uuid::new_v4();
        let mut scheduled = job(id, epoch);
        scheduled.status = jobcore::JobStatus::Scheduled;
        scheduled.retry_delay_until = Some(epoch + chrono::Duration::seconds(10));
        store.create_job(scheduled).await.unwrap();

        // Not due yet at the injected clock's current time.
        assert!(store
            .claim_next_job_for_worker(Uuid::new_v4())
            .await
            .unwrap()
            .is_none());

        *clock.0.lock().unwrap() = epoch + chrono::Duration::seconds(10);
        let claimed = store
            .claim_next_job_for_worker(Uuid::new_v4())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, id);
    }
}
