//! The job entity and its state machine.
//!
//! A [`Job`] is a value: every mutation is expressed as "build a new Job
//! with these fields overridden," which is what lets a store implement
//! compare-and-set against the previous snapshot instead of mutating in
//! place. The entity itself performs no IO and owns no clock; `now` is
//! always passed in.

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle state of a job. See the transition table on [`Job::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Scheduled,
    InProgress,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    /// Whether `self -> target` is a legal edge, per the state machine.
    /// Same-state transitions are always legal (they only refresh
    /// `lastUpdatedAt`).
    fn allows(self, target: JobStatus) -> bool {
        use JobStatus::*;
        if self == target {
            return true;
        }
        matches!(
            (self, target),
            (Queued, InProgress)
                | (Queued, Scheduled)
                | (Queued, Completed)
                | (Queued, Failed)
                | (Queued, Canceled)
                | (Scheduled, Queued)
                | (Scheduled, Canceled)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Canceled)
                | (Failed, Queued)
                | (Failed, Scheduled)
                | (Failed, Canceled)
                | (Completed, Canceled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled)
    }
}

/// Structured failure record, recorded verbatim on the job by the
/// manager — it never second-guesses what a handler or the recovery
/// loop reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
    pub cause: Option<Box<JobError>>,
    /// Whether this failure should consume a retry attempt. Defaults to
    /// `true`; a handler may report a failure as non-retryable (e.g. a
    /// permanent validation error) to skip straight to `Failed` instead
    /// of waiting out the retry budget. Not a normative spec field — an
    /// extension grounded in the Postgres store's `FailureKind`.
    #[serde(default = "default_retryable")]
    pub retryable: bool,
}

fn default_retryable() -> bool {
    true
}

impl JobError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            cause: None,
            retryable: true,
        }
    }

    pub fn non_retryable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            ..Self::new(code, message)
        }
    }
}

impl From<&CoreError> for JobError {
    fn from(err: &CoreError) -> Self {
        JobError {
            code: err.code().as_str().to_string(),
            message: err.message.clone(),
            cause: err.cause.as_deref().map(|c| Box::new(JobError::from(c))),
            retryable: true,
        }
    }
}

/// A header value sequence, preserving multi-value headers and allowing
/// null entries the way HTTP header maps do.
pub type HeaderValues = Vec<Option<String>>;

/// Snapshot of the HTTP request that triggered submission: headers,
/// route-match variables, and ordered (possibly multi-valued) query
/// parameters. Captured once at submission time and carried with the job
/// for handler use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpContextSnapshot {
    /// Keys are case-insensitive; callers are expected to have
    /// lower-cased them before constructing the snapshot.
    pub headers: HashMap<String, HeaderValues>,
    pub route_params: HashMap<String, serde_json::Value>,
    pub query_params: Vec<(String, HeaderValues)>,
    /// Caller-supplied idempotency key, if the `jobIdHeaderName` header
    /// was present.
    pub job_id: Option<Uuid>,
}

/// The central entity: identity, lifecycle, payload, retry bookkeeping,
/// and the HTTP context snapshot a handler needs to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub status: JobStatus,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, HeaderValues>,
    pub route_params: HashMap<String, serde_json::Value>,
    pub query_params: Vec<(String, HeaderValues)>,
    pub result: Option<Vec<u8>>,
    pub error: Option<JobError>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub retry_delay_until: Option<DateTime<Utc>>,
    pub worker_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
    /// Compare-and-set token, bumped on every accepted mutation. Not a
    /// normative spec field; stores use it as their CAS key instead of
    /// diffing the whole record.
    pub version: u64,
}

impl Job {
    /// Construct a freshly submitted job: `Queued`, `createdAt = now`.
    pub fn new_queued(
        id: Uuid,
        name: impl Into<String>,
        payload: Vec<u8>,
        ctx: HttpContextSnapshot,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Job {
            id,
            name: name.into(),
            status: JobStatus::Queued,
            payload,
            headers: ctx.headers,
            route_params: ctx.route_params,
            query_params: ctx.query_params,
            result: None,
            error: None,
            retry_count: 0,
            max_retries,
            retry_delay_until: None,
            worker_id: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            last_updated_at: now,
            version: 0,
        }
    }

    /// Validate and apply a status transition, returning a new `Job`.
    /// Any edge not in the state machine fails loudly with
    /// [`CoreError::programming_error`] rather than silently clamping to
    /// some nearby state (invariant 6).
    pub fn transition(&self, target: JobStatus, now: DateTime<Utc>) -> Result<Job, CoreError> {
        if !self.status.allows(target) {
            return Err(CoreError::programming_error(format!(
                "illegal job transition {:?} -> {:?} for job {}",
                self.status, target, self.id
            )));
        }
        let is_new_entry = self.status != target;
        let mut next = self.clone();
        next.status = target;
        next.last_updated_at = now;
        // Same-state "transitions" only refresh `lastUpdatedAt`; a
        // genuine new entry into InProgress/a terminal state stamps the
        // corresponding timestamp, overwriting any prior value so that
        // e.g. a re-claimed retry's `startedAt` reflects the *current*
        // attempt (the recovery threshold depends on this).
        if is_new_entry && target == JobStatus::InProgress {
            next.started_at = Some(now);
        }
        if is_new_entry && target.is_terminal() {
            next.completed_at = Some(now);
        }
        Ok(next)
    }

    /// Whether this job is eligible to be claimed right now (no worker
    /// held, and either Queued or due-Scheduled).
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        if self.worker_id.is_some() {
            return false;
        }
        match self.status {
            JobStatus::Queued => true,
            JobStatus::Scheduled => self.retry_delay_until.map(|t| t <= now).unwrap_or(true),
            _ => false,
        }
    }

    /// The timestamp used for claim ordering: `createdAt` while Queued,
    /// `retryDelayUntil` (or `createdAt` as a fallback) while Scheduled.
    pub fn available_at(&self) -> DateTime<Utc> {
        match self.status {
            JobStatus::Scheduled => self.retry_delay_until.unwrap_or(self.created_at),
            _ => self.created_at,
        }
    }

    /// Claim this job for `worker_id`, transitioning Queued/Scheduled ->
    /// InProgress. Callers (stores) are responsible for the
    /// compare-and-set against the previously-read snapshot; this method
    /// only encodes the value transformation.
    pub fn claim(&self, worker_id: Uuid, now: DateTime<Utc>) -> Result<Job, CoreError> {
        let mut next = self.transition(JobStatus::InProgress, now)?;
        next.worker_id = Some(worker_id);
        next.retry_delay_until = None;
        Ok(next)
    }
}
