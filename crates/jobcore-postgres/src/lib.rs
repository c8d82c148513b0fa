//! PostgreSQL implementation of the `jobcore` job store.
//!
//! A production-ready, shared backend for multi-instance deployments:
//! every instance talks to the same `jobs` table, claims are atomic
//! across instances via `FOR UPDATE SKIP LOCKED`, and stuck jobs left
//! behind by a crashed instance are reclaimed by whichever instance's
//! recovery loop notices first.
//!
//! # Features
//!
//! - Atomic claim via `FOR UPDATE SKIP LOCKED`, no external lock needed
//! - Compare-and-set updates keyed on `version`
//! - Stuck-job recovery for instances that died mid-job
//! - Operational helpers: queue statistics, terminal-job cleanup
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE jobs (
//!     id UUID PRIMARY KEY,
//!     name TEXT NOT NULL,
//!     status TEXT NOT NULL,
//!     payload BYTEA NOT NULL,
//!     headers JSONB NOT NULL,
//!     route_params JSONB NOT NULL,
//!     query_params JSONB NOT NULL,
//!     result BYTEA,
//!     error JSONB,
//!     retry_count INTEGER NOT NULL DEFAULT 0,
//!     max_retries INTEGER NOT NULL DEFAULT 3,
//!     retry_delay_until TIMESTAMPTZ,
//!     worker_id UUID,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     started_at TIMESTAMPTZ,
//!     completed_at TIMESTAMPTZ,
//!     last_updated_at TIMESTAMPTZ NOT NULL,
//!     version BIGINT NOT NULL DEFAULT 0
//! );
//!
//! CREATE INDEX idx_jobs_claimable ON jobs (status, retry_delay_until, created_at)
//!     WHERE worker_id IS NULL;
//! CREATE INDEX idx_jobs_stuck ON jobs (started_at)
//!     WHERE status = 'in_progress';
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use jobcore_postgres::PgJobStore;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/mydb").await?;
//! let store = PgJobStore::new(pool);
//! let worker = jobcore::WorkerBuilder::new(Arc::new(store), registry, config).build();
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobcore::{ClaimedJob, CoreError, CoreResult, ErrorCode, Job, JobError, JobStatus, JobStore};
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use std::collections::HashMap;
use uuid::Uuid;

fn status_to_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Queued => "queued",
        JobStatus::Scheduled => "scheduled",
        JobStatus::InProgress => "in_progress",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
        JobStatus::Canceled => "canceled",
    }
}

fn status_from_str(s: &str) -> CoreResult<JobStatus> {
    match s {
        "queued" => Ok(JobStatus::Queued),
        "scheduled" => Ok(JobStatus::Scheduled),
        "in_progress" => Ok(JobStatus::InProgress),
        "completed" => Ok(JobStatus::Completed),
        "failed" => Ok(JobStatus::Failed),
        "canceled" => Ok(JobStatus::Canceled),
        other => Err(CoreError::store_error(format!("unrecognized job status {other:?} in storage"))),
    }
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> CoreResult<Job> {
    let headers: serde_json::Value = row.try_get("headers").map_err(sqlx_err)?;
    let route_params: serde_json::Value = row.try_get("route_params").map_err(sqlx_err)?;
    let query_params: serde_json::Value = row.try_get("query_params").map_err(sqlx_err)?;
    let error: Option<serde_json::Value> = row.try_get("error").map_err(sqlx_err)?;

    Ok(Job {
        id: row.try_get("id").map_err(sqlx_err)?,
        name: row.try_get("name").map_err(sqlx_err)?,
        status: status_from_str(row.try_get::<String, _>("status").map_err(sqlx_err)?.as_str())?,
        payload: row.try_get("payload").map_err(sqlx_err)?,
        headers: serde_json::from_value(headers).map_err(deser_err)?,
        route_params: serde_json::from_value(route_params).map_err(deser_err)?,
        query_params: serde_json::from_value(query_params).map_err(deser_err)?,
        result: row.try_get("result").map_err(sqlx_err)?,
        error: error
            .map(serde_json::from_value::<JobError>)
            .transpose()
            .map_err(deser_err)?,
        retry_count: row.try_get::<i32, _>("retry_count").map_err(sqlx_err)? as u32,
        max_retries: row.try_get::<i32, _>("max_retries").map_err(sqlx_err)? as u32,
        retry_delay_until: row.try_get("retry_delay_until").map_err(sqlx_err)?,
        worker_id: row.try_get("worker_id").map_err(sqlx_err)?,
        created_at: row.try_get("created_at").map_err(sqlx_err)?,
        started_at: row.try_get("started_at").map_err(sqlx_err)?,
        completed_at: row.try_get("completed_at").map_err(sqlx_err)?,
        last_updated_at: row.try_get("last_updated_at").map_err(sqlx_err)?,
        version: row.try_get::<i64, _>("version").map_err(sqlx_err)? as u64,
    })
}

fn sqlx_err(err: sqlx::Error) -> CoreError {
    warn!(error = %err, "postgres store error");
    CoreError::store_error(err.to_string())
}

fn deser_err(err: serde_json::Error) -> CoreError {
    CoreError::deserialization(err.to_string())
}

/// PostgreSQL-backed job store, shared by every worker instance.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        PgJobStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, job: Job) -> CoreResult<()> {
        let headers = serde_json::to_value(&job.headers).map_err(deser_err)?;
        let route_params = serde_json::to_value(&job.route_params).map_err(deser_err)?;
        let query_params = serde_json::to_value(&job.query_params).map_err(deser_err)?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs (
                id, name, status, payload, headers, route_params, query_params,
                retry_count, max_retries, created_at, last_updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 0)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(job.id)
        .bind(&job.name)
        .bind(status_to_str(job.status))
        .bind(&job.payload)
        .bind(headers)
        .bind(route_params)
        .bind(query_params)
        .bind(job.retry_count as i32)
        .bind(job.max_retries as i32)
        .bind(job.created_at)
        .bind(job.last_updated_at)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::new(
                ErrorCode::JobCreateFailed,
                format!("job {} already exists", job.id),
            ));
        }
        Ok(())
    }

    async fn get_job_by_id(&self, id: Uuid) -> CoreResult<Job> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?
            .ok_or_else(|| CoreError::job_not_found(id))?;
        row_to_job(&row)
    }

    async fn update_job(&self, job: Job) -> CoreResult<()> {
        let error = job.error.as_ref().map(serde_json::to_value).transpose().map_err(deser_err)?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $1,
                result = $2,
                error = $3,
                retry_count = $4,
                retry_delay_until = $5,
                worker_id = $6,
                started_at = $7,
                completed_at = $8,
                last_updated_at = $9,
                version = version + 1
            WHERE id = $10 AND version = $11
            "#,
        )
        .bind(status_to_str(job.status))
        .bind(&job.result)
        .bind(error)
        .bind(job.retry_count as i32)
        .bind(job.retry_delay_until)
        .bind(job.worker_id)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.last_updated_at)
        .bind(job.id)
        .bind(job.version as i64)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        // Distinguish "no such job" from "lost the compare-and-set race"
        // now that we know the blind update affected nothing.
        match self.get_job_by_id(job.id).await {
            Ok(_) => Err(CoreError::update_conflict(job.id)),
            Err(err) => Err(err),
        }
    }

    /// Atomically claims the earliest eligible job with a `FOR UPDATE
    /// SKIP LOCKED` CTE, mirroring the teacher's `claim_ready` query
    /// shape but against our status/eligibility model instead of a
    /// priority queue.
    async fn claim_next_job_for_worker(&self, worker_id: Uuid) -> CoreResult<Option<ClaimedJob>> {
        let row = sqlx::query(
            r#"
            WITH claimable AS (
                SELECT id
                FROM jobs
                WHERE worker_id IS NULL
                  AND (
                        status = 'queued'
                        OR (status = 'scheduled' AND (retry_delay_until IS NULL OR retry_delay_until <= NOW()))
                      )
                ORDER BY COALESCE(retry_delay_until, created_at) ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'in_progress',
                worker_id = $1,
                retry_delay_until = NULL,
                started_at = NOW(),
                last_updated_at = NOW(),
                version = version + 1
            WHERE id IN (SELECT id FROM claimable)
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;

        let claimed = row.map(|r| row_to_job(&r)).transpose()?;
        if let Some(job) = &claimed {
            info!(job_id = %job.id, worker_id = %worker_id, "claimed job");
        }
        Ok(claimed)
    }

    fn supports_job_recovery(&self) -> bool {
        true
    }

    /// Reclaims every job stuck `InProgress` past `threshold` in one
    /// atomic statement: requeue (retry budget remaining) or fail
    /// (`RECOVERY_EXHAUSTED`), matching the teacher's `reclaim_expired`
    /// but folding the budget check into the same `UPDATE`.
    async fn recover_stuck_jobs(
        &self,
        threshold: DateTime<Utc>,
        max_retries_override: Option<u32>,
    ) -> CoreResult<u64> {
        let exhausted_error = serde_json::to_value(JobError::non_retryable(
            "RECOVERY_EXHAUSTED",
            "job exceeded max retries while stuck in progress",
        ))
        .map_err(deser_err)?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = CASE WHEN retry_count < COALESCE($2, max_retries) THEN 'queued' ELSE 'failed' END,
                retry_count = CASE WHEN retry_count < COALESCE($2, max_retries) THEN retry_count + 1 ELSE retry_count END,
                worker_id = NULL,
                error = CASE WHEN retry_count < COALESCE($2, max_retries) THEN error ELSE $3 END,
                completed_at = CASE WHEN retry_count < COALESCE($2, max_retries) THEN completed_at ELSE NOW() END,
                last_updated_at = NOW(),
                version = version + 1
            WHERE status = 'in_progress' AND started_at < $1
            "#,
        )
        .bind(threshold)
        .bind(max_retries_override.map(|v| v as i32))
        .bind(exhausted_error)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;

        let recovered = result.rows_affected();
        if recovered > 0 {
            info!(count = recovered, "recovered stuck jobs");
        }
        Ok(recovered)
    }
}

/// Operational helpers outside the `JobStore` contract: not needed by
/// the manager/pipeline, but useful for an ops dashboard or a cron-style
/// retention job. Grounded in the teacher's own `stats`/`cleanup_succeeded`.
impl PgJobStore {
    pub async fn stats(&self) -> CoreResult<QueueStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'queued') AS queued,
                COUNT(*) FILTER (WHERE status = 'scheduled') AS scheduled,
                COUNT(*) FILTER (WHERE status = 'in_progress') AS in_progress,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status = 'canceled') AS canceled
            FROM jobs
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(sqlx_err)?;

        Ok(QueueStats {
            queued: row.try_get("queued").map_err(sqlx_err)?,
            scheduled: row.try_get("scheduled").map_err(sqlx_err)?,
            in_progress: row.try_get("in_progress").map_err(sqlx_err)?,
            completed: row.try_get("completed").map_err(sqlx_err)?,
            failed: row.try_get("failed").map_err(sqlx_err)?,
            canceled: row.try_get("canceled").map_err(sqlx_err)?,
        })
    }

    /// Deletes terminal jobs (`completed`/`failed`/`canceled`) last
    /// updated before `older_than`. Returns the number of rows removed.
    pub async fn cleanup_terminal(&self, older_than: DateTime<Utc>) -> CoreResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('completed', 'failed', 'canceled')
              AND last_updated_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;

        Ok(result.rows_affected())
    }
}

/// Job queue statistics, by status.
#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    pub queued: i64,
    pub scheduled: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
    pub canceled: i64,
}
