//! Producer / consumer pipeline: the producer periodically claims
//! runnable jobs and hands them to the consumer over a bounded channel;
//! the consumer dispatches to handlers under a concurrency ceiling and
//! reports outcomes back to the manager.

use crate::config::WorkerConfig;
use crate::job::{Job, JobError};
use crate::manager::JobManager;
use crate::registry::HandlerRegistry;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Periodically claims runnable jobs from the store and enqueues them
/// on the producer -> consumer channel. One instance per worker.
pub struct Producer {
    manager: JobManager,
    config: WorkerConfig,
}

impl Producer {
    pub fn new(manager: JobManager, config: WorkerConfig) -> Self {
        Producer { manager, config }
    }

    /// Run until `cancel` is tripped, then close the channel (dropping
    /// `tx`) so the consumer can drain and exit.
    pub async fn run(self, tx: mpsc::Sender<Job>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.polling_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(worker_id = %self.config.worker_id, "producer shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.claim_batch(&tx, &cancel).await;
                }
            }
        }
    }

    async fn claim_batch(&self, tx: &mpsc::Sender<Job>, cancel: &CancellationToken) {
        for _ in 0..self.config.batch_size {
            if cancel.is_cancelled() {
                return;
            }
            match self.manager.claim_next(self.config.worker_id).await {
                Ok(Some(job)) => {
                    debug!(job_id = %job.id, job_name = %job.name, "claimed job");
                    // A full channel applies backpressure to further
                    // claims within this tick: send blocks rather than
                    // dropping or over-claiming ahead of capacity.
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        send_result = tx.send(job) => {
                            if send_result.is_err() {
                                return;
                            }
                        }
                    }
                }
                Ok(None) => return,
                Err(err) => {
                    // Storage errors during claim: log, skip this tick,
                    // try again next tick.
                    warn!(error = %err, "claim failed, will retry next tick");
                    return;
                }
            }
        }
    }
}

/// Reads claimed jobs from the channel and dispatches them to handlers
/// under a concurrency ceiling, reporting success/failure back to the
/// manager.
pub struct Consumer {
    manager: JobManager,
    registry: HandlerRegistry,
    config: WorkerConfig,
}

impl Consumer {
    pub fn new(manager: JobManager, registry: HandlerRegistry, config: WorkerConfig) -> Self {
        Consumer {
            manager,
            registry,
            config,
        }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<Job>, cancel: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.config.maximum_concurrency));
        let mut inflight = tokio::task::JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break;
                }
                maybe_job = rx.recv() => {
                    match maybe_job {
                        Some(job) => {
                            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                            let manager = self.manager.clone();
                            let registry = self.registry.clone();
                            let timeout = self.config.job_timeout;
                            let task_cancel = cancel.child_token();
                            inflight.spawn(async move {
                                let _permit = permit;
                                run_one(job, manager, registry, timeout, task_cancel).await;
                            });
                        }
                        None => break, // channel closed: producer shut down
                    }
                }
            }
        }

        // Drain in-flight handlers within the shutdown grace window;
        // their jobs become retryable failures via `run_one`'s own
        // cancellation handling once `cancel` is tripped.
        while inflight.join_next().await.is_some() {}
    }
}

async fn run_one(
    job: Job,
    manager: JobManager,
    registry: HandlerRegistry,
    timeout: std::time::Duration,
    cancel: CancellationToken,
) {
    let job_id = job.id;
    let dispatch = registry.dispatch(&job, &cancel);

    let outcome = tokio::select! {
        result = tokio::time::timeout(timeout, dispatch) => result,
        _ = cancel.cancelled() => Ok(Err(JobError::new("OPERATION_CANCELLED", "operation cancelled"))),
    };

    let result = match outcome {
        Ok(dispatch_result) => dispatch_result,
        Err(_elapsed) => Err(JobError::new(
            "JOB_TIMEOUT",
            format!("handler exceeded {:?} timeout", timeout),
        )),
    };

    match result {
        Ok(bytes) => {
            if let Err(err) = manager.process_success(job_id, bytes).await {
                error!(job_id = %job_id, error = %err, "failed to record success; job effect is lost for this attempt");
            }
        }
        Err(job_error) => {
            if let Err(err) = manager.process_failure(job_id, job_error).await {
                error!(job_id = %job_id, error = %err, "failed to record failure; recovery loop will re-surface this job");
            }
        }
    }
}
