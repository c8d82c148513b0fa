//! The recovery loop: periodically asks the store to reclaim jobs whose
//! `started_at` predates a staleness threshold. Only runs when the
//! store advertises [`JobStore::supports_job_recovery`]; safe for
//! multiple instances to run concurrently because each job's recovery
//! action is atomic at the store.

use crate::config::WorkerConfig;
use crate::store::JobStore;
use crate::time::SharedClock;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct RecoveryLoop {
    store: Arc<dyn JobStore>,
    config: WorkerConfig,
    clock: SharedClock,
}

impl RecoveryLoop {
    pub fn new(store: Arc<dyn JobStore>, config: WorkerConfig, clock: SharedClock) -> Self {
        RecoveryLoop { store, config, clock }
    }

    pub async fn run(self, cancel: CancellationToken) {
        if !self.config.enable_distributed_job_recovery {
            return;
        }
        if !self.store.supports_job_recovery() {
            warn!("recovery enabled in config but store does not support it; recovery loop exiting");
            return;
        }

        let mut ticker = tokio::time::interval(self.config.recovery_check_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.sweep().await,
            }
        }
    }

    async fn sweep(&self) {
        let threshold = self.clock.now()
            - chrono::Duration::from_std(self.config.job_timeout).unwrap_or_default();
        match self
            .store
            .recover_stuck_jobs(threshold, Some(self.config.default_max_retries))
            .await
        {
            Ok(0) => {}
            Ok(count) => info!(count, "recovered stuck jobs"),
            Err(err) => warn!(error = %err, "recovery sweep failed; will retry next tick"),
        }
    }
}
