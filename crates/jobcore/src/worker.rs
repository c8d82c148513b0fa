//! Top-level wiring: pairs a [`JobManager`], a [`HandlerRegistry`], and
//! a [`WorkerConfig`] into a running producer + consumer + (optional)
//! recovery loop, mirroring the builder-then-`start()` shape the
//! workspace's own `EngineBuilder` uses.

use crate::config::WorkerConfig;
use crate::manager::JobManager;
use crate::pipeline::{Consumer, Producer};
use crate::recovery::RecoveryLoop;
use crate::store::JobStore;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::registry::HandlerRegistry;

pub struct WorkerBuilder {
    store: Arc<dyn JobStore>,
    registry: HandlerRegistry,
    config: WorkerConfig,
    clock: crate::time::SharedClock,
}

impl WorkerBuilder {
    pub fn new(store: Arc<dyn JobStore>, registry: HandlerRegistry, config: WorkerConfig) -> Self {
        WorkerBuilder {
            store,
            registry,
            config,
            clock: crate::time::system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: crate::time::SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Worker {
        let manager = JobManager::new(
            self.store.clone(),
            self.clock.clone(),
            self.config.default_max_retries,
            self.config.retry_delay_base_seconds,
        );
        Worker {
            manager,
            registry: self.registry,
            store: self.store,
            config: self.config,
            clock: self.clock,
        }
    }
}

/// An assembled worker instance, not yet running. Call [`Worker::start`]
/// to spawn the producer, consumer, and (if enabled) recovery loop.
pub struct Worker {
    manager: JobManager,
    registry: HandlerRegistry,
    store: Arc<dyn JobStore>,
    config: WorkerConfig,
    clock: crate::time::SharedClock,
}

impl Worker {
    pub fn manager(&self) -> &JobManager {
        &self.manager
    }

    pub fn start(self) -> WorkerHandle {
        let cancel = CancellationToken::new();
        let (tx, rx) = tokio::sync::mpsc::channel(self.config.maximum_queue_size);

        let producer = Producer::new(self.manager.clone(), self.config.clone());
        let consumer = Consumer::new(self.manager.clone(), self.registry.clone(), self.config.clone());
        let recovery = RecoveryLoop::new(self.store.clone(), self.config.clone(), self.clock.clone());

        let producer_handle = tokio::spawn(producer.run(tx, cancel.clone()));
        let consumer_handle = tokio::spawn(consumer.run(rx, cancel.clone()));
        let recovery_handle = tokio::spawn(recovery.run(cancel.clone()));

        WorkerHandle {
            manager: self.manager,
            cancel,
            producer_handle,
            consumer_handle,
            recovery_handle,
        }
    }
}

/// A handle to a running worker. `manager()` is exposed so an HTTP
/// binding layer can submit work and read job status against the same
/// store the loops are draining.
pub struct WorkerHandle {
    manager: JobManager,
    cancel: CancellationToken,
    producer_handle: JoinHandle<()>,
    consumer_handle: JoinHandle<()>,
    recovery_handle: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn manager(&self) -> &JobManager {
        &self.manager
    }

    /// Trip the top-level cancellation signal and wait for all three
    /// loops to exit. In-flight handlers observe cancellation at their
    /// next suspension point.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.producer_handle.await;
        let _ = self.consumer_handle.await;
        let _ = self.recovery_handle.await;
    }
}
