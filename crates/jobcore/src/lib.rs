//! # jobcore
//!
//! A durable, distributed, retry-aware background job queue core:
//! single-claim semantics, exponential backoff, scheduled retries, and
//! stuck-job recovery across instances, behind one storage contract
//! with two interchangeable backends (an in-process store for
//! single-node use, a shared store for multi-instance use).
//!
//! ## Core Concepts
//!
//! - [`Job`] = the unit of work: identity, payload, lifecycle status,
//!   retry bookkeeping, and the HTTP context snapshot a handler needs.
//! - [`JobStore`] = the persistence contract: CRUD, atomic claim,
//!   optional stuck-job recovery. Two implementations live in sibling
//!   crates: `jobcore-memory` (single node) and `jobcore-postgres`
//!   (shared, multi-instance).
//! - [`JobManager`] = submission (idempotent on a caller-supplied id),
//!   success/failure processing, retry scheduling.
//! - [`HandlerRegistry`] = maps a job-name string to a type-erased
//!   handler; registration pairs a concrete `Handler<Req, Res>` with a
//!   name at startup.
//! - [`Producer`]/[`Consumer`] = the in-process pipeline: the producer
//!   periodically claims runnable jobs and hands them to the consumer
//!   over a bounded channel; the consumer dispatches to handlers under
//!   a concurrency ceiling and reports outcomes back to the manager.
//! - [`RecoveryLoop`] = periodically reclaims jobs stuck `InProgress`
//!   past a timeout.
//!
//! ## Architecture
//!
//! ```text
//! HTTP layer (external)
//!     │ submit()
//!     ▼
//! JobManager ──createJob──▶ JobStore
//!                               │
//!                  Producer.run │ claimNextJobForWorker (atomic)
//!                               ▼
//!                        bounded channel
//!                               │
//!                               ▼
//!                        Consumer.run ──dispatch──▶ HandlerRegistry
//!                               │
//!                  processSuccess/processFailure
//!                               ▼
//!                            JobStore
//!                               ▲
//!                   RecoveryLoop.sweep (independent, periodic)
//! ```
//!
//! ## Key Invariants
//!
//! 1. `worker_id` is set iff `status == InProgress`.
//! 2. Only the transitions in [`job::JobStatus`]'s state machine are
//!    permitted; any other attempted transition fails loudly instead of
//!    silently coercing.
//! 3. A job in flight is owned by the worker holding `worker_id`; no
//!    other worker may mutate it except via recovery, which first clears
//!    ownership.
//! 4. Updates use compare-and-set against the store's snapshot to
//!    detect lost updates (`JOB_UPDATE_CONFLICT`).
//!
//! ## What This Is Not
//!
//! `jobcore` is **not**:
//! - An exactly-once delivery system (at-least-once, idempotent handler
//!   contract expected)
//! - A priority queue or fair-share scheduler across tenants
//! - A result store (results live only as long as the backing
//!   `JobStore` keeps the row)

pub mod config;
pub mod error;
pub mod job;
pub mod manager;
pub mod pipeline;
pub mod recovery;
pub mod registry;
pub mod store;
pub mod time;
pub mod worker;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod scenario_tests;

pub use config::WorkerConfig;
pub use error::{CoreError, CoreResult, ErrorCode};
pub use job::{HttpContextSnapshot, Job, JobError, JobStatus};
pub use manager::JobManager;
pub use pipeline::{Consumer, Producer};
pub use recovery::RecoveryLoop;
pub use registry::{
    ExecutionContext, Handler, HandlerOutcome, HandlerRegistry, HandlerRegistryBuilder,
};
pub use store::{ClaimedJob, JobStore};
pub use time::{SharedClock, SystemClock, TimeSource};
pub use worker::{Worker, WorkerBuilder, WorkerHandle};

pub use async_trait::async_trait;
