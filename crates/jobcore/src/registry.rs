//! Handler registry and dispatch.
//!
//! A handler is polymorphic over `{request type, response type}` at
//! registration time, but the registry stores it behind a single
//! object-safe [`DynHandler`] so the consumer can dispatch by job name
//! alone, without ever naming the concrete `Req`/`Res` types. This is
//! the same type-erasure seam the workspace already reaches for
//! `erased-serde` to support: a generic front door, an erased trait
//! object behind it.

use crate::job::{HeaderValues, Job, JobError};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a handler needs about the request that is not the
/// deserialized body: the snapshotted headers, route params, and query
/// params captured at submission time.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub job_id: uuid::Uuid,
    pub headers: HashMap<String, HeaderValues>,
    pub route_params: HashMap<String, Value>,
    pub query_params: Vec<(String, HeaderValues)>,
}

impl ExecutionContext {
    pub fn from_job(job: &Job) -> Self {
        ExecutionContext {
            job_id: job.id,
            headers: job.headers.clone(),
            route_params: job.route_params.clone(),
            query_params: job.query_params.clone(),
        }
    }

    /// Case-insensitive header lookup, first value only.
    pub fn header(&self, name: &str) -> Option<&str> {
        let needle = name.to_ascii_lowercase();
        self.headers
            .get(&needle)
            .and_then(|vs| vs.first())
            .and_then(|v| v.as_deref())
    }
}

/// Outcome of a handler invocation, in the caller's vocabulary: either a
/// response value or a structured, possibly-non-retryable failure.
pub enum HandlerOutcome<Res> {
    Success(Res),
    Failure(JobError),
}

/// A handler that consumes a deserialized request plus context and
/// produces a response or a failure. Implemented by the two adapter
/// shapes below; user code generally implements this directly via
/// `async_trait` and registers it with [`HandlerRegistry::register`].
#[async_trait]
pub trait Handler<Req, Res>: Send + Sync
where
    Req: DeserializeOwned + Send + 'static,
    Res: Serialize + Send + 'static,
{
    async fn execute(
        &self,
        request: Req,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> HandlerOutcome<Res>;
}

/// The object-safe boundary the registry actually stores: raw payload
/// bytes in, raw result bytes or a structured error out. Deserialization
/// and serialization happen inside the adapter, not at this trait's
/// caller.
#[async_trait]
trait DynHandler: Send + Sync {
    async fn dispatch(
        &self,
        payload: &[u8],
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, JobError>;
}

/// Adapter for handlers that consume a deserialized request body.
struct WithBodyAdapter<Req, Res, H> {
    handler: H,
    _marker: std::marker::PhantomData<fn() -> (Req, Res)>,
}

#[async_trait]
impl<Req, Res, H> DynHandler for WithBodyAdapter<Req, Res, H>
where
    Req: DeserializeOwned + Send + 'static,
    Res: Serialize + Send + 'static,
    H: Handler<Req, Res> + 'static,
{
    async fn dispatch(
        &self,
        payload: &[u8],
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, JobError> {
        let request: Req = serde_json::from_slice(payload).map_err(|e| {
            JobError::non_retryable(
                "DESERIALIZATION_ERROR",
                format!("failed to deserialize job payload: {e}"),
            )
        })?;
        run_guarded(self.handler.execute(request, ctx, cancel)).await
    }
}

/// Adapter for handlers that take no request body (the `()` unit type
/// stands in for "no body" at the `Handler` boundary).
struct WithoutBodyAdapter<Res, H> {
    handler: H,
    _marker: std::marker::PhantomData<fn() -> Res>,
}

#[async_trait]
impl<Res, H> DynHandler for WithoutBodyAdapter<Res, H>
where
    Res: Serialize + Send + 'static,
    H: Handler<(), Res> + 'static,
{
    async fn dispatch(
        &self,
        _payload: &[u8],
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, JobError> {
        run_guarded(self.handler.execute((), ctx, cancel)).await
    }
}

/// Run a handler future, turning a panic into a `HandlerError` the same
/// way an unchecked exception would be caught at the dispatch boundary
/// in a managed runtime, and serializing a `Success` outcome to bytes.
async fn run_guarded<Res, Fut>(fut: Fut) -> Result<Vec<u8>, JobError>
where
    Res: Serialize,
    Fut: Future<Output = HandlerOutcome<Res>>,
{
    let outcome = match futures::FutureExt::catch_unwind(AssertUnwindSafe(fut)).await {
        Ok(outcome) => outcome,
        Err(panic) => {
            let message = panic_message(&panic);
            return Err(JobError::new("HANDLER_PANIC", message));
        }
    };
    match outcome {
        HandlerOutcome::Success(res) => serde_json::to_vec(&res)
            .map_err(|e| JobError::new("SERIALIZATION_ERROR", e.to_string())),
        HandlerOutcome::Failure(err) => Err(err),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Maps a job-name string to a type-erased handler. Read-only after
/// startup; registration happens once, at wiring time.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<HashMap<String, Arc<dyn DynHandler>>>,
}

/// Builder used at startup to pair concrete handlers with job names.
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Arc<dyn DynHandler>>,
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler that consumes a deserialized request body.
    pub fn with_body<Req, Res, H>(mut self, job_name: impl Into<String>, handler: H) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
        H: Handler<Req, Res> + 'static,
    {
        let adapter = WithBodyAdapter {
            handler,
            _marker: std::marker::PhantomData,
        };
        self.handlers.insert(job_name.into(), Arc::new(adapter));
        self
    }

    /// Register a handler that takes no request body.
    pub fn without_body<Res, H>(mut self, job_name: impl Into<String>, handler: H) -> Self
    where
        Res: Serialize + Send + 'static,
        H: Handler<(), Res> + 'static,
    {
        let adapter = WithoutBodyAdapter {
            handler,
            _marker: std::marker::PhantomData,
        };
        self.handlers.insert(job_name.into(), Arc::new(adapter));
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: Arc::new(self.handlers),
        }
    }
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::new()
    }

    /// Dispatch a job: look up its handler by name, deserialize (unless
    /// the handler is a without-body variant), execute, and return the
    /// serialized result or a structured failure.
    pub async fn dispatch(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, JobError> {
        if cancel.is_cancelled() {
            return Err(JobError::new("OPERATION_CANCELLED", "operation cancelled"));
        }
        let handler = self.handlers.get(&job.name).ok_or_else(|| {
            JobError::non_retryable(
                "HANDLER_NOT_FOUND",
                format!("no handler registered for job name '{}'", job.name),
            )
        })?;
        let ctx = ExecutionContext::from_job(job);
        handler.dispatch(&job.payload, &ctx, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::HttpContextSnapshot;

    struct Upper;

    #[async_trait]
    impl Handler<String, String> for Upper {
        async fn execute(
            &self,
            request: String,
            _ctx: &ExecutionContext,
            _cancel: &CancellationToken,
        ) -> HandlerOutcome<String> {
            HandlerOutcome::Success(request.to_uppercase())
        }
    }

    struct AlwaysPanics;

    #[async_trait]
    impl Handler<String, String> for AlwaysPanics {
        async fn execute(
            &self,
            _request: String,
            _ctx: &ExecutionContext,
            _cancel: &CancellationToken,
        ) -> HandlerOutcome<String> {
            panic!("boom");
        }
    }

    fn job_with_payload(name: &str, payload: &str) -> Job {
        Job::new_queued(
            uuid::Uuid::new_v4(),
            name,
            payload.as_bytes().to_vec(),
            HttpContextSnapshot::default(),
            0,
            chrono::Utc::now(),
        )
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let registry = HandlerRegistry::builder()
            .with_body("echo", Upper)
            .build();
        let job = job_with_payload("echo", "\"hello\"");
        let cancel = CancellationToken::new();
        let result = registry.dispatch(&job, &cancel).await.unwrap();
        let value: String = serde_json::from_slice(&result).unwrap();
        assert_eq!(value, "HELLO");
    }

    #[tokio::test]
    async fn missing_handler_is_non_retryable() {
        let registry = HandlerRegistry::builder().build();
        let job = job_with_payload("nope", "\"x\"");
        let cancel = CancellationToken::new();
        let err = registry.dispatch(&job, &cancel).await.unwrap_err();
        assert_eq!(err.code, "HANDLER_NOT_FOUND");
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn bad_payload_is_deserialization_error() {
        let registry = HandlerRegistry::builder()
            .with_body("echo", Upper)
            .build();
        let job = job_with_payload("echo", "not json");
        let cancel = CancellationToken::new();
        let err = registry.dispatch(&job, &cancel).await.unwrap_err();
        assert_eq!(err.code, "DESERIALIZATION_ERROR");
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_dispatch() {
        let registry = HandlerRegistry::builder()
            .with_body("echo", Upper)
            .build();
        let job = job_with_payload("echo", "\"hello\"");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = registry.dispatch(&job, &cancel).await.unwrap_err();
        assert_eq!(err.code, "OPERATION_CANCELLED");
    }

    #[tokio::test]
    async fn handler_panic_is_captured_as_handler_error() {
        let registry = HandlerRegistry::builder()
            .with_body("boom", AlwaysPanics)
            .build();
        let job = job_with_payload("boom", "\"x\"");
        let cancel = CancellationToken::new();
        let err = registry.dispatch(&job, &cancel).await.unwrap_err();
        assert_eq!(err.code, "HANDLER_PANIC");
    }
}
