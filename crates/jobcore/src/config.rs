//! Configuration the core recognises. Kept as a plain struct — the
//! teacher's own binaries take their dependencies as a plain struct
//! passed to `EngineBuilder::new(deps)` rather than pulling in a
//! separate config-framework crate, so loading here stays a thin
//! `from_env` constructor rather than a new dependency.

use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Distinguishes worker instances in a shared store.
    pub worker_id: Uuid,
    /// Upper bound on in-flight handler invocations per worker.
    pub maximum_concurrency: usize,
    /// Capacity of the producer -> consumer channel.
    pub maximum_queue_size: usize,
    /// Producer tick period.
    pub polling_interval: Duration,
    /// Max jobs claimed per producer tick.
    pub batch_size: usize,
    /// Per-handler wall-clock ceiling and staleness threshold for
    /// recovery.
    pub job_timeout: Duration,
    /// Value used when submission does not supply `max_retries`.
    pub default_max_retries: u32,
    /// Base in the exponential-backoff formula: `base * 2^retry_count`.
    pub retry_delay_base_seconds: f64,
    /// Master switch for the recovery loop.
    pub enable_distributed_job_recovery: bool,
    /// Recovery loop tick period.
    pub recovery_check_interval: Duration,
    /// Header name carrying a caller-supplied idempotency id.
    pub job_id_header_name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            worker_id: Uuid::new_v4(),
            maximum_concurrency: 8,
            maximum_queue_size: 64,
            polling_interval: Duration::from_secs(2),
            batch_size: 10,
            job_timeout: Duration::from_secs(15 * 60),
            default_max_retries: 3,
            retry_delay_base_seconds: 2.0,
            enable_distributed_job_recovery: false,
            recovery_check_interval: Duration::from_secs(300),
            job_id_header_name: "X-Job-Id".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }

    /// Load overrides from environment variables, falling back to
    /// [`WorkerConfig::default`] for anything unset or unparseable.
    /// `JOB_WORKER_ID`, `JOB_MAX_CONCURRENCY`, `JOB_MAX_QUEUE_SIZE`,
    /// `JOB_POLL_INTERVAL_MS`, `JOB_BATCH_SIZE`, `JOB_TIMEOUT_MINUTES`,
    /// `JOB_DEFAULT_MAX_RETRIES`, `JOB_RETRY_DELAY_BASE_SECONDS`,
    /// `JOB_ENABLE_RECOVERY`, `JOB_RECOVERY_CHECK_INTERVAL_SECONDS`,
    /// `JOB_ID_HEADER_NAME`.
    pub fn from_env() -> Self {
        let mut cfg = WorkerConfig::default();
        if let Ok(v) = std::env::var("JOB_WORKER_ID") {
            if let Ok(id) = v.parse() {
                cfg.worker_id = id;
            }
        }
        if let Some(v) = env_parse::<usize>("JOB_MAX_CONCURRENCY") {
            cfg.maximum_concurrency = v;
        }
        if let Some(v) = env_parse::<usize>("JOB_MAX_QUEUE_SIZE") {
            cfg.maximum_queue_size = v;
        }
        if let Some(v) = env_parse::<u64>("JOB_POLL_INTERVAL_MS") {
            cfg.polling_interval = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<usize>("JOB_BATCH_SIZE") {
            cfg.batch_size = v;
        }
        if let Some(v) = env_parse::<u64>("JOB_TIMEOUT_MINUTES") {
            cfg.job_timeout = Duration::from_secs(v * 60);
        }
        if let Some(v) = env_parse::<u32>("JOB_DEFAULT_MAX_RETRIES") {
            cfg.default_max_retries = v;
        }
        if let Some(v) = env_parse::<f64>("JOB_RETRY_DELAY_BASE_SECONDS") {
            cfg.retry_delay_base_seconds = v;
        }
        if let Some(v) = env_parse::<bool>("JOB_ENABLE_RECOVERY") {
            cfg.enable_distributed_job_recovery = v;
        }
        if let Some(v) = env_parse::<u64>("JOB_RECOVERY_CHECK_INTERVAL_SECONDS") {
            cfg.recovery_check_interval = Duration::from_secs(v);
        }
        if let Ok(v) = std::env::var("JOB_ID_HEADER_NAME") {
            cfg.job_id_header_name = v;
        }
        cfg
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[derive(Default)]
pub struct WorkerConfigBuilder {
    cfg: WorkerConfig,
}

macro_rules! setter {
    ($name:ident, $field:ident, $ty:ty) => {
        pub fn $name(mut self, value: $ty) -> Self {
            self.cfg.$field = value;
            self
        }
    };
}

impl WorkerConfigBuilder {
    setter!(worker_id, worker_id, Uuid);
    setter!(maximum_concurrency, maximum_concurrency, usize);
    setter!(maximum_queue_size, maximum_queue_size, usize);
    setter!(polling_interval, polling_interval, Duration);
    setter!(batch_size, batch_size, usize);
    setter!(job_timeout, job_timeout, Duration);
    setter!(default_max_retries, default_max_retries, u32);
    setter!(retry_delay_base_seconds, retry_delay_base_seconds, f64);
    setter!(
        enable_distributed_job_recovery,
        enable_distributed_job_recovery,
        bool
    );
    setter!(recovery_check_interval, recovery_check_interval, Duration);

    pub fn job_id_header_name(mut self, value: impl Into<String>) -> Self {
        self.cfg.job_id_header_name = value.into();
        self
    }

    pub fn build(self) -> WorkerConfig {
        self.cfg
    }
}
