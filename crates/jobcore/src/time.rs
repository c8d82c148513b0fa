//! Injected time source.
//!
//! The job entity does not own its own clock (per design note in the
//! state machine docs); retry scheduling and recovery thresholds read
//! `now()` from whatever is wired in, so tests can advance time
//! deterministically instead of sleeping.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A source of the current instant, injected everywhere the core needs
/// `now()` instead of calling `Utc::now()` directly.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub type SharedClock = Arc<dyn TimeSource>;

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
