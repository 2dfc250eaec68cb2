//! Pool counters and the snapshot exposed to callers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Shared between the control loop and every task.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub dispatched: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub dropped: AtomicU64,
    /// Tasks whose run loop has not exited yet.
    pub live_tasks: AtomicUsize,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    /// Tasks the control loop currently accounts for (spawned minus retired).
    pub pool_size: usize,
    /// Tasks still running their loop; lags `pool_size` briefly after a scale-down.
    pub live_tasks: usize,
    pub pending_jobs: usize,
    pub idle_tasks: usize,
    pub dispatched: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub started_at: Option<DateTime<Utc>>,
}
