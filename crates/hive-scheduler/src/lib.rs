//! Autoscaling in-process job scheduler.
//!
//! Workers are registered by name before [`Scheduler::start`]; jobs submitted
//! afterwards (by callers or by workers returning follow-up jobs) are routed in
//! FIFO order to idle tasks. The pool grows by one task per scale interval while
//! jobs outnumber idle tasks and shrinks by one while the backlog is empty.

/// Pool lifecycle logging: `info` when the scheduler is verbose, `debug` otherwise.
macro_rules! lifecycle {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!($($arg)+)
        } else {
            tracing::debug!($($arg)+)
        }
    };
}

mod config;
mod registry;
mod scheduler;
mod stats;
mod task;
mod trait_;

pub use config::{ConfigError, SchedulerConfig};
pub use hive_types::{FnWorker, Job, SchedulerEvent, TaskId, Worker, WorkerError, WorkerOutput};
pub use registry::{Registry, RegistryBuilder, RegistryError};
pub use scheduler::Scheduler;
pub use stats::SchedulerStats;
pub use trait_::{SchedulerError, Submitter};
