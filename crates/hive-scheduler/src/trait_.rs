//! Submitter trait: enqueue jobs into a running pool.

use crate::{ConfigError, RegistryError};
use async_trait::async_trait;
use hive_types::Job;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler already started")]
    AlreadyStarted,
    #[error("scheduler stopped")]
    Stopped,
    #[error("job queue is full ({0})")]
    QueueFull(Box<Job>),
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("cannot scale up: {0}")]
    Scale(String),
}

/// Anything that accepts jobs for later dispatch.
///
/// Workers that need to enqueue work out-of-band (instead of returning it in
/// their output) hold an `Arc<dyn Submitter>`.
#[async_trait]
pub trait Submitter: Send + Sync {
    /// Push a job onto the shared job queue; waits while the queue is full.
    async fn submit(&self, job: Job) -> Result<(), SchedulerError>;
}
