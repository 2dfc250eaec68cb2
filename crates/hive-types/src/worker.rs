//! Worker trait and the output envelope it returns.

use crate::{Job, WorkerError};
use async_trait::async_trait;
use std::future::Future;

/// What a worker hands back: follow-up jobs plus an optional failure.
///
/// Both may be present; spawned jobs are submitted even when the error is set.
#[derive(Debug, Default)]
pub struct WorkerOutput {
    pub jobs: Vec<Job>,
    pub error: Option<WorkerError>,
}

impl WorkerOutput {
    /// No follow-up work and no error.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn spawn(jobs: Vec<Job>) -> Self {
        Self { jobs, error: None }
    }

    pub fn failed(error: impl Into<WorkerError>) -> Self {
        Self {
            jobs: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Add one follow-up job.
    pub fn with_job(mut self, job: Job) -> Self {
        self.jobs.push(job);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty() && self.error.is_none()
    }
}

impl From<()> for WorkerOutput {
    fn from(_: ()) -> Self {
        Self::none()
    }
}

impl From<Option<WorkerOutput>> for WorkerOutput {
    fn from(value: Option<WorkerOutput>) -> Self {
        value.unwrap_or_default()
    }
}

impl From<Vec<Job>> for WorkerOutput {
    fn from(value: Vec<Job>) -> Self {
        Self::spawn(value)
    }
}

impl<E> From<Result<Vec<Job>, E>> for WorkerOutput
where
    E: Into<WorkerError>,
{
    fn from(value: Result<Vec<Job>, E>) -> Self {
        match value {
            Ok(jobs) => Self::spawn(jobs),
            Err(e) => Self::failed(e),
        }
    }
}

/// Handler registered under a job name.
///
/// Called once per job on the executing task. Implementations must finish in
/// bounded time: a worker that never returns pins its task forever.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn run(&self, context: serde_json::Value) -> WorkerOutput;
}

/// Adapts an async closure into a [`Worker`].
pub struct FnWorker<F> {
    f: F,
}

impl<F> FnWorker<F> {
    pub fn new<Fut, O>(f: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync,
        Fut: Future<Output = O> + Send + 'static,
        O: Into<WorkerOutput> + 'static,
    {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut, O> Worker for FnWorker<F>
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = O> + Send + 'static,
    O: Into<WorkerOutput> + 'static,
{
    async fn run(&self, context: serde_json::Value) -> WorkerOutput {
        (self.f)(context).await.into()
    }
}
