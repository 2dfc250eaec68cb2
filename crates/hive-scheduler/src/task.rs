//! One pool member: waits for a routed job, runs its worker, reports back.
//!
//! A task is either parked in the scheduler's idle queue (as a [`TaskHandle`])
//! or executing the single job in its private queue; it re-enqueues itself
//! only after the job's output has been handled. Workers run on their own
//! tokio task, so a panicking worker fails its job and nothing else.

use crate::stats::Counters;
use crate::Registry;
use hive_queue::CountingQueue;
use hive_types::{Job, SchedulerEvent, TaskId, WorkerError, WorkerOutput};
use std::any::Any;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// State every task shares with the scheduler.
#[derive(Clone)]
pub(crate) struct TaskContext {
    pub jobs: Arc<CountingQueue<Job>>,
    pub idle: Arc<CountingQueue<TaskHandle>>,
    pub registry: Arc<Registry>,
    pub events: broadcast::Sender<SchedulerEvent>,
    pub counters: Arc<Counters>,
    pub verbose: bool,
}

impl TaskContext {
    pub fn emit(&self, event: SchedulerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Scheduler-side reference to an idle task.
pub struct TaskHandle {
    id: TaskId,
    jobs: Arc<CountingQueue<Job>>,
    stop: CancellationToken,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Route a job into the task's private queue. Gives the job back if the
    /// task cannot take it.
    pub(crate) fn assign(self, job: Job) -> Result<(), Job> {
        self.jobs.try_push(job).map_err(|full| full.item)
    }

    /// Ask the task to retire. Takes effect at its next idle boundary.
    pub(crate) fn stop(self) {
        self.stop.cancel();
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish()
    }
}

pub(crate) struct Task {
    id: TaskId,
    jobs: Arc<CountingQueue<Job>>,
    stop: CancellationToken,
    ctx: TaskContext,
}

impl Task {
    /// The task's stop token is a child of `shutdown`, so a global stop
    /// reaches every task.
    pub fn new(ctx: TaskContext, shutdown: &CancellationToken) -> Self {
        Self {
            id: TaskId::new(),
            jobs: Arc::new(CountingQueue::new(1)),
            stop: shutdown.child_token(),
            ctx,
        }
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            id: self.id,
            jobs: Arc::clone(&self.jobs),
            stop: self.stop.clone(),
        }
    }

    /// Runs until the stop token fires. The spawner counts the task in
    /// `live_tasks`; the count is released here on exit.
    pub async fn run(self) {
        lifecycle!(self.ctx.verbose, task_id = %self.id, "task started");
        self.ctx.emit(SchedulerEvent::TaskStarted { task_id: self.id });

        loop {
            let job = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                job = self.jobs.pop() => job,
            };
            self.execute(job).await;

            if self.stop.is_cancelled() {
                break;
            }
            self.ctx.idle.push(self.handle()).await;
            tracing::trace!(task_id = %self.id, "task back in idle queue");
        }

        self.retire().await;
    }

    async fn execute(&self, job: Job) {
        let job_id = job.id();
        let (name, context) = job.into_parts();
        tracing::trace!(task_id = %self.id, job = %name, "executing job");

        let worker = match self.ctx.registry.lookup(&name) {
            Ok(worker) => worker,
            Err(e) => {
                self.report_failure(job_id, &name, e.to_string());
                return;
            }
        };

        // Run on its own tokio task so a panic surfaces as a JoinError.
        let run = tokio::spawn(async move { worker.run(context).await });
        let output = match run.await {
            Ok(output) => output,
            Err(e) if e.is_panic() => {
                WorkerOutput::failed(WorkerError::Panicked(panic_message(&*e.into_panic())))
            }
            Err(e) => WorkerOutput::failed(WorkerError::msg(e.to_string())),
        };

        if output.is_empty() {
            tracing::debug!(task_id = %self.id, job = %name, "no output from worker");
        }

        let spawned = output.jobs.len();
        if spawned > 0 {
            tracing::debug!(task_id = %self.id, job = %name, spawned, "submitting follow-up jobs");
        }
        for follow_up in output.jobs {
            self.submit_follow_up(follow_up).await;
        }

        match output.error {
            Some(e) => self.report_failure(job_id, &name, e.to_string()),
            None => {
                Counters::bump(&self.ctx.counters.completed);
                self.ctx.emit(SchedulerEvent::JobCompleted {
                    job_id,
                    job: name,
                    task_id: self.id,
                    spawned,
                });
            }
        }
    }

    /// Queue a job returned by a worker. Once the task is stopping nothing
    /// will pop the shared queue again, so the job is dropped instead.
    async fn submit_follow_up(&self, job: Job) {
        if self.stop.is_cancelled() {
            self.report_dropped(job, "task stopped");
            return;
        }
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => self.report_dropped(job, "task stopped"),
            _ = self.ctx.jobs.push(job.clone()) => {
                // Pushed while the scheduler was tearing down: nothing will pop it.
                if self.stop.is_cancelled() {
                    for queued in self.ctx.jobs.drain().await {
                        self.report_dropped(queued, "scheduler stopped");
                    }
                }
            }
        }
    }

    fn report_dropped(&self, job: Job, reason: &str) {
        tracing::warn!(task_id = %self.id, job = %job, reason, "job dropped");
        Counters::bump(&self.ctx.counters.dropped);
        self.ctx.emit(SchedulerEvent::JobDropped {
            job_id: job.id(),
            job: job.name().to_string(),
            reason: reason.to_string(),
        });
    }

    fn report_failure(&self, job_id: Uuid, name: &str, error: String) {
        tracing::warn!(task_id = %self.id, job = %name, job_id = %job_id, error = %error, "job failed");
        Counters::bump(&self.ctx.counters.failed);
        self.ctx.emit(SchedulerEvent::JobFailed {
            job_id,
            job: name.to_string(),
            task_id: self.id,
            error,
        });
    }

    async fn retire(self) {
        for job in self.jobs.drain().await {
            self.report_dropped(job, "task stopped");
        }
        self.ctx.counters.live_tasks.fetch_sub(1, Ordering::AcqRel);
        lifecycle!(self.ctx.verbose, task_id = %self.id, "task stopped");
        self.ctx.emit(SchedulerEvent::TaskStopped { task_id: self.id });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
