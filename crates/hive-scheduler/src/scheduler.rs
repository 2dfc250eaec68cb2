//! Scheduler: shared job queue, idle-task queue and the autoscaling control loop.

use crate::stats::Counters;
use crate::task::{Task, TaskContext, TaskHandle};
use crate::{
    RegistryBuilder, RegistryError, SchedulerConfig, SchedulerError, SchedulerStats, Submitter,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hive_queue::{CountingQueue, PopFuture};
use hive_types::{FnWorker, Job, SchedulerEvent, Worker, WorkerOutput};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

struct Inner {
    config: SchedulerConfig,
    jobs: Arc<CountingQueue<Job>>,
    idle: Arc<CountingQueue<TaskHandle>>,
    /// `Some` until `start` freezes it.
    setup: Mutex<Option<RegistryBuilder>>,
    events: broadcast::Sender<SchedulerEvent>,
    counters: Arc<Counters>,
    pool_size: AtomicUsize,
    /// Whether the control loop currently holds an idle task waiting for a job.
    holding: AtomicBool,
    started: AtomicBool,
    started_at: OnceLock<DateTime<Utc>>,
    shutdown: CancellationToken,
    loop_exited: CancellationToken,
}

/// Handle to a worker pool. Clones share the same pool.
///
/// Register workers, call [`start`](Self::start) (usually on its own tokio
/// task), submit jobs from anywhere, and [`stop`](Self::stop) once.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        let inner = Inner {
            jobs: Arc::new(CountingQueue::new(config.job_queue_capacity)),
            idle: Arc::new(CountingQueue::new(config.max_tasks)),
            setup: Mutex::new(Some(RegistryBuilder::new())),
            events,
            counters: Arc::new(Counters::default()),
            pool_size: AtomicUsize::new(0),
            holding: AtomicBool::new(false),
            started: AtomicBool::new(false),
            started_at: OnceLock::new(),
            shutdown: CancellationToken::new(),
            loop_exited: CancellationToken::new(),
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Scheduler configured from `HIVE_*` environment variables.
    pub fn from_env() -> Result<Self, SchedulerError> {
        Self::new(SchedulerConfig::from_env()?)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Register a worker under `name`. Only valid before `start`.
    pub fn register<W>(&self, name: impl Into<String>, worker: W) -> Result<(), SchedulerError>
    where
        W: Worker + 'static,
    {
        let name = name.into();
        let mut setup = self.inner.setup.lock().unwrap_or_else(|e| e.into_inner());
        let builder = setup
            .as_mut()
            .ok_or_else(|| RegistryError::Frozen(name.clone()))?;
        builder.register(name.clone(), worker)?;
        lifecycle!(self.inner.config.verbose, worker = %name, "worker registered");
        Ok(())
    }

    /// Register an async closure as a worker.
    pub fn register_fn<F, Fut, O>(&self, name: impl Into<String>, f: F) -> Result<(), SchedulerError>
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = O> + Send + 'static,
        O: Into<WorkerOutput> + 'static,
    {
        self.register(name, FnWorker::new(f))
    }

    /// Push a job onto the shared queue, waiting while it is full.
    pub async fn submit(&self, job: Job) -> Result<(), SchedulerError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SchedulerError::Stopped);
        }
        tracing::trace!(job = %job, "job submitted");
        tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => return Err(SchedulerError::Stopped),
            _ = self.inner.jobs.push(job) => {}
        }
        // A push that completed while `stop` was tearing down would otherwise
        // sit in the queue with nothing left to pop it.
        if self.inner.shutdown.is_cancelled() {
            self.drop_queued_jobs().await;
        }
        Ok(())
    }

    /// Push a job without waiting; fails with `QueueFull` (carrying the job) when full.
    pub fn try_submit(&self, job: Job) -> Result<(), SchedulerError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SchedulerError::Stopped);
        }
        self.inner
            .jobs
            .try_push(job)
            .map_err(|full| SchedulerError::QueueFull(Box::new(full.item)))
    }

    /// Subscribe to scheduler events. Only events sent after this call are seen.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
            && !self.inner.shutdown.is_cancelled()
            && !self.inner.loop_exited.is_cancelled()
    }

    pub fn stats(&self) -> SchedulerStats {
        let c = &self.inner.counters;
        SchedulerStats {
            pool_size: self.inner.pool_size.load(Ordering::Acquire),
            live_tasks: c.live_tasks.load(Ordering::Acquire),
            pending_jobs: self.inner.jobs.len(),
            idle_tasks: self.inner.idle.len()
                + usize::from(self.inner.holding.load(Ordering::Acquire)),
            dispatched: c.dispatched.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            started_at: self.inner.started_at.get().copied(),
        }
    }

    /// Freeze the registry, spawn the initial tasks and run the control loop
    /// until [`stop`](Self::stop) is called.
    ///
    /// Returns `Err(Scale)` if a task cannot be spawned; the scheduler is torn
    /// down in that case.
    pub async fn start(&self) -> Result<(), SchedulerError> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::AlreadyStarted);
        }
        // Lets `stop` stop waiting even if this future is dropped mid-loop.
        let _exited = self.inner.loop_exited.clone().drop_guard();
        if self.inner.shutdown.is_cancelled() {
            return Err(SchedulerError::Stopped);
        }

        let registry = {
            let mut setup = self.inner.setup.lock().unwrap_or_else(|e| e.into_inner());
            Arc::new(setup.take().unwrap_or_default().build())
        };
        let _ = self.inner.started_at.set(Utc::now());
        lifecycle!(
            self.inner.config.verbose,
            workers = ?registry.names(),
            interval_ms = self.inner.config.scale_interval_ms,
            "scheduler starting"
        );

        let ctx = TaskContext {
            jobs: Arc::clone(&self.inner.jobs),
            idle: Arc::clone(&self.inner.idle),
            registry,
            events: self.inner.events.clone(),
            counters: Arc::clone(&self.inner.counters),
            verbose: self.inner.config.verbose,
        };

        let result = self.control_loop(&ctx).await;
        if let Err(ref e) = result {
            tracing::error!(error = %e, "scheduler stopping after scale failure");
            self.inner.shutdown.cancel();
            self.teardown().await;
        }
        lifecycle!(self.inner.config.verbose, "scheduler stopped");
        result
    }

    /// Signal the control loop and every task to stop, then flush both queues.
    ///
    /// Jobs still queued are dropped (and reported). A worker already running
    /// finishes its job; its task exits at the next idle boundary. Safe to
    /// call more than once.
    pub async fn stop(&self) {
        lifecycle!(self.inner.config.verbose, "scheduler stop requested");
        self.inner.shutdown.cancel();
        if self.inner.started.load(Ordering::Acquire) {
            self.inner.loop_exited.cancelled().await;
        }
        self.teardown().await;
    }

    async fn teardown(&self) {
        self.drop_queued_jobs().await;
        // Tasks behind these handles already saw the shutdown token.
        let idle = self.inner.idle.flush().await;
        self.inner.holding.store(false, Ordering::Release);
        tracing::debug!(idle_handles = idle, "idle queue flushed");
    }

    /// Report every job still in the shared queue as dropped.
    async fn drop_queued_jobs(&self) {
        for job in self.inner.jobs.drain().await {
            tracing::warn!(job = %job, "scheduler stopped before dispatch; job dropped");
            Counters::bump(&self.inner.counters.dropped);
            let _ = self.inner.events.send(SchedulerEvent::JobDropped {
                job_id: job.id(),
                job: job.name().to_string(),
                reason: "scheduler stopped".to_string(),
            });
        }
    }

    /// Spawns the initial tasks, then routes jobs and rebalances until shutdown.
    ///
    /// The scale ticker has a fixed period and fires whether or not a task
    /// became idle since the last tick; a tick is a scaling decision, not a
    /// timeout on idle arrivals.
    async fn control_loop(&self, ctx: &TaskContext) -> Result<(), SchedulerError> {
        self.scale_up(ctx, self.inner.config.initial_tasks)?;

        let period = self.inner.config.scale_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // At most one idle task is claimed at a time; while claimed, the loop
        // waits for a job instead of another task.
        let mut claimed: Option<TaskHandle> = None;
        let mut idle_pop: Option<PopFuture<TaskHandle>> = None;

        loop {
            if claimed.is_none() && idle_pop.is_none() {
                idle_pop = Some(self.inner.idle.pop_future());
            }

            tokio::select! {
                biased;
                _ = self.inner.shutdown.cancelled() => break,
                // Ready at most once per period, so it cannot starve the arms below.
                _ = ticker.tick() => {
                    self.rebalance(ctx, &mut claimed)?;
                }
                popped = next_idle(&mut idle_pop), if claimed.is_none() => {
                    idle_pop = None;
                    match popped {
                        Some(handle) => {
                            tracing::trace!(task_id = %handle.id(), "idle task claimed");
                            claimed = Some(handle);
                        }
                        None => tracing::warn!("idle-task wait ended without a task"),
                    }
                }
                job = self.inner.jobs.pop(), if claimed.is_some() => {
                    if let Some(handle) = claimed.take() {
                        self.dispatch(handle, job);
                    }
                }
            }
            self.inner.holding.store(claimed.is_some(), Ordering::Release);
        }

        // These tasks already saw the shutdown token. A handle the pop future
        // had taken goes back to the idle queue, which teardown flushes.
        drop(claimed);
        drop(idle_pop);
        Ok(())
    }

    fn dispatch(&self, handle: TaskHandle, job: Job) {
        let task_id = handle.id();
        let (job_id, name) = (job.id(), job.name().to_string());
        match handle.assign(job) {
            Ok(()) => {
                Counters::bump(&self.inner.counters.dispatched);
                lifecycle!(self.inner.config.verbose, task_id = %task_id, job = %name, "job dispatched");
                let _ = self.inner.events.send(SchedulerEvent::JobDispatched {
                    job_id,
                    job: name,
                    task_id,
                });
            }
            Err(job) => {
                // Idle tasks always have an empty private queue.
                tracing::warn!(task_id = %task_id, job = %job, "task refused job; dropped");
                Counters::bump(&self.inner.counters.dropped);
                let _ = self.inner.events.send(SchedulerEvent::JobDropped {
                    job_id,
                    job: name,
                    reason: "task refused job".to_string(),
                });
            }
        }
    }

    /// One scaling decision per tick: grow by one while jobs outnumber idle
    /// tasks, shrink by one once the backlog is empty.
    fn rebalance(
        &self,
        ctx: &TaskContext,
        claimed: &mut Option<TaskHandle>,
    ) -> Result<(), SchedulerError> {
        let cfg = &self.inner.config;
        let pending = self.inner.jobs.len();
        // A handle already taken by `idle_pop` but not yet claimed is counted
        // nowhere, so `idle` can be one low for a tick; the extra task that may
        // cause is retired again once the backlog is gone.
        let idle = self.inner.idle.len() + usize::from(claimed.is_some());
        let pool = self.inner.pool_size.load(Ordering::Acquire);
        tracing::debug!(pending, idle, pool, "scale interval elapsed");

        if pending > idle {
            if pool < cfg.max_tasks {
                self.scale_up(ctx, 1)?;
            } else {
                tracing::debug!(pool, max = cfg.max_tasks, "backlog but pool at max_tasks");
            }
        } else if pending == 0 && pool > cfg.min_tasks {
            self.scale_down(claimed, 1);
        }
        Ok(())
    }

    fn scale_up(&self, ctx: &TaskContext, n: usize) -> Result<(), SchedulerError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SchedulerError::Scale(e.to_string()))?;
        let from = self.inner.pool_size.load(Ordering::Acquire);

        for _ in 0..n {
            let task = Task::new(ctx.clone(), &self.inner.shutdown);
            self.inner
                .idle
                .try_push(task.handle())
                .map_err(|full| SchedulerError::Scale(full.to_string()))?;
            self.inner.counters.live_tasks.fetch_add(1, Ordering::AcqRel);
            runtime.spawn(task.run());
            self.inner.pool_size.fetch_add(1, Ordering::AcqRel);
        }

        let to = self.inner.pool_size.load(Ordering::Acquire);
        lifecycle!(self.inner.config.verbose, from, to, "scaled up");
        let _ = self.inner.events.send(SchedulerEvent::ScaledUp { from, to });
        Ok(())
    }

    /// Retire up to `n` idle tasks, never going below `min_tasks`. Busy tasks
    /// are never interrupted; if nothing is idle, nothing happens.
    fn scale_down(&self, claimed: &mut Option<TaskHandle>, n: usize) {
        let from = self.inner.pool_size.load(Ordering::Acquire);
        let floor = self.inner.config.min_tasks;
        let mut retired = 0;

        while retired < n && from - retired > floor {
            let Some(handle) = claimed.take().or_else(|| self.inner.idle.try_pop()) else {
                break;
            };
            tracing::debug!(task_id = %handle.id(), "retiring idle task");
            handle.stop();
            retired += 1;
        }

        if retired == 0 {
            tracing::debug!(pool = from, "no idle task to retire");
            return;
        }
        self.inner.pool_size.fetch_sub(retired, Ordering::AcqRel);
        let to = from - retired;
        lifecycle!(self.inner.config.verbose, from, to, "scaled down");
        let _ = self.inner.events.send(SchedulerEvent::ScaledDown { from, to });
    }
}

async fn next_idle(slot: &mut Option<PopFuture<TaskHandle>>) -> Option<TaskHandle> {
    match slot {
        Some(pop) => pop.await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl Submitter for Scheduler {
    async fn submit(&self, job: Job) -> Result<(), SchedulerError> {
        Scheduler::submit(self, job).await
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}
