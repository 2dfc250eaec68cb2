//! Pool sizing: growth under backlog, shrink when idle, min/max bounds.

use hive_scheduler::{Job, Scheduler, SchedulerConfig, SchedulerError, SchedulerEvent};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;

const INTERVAL: Duration = Duration::from_millis(25);

fn spawn_start(s: &Scheduler) -> JoinHandle<Result<(), SchedulerError>> {
    let s = s.clone();
    tokio::spawn(async move { s.start().await })
}

async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let res = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(res.is_ok(), "timed out waiting for {what}");
}

/// Registers a "block" worker that holds its task until a permit is added.
fn gated(scheduler: &Scheduler) -> Arc<Semaphore> {
    let gate = Arc::new(Semaphore::new(0));
    let g = Arc::clone(&gate);
    scheduler
        .register_fn("block", move |_ctx: serde_json::Value| {
            let g = Arc::clone(&g);
            async move {
                let _permit = g.acquire().await;
            }
        })
        .unwrap();
    gate
}

fn scale_steps(rx: &mut broadcast::Receiver<SchedulerEvent>) -> (Vec<(usize, usize)>, Vec<(usize, usize)>) {
    let (mut up, mut down) = (Vec::new(), Vec::new());
    while let Ok(ev) = rx.try_recv() {
        match ev {
            SchedulerEvent::ScaledUp { from, to } => up.push((from, to)),
            SchedulerEvent::ScaledDown { from, to } => down.push((from, to)),
            _ => {}
        }
    }
    (up, down)
}

#[tokio::test]
async fn backlog_grows_pool_then_idle_shrinks_it_one_step_per_tick() {
    let cfg = SchedulerConfig::default()
        .with_scale_interval(INTERVAL)
        .with_pool(1, 8);
    let scheduler = Scheduler::new(cfg).unwrap();
    let gate = gated(&scheduler);
    let mut events = scheduler.subscribe();
    let runner = spawn_start(&scheduler);

    for i in 0..5 {
        scheduler.submit(Job::new("block", json!(i))).await.unwrap();
    }

    // One task per blocked job, and no more once the backlog is gone.
    wait_until("pool of 5", || scheduler.stats().pool_size == 5).await;
    tokio::time::sleep(INTERVAL * 4).await;
    let stats = scheduler.stats();
    assert_eq!(stats.pool_size, 5);
    assert_eq!(stats.pending_jobs, 0);
    assert_eq!(stats.dispatched, 5);

    gate.add_permits(5);
    wait_until("pool back at floor", || {
        let s = scheduler.stats();
        s.pool_size == 1 && s.live_tasks == 1
    })
    .await;
    assert_eq!(scheduler.stats().completed, 5);

    let (up, down) = scale_steps(&mut events);
    // First entry is the initial task from `start`.
    assert_eq!(up.first(), Some(&(0, 1)));
    assert!(up.iter().all(|(from, to)| to - from == 1));
    assert_eq!(up.last().map(|s| s.1), Some(5));
    assert!(down.iter().all(|(from, to)| from - to == 1));
    assert_eq!(down.len(), 4);

    scheduler.stop().await;
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn growth_stops_at_max_tasks() {
    let cfg = SchedulerConfig::default()
        .with_scale_interval(INTERVAL)
        .with_pool(1, 2);
    let scheduler = Scheduler::new(cfg).unwrap();
    let gate = gated(&scheduler);
    let runner = spawn_start(&scheduler);

    for i in 0..5 {
        scheduler.submit(Job::new("block", json!(i))).await.unwrap();
    }
    wait_until("pool of 2", || scheduler.stats().pool_size == 2).await;
    tokio::time::sleep(INTERVAL * 4).await;

    let stats = scheduler.stats();
    assert_eq!(stats.pool_size, 2);
    assert_eq!(stats.pending_jobs, 3);

    gate.add_permits(5);
    wait_until("all done", || scheduler.stats().completed == 5).await;

    scheduler.stop().await;
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn zero_floor_retires_everything_and_regrows_on_demand() {
    let cfg = SchedulerConfig::default()
        .with_scale_interval(INTERVAL)
        .with_pool(0, 2);
    let scheduler = Scheduler::new(cfg).unwrap();
    let gate = gated(&scheduler);
    gate.add_permits(100);
    let runner = spawn_start(&scheduler);

    wait_until("empty pool", || {
        let s = scheduler.stats();
        s.pool_size == 0 && s.live_tasks == 0
    })
    .await;

    scheduler.submit(Job::new("block", json!(1))).await.unwrap();
    wait_until("job on regrown pool", || scheduler.stats().completed == 1).await;

    scheduler.stop().await;
    runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn stop_retires_every_task() {
    let cfg = SchedulerConfig::default()
        .with_scale_interval(INTERVAL)
        .with_pool(3, 3);
    let scheduler = Scheduler::new(cfg).unwrap();
    gated(&scheduler);
    let runner = spawn_start(&scheduler);

    wait_until("three live tasks", || scheduler.stats().live_tasks == 3).await;
    scheduler.stop().await;
    runner.await.unwrap().unwrap();
    wait_until("all tasks gone", || scheduler.stats().live_tasks == 0).await;
}
