//! Scheduler tunables, loaded from defaults or `HIVE_*` environment variables.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("cannot parse {var}={value}")]
    Env { var: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often the control loop re-evaluates backlog against idle tasks.
    pub scale_interval_ms: u64,
    /// Tasks spawned by `start`.
    pub initial_tasks: usize,
    /// Floor for scale-down.
    pub min_tasks: usize,
    /// Ceiling for scale-up; also the idle-task queue capacity.
    pub max_tasks: usize,
    pub job_queue_capacity: usize,
    /// Broadcast buffer for scheduler events; slow subscribers lose the oldest.
    pub event_capacity: usize,
    /// Log lifecycle events at info instead of debug.
    pub verbose: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scale_interval_ms: 1000,
            initial_tasks: 1,
            min_tasks: 1,
            max_tasks: 64,
            job_queue_capacity: 1000,
            event_capacity: 1024,
            verbose: false,
        }
    }
}

fn env_or<T: FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Env {
            var: var.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

impl SchedulerConfig {
    /// Defaults overridden by `HIVE_SCALE_INTERVAL_MS`, `HIVE_INITIAL_TASKS`,
    /// `HIVE_MIN_TASKS`, `HIVE_MAX_TASKS`, `HIVE_JOB_QUEUE_CAPACITY`,
    /// `HIVE_EVENT_CAPACITY` and `HIVE_VERBOSE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        let cfg = Self {
            scale_interval_ms: env_or("HIVE_SCALE_INTERVAL_MS", d.scale_interval_ms)?,
            initial_tasks: env_or("HIVE_INITIAL_TASKS", d.initial_tasks)?,
            min_tasks: env_or("HIVE_MIN_TASKS", d.min_tasks)?,
            max_tasks: env_or("HIVE_MAX_TASKS", d.max_tasks)?,
            job_queue_capacity: env_or("HIVE_JOB_QUEUE_CAPACITY", d.job_queue_capacity)?,
            event_capacity: env_or("HIVE_EVENT_CAPACITY", d.event_capacity)?,
            verbose: env_or("HIVE_VERBOSE", d.verbose)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scale_interval_ms == 0 {
            return Err(ConfigError::Invalid("scale_interval_ms must be > 0".into()));
        }
        if self.max_tasks == 0 {
            return Err(ConfigError::Invalid("max_tasks must be > 0".into()));
        }
        if self.min_tasks > self.max_tasks {
            return Err(ConfigError::Invalid(format!(
                "min_tasks ({}) exceeds max_tasks ({})",
                self.min_tasks, self.max_tasks
            )));
        }
        if self.initial_tasks < self.min_tasks.max(1) || self.initial_tasks > self.max_tasks {
            return Err(ConfigError::Invalid(format!(
                "initial_tasks ({}) must be within [{}, {}]",
                self.initial_tasks,
                self.min_tasks.max(1),
                self.max_tasks
            )));
        }
        if self.job_queue_capacity == 0 || self.event_capacity == 0 {
            return Err(ConfigError::Invalid("queue capacities must be > 0".into()));
        }
        Ok(())
    }

    pub fn scale_interval(&self) -> Duration {
        Duration::from_millis(self.scale_interval_ms)
    }

    pub fn with_scale_interval(mut self, interval: Duration) -> Self {
        self.scale_interval_ms = interval.as_millis().max(1) as u64;
        self
    }

    /// Set floor and ceiling; `initial_tasks` is clamped into the new range.
    pub fn with_pool(mut self, min_tasks: usize, max_tasks: usize) -> Self {
        self.min_tasks = min_tasks;
        self.max_tasks = max_tasks;
        let (lo, hi) = (min_tasks.max(1), max_tasks.max(1));
        if lo <= hi {
            self.initial_tasks = self.initial_tasks.clamp(lo, hi);
        }
        self
    }

    pub fn with_job_queue_capacity(mut self, capacity: usize) -> Self {
        self.job_queue_capacity = capacity;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}
