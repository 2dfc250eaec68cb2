//! Scheduler events published to subscribers (operators, tests).

use crate::TaskId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One observable step of the pool's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SchedulerEvent {
    TaskStarted {
        task_id: TaskId,
    },
    TaskStopped {
        task_id: TaskId,
    },
    /// A pending job was routed to an idle task.
    JobDispatched {
        job_id: Uuid,
        job: String,
        task_id: TaskId,
    },
    JobCompleted {
        job_id: Uuid,
        job: String,
        task_id: TaskId,
        /// Number of follow-up jobs pushed back onto the job queue.
        spawned: usize,
    },
    JobFailed {
        job_id: Uuid,
        job: String,
        task_id: TaskId,
        error: String,
    },
    /// A job was discarded without running (task retired, scheduler stopped).
    JobDropped {
        job_id: Uuid,
        job: String,
        reason: String,
    },
    ScaledUp {
        from: usize,
        to: usize,
    },
    ScaledDown {
        from: usize,
        to: usize,
    },
}

impl SchedulerEvent {
    /// Job id carried by the event, if any.
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            Self::JobDispatched { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::JobDropped { job_id, .. } => Some(*job_id),
            _ => None,
        }
    }
}
