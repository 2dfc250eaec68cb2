//! Job envelope and task identifiers.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A named unit of work plus the opaque context handed to its worker.
///
/// Jobs are immutable once built; a worker that wants more work constructs
/// new jobs instead of editing the one it received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    id: Uuid,
    name: String,
    #[serde(default)]
    context: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl Job {
    /// Build a job from a worker name and a raw JSON context.
    pub fn new(name: impl Into<String>, context: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            context,
            created_at: Utc::now(),
        }
    }

    /// Build a job whose context is the serialized form of `context`.
    pub fn with_context<T: Serialize>(
        name: impl Into<String>,
        context: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(name, serde_json::to_value(context)?))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Name of the worker this job must be dispatched to.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &serde_json::Value {
        &self.context
    }

    /// Decode the context into a typed value.
    pub fn context_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.context)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Move the name and context out of the job.
    pub fn into_parts(self) -> (String, serde_json::Value) {
        (self.name, self.context)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Identifier of one task in the scheduler's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First group of the hyphenated uuid keeps log lines short.
        let s = self.0.to_string();
        f.write_str(s.split('-').next().unwrap_or(&s))
    }
}
