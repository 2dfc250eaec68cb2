//! Errors a worker can attach to its output.

/// Failure of a single job. Reported by the task that ran it; never fatal to the pool.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("{0}")]
    Message(String),
    #[error("invalid job context: {0}")]
    InvalidContext(#[from] serde_json::Error),
    #[error("worker panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl WorkerError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// Wrap any error type.
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Other(Box::new(error))
    }
}

impl From<String> for WorkerError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

impl From<&str> for WorkerError {
    fn from(value: &str) -> Self {
        Self::Message(value.to_string())
    }
}

impl From<std::io::Error> for WorkerError {
    fn from(value: std::io::Error) -> Self {
        Self::other(value)
    }
}
