//! Name -> worker table. Built during setup, read-only once the scheduler starts.

use hive_types::Worker;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("worker already registered: {0}")]
    Duplicate(String),
    #[error("registry is frozen, cannot register {0} after start")]
    Frozen(String),
    #[error("no worker registered for job {0}")]
    NotFound(String),
}

/// Mutable setup phase of a [`Registry`].
#[derive(Default)]
pub struct RegistryBuilder {
    workers: HashMap<String, Arc<dyn Worker>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<W>(&mut self, name: impl Into<String>, worker: W) -> Result<(), RegistryError>
    where
        W: Worker + 'static,
    {
        self.register_arc(name, Arc::new(worker))
    }

    pub fn register_arc(
        &mut self,
        name: impl Into<String>,
        worker: Arc<dyn Worker>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.workers.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        self.workers.insert(name, worker);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Freeze into a read-only registry.
    pub fn build(self) -> Registry {
        Registry {
            workers: self.workers,
        }
    }
}

/// Read-only worker table shared by every task.
pub struct Registry {
    workers: HashMap<String, Arc<dyn Worker>>,
}

impl Registry {
    pub fn lookup(&self, name: &str) -> Result<Arc<dyn Worker>, RegistryError> {
        self.workers
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.workers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("workers", &self.names())
            .finish()
    }
}
