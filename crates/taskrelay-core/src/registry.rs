//! Worker registry - the static list of logical workers, in registration order.

use std::collections::HashSet;

use crate::error::{RelayError, Result};
use crate::types::{WorkerCategory, WorkerDescriptor};

#[derive(Debug, Clone)]
pub struct WorkerRegistry {
    workers: Vec<WorkerDescriptor>,
}

impl WorkerRegistry {
    /// Build a registry, rejecting empty or duplicate ids.
    pub fn new(workers: Vec<WorkerDescriptor>) -> Result<Self> {
        let mut seen = HashSet::new();
        for w in &workers {
            if w.id.trim().is_empty() {
                return Err(RelayError::Config("worker id must not be empty".into()));
            }
            if !seen.insert(w.id.as_str()) {
                return Err(RelayError::Config(format!("duplicate worker id '{}'", w.id)));
            }
        }
        Ok(Self { workers })
    }

    /// One worker per default category, ids like `research-01`.
    pub fn with_defaults() -> Self {
        let workers = WorkerCategory::DEFAULTS
            .iter()
            .enumerate()
            .map(|(i, c)| WorkerDescriptor::new(&format!("{c}-01"), *c, i as i32 + 1))
            .collect();
        Self { workers }
    }

    /// Workers in registration order.
    pub fn workers(&self) -> &[WorkerDescriptor] {
        &self.workers
    }

    pub fn get(&self, id: &str) -> Option<&WorkerDescriptor> {
        self.workers.iter().find(|w| w.id == id)
    }

    /// Worker used when a request names none: lowest priority value, first registered on ties.
    pub fn default_worker(&self) -> Option<&WorkerDescriptor> {
        self.workers
            .iter()
            .enumerate()
            .min_by_key(|(i, w)| (w.priority, *i))
            .map(|(_, w)| w)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
