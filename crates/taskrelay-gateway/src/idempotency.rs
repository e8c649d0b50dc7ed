//! Idempotency cache: one task per key until the record expires.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use taskrelay_core::TaskDescriptor;

#[derive(Debug, Clone)]
pub struct AdmissionRecord {
    pub idempotency_key: String,
    pub task: TaskDescriptor,
    pub expires_at: Instant,
}

#[derive(Debug)]
pub struct IdempotencyCache {
    ttl: Duration,
    records: HashMap<String, AdmissionRecord>,
}

impl IdempotencyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            records: HashMap::new(),
        }
    }

    /// Live record for `key`; expired records are treated as absent.
    pub fn get(&self, key: &str, now: Instant) -> Option<&AdmissionRecord> {
        self.records.get(key).filter(|r| now < r.expires_at)
    }

    pub fn insert(&mut self, key: &str, task: TaskDescriptor, now: Instant) -> &AdmissionRecord {
        let record = AdmissionRecord {
            idempotency_key: key.to_string(),
            task,
            expires_at: now + self.ttl,
        };
        self.records.insert(key.to_string(), record);
        &self.records[key]
    }

    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| now < r.expires_at);
        before - self.records.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskrelay_core::{CycleContext, TaskType, WorkerCategory, WorkerDescriptor};

    fn task() -> TaskDescriptor {
        let w = WorkerDescriptor::new("api-01", WorkerCategory::Api, 1);
        TaskDescriptor::new(TaskType::Research, &w, "n".into(), "d".into(), 5, CycleContext::default())
    }

    #[test]
    fn test_get_respects_expiry() {
        let mut cache = IdempotencyCache::new(Duration::from_secs(60));
        let now = Instant::now();
        let id = cache.insert("k1", task(), now).task.id.clone();

        assert_eq!(cache.get("k1", now + Duration::from_secs(59)).map(|r| r.task.id.clone()), Some(id));
        assert!(cache.get("k1", now + Duration::from_secs(60)).is_none());
        assert!(cache.get("missing", now).is_none());
    }

    #[test]
    fn test_sweep() {
        let mut cache = IdempotencyCache::new(Duration::from_secs(10));
        let now = Instant::now();
        cache.insert("a", task(), now);
        cache.insert("b", task(), now + Duration::from_secs(5));
        assert_eq!(cache.sweep(now + Duration::from_secs(12)), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("b", now + Duration::from_secs(12)).is_some());
    }
}
