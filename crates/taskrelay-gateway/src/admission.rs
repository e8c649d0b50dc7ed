//! Admission gateway - rate limit, then idempotency, then validate and create.
//!
//! Both the limiter and the cache sit behind one mutex, so the
//! check-then-insert sequence for a key is atomic: concurrent submissions of
//! the same idempotency key always observe a single task.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use taskrelay_core::config::AdmissionConfig;
use taskrelay_core::{RelayError, Result, TaskDescriptor, TaskType, WorkerDescriptor, WorkerRegistry};
use taskrelay_dispatch::CycleStats;

use crate::idempotency::IdempotencyCache;
use crate::rate_limit::{RateLimited, RateLimiter};

/// Body of a task-creation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    /// Rate-limit identity of the caller.
    pub client_key: String,
    pub task: TaskRequest,
}

#[derive(Debug, Clone)]
pub enum Admission {
    /// New task created (201).
    Accepted(TaskDescriptor),
    /// Same key seen before expiry; the original task (200).
    Replayed(TaskDescriptor),
    Rejected(RateLimited),
}

#[derive(Debug, Default)]
struct AdmissionCounters {
    accepted: AtomicU64,
    replayed: AtomicU64,
    rate_limited: AtomicU64,
    invalid: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AdmissionSnapshot {
    pub limit: u32,
    pub accepted: u64,
    pub replayed: u64,
    pub rate_limited: u64,
    pub invalid: u64,
    pub tracked_clients: usize,
    pub cached_keys: usize,
}

struct AdmissionState {
    limiter: RateLimiter,
    cache: IdempotencyCache,
}

pub struct AdmissionGateway {
    registry: Arc<WorkerRegistry>,
    stats: Arc<CycleStats>,
    state: Mutex<AdmissionState>,
    counters: AdmissionCounters,
}

struct Validated {
    task_type: TaskType,
    worker: WorkerDescriptor,
    priority: u8,
}

impl AdmissionGateway {
    pub fn new(registry: Arc<WorkerRegistry>, stats: Arc<CycleStats>, config: &AdmissionConfig) -> Self {
        Self {
            registry,
            stats,
            state: Mutex::new(AdmissionState {
                limiter: RateLimiter::new(config.rate_limit, config.window()),
                cache: IdempotencyCache::new(config.idempotency_ttl()),
            }),
            counters: AdmissionCounters::default(),
        }
    }

    pub fn admit(&self, request: AdmissionRequest) -> Result<Admission> {
        self.admit_at(request, Instant::now())
    }

    /// Rate check, then idempotent replay, then validate and create. Only a
    /// created task counts against the caller's window.
    pub fn admit_at(&self, request: AdmissionRequest, now: Instant) -> Result<Admission> {
        let key = request
            .task
            .idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty());

        let mut state = self.lock();

        if let Err(limited) = state.limiter.check(&request.client_key, now) {
            self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "🚦 Rate limit hit for client '{}' (limit {}, retry in {}s)",
                request.client_key,
                limited.limit,
                limited.retry_after_secs()
            );
            return Ok(Admission::Rejected(limited));
        }

        if let Some(key) = key
            && let Some(record) = state.cache.get(key, now)
        {
            self.counters.replayed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("🔁 Idempotent replay of '{}' → task {}", key, record.task.id);
            return Ok(Admission::Replayed(record.task.clone()));
        }

        let validated = match self.validate(&request.task) {
            Ok(v) => v,
            Err(e) => {
                self.counters.invalid.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let task = self.build_task(validated, &request.task, key);
        if let Some(key) = key {
            state.cache.insert(key, task.clone(), now);
        }
        state.limiter.record(&request.client_key, now);
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            "📥 Admitted {} task {} for {} (client '{}')",
            task.task_type,
            task.id,
            task.worker_id,
            request.client_key
        );
        Ok(Admission::Accepted(task))
    }

    fn validate(&self, task: &TaskRequest) -> Result<Validated> {
        let task_type = TaskType::parse(&task.task_type)
            .ok_or_else(|| RelayError::InvalidRequest(format!("unknown task type '{}'", task.task_type)))?;

        let priority = match task.priority {
            None => 5,
            Some(p) if (1..=10).contains(&p) => p as u8,
            Some(p) => {
                return Err(RelayError::InvalidRequest(format!(
                    "priority must be between 1 and 10, got {p}"
                )));
            }
        };

        let worker = match task.agent_id.as_deref() {
            Some(id) => self
                .registry
                .get(id)
                .ok_or_else(|| RelayError::UnknownWorker(id.to_string()))?,
            None => self
                .registry
                .default_worker()
                .ok_or_else(|| RelayError::Config("worker registry is empty".into()))?,
        };

        Ok(Validated {
            task_type,
            worker: worker.clone(),
            priority,
        })
    }

    fn build_task(&self, v: Validated, request: &TaskRequest, key: Option<&str>) -> TaskDescriptor {
        let name = request
            .name
            .clone()
            .unwrap_or_else(|| format!("{} request for {}", v.task_type.label(), v.worker.id));
        let description = request.description.clone().unwrap_or_else(|| {
            format!("Externally submitted {} task", v.task_type.label().to_lowercase())
        });

        let mut task = TaskDescriptor::new(
            v.task_type,
            &v.worker,
            name,
            description,
            v.priority,
            self.stats.snapshot().context(),
        )
        .with_idempotency_key(key.map(str::to_string))
        .with_payload(request.payload.clone());
        if let Some(correlation_id) = &request.correlation_id {
            task = task.with_correlation_id(correlation_id.clone());
        }
        task
    }

    /// Purge elapsed rate windows and expired idempotency records.
    pub fn sweep_at(&self, now: Instant) -> (usize, usize) {
        let mut state = self.lock();
        (state.limiter.sweep(now), state.cache.sweep(now))
    }

    pub fn sweep(&self) -> (usize, usize) {
        self.sweep_at(Instant::now())
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        let state = self.lock();
        AdmissionSnapshot {
            limit: state.limiter.limit(),
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            replayed: self.counters.replayed.load(Ordering::Relaxed),
            rate_limited: self.counters.rate_limited.load(Ordering::Relaxed),
            invalid: self.counters.invalid.load(Ordering::Relaxed),
            tracked_clients: state.limiter.len(),
            cached_keys: state.cache.len(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AdmissionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn gateway(limit: u32) -> AdmissionGateway {
        let config = AdmissionConfig {
            rate_limit: limit,
            window_secs: 60,
            idempotency_ttl_secs: 60,
        };
        AdmissionGateway::new(
            Arc::new(WorkerRegistry::with_defaults()),
            Arc::new(CycleStats::new()),
            &config,
        )
    }

    fn request(client: &str, key: Option<&str>) -> AdmissionRequest {
        AdmissionRequest {
            client_key: client.into(),
            task: TaskRequest {
                task_type: "bug_fix".into(),
                payload: serde_json::json!({"ticket": 42}),
                idempotency_key: key.map(Into::into),
                ..Default::default()
            },
        }
    }

    fn accepted(a: Admission) -> TaskDescriptor {
        match a {
            Admission::Accepted(t) => t,
            other => panic!("expected Accepted, got {other:?}"),
        }
    }

    #[test]
    fn test_accept_then_replay_same_task() {
        let gw = gateway(100);
        let now = Instant::now();
        let first = accepted(gw.admit_at(request("c1", Some("K")), now).unwrap());
        assert_eq!(first.idempotency_key.as_deref(), Some("K"));
        assert_eq!(first.payload["ticket"], 42);

        match gw.admit_at(request("c1", Some("K")), now + Duration::from_secs(1)).unwrap() {
            Admission::Replayed(t) => assert_eq!(t.id, first.id),
            other => panic!("expected Replayed, got {other:?}"),
        }
        let snap = gw.snapshot();
        assert_eq!(snap.accepted, 1);
        assert_eq!(snap.replayed, 1);
    }

    #[test]
    fn test_replay_does_not_consume_quota() {
        let gw = gateway(1);
        let now = Instant::now();
        accepted(gw.admit_at(request("c1", Some("K")), now).unwrap());
        // Limit reached: even a replay is rejected, since the rate check comes first
        assert!(matches!(
            gw.admit_at(request("c1", Some("K")), now).unwrap(),
            Admission::Rejected(_)
        ));
    }

    #[test]
    fn test_expired_key_creates_new_task() {
        let gw = gateway(100);
        let now = Instant::now();
        let first = accepted(gw.admit_at(request("c1", Some("K")), now).unwrap());
        let second = accepted(gw.admit_at(request("c1", Some("K")), now + Duration::from_secs(61)).unwrap());
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_rate_limit_rejects_101st() {
        let gw = gateway(100);
        let now = Instant::now();
        for _ in 0..100 {
            accepted(gw.admit_at(request("c1", None), now).unwrap());
        }
        match gw.admit_at(request("c1", None), now + Duration::from_secs(15)).unwrap() {
            Admission::Rejected(r) => {
                assert_eq!(r.limit, 100);
                assert_eq!(r.retry_after_secs(), 45);
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
        // A different client has its own window
        accepted(gw.admit_at(request("c2", None), now).unwrap());
        // And the window reopens
        accepted(gw.admit_at(request("c1", None), now + Duration::from_secs(60)).unwrap());
        assert_eq!(gw.snapshot().rate_limited, 1);
    }

    #[test]
    fn test_validation() {
        let gw = gateway(100);
        let mut bad_type = request("c1", None);
        bad_type.task.task_type = "launch_rockets".into();
        assert!(matches!(gw.admit(bad_type), Err(RelayError::InvalidRequest(_))));

        let mut bad_priority = request("c1", None);
        bad_priority.task.priority = Some(11);
        assert!(matches!(gw.admit(bad_priority), Err(RelayError::InvalidRequest(_))));

        let mut unknown = request("c1", None);
        unknown.task.agent_id = Some("ghost-01".into());
        assert!(matches!(gw.admit(unknown), Err(RelayError::UnknownWorker(_))));

        assert_eq!(gw.snapshot().invalid, 3);
        assert_eq!(gw.snapshot().tracked_clients, 0);
    }

    #[test]
    fn test_rate_check_runs_before_validation() {
        let gw = gateway(1);
        let now = Instant::now();
        accepted(gw.admit_at(request("c1", Some("K")), now).unwrap());

        // A full window rejects even a malformed request
        let mut bad = request("c1", None);
        bad.task.task_type = "launch_rockets".into();
        assert!(matches!(gw.admit_at(bad, now).unwrap(), Admission::Rejected(_)));

        // Invalid requests never count against the window
        let gw = gateway(1);
        let mut bad = request("c2", None);
        bad.task.task_type = "launch_rockets".into();
        assert!(gw.admit_at(bad, now).is_err());
        accepted(gw.admit_at(request("c2", None), now).unwrap());
        assert_eq!(gw.snapshot().invalid, 1);
    }

    #[test]
    fn test_replay_wins_over_changed_body() {
        let gw = gateway(100);
        let now = Instant::now();
        let first = accepted(gw.admit_at(request("c1", Some("K")), now).unwrap());

        let mut changed = request("c1", Some("K"));
        changed.task.task_type = "launch_rockets".into();
        match gw.admit_at(changed, now).unwrap() {
            Admission::Replayed(t) => assert_eq!(t.id, first.id),
            other => panic!("expected Replayed, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults_and_overrides() {
        let gw = gateway(100);
        let registry = WorkerRegistry::with_defaults();
        let default = accepted(gw.admit(request("c1", None)).unwrap());
        assert_eq!(default.priority, 5);
        assert_eq!(Some(default.worker_id.as_str()), registry.default_worker().map(|w| w.id.as_str()));

        let mut explicit = request("c1", None);
        explicit.task.agent_id = Some(registry.workers()[3].id.clone());
        explicit.task.priority = Some(9);
        explicit.task.correlation_id = Some("wf-7".into());
        let task = accepted(gw.admit(explicit).unwrap());
        assert_eq!(task.worker_id, registry.workers()[3].id);
        assert_eq!(task.priority, 9);
        assert_eq!(task.correlation_id, "wf-7");
    }

    #[test]
    fn test_concurrent_same_key_yields_one_task() {
        let gw = Arc::new(gateway(1000));
        let now = Instant::now();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let gw = Arc::clone(&gw);
                std::thread::spawn(move || match gw.admit_at(request("c1", Some("same")), now).unwrap() {
                    Admission::Accepted(t) | Admission::Replayed(t) => t.id,
                    Admission::Rejected(_) => panic!("unexpected rejection"),
                })
            })
            .collect();
        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.iter().all(|id| *id == ids[0]));
        assert_eq!(gw.snapshot().accepted, 1);
        assert_eq!(gw.snapshot().replayed, 15);
    }

    #[test]
    fn test_sweep() {
        let gw = gateway(100);
        let now = Instant::now();
        gw.admit_at(request("c1", Some("a")), now).unwrap();
        assert_eq!(gw.sweep_at(now + Duration::from_secs(61)), (1, 1));
        let snap = gw.snapshot();
        assert_eq!(snap.tracked_clients, 0);
        assert_eq!(snap.cached_keys, 0);
    }
}
