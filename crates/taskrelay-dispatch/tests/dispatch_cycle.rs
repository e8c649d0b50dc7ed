//! End-to-end dispatch tick against a fake sink.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use taskrelay_core::config::CycleConfig;
use taskrelay_core::{TaskType, WorkerRegistry};
use taskrelay_dispatch::{
    CycleScheduler, CycleStats, DeliveryClient, DeliveryPolicy, FaultKind, FixedContent, TaskGenerator, Transport,
    TransportError, TransportRequest,
};

/// Fails every request for one agent id; records the order agents were first seen in
/// and when each agent's first request arrived.
struct SelectiveSink {
    failing_agent: String,
    seen: Mutex<Vec<String>>,
    first_seen_at: Mutex<HashMap<String, Instant>>,
    calls_per_agent: Mutex<HashMap<String, u32>>,
}

impl SelectiveSink {
    fn new(failing_agent: &str) -> Self {
        Self {
            failing_agent: failing_agent.to_string(),
            seen: Mutex::new(Vec::new()),
            first_seen_at: Mutex::new(HashMap::new()),
            calls_per_agent: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Transport for SelectiveSink {
    async fn send(&self, request: &TransportRequest) -> Result<u16, TransportError> {
        let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
        let agent = body["agent_id"].as_str().unwrap().to_string();
        *self.calls_per_agent.lock().unwrap().entry(agent.clone()).or_default() += 1;
        self.first_seen_at
            .lock()
            .unwrap()
            .entry(agent.clone())
            .or_insert_with(Instant::now);
        let mut seen = self.seen.lock().unwrap();
        if !seen.contains(&agent) {
            seen.push(agent.clone());
        }
        if agent == self.failing_agent {
            Err(TransportError::Connection("connection refused".into()))
        } else {
            Ok(201)
        }
    }

    fn endpoint(&self) -> &str {
        "selective"
    }
}

/// Panics for one agent id.
struct PanickingSink {
    panic_for: String,
}

#[async_trait]
impl Transport for PanickingSink {
    async fn send(&self, request: &TransportRequest) -> Result<u16, TransportError> {
        if request.body.contains(&self.panic_for) {
            panic!("sink exploded");
        }
        Ok(200)
    }

    fn endpoint(&self) -> &str {
        "panicking"
    }
}

fn policy(max_retries: u32, retry_delay: Duration) -> DeliveryPolicy {
    DeliveryPolicy {
        timeout: Duration::from_secs(1),
        max_retries,
        retry_delay,
        protocol_version: "1.0".into(),
        user_agent: "taskrelay-test".into(),
        signing_secret: None,
    }
}

fn config(worker_stagger_ms: u64) -> CycleConfig {
    CycleConfig {
        worker_stagger_ms,
        ..CycleConfig::default()
    }
}

fn build(transport: Arc<dyn Transport>, max_retries: u32) -> CycleScheduler {
    build_with(transport, policy(max_retries, Duration::ZERO), config(0))
}

fn build_with(transport: Arc<dyn Transport>, policy: DeliveryPolicy, config: CycleConfig) -> CycleScheduler {
    let stats = Arc::new(CycleStats::new());
    let client = Arc::new(DeliveryClient::new(transport, policy, stats));
    let generator = TaskGenerator::new(Arc::new(FixedContent {
        task_type: TaskType::Optimization,
        priority: 4,
    }));
    CycleScheduler::new(Arc::new(WorkerRegistry::with_defaults()), generator, client, config)
}

#[tokio::test]
async fn one_failing_worker_does_not_block_the_rest() {
    let registry = WorkerRegistry::with_defaults();
    let failing = registry.workers()[2].id.clone();
    let sink = Arc::new(SelectiveSink::new(&failing));
    let scheduler = build(sink.clone(), 5);

    let summary = scheduler.run_dispatch_cycle().await;

    assert_eq!(summary.worker_cycle, 1);
    assert_eq!(summary.delivered, 9);
    assert_eq!(summary.failed, 1);
    assert!(!summary.escalated);

    let snapshot = scheduler.stats().snapshot();
    assert_eq!(snapshot.success_count, 9);
    assert_eq!(snapshot.error_count, 1);
    assert_eq!(snapshot.worker_cycle_count, 1);

    // Registration order, one pass each
    let expected: Vec<String> = registry.workers().iter().map(|w| w.id.clone()).collect();
    assert_eq!(*sink.seen.lock().unwrap(), expected);

    // The failing worker was tried 1 + 5 times, everyone else once
    let calls = sink.calls_per_agent.lock().unwrap();
    assert_eq!(calls[&failing], 6);
    assert!(calls.iter().filter(|(k, _)| **k != failing).all(|(_, v)| *v == 1));
}

#[tokio::test]
async fn retrying_worker_does_not_delay_later_workers() {
    let registry = WorkerRegistry::with_defaults();
    let ids: Vec<String> = registry.workers().iter().map(|w| w.id.clone()).collect();
    let failing = ids[2].clone();
    let sink = Arc::new(SelectiveSink::new(&failing));
    // 6 attempts 300ms apart: the failing worker alone takes 1.5s
    let scheduler = build_with(sink.clone(), policy(5, Duration::from_millis(300)), config(10));

    let started = Instant::now();
    let summary = scheduler.run_dispatch_cycle().await;

    assert_eq!(summary.delivered, 9);
    assert_eq!(summary.failed, 1);
    assert!(started.elapsed() >= Duration::from_millis(1500));

    let first_seen = sink.first_seen_at.lock().unwrap();
    let fourth = first_seen[&ids[3]].duration_since(started);
    assert!(fourth < Duration::from_millis(200), "fourth worker started after {fourth:?}");
    let last = first_seen[&ids[9]].duration_since(started);
    assert!(last < Duration::from_millis(500), "last worker started after {last:?}");

    // First attempts still follow registration order
    assert_eq!(*sink.seen.lock().unwrap(), ids);
    assert_eq!(sink.calls_per_agent.lock().unwrap()[&failing], 6);
}

#[tokio::test]
async fn counters_accumulate_across_cycles() {
    let registry = WorkerRegistry::with_defaults();
    let sink = Arc::new(SelectiveSink::new(&registry.workers()[0].id));
    let scheduler = build(sink, 0);

    scheduler.run_dispatch_cycle().await;
    scheduler.run_dispatch_cycle().await;
    scheduler.run_dispatch_cycle().await;

    let snapshot = scheduler.stats().snapshot();
    assert_eq!(snapshot.worker_cycle_count, 3);
    assert_eq!(snapshot.success_count, 27);
    assert_eq!(snapshot.error_count, 3);
    assert!((snapshot.success_rate - 0.9).abs() < 1e-9);
    assert_eq!(snapshot.failed_cycle_streak, 0);
}

#[tokio::test]
async fn panicking_worker_is_contained() {
    let registry = WorkerRegistry::with_defaults();
    let victim = registry.workers()[4].id.clone();
    let scheduler = build(Arc::new(PanickingSink { panic_for: victim.clone() }), 0);

    let summary = scheduler.run_dispatch_cycle().await;

    assert_eq!(summary.panicked, 1);
    assert_eq!(summary.delivered, 9);
    assert_eq!(scheduler.stats().snapshot().loop_faults, 1);
    let faults = scheduler.faults().recent(10);
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].kind, FaultKind::Panic);
    assert!(faults[0].message.starts_with(&victim));
}
