//! Cycle scheduler - dispatch, health-check and heartbeat loops.
//!
//! Each loop is its own spawned task with its own `tokio::time::interval`.
//! They share nothing but the counters, the fault log and the shutdown
//! channel, so a slow sink on one loop never delays the others. Within a
//! dispatch tick the workers' deliveries overlap, offset by the stagger.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use taskrelay_core::config::CycleConfig;
use taskrelay_core::{TaskType, WorkerCategory, WorkerDescriptor, WorkerRegistry};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::content::{FixedContent, TaskGenerator};
use crate::delivery::{DeliveryAttempt, DeliveryClient, DeliveryOutcome};
use crate::faults::{FaultKind, FaultLog, panic_message};
use crate::health::{SinkHealth, SinkStatus};
use crate::stats::CycleStats;

const DISPATCH_LOOP: &str = "dispatch";
const HEALTH_LOOP: &str = "health";
const HEARTBEAT_LOOP: &str = "heartbeat";

/// What one dispatch tick did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchSummary {
    pub worker_cycle: u64,
    pub delivered: usize,
    pub failed: usize,
    pub panicked: usize,
    /// Workers not started because shutdown was signalled mid-cycle.
    pub skipped: usize,
    pub escalated: bool,
}

enum WorkerRun {
    Delivered,
    Failed,
    Panicked,
    Skipped,
}

impl DispatchSummary {
    fn all_failed(&self) -> bool {
        self.delivered == 0 && (self.failed + self.panicked) > 0
    }
}

pub struct CycleScheduler {
    registry: Arc<WorkerRegistry>,
    generator: TaskGenerator,
    client: Arc<DeliveryClient>,
    stats: Arc<CycleStats>,
    health: Arc<SinkHealth>,
    faults: Arc<FaultLog>,
    config: CycleConfig,
    shutdown: Arc<watch::Sender<bool>>,
}

impl CycleScheduler {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        generator: TaskGenerator,
        client: Arc<DeliveryClient>,
        config: CycleConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            generator,
            stats: client.stats().clone(),
            client,
            health: Arc::new(SinkHealth::new()),
            faults: Arc::new(FaultLog::new()),
            config,
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn stats(&self) -> &Arc<CycleStats> {
        &self.stats
    }

    pub fn health(&self) -> &Arc<SinkHealth> {
        &self.health
    }

    pub fn faults(&self) -> &Arc<FaultLog> {
        &self.faults
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Spawn the three loops. Call once.
    pub fn start(self: &Arc<Self>) -> CycleHandle {
        tracing::info!(
            "🚀 Cycle scheduler started: {} workers, dispatch every {:?}, health every {:?}, heartbeat every {:?}",
            self.registry.len(),
            self.config.dispatch_interval(),
            self.config.health_interval(),
            self.config.heartbeat_interval()
        );

        let dispatch = {
            let me = Arc::clone(self);
            self.spawn_loop(DISPATCH_LOOP, self.config.dispatch_interval(), move || {
                let me = Arc::clone(&me);
                async move {
                    me.run_dispatch_cycle().await;
                }
            })
        };
        let health = {
            let me = Arc::clone(self);
            self.spawn_loop(HEALTH_LOOP, self.config.health_interval(), move || {
                let me = Arc::clone(&me);
                async move {
                    me.run_health_check().await;
                }
            })
        };
        let heartbeat = {
            let me = Arc::clone(self);
            self.spawn_loop(HEARTBEAT_LOOP, self.config.heartbeat_interval(), move || {
                let me = Arc::clone(&me);
                async move {
                    me.run_heartbeat().await;
                }
            })
        };

        CycleHandle {
            shutdown: Arc::clone(&self.shutdown),
            tasks: vec![dispatch, health, heartbeat],
        }
    }

    fn spawn_loop<F, Fut>(&self, name: &'static str, period: Duration, tick: F) -> JoinHandle<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.shutdown.subscribe();
        let stats = Arc::clone(&self.stats);
        let faults = Arc::clone(&self.faults);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.changed() => {}
                }
                if *shutdown.borrow() {
                    break;
                }

                if let Err(payload) = AssertUnwindSafe(tick()).catch_unwind().await {
                    let message = panic_message(payload.as_ref());
                    stats.record_loop_fault();
                    faults.push(name, FaultKind::Panic, message.clone());
                    tracing::error!("💥 {} loop tick panicked: {}", name, message);
                }
            }
            tracing::info!("🛑 {} loop stopped", name);
        })
    }

    /// One dispatch tick. Worker `i` starts `i * stagger` after the tick, in
    /// registration order, and runs concurrently with the others, so one
    /// worker's retry chain never holds back the workers behind it.
    pub async fn run_dispatch_cycle(&self) -> DispatchSummary {
        let mut summary = DispatchSummary {
            worker_cycle: self.stats.next_worker_cycle(),
            ..Default::default()
        };
        let stagger = self.config.worker_stagger();

        let runs = self.registry.workers().iter().enumerate().map(|(index, worker)| async move {
            if index > 0 && !stagger.is_zero() {
                tokio::time::sleep(stagger.saturating_mul(index as u32)).await;
            }
            if self.is_shutting_down() {
                return WorkerRun::Skipped;
            }
            match AssertUnwindSafe(self.dispatch_worker(worker)).catch_unwind().await {
                Ok(DeliveryOutcome::Success) => WorkerRun::Delivered,
                Ok(_) => WorkerRun::Failed,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    self.stats.record_loop_fault();
                    self.faults.push(DISPATCH_LOOP, FaultKind::Panic, format!("{}: {}", worker.id, message));
                    tracing::error!("💥 Dispatch for worker {} panicked: {}", worker.id, message);
                    WorkerRun::Panicked
                }
            }
        });

        for run in futures::future::join_all(runs).await {
            match run {
                WorkerRun::Delivered => summary.delivered += 1,
                WorkerRun::Failed => summary.failed += 1,
                WorkerRun::Panicked => summary.panicked += 1,
                WorkerRun::Skipped => summary.skipped += 1,
            }
        }

        if summary.skipped == 0 {
            let threshold = self.config.escalate_after_failed_cycles;
            summary.escalated = self.stats.record_cycle_outcome(summary.all_failed(), threshold);
            if summary.escalated {
                let message = format!(
                    "every worker failed for {} consecutive dispatch cycles (sink {:?})",
                    threshold,
                    self.health.status()
                );
                self.faults.push(DISPATCH_LOOP, FaultKind::Escalation, message.clone());
                tracing::error!("🚨 Escalation: {}", message);
            }
        }

        tracing::debug!(
            "🔁 Worker cycle {} done: {} delivered, {} failed, {} panicked",
            summary.worker_cycle,
            summary.delivered,
            summary.failed,
            summary.panicked
        );
        summary
    }

    async fn dispatch_worker(&self, worker: &WorkerDescriptor) -> DeliveryOutcome {
        let task = self.generator.generate(worker, &self.stats.snapshot());
        self.client.deliver(&task).await.outcome
    }

    /// One health tick: bump the cycle counter, report stats, probe the sink.
    pub async fn run_health_check(&self) -> SinkStatus {
        let cycle = self.stats.next_cycle();
        let snapshot = self.stats.snapshot();
        tracing::info!(
            "📊 Cycle {}: uptime {}s, worker cycles {}, {} ok / {} failed ({:.1}% success), {} loop faults",
            cycle,
            snapshot.uptime_secs,
            snapshot.worker_cycle_count,
            snapshot.success_count,
            snapshot.error_count,
            snapshot.success_rate * 100.0,
            snapshot.loop_faults
        );

        let attempt = self.probe_as("health-probe").await;
        self.health.record_probe(attempt.outcome == DeliveryOutcome::Success)
    }

    /// One heartbeat: a single monitoring task, no retries, no counters.
    pub async fn run_heartbeat(&self) -> DeliveryAttempt {
        let attempt = self.probe_as("heartbeat").await;
        match attempt.outcome {
            DeliveryOutcome::Success => tracing::debug!("💓 Heartbeat delivered"),
            _ => tracing::warn!(
                "💔 Heartbeat failed: {}",
                attempt.error.as_deref().unwrap_or("unknown error")
            ),
        }
        attempt
    }

    async fn probe_as(&self, id: &str) -> DeliveryAttempt {
        let worker = WorkerDescriptor::new(id, WorkerCategory::Monitoring, 0);
        let generator = TaskGenerator::new(Arc::new(FixedContent {
            task_type: TaskType::Monitoring,
            priority: 1,
        }));
        let task = generator.generate(&worker, &self.stats.snapshot());
        self.client.probe(&task).await
    }
}

/// Returned by [`CycleScheduler::start`].
pub struct CycleHandle {
    shutdown: Arc<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl CycleHandle {
    /// Stop scheduling new ticks. A tick in progress runs to completion.
    pub fn shutdown(&self) {
        tracing::info!("🛑 Cycle scheduler shutting down");
        self.shutdown.send_replace(true);
    }

    /// Wait for all loops to exit.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!("Loop task ended abnormally: {}", e);
            }
        }
    }
}
