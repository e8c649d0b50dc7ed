//! Cadence scheduler - runs a tier's units in order and always produces a report.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use taskrelay_core::panic_message;

use crate::alert::{Alert, AlertSink};
use crate::policy::ThresholdPolicy;
use crate::report::{CadenceRunReport, CadenceTier};
use crate::store::ReportStore;
use crate::unit::{MaintenanceTaskResult, MaintenanceUnit};
use crate::units::UnitCatalog;

const DEFAULT_UNIT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub struct CadenceScheduler {
    catalog: UnitCatalog,
    policy: ThresholdPolicy,
    stores: Vec<Arc<dyn ReportStore>>,
    alerts: Arc<dyn AlertSink>,
    unit_timeout: Duration,
}

/// Report plus the alerts raised while producing it.
#[derive(Debug, Clone)]
pub struct CadenceOutcome {
    pub report: CadenceRunReport,
    pub alerts: Vec<Alert>,
}

impl CadenceScheduler {
    pub fn new(
        catalog: UnitCatalog,
        policy: ThresholdPolicy,
        stores: Vec<Arc<dyn ReportStore>>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            catalog,
            policy,
            stores,
            alerts,
            unit_timeout: DEFAULT_UNIT_TIMEOUT,
        }
    }

    /// Longest a single unit may run before it is abandoned and recorded as failed.
    pub fn with_unit_timeout(mut self, unit_timeout: Duration) -> Self {
        self.unit_timeout = unit_timeout;
        self
    }

    /// Run every unit of `tier`. Unit failures, store failures and alert
    /// failures are recorded or logged; none of them stop the run.
    pub async fn run(&self, tier: CadenceTier) -> CadenceOutcome {
        let timestamp = Utc::now();
        let units = self.catalog.units(tier);
        tracing::info!("🗓️ Starting {} cadence: {} units", tier, units.len());

        let mut results = Vec::with_capacity(units.len());
        for unit in units {
            results.push(run_unit(unit.as_ref(), self.unit_timeout).await);
        }

        let report = CadenceRunReport::new(tier, timestamp, results);
        tracing::info!(
            "🗓️ {} cadence finished: {}/{} completed, {} failed, {}ms",
            tier,
            report.summary.completed,
            report.summary.total,
            report.summary.failed,
            report.summary.duration_ms
        );

        for store in &self.stores {
            if let Err(e) = store.save(&report).await {
                tracing::error!("❌ Failed to persist {} cadence report: {}", tier, e);
            }
        }

        let mut raised = Vec::new();
        for result in &report.results {
            let Some(alert) = self.policy.evaluate(tier, result) else {
                continue;
            };
            tracing::warn!("🚨 {} alert from {}: {}", alert.kind, alert.unit, alert.message);
            if let Err(e) = self.alerts.raise(&alert).await {
                tracing::error!("❌ Failed to raise {} alert: {}", alert.kind, e);
            }
            raised.push(alert);
        }

        CadenceOutcome { report, alerts: raised }
    }
}

/// NotStarted → Running → Completed | Failed, panics and timeouts included.
async fn run_unit(unit: &dyn MaintenanceUnit, limit: Duration) -> MaintenanceTaskResult {
    let name = unit.name().to_string();
    tracing::info!("▶️ Running {}", name);
    let started = Instant::now();

    let outcome = tokio::time::timeout(limit, AssertUnwindSafe(unit.execute()).catch_unwind()).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(Ok(details))) => {
            tracing::info!("✅ {} completed in {}ms", name, duration_ms);
            MaintenanceTaskResult::completed(&name, duration_ms, details)
        }
        Ok(Ok(Err(e))) => {
            tracing::error!("❌ {} failed after {}ms: {:#}", name, duration_ms, e);
            MaintenanceTaskResult::failed(&name, duration_ms, format!("{e:#}"))
        }
        Ok(Err(payload)) => {
            let message = panic_message(payload.as_ref());
            tracing::error!("💥 {} panicked after {}ms: {}", name, duration_ms, message);
            MaintenanceTaskResult::failed(&name, duration_ms, format!("panic: {message}"))
        }
        Err(_) => {
            tracing::error!("⏰ {} timed out after {:?}", name, limit);
            MaintenanceTaskResult::failed(&name, duration_ms, format!("timed out after {limit:?}"))
        }
    }
}
