//! Cadence tiers and the run report.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::unit::MaintenanceTaskResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CadenceTier {
    Daily,
    Weekly,
    Monthly,
}

impl CadenceTier {
    pub const ALL: [CadenceTier; 3] = [CadenceTier::Daily, CadenceTier::Weekly, CadenceTier::Monthly];

    pub fn as_str(&self) -> &'static str {
        match self {
            CadenceTier::Daily => "daily",
            CadenceTier::Weekly => "weekly",
            CadenceTier::Monthly => "monthly",
        }
    }

    /// Unit names run by this tier, in order.
    pub fn unit_names(&self) -> &'static [&'static str] {
        match self {
            CadenceTier::Daily => &[
                "ttl_cleanup",
                "partition_rotation",
                "backup_freshness_check",
                "budget_drift_report",
            ],
            CadenceTier::Weekly => &["dr_drill", "security_scans", "portal_audit", "canary_sanity_check"],
            CadenceTier::Monthly => &["key_rotation_rehearsal", "restore_test", "cost_slo_review"],
        }
    }
}

impl std::fmt::Display for CadenceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CadenceSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Sum of per-unit durations.
    pub duration_ms: u64,
}

impl CadenceSummary {
    pub fn from_results(results: &[MaintenanceTaskResult]) -> Self {
        let completed = results.iter().filter(|r| r.success).count();
        Self {
            total: results.len(),
            completed,
            failed: results.len() - completed,
            duration_ms: results.iter().map(|r| r.duration_ms).sum(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CadenceRunReport {
    pub timestamp: DateTime<Utc>,
    pub tier: CadenceTier,
    #[serde(default)]
    pub host: Option<String>,
    pub results: Vec<MaintenanceTaskResult>,
    pub summary: CadenceSummary,
}

impl CadenceRunReport {
    pub fn new(tier: CadenceTier, timestamp: DateTime<Utc>, results: Vec<MaintenanceTaskResult>) -> Self {
        let host = hostname::get().ok().map(|h| h.to_string_lossy().into_owned());
        Self {
            timestamp,
            tier,
            host,
            summary: CadenceSummary::from_results(&results),
            results,
        }
    }

    /// `operational-cadence-<tier>-<YYYY-MM-DD>.json`
    pub fn artifact_name(&self) -> String {
        format!(
            "operational-cadence-{}-{}.json",
            self.tier,
            self.timestamp.format("%Y-%m-%d")
        )
    }

    /// Plain-text summary printed by the CLI.
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Operational cadence: {} ({})", self.tier, self.timestamp.to_rfc3339());
        let _ = writeln!(out, "Total duration: {}ms", self.summary.duration_ms);
        let _ = writeln!(
            out,
            "Units: {} total, {} completed, {} failed",
            self.summary.total, self.summary.completed, self.summary.failed
        );
        for r in &self.results {
            let mark = if r.success { "ok  " } else { "FAIL" };
            let _ = write!(out, "  [{}] {} ({}ms)", mark, r.name, r.duration_ms);
            if let Some(err) = &r.error {
                let _ = write!(out, ": {}", err);
            }
            out.push('\n');
        }
        out
    }
}
