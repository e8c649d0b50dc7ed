//! Threshold policy: which unit details count as a breach.

use serde_json::Value;
use taskrelay_core::config::CadenceConfig;

use crate::alert::{Alert, AlertKind};
use crate::report::CadenceTier;
use crate::unit::MaintenanceTaskResult;

#[derive(Debug, Clone, Copy)]
pub struct ThresholdPolicy {
    pub backup_max_age_secs: u64,
    pub budget_drift_threshold_pct: f64,
    pub canary_min_success_rate: f64,
}

impl ThresholdPolicy {
    pub fn from_config(config: &CadenceConfig) -> Self {
        Self {
            backup_max_age_secs: config.backup_max_age().as_secs(),
            budget_drift_threshold_pct: config.budget_drift_threshold_pct,
            canary_min_success_rate: config.canary_min_success_rate,
        }
    }

    /// At most one alert per result; failed units never alert (their failure is in the report).
    pub fn evaluate(&self, tier: CadenceTier, result: &MaintenanceTaskResult) -> Option<Alert> {
        if !result.success {
            return None;
        }
        let details = result.details.as_ref()?;
        let (kind, message) = self.breach(&result.name, details)?;
        Some(Alert::new(kind, tier, &result.name, message, details.clone()))
    }

    /// Each unit has one check, looked up by its name. Units without one never alert.
    fn breach(&self, unit: &str, d: &Value) -> Option<(AlertKind, String)> {
        match unit {
            "backup_freshness_check" => {
                let age = d.get("backup_age_secs").and_then(Value::as_u64)?;
                (age > self.backup_max_age_secs).then(|| {
                    (
                        AlertKind::BackupStale,
                        format!(
                            "Backup is {}h old (max {}h)",
                            age / 3600,
                            self.backup_max_age_secs / 3600
                        ),
                    )
                })
            }
            "budget_drift_report" => {
                let drift = max_drift(d)?;
                (drift > self.budget_drift_threshold_pct).then(|| {
                    (
                        AlertKind::BudgetDrift,
                        format!(
                            "Budget drift {:.1}% exceeds {:.1}%",
                            drift, self.budget_drift_threshold_pct
                        ),
                    )
                })
            }
            "security_scans" => count(d, "critical_findings")
                .map(|n| (AlertKind::SecurityFinding, format!("{n} critical security finding(s)"))),
            "portal_audit" => count(d, "compliance_issues")
                .map(|n| (AlertKind::PortalCompliance, format!("{n} portal compliance issue(s)"))),
            "canary_sanity_check" => {
                // success_rate is a percentage here, as the canary reports it
                if let Some(rate) = d.get("success_rate").and_then(Value::as_f64)
                    && rate < self.canary_min_success_rate
                {
                    return Some((
                        AlertKind::CanaryDegraded,
                        format!(
                            "Canary success rate {:.1}% below {:.1}%",
                            rate, self.canary_min_success_rate
                        ),
                    ));
                }
                (d.get("canary_healthy").and_then(Value::as_bool) == Some(false))
                    .then(|| (AlertKind::CanaryDegraded, "Canary reported unhealthy".to_string()))
            }
            "cost_slo_review" => count(d, "significant_issues")
                .map(|n| (AlertKind::CostSlo, format!("{n} significant cost/SLO issue(s)"))),
            _ => None,
        }
    }
}

/// Largest of `max_drift_pct` and every `drift[].drift_pct`.
fn max_drift(d: &Value) -> Option<f64> {
    let listed = d
        .get("drift")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| item.get("drift_pct").and_then(Value::as_f64));
    let direct = d.get("max_drift_pct").and_then(Value::as_f64);
    listed.chain(direct).map(f64::abs).reduce(f64::max)
}

/// Positive count under `key`, or a non-empty array.
fn count(d: &Value, key: &str) -> Option<u64> {
    let n = match d.get(key)? {
        Value::Number(n) => n.as_u64()?,
        Value::Array(items) => items.len() as u64,
        _ => return None,
    };
    (n > 0).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> ThresholdPolicy {
        ThresholdPolicy::from_config(&CadenceConfig::default())
    }

    fn ok(name: &str, details: Value) -> MaintenanceTaskResult {
        MaintenanceTaskResult::completed(name, 1, details)
    }

    fn kind(result: &MaintenanceTaskResult) -> Option<AlertKind> {
        policy().evaluate(CadenceTier::Daily, result).map(|a| a.kind)
    }

    #[test]
    fn test_backup_stale_boundary() {
        let max = 24 * 3600;
        let unit = "backup_freshness_check";
        assert_eq!(kind(&ok(unit, json!({"backup_age_secs": max + 1}))), Some(AlertKind::BackupStale));
        assert_eq!(kind(&ok(unit, json!({"backup_age_secs": max}))), None);
    }

    #[test]
    fn test_budget_drift() {
        let d = json!({"drift": [{"category": "api", "drift_pct": 4.0}, {"category": "db", "drift_pct": -12.5}]});
        assert_eq!(kind(&ok("budget_drift_report", d)), Some(AlertKind::BudgetDrift));
        assert_eq!(kind(&ok("budget_drift_report", json!({"max_drift_pct": 9.9}))), None);
        assert_eq!(kind(&ok("budget_drift_report", json!({"drift": []}))), None);
    }

    #[test]
    fn test_security_portal_canary_cost() {
        assert_eq!(kind(&ok("security_scans", json!({"critical_findings": 2}))), Some(AlertKind::SecurityFinding));
        assert_eq!(kind(&ok("security_scans", json!({"critical_findings": 0}))), None);
        assert_eq!(
            kind(&ok("portal_audit", json!({"compliance_issues": ["missing csp"]}))),
            Some(AlertKind::PortalCompliance)
        );
        assert_eq!(kind(&ok("canary_sanity_check", json!({"success_rate": 94.0}))), Some(AlertKind::CanaryDegraded));
        assert_eq!(kind(&ok("canary_sanity_check", json!({"success_rate": 99.2}))), None);
        assert_eq!(kind(&ok("canary_sanity_check", json!({"canary_healthy": false}))), Some(AlertKind::CanaryDegraded));
        assert_eq!(kind(&ok("cost_slo_review", json!({"significant_issues": 1}))), Some(AlertKind::CostSlo));
    }

    #[test]
    fn test_checks_belong_to_their_unit() {
        // A ratio-style success_rate from a restore test is not a canary reading
        assert_eq!(kind(&ok("restore_test", json!({"success_rate": 1.0}))), None);
        assert_eq!(kind(&ok("dr_drill", json!({"backup_age_secs": 999_999}))), None);
        assert_eq!(kind(&ok("budget_drift_report", json!({"critical_findings": 3}))), None);
    }

    #[test]
    fn test_failed_result_never_alerts() {
        let r = MaintenanceTaskResult::failed("backup_freshness_check", 1, "no backup found");
        assert!(policy().evaluate(CadenceTier::Daily, &r).is_none());
    }

    #[test]
    fn test_one_alert_per_result() {
        let d = json!({"backup_age_secs": 999_999, "critical_findings": 3});
        let alert = policy()
            .evaluate(CadenceTier::Daily, &ok("backup_freshness_check", d))
            .unwrap();
        assert_eq!(alert.kind, AlertKind::BackupStale);
        assert_eq!(alert.unit, "backup_freshness_check");
    }
}
