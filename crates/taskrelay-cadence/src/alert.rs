//! Alerts raised on threshold breaches, and where they go.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskrelay_core::{RelayError, Result};

use crate::report::CadenceTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    BackupStale,
    BudgetDrift,
    SecurityFinding,
    PortalCompliance,
    CanaryDegraded,
    CostSlo,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::BackupStale => "backup_stale",
            AlertKind::BudgetDrift => "budget_drift",
            AlertKind::SecurityFinding => "security_finding",
            AlertKind::PortalCompliance => "portal_compliance",
            AlertKind::CanaryDegraded => "canary_degraded",
            AlertKind::CostSlo => "cost_slo",
        }
    }

    pub fn severity(&self) -> AlertSeverity {
        match self {
            AlertKind::SecurityFinding => AlertSeverity::Critical,
            AlertKind::BackupStale | AlertKind::CanaryDegraded => AlertSeverity::High,
            AlertKind::BudgetDrift | AlertKind::PortalCompliance | AlertKind::CostSlo => AlertSeverity::Medium,
        }
    }
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub tier: CadenceTier,
    /// Unit whose result tripped the threshold.
    pub unit: String,
    pub message: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(kind: AlertKind, tier: CadenceTier, unit: &str, message: String, details: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            severity: kind.severity(),
            tier,
            unit: unit.to_string(),
            message,
            details,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn raise(&self, alert: &Alert) -> Result<()>;
}

/// POSTs each alert as JSON to a webhook.
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: String,
    headers: Vec<(String, String)>,
}

impl WebhookAlertSink {
    pub fn new(url: &str, headers: Vec<(String, String)>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
            headers,
        }
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn raise(&self, alert: &Alert) -> Result<()> {
        let mut req = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "event": "operational_cadence_alert",
                "alert": alert,
            }))
            .timeout(Duration::from_secs(10));

        for (key, value) in &self.headers {
            req = req.header(key.as_str(), value.as_str());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| RelayError::Http(format!("alert webhook failed: {e}")))?;

        if resp.status().is_success() {
            tracing::info!("✅ Alert {} sent to webhook", alert.kind);
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(RelayError::Http(format!("alert webhook error {status}: {body}")))
        }
    }
}

/// Sends every alert to every inner sink. One sink failing does not stop the others.
pub struct FanoutAlertSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutAlertSink {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AlertSink for FanoutAlertSink {
    async fn raise(&self, alert: &Alert) -> Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.raise(alert).await {
                tracing::warn!("⚠️ Alert sink failed for {}: {}", alert.kind, e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
