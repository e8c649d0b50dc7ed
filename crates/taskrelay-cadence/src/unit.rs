//! Maintenance unit seam and its per-run result.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One pluggable maintenance step. `execute` returns the details recorded in
/// the report; an `Err` (or a panic) marks the unit failed.
#[async_trait]
pub trait MaintenanceUnit: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self) -> anyhow::Result<serde_json::Value>;
}

/// Outcome of one unit within one cadence run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceTaskResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MaintenanceTaskResult {
    pub fn completed(name: &str, duration_ms: u64, details: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            duration_ms,
            details: Some(details),
            error: None,
        }
    }

    pub fn failed(name: &str, duration_ms: u64, error: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            duration_ms,
            details: None,
            error: Some(error.into()),
        }
    }
}
