//! Sink health as seen by the health-loop probes.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct SinkHealthSnapshot {
    pub status: SinkStatus,
    pub last_checked: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

pub struct SinkHealth {
    inner: Mutex<SinkHealthSnapshot>,
}

impl SinkHealth {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SinkHealthSnapshot {
                status: SinkStatus::Unknown,
                last_checked: None,
                consecutive_failures: 0,
            }),
        }
    }

    /// Apply a probe result; returns the new status. Transitions are logged once.
    pub fn record_probe(&self, ok: bool) -> SinkStatus {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let previous = inner.status;
        inner.last_checked = Some(Utc::now());
        if ok {
            inner.consecutive_failures = 0;
            inner.status = SinkStatus::Healthy;
        } else {
            inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
            inner.status = SinkStatus::Unhealthy;
        }

        if previous != inner.status {
            match inner.status {
                SinkStatus::Healthy => tracing::info!("💚 Sink is healthy"),
                SinkStatus::Unhealthy => tracing::warn!("💔 Sink is unhealthy"),
                SinkStatus::Unknown => {}
            }
        }
        inner.status
    }

    pub fn status(&self) -> SinkStatus {
        self.snapshot().status
    }

    pub fn snapshot(&self) -> SinkHealthSnapshot {
        match self.inner.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Default for SinkHealth {
    fn default() -> Self {
        Self::new()
    }
}
