//! Loop fault log - bounded record of loop panics and escalations.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub use taskrelay_core::panic_message;

const MAX_FAULTS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// A tick (or a worker within a tick) panicked.
    Panic,
    /// Every worker failed for too many dispatch cycles in a row.
    Escalation,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoopFault {
    pub loop_name: String,
    pub kind: FaultKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Most recent faults, oldest dropped first.
pub struct FaultLog {
    entries: Mutex<VecDeque<LoopFault>>,
}

impl FaultLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(MAX_FAULTS)),
        }
    }

    pub fn push(&self, loop_name: &str, kind: FaultKind, message: impl Into<String>) {
        let fault = LoopFault {
            loop_name: loop_name.to_string(),
            kind,
            message: message.into(),
            at: Utc::now(),
        };
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if entries.len() >= MAX_FAULTS {
            entries.pop_front();
        }
        entries.push_back(fault);
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<LoopFault> {
        let entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FaultLog {
    fn default() -> Self {
        Self::new()
    }
}
