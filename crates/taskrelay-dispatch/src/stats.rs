//! Process-wide cycle counters.
//!
//! Owned by the scheduler and shared by `Arc`; every field is an atomic so the
//! loops, the delivery client and the gateway's stats endpoint can touch them
//! without a lock.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;
use taskrelay_core::CycleContext;

pub struct CycleStats {
    cycle_count: AtomicU64,
    worker_cycle_count: AtomicU64,
    success_count: AtomicU64,
    error_count: AtomicU64,
    loop_faults: AtomicU64,
    /// Dispatch cycles in a row where every worker failed.
    failed_cycle_streak: AtomicU32,
    escalated: AtomicBool,
    started_at: Instant,
}

/// Point-in-time copy of [`CycleStats`].
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CycleSnapshot {
    pub cycle_count: u64,
    pub worker_cycle_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub loop_faults: u64,
    pub failed_cycle_streak: u32,
    pub uptime_secs: u64,
    pub success_rate: f64,
}

impl CycleSnapshot {
    pub fn context(&self) -> CycleContext {
        CycleContext {
            cycle_number: self.cycle_count,
            worker_cycle_number: self.worker_cycle_count,
            success_rate: self.success_rate,
        }
    }
}

impl CycleStats {
    pub fn new() -> Self {
        Self {
            cycle_count: AtomicU64::new(0),
            worker_cycle_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            loop_faults: AtomicU64::new(0),
            failed_cycle_streak: AtomicU32::new(0),
            escalated: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    /// Health-loop tick. Returns the new cycle number.
    pub fn next_cycle(&self) -> u64 {
        self.cycle_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Dispatch-loop tick. Returns the new worker cycle number.
    pub fn next_worker_cycle(&self) -> u64 {
        self.worker_cycle_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_success(&self) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_loop_fault(&self) {
        self.loop_faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a whole dispatch cycle.
    ///
    /// Returns `true` exactly once when the all-failed streak reaches
    /// `threshold`; re-arms after a cycle with any success.
    pub fn record_cycle_outcome(&self, all_failed: bool, threshold: u32) -> bool {
        if !all_failed {
            self.failed_cycle_streak.store(0, Ordering::Relaxed);
            self.escalated.store(false, Ordering::Relaxed);
            return false;
        }
        let streak = self.failed_cycle_streak.fetch_add(1, Ordering::Relaxed) + 1;
        threshold > 0 && streak >= threshold && !self.escalated.swap(true, Ordering::Relaxed)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// successes / (successes + errors); 0.0 before the first terminal outcome.
    pub fn success_rate(&self) -> f64 {
        let ok = self.success_count.load(Ordering::Relaxed);
        let err = self.error_count.load(Ordering::Relaxed);
        if ok + err == 0 {
            0.0
        } else {
            ok as f64 / (ok + err) as f64
        }
    }

    pub fn snapshot(&self) -> CycleSnapshot {
        CycleSnapshot {
            cycle_count: self.cycle_count.load(Ordering::Relaxed),
            worker_cycle_count: self.worker_cycle_count.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
            loop_faults: self.loop_faults.load(Ordering::Relaxed),
            failed_cycle_streak: self.failed_cycle_streak.load(Ordering::Relaxed),
            uptime_secs: self.uptime_secs(),
            success_rate: self.success_rate(),
        }
    }
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}
