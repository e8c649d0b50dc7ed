//! # TaskRelay Cadence
//!
//! Operational maintenance batches. A tier (daily, weekly, monthly) is an
//! ordered list of [`MaintenanceUnit`]s; [`CadenceScheduler::run`] executes
//! each one in isolation, rolls the results into a [`CadenceRunReport`],
//! persists it, and raises an [`Alert`] for every threshold breach.
//!
//! ```text
//! CadenceScheduler::run(tier)
//!   ├── UnitCatalog.units(tier) → run each (catch Err + panic) → MaintenanceTaskResult
//!   ├── CadenceRunReport { results, summary }
//!   ├── ReportStore*  (CadenceDb row, ArtifactStore JSON file)
//!   └── ThresholdPolicy → AlertSink (CadenceDb system_alerts, webhook, fan-out)
//! ```

pub mod alert;
pub mod policy;
pub mod report;
pub mod runner;
pub mod store;
pub mod unit;
pub mod units;

pub use alert::{Alert, AlertKind, AlertSeverity, AlertSink, FanoutAlertSink, WebhookAlertSink};
pub use policy::ThresholdPolicy;
pub use report::{CadenceRunReport, CadenceSummary, CadenceTier};
pub use runner::{CadenceOutcome, CadenceScheduler};
pub use store::{AlertRow, ArtifactStore, CadenceDb, ReportStore};
pub use unit::{MaintenanceTaskResult, MaintenanceUnit};
pub use units::{BackupFreshnessUnit, CommandUnit, TtlCleanupUnit, UnitCatalog};
