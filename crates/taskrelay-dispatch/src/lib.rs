//! # TaskRelay Dispatch
//!
//! The outbound side: generate a task per worker, deliver it to the sink,
//! and keep three independent loops running until shutdown.
//!
//! ## Architecture
//! ```text
//! CycleScheduler
//!   ├── dispatch loop  (5s)   → for each worker: TaskGenerator → DeliveryClient::deliver
//!   ├── health loop    (2min) → CycleStats report + DeliveryClient::probe
//!   └── heartbeat loop (15s)  → DeliveryClient::probe (monitoring task)
//!
//! DeliveryClient
//!   └── Transport (HttpTransport = reqwest POST)
//!         ├── 2xx                   → Success
//!         ├── other / conn / timeout → TransientFailure → retry (fixed delay)
//!         └── retries exhausted      → PermanentFailure
//! ```

pub mod content;
pub mod cycle;
pub mod delivery;
pub mod faults;
pub mod health;
pub mod stats;
pub mod transport;

pub use content::{ContentPolicy, FixedContent, RandomContent, TaskGenerator};
pub use cycle::{CycleHandle, CycleScheduler, DispatchSummary};
pub use delivery::{DeliveryAttempt, DeliveryClient, DeliveryOutcome, DeliveryPolicy, DeliveryReport};
pub use faults::{FaultKind, FaultLog, LoopFault};
pub use health::{SinkHealth, SinkHealthSnapshot, SinkStatus};
pub use stats::{CycleSnapshot, CycleStats};
pub use transport::{HttpTransport, Transport, TransportError, TransportRequest};
