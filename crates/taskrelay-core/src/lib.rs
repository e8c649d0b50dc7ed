//! # TaskRelay Core
//!
//! Shared building blocks for every TaskRelay crate:
//! configuration, the error taxonomy, the worker registry and the
//! task descriptor that flows from generation (or admission) to delivery.

pub mod config;
pub mod error;
pub mod registry;
pub mod types;

pub use config::RelayConfig;
pub use error::{RelayError, Result, panic_message};
pub use registry::WorkerRegistry;
pub use types::{CycleContext, TaskDescriptor, TaskType, WorkerCategory, WorkerDescriptor};
