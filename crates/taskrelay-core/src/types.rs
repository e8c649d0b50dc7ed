//! Data model - workers and the task descriptors routed to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Functional area a worker covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerCategory {
    Research,
    Frontend,
    Backend,
    Database,
    Testing,
    Deployment,
    Uiux,
    Portal,
    Api,
    Security,
    /// Internal category used for heartbeat and probe traffic.
    Monitoring,
}

impl WorkerCategory {
    /// Categories that get a default worker when no registry is configured.
    pub const DEFAULTS: [WorkerCategory; 10] = [
        WorkerCategory::Research,
        WorkerCategory::Frontend,
        WorkerCategory::Backend,
        WorkerCategory::Database,
        WorkerCategory::Testing,
        WorkerCategory::Deployment,
        WorkerCategory::Uiux,
        WorkerCategory::Portal,
        WorkerCategory::Api,
        WorkerCategory::Security,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerCategory::Research => "research",
            WorkerCategory::Frontend => "frontend",
            WorkerCategory::Backend => "backend",
            WorkerCategory::Database => "database",
            WorkerCategory::Testing => "testing",
            WorkerCategory::Deployment => "deployment",
            WorkerCategory::Uiux => "uiux",
            WorkerCategory::Portal => "portal",
            WorkerCategory::Api => "api",
            WorkerCategory::Security => "security",
            WorkerCategory::Monitoring => "monitoring",
        }
    }
}

impl std::fmt::Display for WorkerCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical worker. Registered once at startup, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    pub id: String,
    pub category: WorkerCategory,
    /// Lower value = served first when a worker must be picked.
    #[serde(default = "default_worker_priority")]
    pub priority: i32,
}

fn default_worker_priority() -> i32 {
    5
}

impl WorkerDescriptor {
    pub fn new(id: &str, category: WorkerCategory, priority: i32) -> Self {
        Self {
            id: id.to_string(),
            category,
            priority,
        }
    }
}

/// The fixed set of task types a generator or a client may produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    FeatureDevelopment,
    BugFix,
    Optimization,
    Testing,
    Monitoring,
    SecurityAudit,
    Documentation,
    Research,
}

impl TaskType {
    pub const ALL: [TaskType; 8] = [
        TaskType::FeatureDevelopment,
        TaskType::BugFix,
        TaskType::Optimization,
        TaskType::Testing,
        TaskType::Monitoring,
        TaskType::SecurityAudit,
        TaskType::Documentation,
        TaskType::Research,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::FeatureDevelopment => "feature_development",
            TaskType::BugFix => "bug_fix",
            TaskType::Optimization => "optimization",
            TaskType::Testing => "testing",
            TaskType::Monitoring => "monitoring",
            TaskType::SecurityAudit => "security_audit",
            TaskType::Documentation => "documentation",
            TaskType::Research => "research",
        }
    }

    /// Human-readable label used in generated task names.
    pub fn label(&self) -> &'static str {
        match self {
            TaskType::FeatureDevelopment => "Feature Development",
            TaskType::BugFix => "Bug Fix",
            TaskType::Optimization => "Optimization",
            TaskType::Testing => "Testing",
            TaskType::Monitoring => "Monitoring",
            TaskType::SecurityAudit => "Security Audit",
            TaskType::Documentation => "Documentation",
            TaskType::Research => "Research",
        }
    }

    /// Parse the snake_case wire name.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only snapshot of the cycle counters embedded in each task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct CycleContext {
    pub cycle_number: u64,
    pub worker_cycle_number: u64,
    /// successes / (successes + errors), 0.0 before any attempt.
    pub success_rate: f64,
}

/// A unit of outbound work. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: String,
    pub task_type: TaskType,
    pub worker_id: String,
    pub worker_category: WorkerCategory,
    pub name: String,
    pub description: String,
    /// 1..=10
    pub priority: u8,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub cycle_context: CycleContext,
    /// Client-supplied payload for admitted tasks; `Null` for generated ones.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl TaskDescriptor {
    pub const MIN_PRIORITY: u8 = 1;
    pub const MAX_PRIORITY: u8 = 10;

    /// Build a descriptor with a fresh id and creation time.
    pub fn new(
        task_type: TaskType,
        worker: &WorkerDescriptor,
        name: String,
        description: String,
        priority: u8,
        cycle_context: CycleContext,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            correlation_id: format!("corr-{id}"),
            id,
            task_type,
            worker_id: worker.id.clone(),
            worker_category: worker.category,
            name,
            description,
            priority: priority.clamp(Self::MIN_PRIORITY, Self::MAX_PRIORITY),
            idempotency_key: None,
            created_at: Utc::now(),
            cycle_context,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}
