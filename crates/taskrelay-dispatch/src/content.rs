//! Task generation - turns a worker plus the current cycle counters into a task.
//!
//! The random parts (task type, priority) come from a [`ContentPolicy`] so
//! tests can pin them with [`FixedContent`].

use std::sync::Arc;

use rand::Rng;
use rand::seq::SliceRandom;
use taskrelay_core::{TaskDescriptor, TaskType, WorkerDescriptor};

use crate::stats::CycleSnapshot;

/// Source of the non-deterministic fields of a generated task.
///
/// Contract: `task_type` returns a member of [`TaskType::ALL`]; `priority`
/// returns a value in `1..=10`. Out-of-range priorities are clamped by the
/// generator.
pub trait ContentPolicy: Send + Sync {
    fn task_type(&self) -> TaskType;
    fn priority(&self) -> u8;
}

/// Uniform random type and priority.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomContent;

impl ContentPolicy for RandomContent {
    fn task_type(&self) -> TaskType {
        let mut rng = rand::thread_rng();
        *TaskType::ALL.choose(&mut rng).unwrap_or(&TaskType::Monitoring)
    }

    fn priority(&self) -> u8 {
        rand::thread_rng().gen_range(TaskDescriptor::MIN_PRIORITY..=TaskDescriptor::MAX_PRIORITY)
    }
}

/// Always the same type and priority.
#[derive(Debug, Clone, Copy)]
pub struct FixedContent {
    pub task_type: TaskType,
    pub priority: u8,
}

impl ContentPolicy for FixedContent {
    fn task_type(&self) -> TaskType {
        self.task_type
    }

    fn priority(&self) -> u8 {
        self.priority
    }
}

/// Builds a [`TaskDescriptor`] per worker per cycle. No side effects.
#[derive(Clone)]
pub struct TaskGenerator {
    policy: Arc<dyn ContentPolicy>,
}

impl TaskGenerator {
    pub fn new(policy: Arc<dyn ContentPolicy>) -> Self {
        Self { policy }
    }

    /// Generator backed by [`RandomContent`].
    pub fn random() -> Self {
        Self::new(Arc::new(RandomContent))
    }

    pub fn generate(&self, worker: &WorkerDescriptor, snapshot: &CycleSnapshot) -> TaskDescriptor {
        let task_type = self.policy.task_type();
        let priority = self.policy.priority();
        TaskDescriptor::new(
            task_type,
            worker,
            task_name(task_type, worker),
            task_description(task_type, worker),
            priority,
            snapshot.context(),
        )
    }
}

impl Default for TaskGenerator {
    fn default() -> Self {
        Self::random()
    }
}

fn task_name(task_type: TaskType, worker: &WorkerDescriptor) -> String {
    format!("{} task for {}", task_type.label(), worker.id)
}

fn task_description(task_type: TaskType, worker: &WorkerDescriptor) -> String {
    format!(
        "Autonomous {} work item generated for {} worker '{}'",
        task_type.label().to_lowercase(),
        worker.category,
        worker.id
    )
}
