//! Task interface consumed by the scheduler
//!
//! Task bodies are opaque to the core: anything implementing [`Task`] can be
//! registered. The scheduler only cares about the id, the cron expression,
//! the schedule options, and the declared sub-tasks.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::TaskContext;
use crate::options::ScheduleOptions;

/// Identifier of a registered task; unique within one scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// The unit of work the scheduler fires.
#[async_trait]
pub trait Task: Send + Sync {
    fn task_id(&self) -> TaskId;

    async fn run(&self, ctx: TaskContext) -> anyhow::Result<()>;

    /// Cron expression in the standard 5-field form, or a `@descriptor`.
    fn schedule(&self) -> String;

    fn schedule_options(&self) -> Arc<dyn ScheduleOptions>;

    /// Children fired after this task's own body completes. The flag selects
    /// parallel fan-out; when false, children run one at a time in
    /// declaration order.
    fn sub_tasks(&self) -> (bool, Vec<Arc<dyn Task>>) {
        (false, Vec::new())
    }
}
