//! Task module - task descriptors and the records produced while running them.

mod outcome;
#[allow(clippy::module_inception)]
pub mod task;

pub use outcome::{AgentSwitchRecord, ExecutionResult, SwitchReason, TaskOutcome, TaskStatus};
pub use task::{Task, TaskFile, TaskId, TaskType};
