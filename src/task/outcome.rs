//! Results produced while executing a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::TaskId;

/// Output of one agent invocation. Failed attempts are recorded too, with
/// `succeeded = false` and the error text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub agent: String,
    pub iteration: u32,
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub succeeded: bool,
    /// Whether the agent reported the run as finished. `false` on a
    /// succeeded attempt means the agent stopped early (e.g. turn limit).
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    pub(crate) fn failed(agent: &str, iteration: u32, duration_ms: u64, error: String) -> Self {
        Self {
            agent: agent.to_string(),
            iteration,
            content: String::new(),
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
            duration_ms,
            session_id: None,
            succeeded: false,
            completed: false,
            quality: None,
            error: Some(error),
        }
    }
}

/// Why the switch controller replaced an agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SwitchReason {
    /// Checkpoint quality fell below `target_quality - degradation_margin`.
    QualityDegraded { quality: f64, threshold: f64 },
    /// The agent stopped without finishing its run.
    FatalSignal,
}

impl std::fmt::Display for SwitchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SwitchReason::QualityDegraded { quality, threshold } => {
                write!(f, "quality {:.2} below threshold {:.2}", quality, threshold)
            }
            SwitchReason::FatalSignal => f.write_str("agent reported an incomplete run"),
        }
    }
}

/// Append-only log entry for a mid-task agent switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSwitchRecord {
    pub from_agent: String,
    pub to_agent: String,
    pub reason: SwitchReason,
    pub iteration: u32,
    /// Per-call cost delta, `to.cost_per_call - from.cost_per_call`.
    pub cost_impact: f64,
    pub at: DateTime<Utc>,
}

/// Terminal status of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Target quality reached.
    Completed,
    /// Finished with usable output, but the target was not met.
    CompletedBelowTarget { reason: String },
    /// No usable output (no agent available, or nothing succeeded).
    Failed { reason: String },
    Cancelled,
}

impl TaskStatus {
    pub const BUDGET_EXHAUSTED: &'static str = "budget_exhausted";
    pub const SWITCH_BUDGET_EXHAUSTED: &'static str = "switch_budget_exhausted";
    pub const MAX_ITERATIONS_REACHED: &'static str = "max_iterations_reached";

    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, TaskStatus::Failed { .. } | TaskStatus::Cancelled)
    }
}

/// Structured result of a whole task, returned even when the task fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    #[serde(flatten)]
    pub status: TaskStatus,
    pub final_agent: Option<String>,
    /// Latest successful output (partial when the task did not complete).
    pub content: Option<String>,
    pub quality: Option<f64>,
    pub target_met: bool,
    pub iterations: u32,
    pub total_cost_usd: f64,
    pub total_tokens: u64,
    pub duration_ms: u64,
    pub agent_switch_count: u32,
    pub switches: Vec<AgentSwitchRecord>,
    pub attempts: Vec<ExecutionResult>,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, TaskStatus::Completed)
    }

    /// Outcome for a task that never produced anything (e.g. a panicked worker).
    pub fn failed(task_id: TaskId, reason: impl Into<String>) -> Self {
        Self::empty(
            task_id,
            TaskStatus::Failed {
                reason: reason.into(),
            },
        )
    }

    /// Outcome for a task cancelled before any agent was invoked.
    pub fn cancelled(task_id: TaskId) -> Self {
        Self::empty(task_id, TaskStatus::Cancelled)
    }

    fn empty(task_id: TaskId, status: TaskStatus) -> Self {
        Self {
            task_id,
            status,
            final_agent: None,
            content: None,
            quality: None,
            target_met: false,
            iterations: 0,
            total_cost_usd: 0.0,
            total_tokens: 0,
            duration_ms: 0,
            agent_switch_count: 0,
            switches: Vec::new(),
            attempts: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_flat_into_outcome() {
        let mut outcome = TaskOutcome::failed(TaskId::from("t-1"), "no agent available");
        outcome.status = TaskStatus::CompletedBelowTarget {
            reason: TaskStatus::BUDGET_EXHAUSTED.to_string(),
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["task_id"], "t-1");
        assert_eq!(value["status"], "completed_below_target");
        assert_eq!(value["reason"], "budget_exhausted");
    }

    #[test]
    fn switch_reason_display() {
        let reason = SwitchReason::QualityDegraded {
            quality: 0.5,
            threshold: 0.65,
        };
        assert_eq!(reason.to_string(), "quality 0.50 below threshold 0.65");
    }
}
