//! Events emitted to observers and the optional cost trace sink.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::task::{SwitchReason, TaskId};

/// Best-effort progress events. Delivery is not guaranteed: sends with no
/// subscribers (or lagging subscribers) are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    AgentSelected {
        task_id: TaskId,
        agent: String,
        reason: String,
    },
    /// One line of streamed agent output.
    ProgressLine {
        task_id: TaskId,
        agent: String,
        line: String,
    },
    TaskCompleted {
        task_id: TaskId,
        agent: String,
        cost_usd: f64,
        tokens: u64,
        duration_ms: u64,
    },
    AgentSwitched {
        task_id: TaskId,
        from: String,
        to: String,
        reason: SwitchReason,
        iteration: u32,
    },
}

impl OrchestratorEvent {
    pub fn task_id(&self) -> &TaskId {
        match self {
            OrchestratorEvent::AgentSelected { task_id, .. }
            | OrchestratorEvent::ProgressLine { task_id, .. }
            | OrchestratorEvent::TaskCompleted { task_id, .. }
            | OrchestratorEvent::AgentSwitched { task_id, .. } => task_id,
        }
    }
}

/// Fire-and-forget send. A closed channel never fails the task.
pub(crate) fn emit(tx: &broadcast::Sender<OrchestratorEvent>, event: OrchestratorEvent) {
    let _ = tx.send(event);
}

/// Per-invocation cost record forwarded to an external tracer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceRecord {
    pub task_id: TaskId,
    pub agent: String,
    pub iteration: u32,
    pub cost_usd: f64,
    pub tokens: u64,
    pub duration_ms: u64,
}

/// External cost/metric collaborator. Optional; absence changes nothing.
pub trait TraceSink: Send + Sync {
    fn record(&self, record: TraceRecord);
}
