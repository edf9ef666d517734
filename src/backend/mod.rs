//! Agent adapters: one per external coding CLI.
//!
//! An adapter starts its CLI as a child process, feeds it the prompt
//! (resuming a prior session when given one), streams output lines to a
//! [`ProgressSink`] and parses the final result into an [`AgentOutput`].

pub mod amp;
pub mod claudecode;
pub mod codex;
pub mod registry;
pub mod scripted;
pub mod shared;

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::cost::TokenUsage;
use crate::error::AgentError;
use crate::orchestrator::events::{emit, OrchestratorEvent};
use crate::task::TaskId;

pub use registry::AdapterRegistry;

#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub agent: String,
    pub model: Option<String>,
    pub prompt: String,
    /// Continuation token from a previous run of the same agent.
    pub session_id: Option<String>,
    pub working_dir: PathBuf,
}

/// Parsed result of one CLI run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentOutput {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Cost reported by the CLI, if it reports one.
    pub cost_usd: Option<f64>,
    pub session_id: Option<String>,
    /// `false` when the CLI produced a result but reported the run as
    /// unfinished (e.g. it hit its turn limit).
    pub completed: bool,
}

impl AgentOutput {
    pub fn usage(&self) -> TokenUsage {
        TokenUsage::new(self.input_tokens, self.output_tokens)
    }
}

/// Forwards streamed output lines to orchestrator observers.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    task_id: TaskId,
    agent: String,
    tx: Option<broadcast::Sender<OrchestratorEvent>>,
}

impl ProgressSink {
    pub fn new(
        task_id: TaskId,
        agent: impl Into<String>,
        tx: broadcast::Sender<OrchestratorEvent>,
    ) -> Self {
        Self {
            task_id,
            agent: agent.into(),
            tx: Some(tx),
        }
    }

    /// A sink that drops everything.
    pub fn disabled() -> Self {
        Self {
            task_id: TaskId::from("detached"),
            agent: String::new(),
            tx: None,
        }
    }

    /// Emit one line. Blank lines are skipped.
    pub fn line(&self, line: &str) {
        let line = line.trim_end();
        if line.trim().is_empty() {
            return;
        }
        if let Some(tx) = &self.tx {
            emit(
                tx,
                OrchestratorEvent::ProgressLine {
                    task_id: self.task_id.clone(),
                    agent: self.agent.clone(),
                    line: line.to_string(),
                },
            );
        }
    }

    /// Emit every line of a multi-line block.
    pub fn lines(&self, text: &str) {
        for line in text.lines() {
            self.line(line);
        }
    }
}

#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// Registry key referenced by `AgentProfile::backend`.
    fn id(&self) -> &str;
    fn name(&self) -> &str;

    /// Run the CLI to completion.
    ///
    /// Spawn failures, non-zero exits without a result, missing or
    /// malformed results, and API errors are `InvocationFailed`. If `cancel`
    /// fires the child is killed and `Cancelled` is returned.
    async fn invoke(
        &self,
        request: &InvocationRequest,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<AgentOutput, AgentError>;
}
