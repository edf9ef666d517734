//! In-process adapter that replays canned responses.
//!
//! Useful for dry runs and for exercising the orchestrator without any CLI
//! installed. Responses are queued per agent name and consumed in order.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{AgentAdapter, AgentOutput, InvocationRequest, ProgressSink};
use crate::error::AgentError;

#[derive(Debug, Clone)]
pub enum ScriptedStep {
    Output(AgentOutput),
    Error(AgentError),
    /// Block until cancelled.
    Hang,
    Delayed(Duration, Box<ScriptedStep>),
}

impl ScriptedStep {
    /// A finished run with the given content and token counts.
    pub fn reply(content: impl Into<String>, input_tokens: u64, output_tokens: u64) -> Self {
        Self::Output(AgentOutput {
            content: content.into(),
            input_tokens,
            output_tokens,
            cost_usd: None,
            session_id: None,
            completed: true,
        })
    }

    /// A run the CLI reported as unfinished.
    pub fn incomplete(content: impl Into<String>) -> Self {
        Self::Output(AgentOutput {
            content: content.into(),
            completed: false,
            ..AgentOutput::default()
        })
    }

    pub fn fail(agent: &str, message: impl Into<String>) -> Self {
        Self::Error(AgentError::invocation(agent, message))
    }

    pub fn after(self, delay: Duration) -> Self {
        Self::Delayed(delay, Box::new(self))
    }

    /// Attach a reported cost (only meaningful for `Output`).
    pub fn costing(self, cost_usd: f64) -> Self {
        match self {
            Self::Output(output) => Self::Output(AgentOutput {
                cost_usd: Some(cost_usd),
                ..output
            }),
            other => other,
        }
    }

    pub fn with_session(self, session_id: impl Into<String>) -> Self {
        match self {
            Self::Output(output) => Self::Output(AgentOutput {
                session_id: Some(session_id.into()),
                ..output
            }),
            other => other,
        }
    }
}

pub struct ScriptedAdapter {
    id: String,
    steps: Mutex<HashMap<String, VecDeque<ScriptedStep>>>,
    requests: Mutex<Vec<InvocationRequest>>,
}

impl ScriptedAdapter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            steps: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a response for the next invocation of `agent`.
    pub fn push(&self, agent: &str, step: ScriptedStep) -> &Self {
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(agent.to_string())
            .or_default()
            .push_back(step);
        self
    }

    /// Every request received so far, in call order.
    pub fn requests(&self) -> Vec<InvocationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls_for(&self, agent: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.agent == agent)
            .count()
    }

    fn next_step(&self, agent: &str) -> Option<ScriptedStep> {
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(agent)
            .and_then(VecDeque::pop_front)
    }
}

async fn play(
    step: ScriptedStep,
    progress: &ProgressSink,
    cancel: &CancellationToken,
) -> Result<AgentOutput, AgentError> {
    let mut step = step;
    loop {
        match step {
            ScriptedStep::Output(output) => {
                progress.lines(&output.content);
                return Ok(output);
            }
            ScriptedStep::Error(err) => return Err(err),
            ScriptedStep::Hang => {
                cancel.cancelled().await;
                return Err(AgentError::Cancelled);
            }
            ScriptedStep::Delayed(delay, inner) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                    _ = tokio::time::sleep(delay) => step = *inner,
                }
            }
        }
    }
}

#[async_trait]
impl AgentAdapter for ScriptedAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "Scripted"
    }

    async fn invoke(
        &self,
        request: &InvocationRequest,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<AgentOutput, AgentError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let Some(step) = self.next_step(&request.agent) else {
            return Err(AgentError::invocation(
                &request.agent,
                "no scripted response left",
            ));
        };
        debug!(agent = %request.agent, "Replaying scripted response");
        play(step, progress, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn request(agent: &str) -> InvocationRequest {
        InvocationRequest {
            agent: agent.to_string(),
            model: None,
            prompt: "p".to_string(),
            session_id: None,
            working_dir: PathBuf::from("."),
        }
    }

    #[tokio::test]
    async fn replays_in_order_per_agent() {
        let adapter = ScriptedAdapter::new("scripted");
        adapter
            .push("a", ScriptedStep::reply("one", 1, 1))
            .push("a", ScriptedStep::fail("a", "boom"))
            .push("b", ScriptedStep::reply("bee", 0, 0).with_session("s-b"));

        let cancel = CancellationToken::new();
        let sink = ProgressSink::disabled();
        assert_eq!(adapter.invoke(&request("a"), &sink, &cancel).await.unwrap().content, "one");
        let out = adapter.invoke(&request("b"), &sink, &cancel).await.unwrap();
        assert_eq!(out.session_id.as_deref(), Some("s-b"));
        assert!(adapter.invoke(&request("a"), &sink, &cancel).await.is_err());
        // queue exhausted
        assert!(adapter.invoke(&request("a"), &sink, &cancel).await.is_err());
        assert_eq!(adapter.calls_for("a"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hang_returns_cancelled() {
        let adapter = ScriptedAdapter::new("scripted");
        adapter.push("a", ScriptedStep::Hang);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });
        let err = adapter
            .invoke(&request("a"), &ProgressSink::disabled(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, AgentError::Cancelled);
    }
}
