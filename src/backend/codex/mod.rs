pub mod client;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::shared::{prompt_preview, run_ndjson, ProcessExit};
use crate::backend::{AgentAdapter, AgentOutput, InvocationRequest, ProgressSink};
use crate::error::AgentError;

pub use client::{CodexConfig, CodexEvent};

/// Adapter for `codex exec --json`. Sessions are Codex threads.
pub struct CodexAdapter {
    id: String,
    name: String,
    config: CodexConfig,
}

impl CodexAdapter {
    pub fn new() -> Self {
        Self::with_config(CodexConfig::default())
    }

    pub fn with_config(config: CodexConfig) -> Self {
        Self {
            id: "codex".to_string(),
            name: "Codex".to_string(),
            config,
        }
    }
}

impl Default for CodexAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Folds Codex JSON events into an [`AgentOutput`].
///
/// Codex does not report a dollar cost, so `cost_usd` stays `None` and the
/// caller prices the token counts.
#[derive(Debug, Default)]
struct CodexCollector {
    thread_id: Option<String>,
    messages: Vec<String>,
    input_tokens: u64,
    output_tokens: u64,
    turn_completed: bool,
    error: Option<String>,
}

impl CodexCollector {
    fn observe(&mut self, event: CodexEvent, progress: &ProgressSink) {
        match event {
            CodexEvent::ThreadStarted { thread_id } => {
                debug!("Codex thread started: {}", thread_id);
                self.thread_id = Some(thread_id);
            }
            CodexEvent::TurnCompleted { usage } => {
                self.turn_completed = true;
                if let Some(u) = usage {
                    self.input_tokens += u.input_tokens;
                    self.output_tokens += u.output_tokens;
                }
            }
            CodexEvent::TurnFailed { error } => {
                warn!("Codex turn failed: {}", error.message);
                self.error = Some(error.message);
            }
            CodexEvent::Error { message } => {
                warn!("Codex error event: {}", message);
                self.error = Some(message);
            }
            CodexEvent::ItemCompleted { item } => {
                if item.is_agent_message() {
                    if let Some(text) = item.text().filter(|t| !t.trim().is_empty()) {
                        progress.lines(text);
                        self.messages.push(text.to_string());
                    }
                } else if item.item_type == "command_execution" {
                    if let Some(cmd) = item.data.get("command").and_then(|v| v.as_str()) {
                        progress.line(&format!("[command] {}", cmd));
                    }
                }
            }
            CodexEvent::TurnStarted
            | CodexEvent::ItemStarted { .. }
            | CodexEvent::ItemUpdated { .. }
            | CodexEvent::Unknown => {}
        }
    }

    fn finish(self, agent: &str, exit: &ProcessExit) -> Result<AgentOutput, AgentError> {
        if let Some(message) = self.error {
            return Err(AgentError::invocation(agent, message));
        }
        if !self.turn_completed {
            let message = if exit.success {
                format!("{} exited without completing a turn", exit.label)
            } else {
                exit.failure_message()
            };
            return Err(AgentError::invocation(agent, message));
        }
        Ok(AgentOutput {
            content: self.messages.join("\n"),
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cost_usd: None,
            session_id: self.thread_id,
            completed: true,
        })
    }
}

#[async_trait]
impl AgentAdapter for CodexAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(
        &self,
        request: &InvocationRequest,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<AgentOutput, AgentError> {
        let cmd = self.config.command(
            &request.working_dir,
            request.model.as_deref(),
            request.session_id.as_deref(),
            &request.prompt,
        );
        info!(
            agent = %request.agent,
            directory = %request.working_dir.display(),
            model = ?request.model,
            thread_id = ?request.session_id,
            "Spawning Codex CLI"
        );
        debug!(agent = %request.agent, prompt = %prompt_preview(&request.prompt), "Codex prompt");

        let mut collector = CodexCollector::default();
        let exit = run_ndjson::<CodexEvent, _>(
            "codex",
            &request.agent,
            cmd,
            None,
            cancel,
            |event| collector.observe(event, progress),
        )
        .await?;
        collector.finish(&request.agent, &exit)
    }
}
