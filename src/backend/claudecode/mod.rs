pub mod client;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::shared::{prompt_preview, run_ndjson, CliEvent, StreamCollector};
use crate::backend::{AgentAdapter, AgentOutput, InvocationRequest, ProgressSink};
use crate::error::AgentError;

pub use client::ClaudeCodeConfig;

/// Adapter that runs the Claude Code CLI in stream-json mode.
pub struct ClaudeCodeAdapter {
    id: String,
    name: String,
    config: ClaudeCodeConfig,
}

impl ClaudeCodeAdapter {
    pub fn new() -> Self {
        Self::with_config(ClaudeCodeConfig::default())
    }

    pub fn with_config(config: ClaudeCodeConfig) -> Self {
        Self {
            id: "claudecode".to_string(),
            name: "Claude Code".to_string(),
            config,
        }
    }

    pub fn config(&self) -> &ClaudeCodeConfig {
        &self.config
    }
}

impl Default for ClaudeCodeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentAdapter for ClaudeCodeAdapter {
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
        );
        info!(
            agent = %request.agent,
            directory = %request.working_dir.display(),
            model = ?request.model,
            resume = ?request.session_id,
            "Spawning Claude CLI"
        );
        debug!(agent = %request.agent, prompt = %prompt_preview(&request.prompt), "Claude prompt");

        let mut collector = StreamCollector::new();
        let exit = run_ndjson::<CliEvent, _>(
            "claude",
            &request.agent,
            cmd,
            Some(request.prompt.clone()),
            cancel,
            |event| collector.observe(event, progress),
        )
        .await?;
        collector.finish(&request.agent, &exit, progress)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fake_cli(script: &str) -> ClaudeCodeAdapter {
        ClaudeCodeAdapter::with_config(ClaudeCodeConfig {
            cli_path: "sh".to_string(),
            cli_args: vec!["-c".to_string(), script.to_string(), "claude".to_string()],
            api_key: None,
            default_model: None,
            max_turns: None,
        })
    }

    fn request(session_id: Option<&str>) -> InvocationRequest {
        InvocationRequest {
            agent: "claude-opus".to_string(),
            model: Some("claude-opus-4-1".to_string()),
            prompt: "write tests".to_string(),
            session_id: session_id.map(str::to_string),
            working_dir: PathBuf::from("."),
        }
    }

    #[tokio::test]
    async fn parses_result_and_passes_resume_flag() {
        // echoes its argv and stdin back through the result event
        let adapter = fake_cli(
            r#"p=$(cat); echo "{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"s-1\"}"; echo "{\"type\":\"result\",\"subtype\":\"success\",\"result\":\"$p | $*\",\"session_id\":\"s-1\",\"total_cost_usd\":0.12}""#,
        );
        let output = adapter
            .invoke(&request(Some("s-0")), &ProgressSink::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(output.content.starts_with("write tests | "));
        assert!(output.content.contains("--resume s-0"));
        assert!(output.content.contains("--model claude-opus-4-1"));
        assert_eq!(output.session_id.as_deref(), Some("s-1"));
        assert_eq!(output.cost_usd, Some(0.12));
        assert!(output.completed);
    }

    #[tokio::test]
    async fn non_zero_exit_without_result_fails() {
        let adapter = fake_cli("cat >/dev/null; echo 'auth required' >&2; exit 1");
        let err = adapter
            .invoke(&request(None), &ProgressSink::disabled(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.counts_as_failure());
        assert!(err.to_string().contains("auth required"));
    }
}
