pub mod client;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::shared::{prompt_preview, run_ndjson, CliEvent, StreamCollector};
use crate::backend::{AgentAdapter, AgentOutput, InvocationRequest, ProgressSink};
use crate::error::AgentError;

pub use client::AmpConfig;

/// Adapter for the Amp CLI. Sessions are Amp threads (`T-...` ids).
pub struct AmpAdapter {
    id: String,
    name: String,
    config: AmpConfig,
}

impl AmpAdapter {
    pub fn new() -> Self {
        Self::with_config(AmpConfig::default())
    }

    pub fn with_config(config: AmpConfig) -> Self {
        Self {
            id: "amp".to_string(),
            name: "Amp".to_string(),
            config,
        }
    }
}

impl Default for AmpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentAdapter for AmpAdapter {
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
        // Amp picks its own model; the profile's model is informational.
        let cmd = self.config.command(
            &request.working_dir,
            request.session_id.as_deref(),
            &request.prompt,
        );
        info!(
            agent = %request.agent,
            directory = %request.working_dir.display(),
            thread_id = ?request.session_id,
            "Spawning Amp CLI"
        );
        debug!(agent = %request.agent, prompt = %prompt_preview(&request.prompt), "Amp prompt");

        let mut collector = StreamCollector::new();
        let exit = run_ndjson::<CliEvent, _>(
            "amp",
            &request.agent,
            cmd,
            None,
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

    #[tokio::test]
    async fn collects_assistant_text_and_thread_id() {
        let script = r#"echo '{"type":"system","subtype":"init","session_id":"T-7"}'
echo '{"type":"assistant","message":{"content":[{"type":"text","text":"found 3 issues"}],"usage":{"input_tokens":40,"output_tokens":9}},"session_id":"T-7"}'
echo '{"type":"result","subtype":"success","result":"found 3 issues","session_id":"T-7","duration_ms":1200}'"#;
        let adapter = AmpAdapter::with_config(AmpConfig {
            cli_path: "sh".to_string(),
            cli_args: vec!["-c".to_string(), script.to_string(), "amp".to_string()],
            default_mode: None,
            api_key: None,
        });
        let request = InvocationRequest {
            agent: "amp".to_string(),
            model: None,
            prompt: "scan".to_string(),
            session_id: None,
            working_dir: PathBuf::from("."),
        };
        let output = adapter
            .invoke(&request, &ProgressSink::disabled(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.content, "found 3 issues");
        assert_eq!(output.session_id.as_deref(), Some("T-7"));
        assert_eq!((output.input_tokens, output.output_tokens), (40, 9));
        assert_eq!(output.cost_usd, None);
    }
}
