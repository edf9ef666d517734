use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Configuration for the Codex CLI.
#[derive(Debug, Clone)]
pub struct CodexConfig {
    pub cli_path: String,
    /// Arguments placed before the generated flags (wrapper scripts, tests).
    pub cli_args: Vec<String>,
    pub oauth_token: Option<String>,
    pub default_model: Option<String>,
}

impl Default for CodexConfig {
    fn default() -> Self {
        Self {
            cli_path: std::env::var("CODEX_CLI_PATH").unwrap_or_else(|_| "codex".to_string()),
            cli_args: Vec::new(),
            oauth_token: std::env::var("OPENAI_OAUTH_TOKEN").ok(),
            default_model: None,
        }
    }
}

impl CodexConfig {
    /// Build `codex exec [resume <thread>] --json ... -- <message>`.
    pub fn command(
        &self,
        working_dir: &Path,
        model: Option<&str>,
        thread_id: Option<&str>,
        message: &str,
    ) -> Command {
        let mut cmd = Command::new(&self.cli_path);
        cmd.current_dir(working_dir).args(&self.cli_args).arg("exec");

        if let Some(thread) = thread_id {
            cmd.arg("resume").arg(thread);
        }

        cmd.arg("--json")
            .arg("--skip-git-repo-check")
            .arg("--dangerously-bypass-approvals-and-sandbox");

        if let Some(ref token) = self.oauth_token {
            cmd.env("OPENAI_OAUTH_TOKEN", token);
            debug!("Using OAuth token for Codex CLI authentication");
        }

        if let Some(m) = model.or(self.default_model.as_deref()) {
            let bare = m.strip_prefix("openai/").unwrap_or(m);
            cmd.arg("--model").arg(bare);
        }

        // guard prompts starting with '-'
        cmd.arg("--").arg(message);
        cmd
    }
}

/// Events emitted by Codex CLI in --json mode.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum CodexEvent {
    #[serde(rename = "thread.started")]
    ThreadStarted { thread_id: String },

    #[serde(rename = "turn.started")]
    TurnStarted,

    #[serde(rename = "turn.completed")]
    TurnCompleted {
        #[serde(default)]
        usage: Option<CodexUsage>,
    },

    #[serde(rename = "turn.failed")]
    TurnFailed { error: ErrorInfo },

    #[serde(rename = "item.started")]
    ItemStarted { item: Item },

    #[serde(rename = "item.updated")]
    ItemUpdated { item: Item },

    #[serde(rename = "item.completed")]
    ItemCompleted { item: Item },

    #[serde(rename = "error")]
    Error { message: String },

    // Catch-all for unknown event types
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct CodexUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub cached_input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ErrorInfo {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Item {
    pub id: String,
    #[serde(rename = "type", alias = "item_type")]
    pub item_type: String,
    #[serde(flatten)]
    pub data: HashMap<String, Value>,
}

impl Item {
    pub fn text(&self) -> Option<&str> {
        self.data.get("text").and_then(Value::as_str)
    }

    pub fn is_agent_message(&self) -> bool {
        matches!(
            self.item_type.as_str(),
            "agent_message" | "assistant_message" | "message"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_thread_started() {
        let json =
            r#"{"type":"thread.started","thread_id":"019c21ae-c46c-7a40-a5f5-36ab53521a27"}"#;
        let event: CodexEvent = serde_json::from_str(json).unwrap();
        match event {
            CodexEvent::ThreadStarted { thread_id } => {
                assert_eq!(thread_id, "019c21ae-c46c-7a40-a5f5-36ab53521a27");
            }
            _ => panic!("Expected ThreadStarted event"),
        }
    }

    #[test]
    fn test_parse_turn_completed_usage() {
        let json = r#"{"type":"turn.completed","usage":{"input_tokens":1200,"cached_input_tokens":800,"output_tokens":300}}"#;
        let event: CodexEvent = serde_json::from_str(json).unwrap();
        match event {
            CodexEvent::TurnCompleted { usage: Some(u) } => {
                assert_eq!(u.input_tokens, 1200);
                assert_eq!(u.output_tokens, 300);
            }
            _ => panic!("Expected TurnCompleted with usage"),
        }
    }

    #[test]
    fn test_parse_agent_message_item() {
        let json = r#"{"type":"item.completed","item":{"id":"item_3","type":"agent_message","text":"All tests pass."}}"#;
        let event: CodexEvent = serde_json::from_str(json).unwrap();
        match event {
            CodexEvent::ItemCompleted { item } => {
                assert!(item.is_agent_message());
                assert_eq!(item.text(), Some("All tests pass."));
            }
            _ => panic!("Expected ItemCompleted event"),
        }
    }

    #[test]
    fn test_parse_turn_failed_and_unknown() {
        let json =
            r#"{"type":"turn.failed","error":{"message":"unexpected status 401 Unauthorized: "}}"#;
        let event: CodexEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, CodexEvent::TurnFailed { error } if error.message.contains("401")));

        let event: CodexEvent = serde_json::from_str(r#"{"type":"session.configured"}"#).unwrap();
        assert!(matches!(event, CodexEvent::Unknown));
    }

    #[test]
    fn resume_command_shape() {
        let config = CodexConfig {
            cli_path: "codex".to_string(),
            cli_args: Vec::new(),
            oauth_token: None,
            default_model: None,
        };
        let cmd = config.command(Path::new("."), Some("openai/gpt-5-codex"), Some("th-1"), "-fix");
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(&args[..4], ["exec", "resume", "th-1", "--json"]);
        assert!(args.windows(2).any(|w| w == ["--model", "gpt-5-codex"]));
        assert_eq!(&args[args.len() - 2..], ["--", "-fix"]);
    }
}
