use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// Configuration for the Claude Code CLI.
#[derive(Debug, Clone)]
pub struct ClaudeCodeConfig {
    pub cli_path: String,
    /// Arguments placed before the generated flags (wrapper scripts, tests).
    pub cli_args: Vec<String>,
    pub api_key: Option<String>,
    pub default_model: Option<String>,
    /// Passed as `--max-turns`; hitting it ends the run as incomplete.
    pub max_turns: Option<u32>,
}

impl Default for ClaudeCodeConfig {
    fn default() -> Self {
        Self {
            cli_path: std::env::var("CLAUDE_CLI_PATH").unwrap_or_else(|_| "claude".to_string()),
            cli_args: Vec::new(),
            api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            default_model: None,
            max_turns: None,
        }
    }
}

impl ClaudeCodeConfig {
    /// Build the CLI invocation. The prompt is written to stdin separately.
    pub fn command(&self, working_dir: &Path, model: Option<&str>, resume: Option<&str>) -> Command {
        let mut cmd = Command::new(&self.cli_path);
        cmd.current_dir(working_dir)
            .args(&self.cli_args)
            .arg("--print")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose")
            .arg("--include-partial-messages");

        // OAuth tokens start with "sk-ant-oat" and must use CLAUDE_CODE_OAUTH_TOKEN
        if let Some(ref key) = self.api_key {
            if key.starts_with("sk-ant-oat") {
                cmd.env("CLAUDE_CODE_OAUTH_TOKEN", key);
                debug!("Using OAuth token for Claude CLI authentication");
            } else {
                cmd.env("ANTHROPIC_API_KEY", key);
                debug!("Using API key for Claude CLI authentication");
            }
        }

        // Claude Code expects bare model IDs, not provider-prefixed ones.
        if let Some(m) = model.or(self.default_model.as_deref()) {
            let bare = m.strip_prefix("anthropic/").unwrap_or(m);
            cmd.arg("--model").arg(bare);
        }

        if let Some(turns) = self.max_turns {
            cmd.arg("--max-turns").arg(turns.to_string());
        }

        if let Some(sid) = resume {
            cmd.arg("--resume").arg(sid);
        }

        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn builds_resume_command_with_bare_model() {
        let config = ClaudeCodeConfig {
            cli_path: "claude".to_string(),
            cli_args: Vec::new(),
            api_key: None,
            default_model: None,
            max_turns: Some(8),
        };
        let cmd = config.command(
            Path::new("/tmp"),
            Some("anthropic/claude-opus-4-1"),
            Some("sess-9"),
        );
        let args = args(&cmd);
        assert_eq!(&args[..5], ["--print", "--output-format", "stream-json", "--verbose", "--include-partial-messages"]);
        assert!(args.windows(2).any(|w| w == ["--model", "claude-opus-4-1"]));
        assert!(args.windows(2).any(|w| w == ["--max-turns", "8"]));
        assert!(args.windows(2).any(|w| w == ["--resume", "sess-9"]));
    }

    #[test]
    fn fresh_session_has_no_resume_flag() {
        let config = ClaudeCodeConfig {
            cli_path: "sh".to_string(),
            cli_args: vec!["-c".to_string(), "true".to_string()],
            api_key: None,
            default_model: Some("claude-sonnet-4-5".to_string()),
            max_turns: None,
        };
        let args = args(&config.command(Path::new("."), None, None));
        assert_eq!(&args[..2], ["-c", "true"]);
        assert!(!args.iter().any(|a| a == "--resume"));
        assert!(args.windows(2).any(|w| w == ["--model", "claude-sonnet-4-5"]));
    }
}
