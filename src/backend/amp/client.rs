use std::path::Path;
use tokio::process::Command;

/// Configuration for the Amp CLI.
#[derive(Debug, Clone)]
pub struct AmpConfig {
    /// Path to the amp CLI binary
    pub cli_path: String,
    /// Arguments placed before the generated flags (wrapper scripts, tests).
    pub cli_args: Vec<String>,
    /// Default mode (smart, rush)
    pub default_mode: Option<String>,
    /// Amp API key for authentication
    pub api_key: Option<String>,
}

impl Default for AmpConfig {
    fn default() -> Self {
        Self {
            cli_path: std::env::var("AMP_CLI_PATH").unwrap_or_else(|_| "amp".to_string()),
            cli_args: Vec::new(),
            default_mode: None,
            api_key: std::env::var("AMP_API_KEY").ok(),
        }
    }
}

impl AmpConfig {
    /// Build the CLI invocation. A thread id continues that thread via
    /// `threads continue`; the message is always the final argument.
    pub fn command(&self, working_dir: &Path, thread_id: Option<&str>, message: &str) -> Command {
        let mut cmd = Command::new(&self.cli_path);
        cmd.current_dir(working_dir).args(&self.cli_args);

        if let Some(thread) = thread_id {
            cmd.arg("threads").arg("continue").arg(thread);
        }

        // Core flags for headless execution
        cmd.arg("--execute")
            .arg("--stream-json")
            .arg("--dangerously-allow-all");

        if let Some(m) = self.default_mode.as_deref() {
            cmd.arg("--mode").arg(m);
        }

        if let Some(key) = &self.api_key {
            cmd.env("AMP_API_KEY", key);
        }

        cmd.arg(message);
        cmd
    }
}
