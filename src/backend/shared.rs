//! Process plumbing and stream types shared by the CLI adapters.
//!
//! Claude Code and Amp use the same NDJSON streaming protocol; Amp adds a
//! few fields (`usage` on assistant messages, `error`/`message` on results).
//! [`CliEvent`] is the superset that deserializes either. Codex has its own
//! event schema (see [`super::codex::CodexEvent`]) but runs through the same [`run_ndjson`].

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{AgentOutput, ProgressSink};
use crate::error::AgentError;
use crate::util::{safe_truncate_index, truncate_for_log};

const STDERR_TAIL_BYTES: usize = 2000;

// ── Process handle ────────────────────────────────────────────────

/// Handle to a running CLI process. The child is killed when the handle is
/// dropped (`kill_on_drop`), so abandoning an invocation never leaks it.
pub struct ProcessHandle {
    child: Child,
    label: String,
}

impl ProcessHandle {
    /// Spawn `cmd` with piped stdio.
    pub fn spawn(label: &str, agent: &str, mut cmd: Command) -> Result<Self, AgentError> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = cmd.spawn().map_err(|e| {
            error!(agent = %agent, cli = %label, "Failed to spawn CLI: {}", e);
            AgentError::invocation(
                agent,
                format!("failed to spawn {}: {}. Is it installed?", label, e),
            )
        })?;
        Ok(Self {
            child,
            label: label.to_string(),
        })
    }

    /// Kill the underlying CLI process.
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(cli = %self.label, "Failed to kill CLI process: {}", e);
        } else {
            info!(cli = %self.label, "CLI process killed");
        }
    }
}

/// How a CLI process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    pub label: String,
    pub success: bool,
    pub code: Option<i32>,
    /// Last bytes written to stderr.
    pub stderr_tail: String,
}

impl ProcessExit {
    pub fn failure_message(&self) -> String {
        let status = match self.code {
            Some(code) => format!("exit code {}", code),
            None => "a signal".to_string(),
        };
        let stderr = self.stderr_tail.trim();
        if stderr.is_empty() {
            format!("{} exited with {}", self.label, status)
        } else {
            format!("{} exited with {}: {}", self.label, status, stderr)
        }
    }
}

fn spawn_stderr_reader(child: &mut Child, label: &str) -> Option<JoinHandle<String>> {
    let mut stderr = child.stderr.take()?;
    let label = label.to_string();
    Some(tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = stderr.read_to_end(&mut buf).await {
            debug!(cli = %label, "Failed to read CLI stderr: {}", e);
        }
        let text = String::from_utf8_lossy(&buf).into_owned();
        if text.len() <= STDERR_TAIL_BYTES {
            return text;
        }
        // keep the tail, on a char boundary
        let mut start = text.len() - STDERR_TAIL_BYTES;
        while !text.is_char_boundary(start) {
            start += 1;
        }
        text[start..].to_string()
    }))
}

/// Run a CLI that writes one JSON event per stdout line.
///
/// `stdin_payload` is written and stdin closed; otherwise stdin is closed
/// immediately. Lines that fail to parse as `E` are logged and skipped.
/// Cancellation kills the child and returns `Cancelled`.
pub async fn run_ndjson<E, F>(
    label: &str,
    agent: &str,
    cmd: Command,
    stdin_payload: Option<String>,
    cancel: &CancellationToken,
    mut on_event: F,
) -> Result<ProcessExit, AgentError>
where
    E: DeserializeOwned,
    F: FnMut(E),
{
    let mut handle = ProcessHandle::spawn(label, agent, cmd)?;

    let stdin = handle.child.stdin.take();
    match (stdin, stdin_payload) {
        (Some(mut stdin), Some(payload)) => {
            let label = label.to_string();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                    error!(cli = %label, "Failed to write prompt to CLI stdin: {}", e);
                }
                // dropping stdin closes it so the CLI sees EOF
            });
        }
        (stdin, _) => drop(stdin),
    }

    let stderr_task = spawn_stderr_reader(&mut handle.child, label);
    let stdout = handle
        .child
        .stdout
        .take()
        .ok_or_else(|| AgentError::invocation(agent, format!("failed to capture {} stdout", label)))?;
    let mut lines = BufReader::new(stdout).lines();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            line = lines.next_line() => Some(line),
        };
        let line = match next {
            None => {
                handle.kill().await;
                return Err(AgentError::Cancelled);
            }
            Some(Ok(Some(line))) => line,
            Some(Ok(None)) => break,
            Some(Err(e)) => {
                warn!(agent = %agent, cli = %label, "Failed to read CLI stdout: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<E>(&line) {
            Ok(event) => on_event(event),
            Err(e) => {
                // some CLIs interleave plain log lines with events
                warn!(
                    agent = %agent,
                    cli = %label,
                    "Failed to parse CLI event: {} - line: {}",
                    e,
                    truncate_for_log(&line, 200)
                );
            }
        }
    }

    let waited = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        status = handle.child.wait() => Some(status),
    };
    let status = match waited {
        None => {
            handle.kill().await;
            return Err(AgentError::Cancelled);
        }
        Some(Ok(status)) => status,
        Some(Err(e)) => {
            return Err(AgentError::invocation(
                agent,
                format!("failed to wait for {}: {}", label, e),
            ))
        }
    };

    let stderr_tail = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    if status.success() {
        debug!(agent = %agent, cli = %label, "CLI exited successfully");
    } else {
        warn!(agent = %agent, cli = %label, "CLI exited with status: {}", status);
    }

    Ok(ProcessExit {
        label: label.to_string(),
        success: status.success(),
        code: status.code(),
        stderr_tail,
    })
}

// ── NDJSON event types ────────────────────────────────────────────

/// Events emitted by Claude Code / Amp CLIs in stream-json mode.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum CliEvent {
    #[serde(rename = "system")]
    System(SystemEvent),
    #[serde(rename = "stream_event")]
    StreamEvent(StreamEventWrapper),
    #[serde(rename = "assistant")]
    Assistant(AssistantEvent),
    #[serde(rename = "result")]
    Result(ResultEvent),
    /// `user` tool-result echoes and anything newer than this parser.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemEvent {
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamEventWrapper {
    pub event: StreamEvent,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { delta: Delta },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Delta {
    #[serde(rename = "type")]
    pub delta_type: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantEvent {
    pub message: AssistantMessage,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    /// Amp extension; Claude Code reports usage on the result instead.
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default)]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    pub cache_read_input_tokens: Option<u64>,
}

impl Usage {
    /// Input tokens including cache writes and reads.
    pub fn input(&self) -> u64 {
        self.input_tokens.unwrap_or(0)
            + self.cache_creation_input_tokens.unwrap_or(0)
            + self.cache_read_input_tokens.unwrap_or(0)
    }

    pub fn output(&self) -> u64 {
        self.output_tokens.unwrap_or(0)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse { name: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultEvent {
    pub subtype: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub num_turns: Option<u32>,
    #[serde(default)]
    pub usage: Option<Usage>,
    /// Amp extension: separate error field.
    #[serde(default)]
    pub error: Option<String>,
    /// Amp extension: additional error context.
    #[serde(default)]
    pub message: Option<String>,
    /// Claude Code puts errors in an array field.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ResultEvent {
    /// Whether the result text is an upstream API error rather than agent output.
    pub fn looks_like_api_error(&self) -> bool {
        let text = self.result.as_deref().unwrap_or("");
        text.starts_with("API Error:")
            || text.contains("\"type\":\"error\"")
            || text.contains("\"type\":\"overloaded_error\"")
            || text.contains("\"type\":\"api_error\"")
    }

    /// The run failed outright (as opposed to stopping early).
    pub fn is_failure(&self) -> bool {
        self.subtype == "error"
            || self.looks_like_api_error()
            || (self.is_error && self.subtype == "success")
    }

    /// The agent finished its run. Non-success subtypes such as
    /// `error_max_turns` mean it stopped early.
    pub fn is_complete(&self) -> bool {
        self.subtype == "success" && !self.is_error
    }

    /// Extract the best available error/result message.
    /// Checks `result`, `error`, `message` and `errors` in order, and
    /// unwraps embedded JSON errors (e.g. `402 {"type":"error",...}`).
    pub fn error_message(&self) -> String {
        let from_errors = self
            .errors
            .first()
            .filter(|s| !s.is_empty())
            .map(|s| s.as_str());

        let raw = self
            .result
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.error.as_deref().filter(|s| !s.is_empty()))
            .or(self.message.as_deref().filter(|s| !s.is_empty()))
            .or(from_errors)
            .unwrap_or("Unknown error");

        Self::parse_error_json(raw).unwrap_or_else(|| raw.to_string())
    }

    fn parse_error_json(raw: &str) -> Option<String> {
        let json_str = raw.find('{').map(|idx| &raw[idx..]).unwrap_or(raw);
        let parsed: Value = serde_json::from_str(json_str).ok()?;
        parsed
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .or_else(|| parsed.get("message").and_then(|m| m.as_str()))
            .map(|s| s.to_string())
    }
}

// ── Stream collection ─────────────────────────────────────────────

/// Folds a Claude Code / Amp event stream into an [`AgentOutput`],
/// forwarding text to the progress sink line by line as it arrives.
#[derive(Debug, Default)]
pub struct StreamCollector {
    session_id: Option<String>,
    assistant_text: Vec<String>,
    pending_line: String,
    saw_deltas: bool,
    usage_by_message: HashMap<String, Usage>,
    anonymous_usage: Vec<Usage>,
    result: Option<ResultEvent>,
}

impl StreamCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn flush_complete_lines(&mut self, progress: &ProgressSink) {
        while let Some(idx) = self.pending_line.find('\n') {
            let line: String = self.pending_line.drain(..=idx).collect();
            progress.line(&line);
        }
    }

    fn flush_all(&mut self, progress: &ProgressSink) {
        self.flush_complete_lines(progress);
        if !self.pending_line.is_empty() {
            let rest = std::mem::take(&mut self.pending_line);
            progress.line(&rest);
        }
    }

    pub fn observe(&mut self, event: CliEvent, progress: &ProgressSink) {
        match event {
            CliEvent::System(sys) => {
                debug!(
                    "CLI session initialized: session_id={:?}, model={:?}",
                    sys.session_id, sys.model
                );
                if sys.session_id.is_some() {
                    self.session_id = sys.session_id;
                }
            }
            CliEvent::StreamEvent(wrapper) => {
                if let StreamEvent::ContentBlockDelta { delta } = wrapper.event {
                    if let Some(text) = delta.text.filter(|t| !t.is_empty()) {
                        self.saw_deltas = true;
                        self.pending_line.push_str(&text);
                        self.flush_complete_lines(progress);
                    }
                }
            }
            CliEvent::Assistant(evt) => {
                // a full assistant message ends any partial streamed line
                self.flush_all(progress);
                if self.session_id.is_none() {
                    self.session_id = evt.session_id;
                }
                if let Some(usage) = evt.message.usage {
                    match evt.message.id {
                        Some(id) => {
                            self.usage_by_message.insert(id, usage);
                        }
                        None => self.anonymous_usage.push(usage),
                    }
                }
                for block in evt.message.content {
                    match block {
                        ContentBlock::Text { text } if !text.is_empty() => {
                            if !self.saw_deltas {
                                progress.lines(&text);
                            }
                            self.assistant_text.push(text);
                        }
                        ContentBlock::ToolUse { name } => {
                            progress.line(&format!("[tool] {}", name));
                        }
                        _ => {}
                    }
                }
            }
            CliEvent::Result(res) => {
                debug!(
                    "CLI result: subtype={}, cost={:?}, duration={:?}ms, turns={:?}",
                    res.subtype, res.total_cost_usd, res.duration_ms, res.num_turns
                );
                self.result = Some(res);
            }
            CliEvent::Other => {}
        }
    }

    fn token_totals(&self, result: &ResultEvent) -> (u64, u64) {
        if let Some(usage) = result.usage {
            return (usage.input(), usage.output());
        }
        self.usage_by_message
            .values()
            .chain(self.anonymous_usage.iter())
            .fold((0, 0), |(i, o), u| (i + u.input(), o + u.output()))
    }

    pub fn finish(
        mut self,
        agent: &str,
        exit: &ProcessExit,
        progress: &ProgressSink,
    ) -> Result<AgentOutput, AgentError> {
        self.flush_all(progress);

        let Some(result) = self.result.take() else {
            let message = if exit.success {
                format!("{} exited without a result event", exit.label)
            } else {
                exit.failure_message()
            };
            return Err(AgentError::invocation(agent, message));
        };

        if result.is_failure() {
            return Err(AgentError::invocation(agent, result.error_message()));
        }

        let (input_tokens, output_tokens) = self.token_totals(&result);
        let completed = result.is_complete();
        if !completed {
            warn!(agent = %agent, subtype = %result.subtype, "Agent stopped before finishing its run");
        }

        let content = match result.result.filter(|r| !r.trim().is_empty()) {
            Some(text) => text,
            None => self.assistant_text.join("\n"),
        };
        let session_id = result
            .session_id
            .filter(|s| !s.is_empty())
            .or(self.session_id);

        Ok(AgentOutput {
            content,
            input_tokens,
            output_tokens,
            cost_usd: result.total_cost_usd,
            session_id,
            completed,
        })
    }
}

/// Clip a prompt for debug logs.
pub fn prompt_preview(prompt: &str) -> &str {
    &prompt[..safe_truncate_index(prompt, 80)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::events::OrchestratorEvent;
    use crate::task::TaskId;
    use serde_json::json;
    use tokio::sync::broadcast;

    fn parse(value: serde_json::Value) -> CliEvent {
        serde_json::from_value(value).unwrap()
    }

    fn clean_exit() -> ProcessExit {
        ProcessExit {
            label: "claude".to_string(),
            success: true,
            code: Some(0),
            stderr_tail: String::new(),
        }
    }

    fn sink() -> (ProgressSink, broadcast::Receiver<OrchestratorEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (ProgressSink::new(TaskId::from("t"), "claude-opus", tx), rx)
    }

    fn drain(rx: &mut broadcast::Receiver<OrchestratorEvent>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let OrchestratorEvent::ProgressLine { line, .. } = event {
                lines.push(line);
            }
        }
        lines
    }

    fn success_result(session: &str) -> serde_json::Value {
        json!({
            "type": "result",
            "subtype": "success",
            "result": "Done",
            "session_id": session,
            "is_error": false,
            "total_cost_usd": 0.05,
            "usage": {"input_tokens": 100, "output_tokens": 20, "cache_read_input_tokens": 5}
        })
    }

    // ── Parsing ────────────────────────────────────────────────────

    #[test]
    fn unknown_event_types_parse_as_other() {
        let event = parse(json!({
            "type": "user",
            "message": {"content": [{"type": "tool_result", "tool_use_id": "x", "content": "ok"}]},
            "session_id": "s"
        }));
        assert!(matches!(event, CliEvent::Other));
    }

    #[test]
    fn unknown_content_blocks_parse_as_other() {
        let event = parse(json!({
            "type": "assistant",
            "message": {"content": [{"type": "redacted_thinking", "data": "xx"}, {"type": "text", "text": "hi"}]},
            "session_id": "s"
        }));
        match event {
            CliEvent::Assistant(evt) => {
                assert!(matches!(evt.message.content[0], ContentBlock::Other));
                assert!(matches!(evt.message.content[1], ContentBlock::Text { .. }));
            }
            _ => panic!("Expected Assistant event"),
        }
    }

    #[test]
    fn error_message_unwraps_embedded_json() {
        let res: ResultEvent = serde_json::from_value(json!({
            "subtype": "success",
            "result": "API Error: 402 {\"type\":\"error\",\"error\":{\"type\":\"billing_error\",\"message\":\"Credit balance is too low\"}}",
            "is_error": true
        }))
        .unwrap();
        assert!(res.looks_like_api_error());
        assert!(res.is_failure());
        assert_eq!(res.error_message(), "Credit balance is too low");
    }

    #[test]
    fn error_message_falls_back_through_fields() {
        let res: ResultEvent = serde_json::from_value(json!({
            "subtype": "error",
            "error": "",
            "message": "rate limited"
        }))
        .unwrap();
        assert_eq!(res.error_message(), "rate limited");

        let res: ResultEvent = serde_json::from_value(json!({
            "subtype": "error",
            "errors": ["session expired"]
        }))
        .unwrap();
        assert_eq!(res.error_message(), "session expired");

        let res: ResultEvent = serde_json::from_value(json!({"subtype": "error"})).unwrap();
        assert_eq!(res.error_message(), "Unknown error");
    }

    // ── Collection ─────────────────────────────────────────────────

    #[test]
    fn streamed_deltas_become_progress_lines() {
        let (progress, mut rx) = sink();
        let mut collector = StreamCollector::new();
        collector.observe(
            parse(json!({"type": "system", "subtype": "init", "session_id": "sess-1"})),
            &progress,
        );
        for chunk in ["Reading ", "files\nEditing", " main.rs\n", "tail"] {
            collector.observe(
                parse(json!({
                    "type": "stream_event",
                    "event": {"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": chunk}},
                    "session_id": "sess-1"
                })),
                &progress,
            );
        }
        collector.observe(
            parse(json!({
                "type": "assistant",
                "message": {"content": [{"type": "text", "text": "Reading files\nEditing main.rs\ntail"}]},
                "session_id": "sess-1"
            })),
            &progress,
        );
        collector.observe(parse(success_result("sess-1")), &progress);

        let output = collector.finish("claude-opus", &clean_exit(), &progress).unwrap();
        // assistant text is not re-emitted once deltas were streamed
        assert_eq!(
            drain(&mut rx),
            vec!["Reading files", "Editing main.rs", "tail"]
        );
        assert_eq!(output.content, "Done");
        assert_eq!(output.session_id.as_deref(), Some("sess-1"));
        assert_eq!(output.cost_usd, Some(0.05));
        assert_eq!((output.input_tokens, output.output_tokens), (105, 20));
        assert!(output.completed);
    }

    #[test]
    fn assistant_text_is_emitted_without_deltas() {
        let (progress, mut rx) = sink();
        let mut collector = StreamCollector::new();
        collector.observe(
            parse(json!({
                "type": "assistant",
                "message": {
                    "id": "msg_1",
                    "content": [{"type": "text", "text": "line one\nline two"}, {"type": "tool_use", "id": "t1", "name": "Bash", "input": {}}],
                    "usage": {"input_tokens": 10, "output_tokens": 3}
                },
                "session_id": "T-1"
            })),
            &progress,
        );
        collector.observe(
            parse(json!({
                "type": "assistant",
                "message": {"id": "msg_1", "content": [], "usage": {"input_tokens": 10, "output_tokens": 7}},
                "session_id": "T-1"
            })),
            &progress,
        );
        collector.observe(
            parse(json!({"type": "result", "subtype": "success", "session_id": "T-1", "result": ""})),
            &progress,
        );

        let output = collector.finish("amp", &clean_exit(), &progress).unwrap();
        assert_eq!(drain(&mut rx), vec!["line one", "line two", "[tool] Bash"]);
        // empty result text falls back to the assistant transcript
        assert_eq!(output.content, "line one\nline two");
        // usage for the same message id is counted once
        assert_eq!((output.input_tokens, output.output_tokens), (10, 7));
        assert_eq!(output.cost_usd, None);
    }

    #[test]
    fn max_turns_result_is_incomplete_not_failed() {
        let (progress, _rx) = sink();
        let mut collector = StreamCollector::new();
        collector.observe(
            parse(json!({
                "type": "result",
                "subtype": "error_max_turns",
                "session_id": "s",
                "is_error": false,
                "total_cost_usd": 0.4
            })),
            &progress,
        );
        let output = collector.finish("claude-opus", &clean_exit(), &progress).unwrap();
        assert!(!output.completed);
        assert_eq!(output.cost_usd, Some(0.4));
    }

    #[test]
    fn api_error_result_is_a_failure() {
        let (progress, _rx) = sink();
        let mut collector = StreamCollector::new();
        collector.observe(
            parse(json!({
                "type": "result",
                "subtype": "success",
                "result": "API Error: 529 {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}",
                "session_id": "s"
            })),
            &progress,
        );
        let err = collector.finish("claude-opus", &clean_exit(), &progress).unwrap_err();
        assert_eq!(err, AgentError::invocation("claude-opus", "Overloaded"));
    }

    #[test]
    fn missing_result_reports_exit_status_and_stderr() {
        let (progress, _rx) = sink();
        let exit = ProcessExit {
            label: "claude".to_string(),
            success: false,
            code: Some(1),
            stderr_tail: "Error: not logged in\n".to_string(),
        };
        let err = StreamCollector::new()
            .finish("claude-opus", &exit, &progress)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "agent claude-opus invocation failed: claude exited with exit code 1: Error: not logged in"
        );

        let err = StreamCollector::new()
            .finish("claude-opus", &clean_exit(), &progress)
            .unwrap_err();
        assert!(err.to_string().contains("without a result event"));
    }

    // ── Process runner (unix: uses sh as a fake CLI) ───────────────

    #[cfg(unix)]
    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_ndjson_parses_lines_and_skips_garbage() {
        let cmd = sh(r#"read prompt; echo "not json"; echo "{\"type\":\"system\",\"session_id\":\"$prompt\"}"; echo oops >&2; exit 3"#);
        let mut events = Vec::new();
        let exit = run_ndjson::<CliEvent, _>(
            "fake",
            "a",
            cmd,
            Some("from-stdin\n".to_string()),
            &CancellationToken::new(),
            |e| events.push(e),
        )
        .await
        .unwrap();

        assert_eq!(events.len(), 1);
        match &events[0] {
            CliEvent::System(sys) => assert_eq!(sys.session_id.as_deref(), Some("from-stdin")),
            other => panic!("Expected System event, got {:?}", other),
        }
        assert!(!exit.success);
        assert_eq!(exit.code, Some(3));
        assert_eq!(exit.stderr_tail.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_ndjson_kills_child_on_cancel() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result =
            run_ndjson::<CliEvent, _>("fake", "a", sh("sleep 30"), None, &cancel, |_| {}).await;
        assert_eq!(result.unwrap_err(), AgentError::Cancelled);
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }

    #[tokio::test]
    async fn spawn_failure_is_invocation_failed() {
        let cmd = Command::new("/nonexistent/agent-cli-binary");
        let err = run_ndjson::<CliEvent, _>("ghost", "a", cmd, None, &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(err.counts_as_failure());
        assert!(err.to_string().contains("failed to spawn ghost"));
    }

    #[test]
    fn prompt_preview_is_bounded() {
        let long = "x".repeat(500);
        assert_eq!(prompt_preview(&long).len(), 80);
        assert_eq!(prompt_preview("short"), "short");
    }
}
