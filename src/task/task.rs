//! Task descriptor submitted to the orchestrator.
//!
//! # Invariants
//! - `max_iterations >= 1` (clamped on construction and when read)
//! - Only `assigned_agent` and `agent_switch_count` change during execution,
//!   and only through the crate-internal mutators used by the pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque task identifier. Caller-supplied or generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a fresh random ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of work, used by the selector. Agent profiles tag the kinds they
/// handle well with the same values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Security,
    Architecture,
    GithubWorkflow,
    BulkAnalysis,
    #[default]
    General,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Security => "security",
            TaskType::Architecture => "architecture",
            TaskType::GithubWorkflow => "github_workflow",
            TaskType::BulkAnalysis => "bulk_analysis",
            TaskType::General => "general",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file or artifact the task refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFile {
    pub path: String,
    /// Size in bytes, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl From<&str> for TaskFile {
    fn from(path: &str) -> Self {
        Self {
            path: path.to_string(),
            size: None,
        }
    }
}

fn default_max_iterations() -> u32 {
    1
}

fn default_target_quality() -> f64 {
    0.8
}

/// A unit of work submitted for execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: TaskId,
    pub prompt: String,
    #[serde(default)]
    pub task_type: TaskType,
    /// Forces routing to a security-tagged agent regardless of `task_type`.
    #[serde(default)]
    pub requires_security: bool,
    /// Estimated size of referenced material, in tokens.
    #[serde(default)]
    pub context_size: u64,
    #[serde(default)]
    pub files: Vec<TaskFile>,
    /// Maximum USD the task may spend.
    #[serde(default)]
    pub budget: Option<f64>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_target_quality")]
    pub target_quality: f64,

    #[serde(default, skip_deserializing)]
    assigned_agent: Option<String>,
    #[serde(default, skip_deserializing)]
    agent_switch_count: u32,
}

impl Task {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            prompt: prompt.into(),
            task_type: TaskType::General,
            requires_security: false,
            context_size: 0,
            files: Vec::new(),
            budget: None,
            max_iterations: default_max_iterations(),
            target_quality: default_target_quality(),
            assigned_agent: None,
            agent_switch_count: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_type(mut self, task_type: TaskType) -> Self {
        self.task_type = task_type;
        self
    }

    pub fn requiring_security(mut self) -> Self {
        self.requires_security = true;
        self
    }

    pub fn with_context_size(mut self, tokens: u64) -> Self {
        self.context_size = tokens;
        self
    }

    pub fn with_files<I, F>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<TaskFile>,
    {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_budget(mut self, usd: f64) -> Self {
        self.budget = Some(usd);
        self
    }

    /// Set the refinement loop bounds. `max_iterations` is clamped to at least 1.
    pub fn with_iterations(mut self, max_iterations: u32, target_quality: f64) -> Self {
        self.max_iterations = max_iterations.max(1);
        self.target_quality = target_quality;
        self
    }

    /// Effective iteration bound (never zero).
    pub fn iteration_limit(&self) -> u32 {
        self.max_iterations.max(1)
    }

    pub fn assigned_agent(&self) -> Option<&str> {
        self.assigned_agent.as_deref()
    }

    pub fn agent_switch_count(&self) -> u32 {
        self.agent_switch_count
    }

    /// Assign an agent without counting a switch (initial selection, failover).
    pub(crate) fn assign(&mut self, agent: &str) {
        self.assigned_agent = Some(agent.to_string());
    }

    /// Assign an agent chosen by the switch controller.
    pub(crate) fn record_switch(&mut self, agent: &str) {
        self.assigned_agent = Some(agent.to_string());
        self.agent_switch_count = self.agent_switch_count.saturating_add(1);
    }
}
