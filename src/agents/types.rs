//! Static agent profiles.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::task::TaskType;

/// Static description of one available agent. Loaded once at startup.
///
/// # Invariants
/// - `quality_score` is in [0, 1]
/// - `cost_per_call >= 0`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Unique agent name (e.g. "claude-opus").
    pub name: String,
    /// Expected USD per invocation.
    pub cost_per_call: f64,
    /// Typical wall-clock latency of one invocation, in milliseconds.
    pub typical_latency_ms: u64,
    /// Baseline capability estimate; seeds the reward tracker.
    pub quality_score: f64,
    /// Task types this agent is known to handle well.
    #[serde(default)]
    pub strength_tags: Vec<TaskType>,
    /// Adapter id in the adapter registry ("claudecode", "amp", "codex").
    pub backend: String,
    /// Model passed to the CLI, if any.
    #[serde(default)]
    pub model: Option<String>,
    /// Supported context window in tokens.
    #[serde(default)]
    pub context_window: u64,
}

impl AgentProfile {
    pub fn has_strength(&self, tag: TaskType) -> bool {
        self.strength_tags.contains(&tag)
    }

    pub fn typical_latency(&self) -> Duration {
        Duration::from_millis(self.typical_latency_ms)
    }

    /// Validate numeric ranges. Returns a message describing the first problem.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("agent name must not be empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.quality_score) {
            return Err(format!(
                "quality_score {} for agent {} is outside [0, 1]",
                self.quality_score, self.name
            ));
        }
        if !self.cost_per_call.is_finite() || self.cost_per_call < 0.0 {
            return Err(format!(
                "cost_per_call {} for agent {} must be a non-negative number",
                self.cost_per_call, self.name
            ));
        }
        Ok(())
    }
}
