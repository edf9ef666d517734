//! Rule-based agent selection.
//!
//! Rules, first match wins:
//! 1. security (or architecture) work goes to the most capable tagged agent
//! 2. GitHub workflow work goes to a workflow-tagged agent
//! 3. large-context work goes to the agent with the largest window
//! 4. otherwise the best `reward / (1 + cost_per_call)` wins
//!
//! Rules 1-3 skip open circuits and try the next candidate under the same
//! rule before falling through.

use std::cmp::Ordering;

use crate::agents::AgentProfile;
use crate::error::AgentError;
use crate::task::{Task, TaskType};

use super::RoutingState;

/// Tasks referencing more files than this route as large-context.
pub const LARGE_FILE_COUNT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionRule {
    Security,
    Architecture,
    GithubWorkflow,
    LargeContext,
    BestReward,
}

impl SelectionRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionRule::Security => "security_critical",
            SelectionRule::Architecture => "architecture",
            SelectionRule::GithubWorkflow => "github_workflow",
            SelectionRule::LargeContext => "large_context",
            SelectionRule::BestReward => "best_reward",
        }
    }
}

impl std::fmt::Display for SelectionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub agent: String,
    pub rule: SelectionRule,
}

#[derive(Debug, Clone)]
pub struct AgentSelector {
    large_context_threshold: u64,
}

impl AgentSelector {
    pub fn new(large_context_threshold: u64) -> Self {
        Self {
            large_context_threshold,
        }
    }

    pub fn large_context_threshold(&self) -> u64 {
        self.large_context_threshold
    }

    fn is_large_context(&self, task: &Task) -> bool {
        task.context_size > self.large_context_threshold || task.files.len() > LARGE_FILE_COUNT
    }

    /// Pick an agent for `task`, ignoring agents in `exclude`.
    pub fn select(
        &self,
        task: &Task,
        profiles: &[AgentProfile],
        state: &RoutingState,
        exclude: &[String],
    ) -> Result<Selection, AgentError> {
        let available: Vec<&AgentProfile> = profiles
            .iter()
            .filter(|p| !exclude.iter().any(|e| e == &p.name))
            .filter(|p| !state.is_open(&p.name))
            .collect();

        let capability = if task.requires_security || task.task_type == TaskType::Security {
            Some((TaskType::Security, SelectionRule::Security))
        } else if task.task_type == TaskType::Architecture {
            Some((TaskType::Architecture, SelectionRule::Architecture))
        } else {
            None
        };
        if let Some((tag, rule)) = capability {
            if let Some(agent) = most_capable(&available, tag) {
                return Ok(Selection { agent, rule });
            }
            tracing::debug!(task_id = %task.id, tag = %tag, "No available agent with required strength, falling through");
        }

        if task.task_type == TaskType::GithubWorkflow {
            if let Some(agent) = most_capable(&available, TaskType::GithubWorkflow) {
                return Ok(Selection {
                    agent,
                    rule: SelectionRule::GithubWorkflow,
                });
            }
        }

        if self.is_large_context(task) {
            let widest = available
                .iter()
                .filter(|p| p.context_window > 0)
                .min_by(|a, b| {
                    b.context_window
                        .cmp(&a.context_window)
                        .then_with(|| by_capability(a, b))
                });
            if let Some(p) = widest {
                return Ok(Selection {
                    agent: p.name.clone(),
                    rule: SelectionRule::LargeContext,
                });
            }
        }

        let best = available.iter().min_by(|a, b| {
            let sa = score(a, state);
            let sb = score(b, state);
            sb.total_cmp(&sa)
                .then_with(|| a.cost_per_call.total_cmp(&b.cost_per_call))
                .then_with(|| a.name.cmp(&b.name))
        });
        match best {
            Some(p) => Ok(Selection {
                agent: p.name.clone(),
                rule: SelectionRule::BestReward,
            }),
            None => Err(AgentError::NoAgentAvailable {
                reason: unavailable_reason(profiles, state, exclude),
            }),
        }
    }
}

/// `reward × 1/(1 + cost_per_call)`.
fn score(profile: &AgentProfile, state: &RoutingState) -> f64 {
    state.reward(&profile.name) / (1.0 + profile.cost_per_call.max(0.0))
}

/// Highest quality first, then cheapest, then name.
fn by_capability(a: &AgentProfile, b: &AgentProfile) -> Ordering {
    b.quality_score
        .total_cmp(&a.quality_score)
        .then_with(|| a.cost_per_call.total_cmp(&b.cost_per_call))
        .then_with(|| a.name.cmp(&b.name))
}

fn most_capable(available: &[&AgentProfile], tag: TaskType) -> Option<String> {
    available
        .iter()
        .filter(|p| p.has_strength(tag))
        .min_by(|a, b| by_capability(a, b))
        .map(|p| p.name.clone())
}

fn unavailable_reason(profiles: &[AgentProfile], state: &RoutingState, exclude: &[String]) -> String {
    if profiles.is_empty() {
        return "no agents configured".to_string();
    }
    let open = profiles.iter().filter(|p| state.is_open(&p.name)).count();
    let excluded = profiles
        .iter()
        .filter(|p| exclude.iter().any(|e| e == &p.name))
        .count();
    format!(
        "{} agents configured, {} with open circuits, {} excluded",
        profiles.len(),
        open,
        excluded
    )
}
