//! Agent routing: initial selection and mid-task switching.
//!
//! Both decisions are pure functions of the task, the agent profiles and a
//! [`RoutingState`] snapshot, so they are deterministic and testable without
//! a live breaker or tracker.

mod selector;
mod switch;

pub use selector::{AgentSelector, Selection, SelectionRule, LARGE_FILE_COUNT};
pub use switch::{is_checkpoint, Checkpoint, SwitchController, SwitchDecision, SwitchPolicy};

use std::collections::HashMap;

use crate::circuit_breaker::CircuitState;

/// Point-in-time view of breaker states and rewards.
#[derive(Debug, Clone, Default)]
pub struct RoutingState {
    pub circuits: HashMap<String, CircuitState>,
    pub rewards: HashMap<String, f64>,
}

impl RoutingState {
    /// Agents with no recorded state are closed.
    pub fn is_open(&self, agent: &str) -> bool {
        self.circuits.get(agent) == Some(&CircuitState::Open)
    }

    /// Agents with no recorded reward score 0.
    pub fn reward(&self, agent: &str) -> f64 {
        self.rewards.get(agent).copied().unwrap_or(0.0)
    }

    pub fn with_circuit(mut self, agent: &str, state: CircuitState) -> Self {
        self.circuits.insert(agent.to_string(), state);
        self
    }

    pub fn with_reward(mut self, agent: &str, reward: f64) -> Self {
        self.rewards.insert(agent.to_string(), reward);
        self
    }
}
