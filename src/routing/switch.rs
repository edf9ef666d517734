//! Mid-task agent switching.
//!
//! At a checkpoint the controller compares the observed quality against
//! `target_quality - degradation_margin`. When quality has degraded (or the
//! last run ended with a fatal signal) it asks the selector for a
//! replacement and accepts it only if the reward gain outweighs the relative
//! cost increase:
//!
//! ```text
//! (candidate.reward - current.reward) > (candidate.cost - current.cost) / current.cost * factor
//! ```

use crate::agents::AgentProfile;
use crate::task::{SwitchReason, Task};

use super::{AgentSelector, RoutingState};

#[derive(Debug, Clone, Copy)]
pub struct SwitchPolicy {
    pub degradation_margin: f64,
    pub cost_benefit_factor: f64,
    pub max_switches: u32,
}

impl Default for SwitchPolicy {
    fn default() -> Self {
        Self {
            degradation_margin: 0.20,
            cost_benefit_factor: 0.8,
            max_switches: 3,
        }
    }
}

/// Quality observed at a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Checkpoint {
    pub quality: f64,
    /// The last invocation ended without finishing its run.
    pub fatal: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchDecision {
    pub from_agent: String,
    pub to_agent: String,
    pub reason: SwitchReason,
    pub cost_impact: f64,
}

/// Checkpoints fall after the first iteration and after roughly two thirds
/// of `max_iterations`.
pub fn is_checkpoint(iteration: u32, max_iterations: u32) -> bool {
    let two_thirds = ((f64::from(max_iterations) * 2.0) / 3.0).round() as u32;
    iteration == 1 || iteration == two_thirds.max(1)
}

#[derive(Debug, Clone)]
pub struct SwitchController {
    policy: SwitchPolicy,
    selector: AgentSelector,
}

impl SwitchController {
    pub fn new(policy: SwitchPolicy, selector: AgentSelector) -> Self {
        Self { policy, selector }
    }

    pub fn policy(&self) -> SwitchPolicy {
        self.policy
    }

    /// Decide whether to replace `task`'s assigned agent.
    ///
    /// Always `None` once the task has used up its switch allowance.
    pub fn should_switch(
        &self,
        task: &Task,
        iteration: u32,
        checkpoint: Checkpoint,
        profiles: &[AgentProfile],
        state: &RoutingState,
        remaining_budget: Option<f64>,
    ) -> Option<SwitchDecision> {
        if task.agent_switch_count() >= self.policy.max_switches {
            tracing::debug!(
                task_id = %task.id,
                switches = task.agent_switch_count(),
                "Switch cap reached, keeping current agent"
            );
            return None;
        }
        let current_name = task.assigned_agent()?;

        let threshold = task.target_quality - self.policy.degradation_margin;
        let reason = if checkpoint.fatal {
            SwitchReason::FatalSignal
        } else if checkpoint.quality < threshold {
            SwitchReason::QualityDegraded {
                quality: checkpoint.quality,
                threshold,
            }
        } else {
            return None;
        };

        let candidate = match self.selector.select(
            task,
            profiles,
            state,
            &[current_name.to_string()],
        ) {
            Ok(selection) => selection.agent,
            Err(e) => {
                tracing::debug!(task_id = %task.id, error = %e, "No switch candidate");
                return None;
            }
        };
        let current = profiles.iter().find(|p| p.name == current_name)?;
        let next = profiles.iter().find(|p| p.name == candidate)?;

        if let Some(remaining) = remaining_budget {
            if next.cost_per_call > remaining {
                tracing::info!(
                    task_id = %task.id,
                    candidate = %next.name,
                    cost = next.cost_per_call,
                    remaining = remaining,
                    "Switch candidate exceeds remaining budget"
                );
                return None;
            }
        }

        let gain = state.reward(&next.name) - state.reward(&current.name);
        let relative_cost = relative_cost_increase(current.cost_per_call, next.cost_per_call);
        if gain <= relative_cost * self.policy.cost_benefit_factor {
            tracing::info!(
                task_id = %task.id,
                iteration = iteration,
                from = %current.name,
                candidate = %next.name,
                gain = gain,
                relative_cost = relative_cost,
                "Switch rejected by cost-benefit check"
            );
            return None;
        }

        Some(SwitchDecision {
            from_agent: current.name.clone(),
            to_agent: next.name.clone(),
            reason,
            cost_impact: next.cost_per_call - current.cost_per_call,
        })
    }
}

/// `(next - current) / current`. A free current agent makes any paid
/// candidate infinitely more expensive and a free one no more expensive.
fn relative_cost_increase(current: f64, next: f64) -> f64 {
    if current > 0.0 {
        (next - current) / current
    } else if next > 0.0 {
        f64::INFINITY
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use crate::task::TaskType;

    fn profile(name: &str, cost: f64, quality: f64) -> AgentProfile {
        AgentProfile {
            name: name.to_string(),
            cost_per_call: cost,
            typical_latency_ms: 30_000,
            quality_score: quality,
            strength_tags: vec![TaskType::General],
            backend: "scripted".to_string(),
            model: None,
            context_window: 100_000,
        }
    }

    fn controller() -> SwitchController {
        SwitchController::new(SwitchPolicy::default(), AgentSelector::new(100_000))
    }

    fn running_task(agent: &str) -> Task {
        let mut task = Task::new("implement feature").with_iterations(5, 0.85);
        task.assign(agent);
        task
    }

    fn degraded() -> Checkpoint {
        Checkpoint {
            quality: 0.50,
            fatal: false,
        }
    }

    #[test]
    fn checkpoints() {
        assert!(is_checkpoint(1, 5));
        assert!(!is_checkpoint(2, 5));
        assert!(is_checkpoint(3, 5));
        assert!(is_checkpoint(2, 3));
        assert!(is_checkpoint(1, 1));
    }

    #[test]
    fn degraded_quality_proposes_better_agent() {
        let agents = vec![profile("current", 0.5, 0.5), profile("better", 0.5, 0.9)];
        let state = RoutingState::default()
            .with_reward("current", 0.4)
            .with_reward("better", 0.9);
        let decision = controller()
            .should_switch(&running_task("current"), 3, degraded(), &agents, &state, None)
            .unwrap();
        assert_eq!(decision.to_agent, "better");
        assert_eq!(decision.from_agent, "current");
        assert_eq!(
            decision.reason,
            SwitchReason::QualityDegraded {
                quality: 0.50,
                threshold: 0.85 - 0.20
            }
        );
    }

    #[test]
    fn quality_within_margin_keeps_agent() {
        let agents = vec![profile("current", 0.5, 0.5), profile("better", 0.5, 0.9)];
        let state = RoutingState::default()
            .with_reward("current", 0.4)
            .with_reward("better", 0.9);
        let ok = Checkpoint {
            quality: 0.70,
            fatal: false,
        };
        assert!(controller()
            .should_switch(&running_task("current"), 1, ok, &agents, &state, None)
            .is_none());
    }

    #[test]
    fn fatal_signal_triggers_even_with_good_quality() {
        let agents = vec![profile("current", 0.5, 0.5), profile("better", 0.5, 0.9)];
        let state = RoutingState::default()
            .with_reward("current", 0.4)
            .with_reward("better", 0.9);
        let fatal = Checkpoint {
            quality: 0.95,
            fatal: true,
        };
        let decision = controller()
            .should_switch(&running_task("current"), 1, fatal, &agents, &state, None)
            .unwrap();
        assert_eq!(decision.reason, SwitchReason::FatalSignal);
    }

    #[test]
    fn cost_benefit_rejects_expensive_marginal_gain() {
        // doubling cost needs a gain above 0.8
        let agents = vec![profile("current", 0.5, 0.5), profile("pricey", 1.0, 0.9)];
        let state = RoutingState::default()
            .with_reward("current", 0.4)
            .with_reward("pricey", 0.9);
        assert!(controller()
            .should_switch(&running_task("current"), 2, degraded(), &agents, &state, None)
            .is_none());

        let state = state.with_reward("current", 0.05).with_reward("pricey", 0.9);
        let decision = controller()
            .should_switch(&running_task("current"), 2, degraded(), &agents, &state, None)
            .unwrap();
        assert!((decision.cost_impact - 0.5).abs() < 1e-12);
    }

    #[test]
    fn free_current_agent_only_switches_to_free_candidate() {
        let agents = vec![profile("free", 0.0, 0.3), profile("paid", 0.1, 0.9)];
        let state = RoutingState::default()
            .with_reward("free", 0.1)
            .with_reward("paid", 1.0);
        assert!(controller()
            .should_switch(&running_task("free"), 2, degraded(), &agents, &state, None)
            .is_none());

        let agents = vec![profile("free", 0.0, 0.3), profile("also-free", 0.0, 0.9)];
        let state = RoutingState::default()
            .with_reward("free", 0.1)
            .with_reward("also-free", 0.9);
        assert!(controller()
            .should_switch(&running_task("free"), 2, degraded(), &agents, &state, None)
            .is_some());
    }

    #[test]
    fn candidate_over_remaining_budget_is_rejected() {
        let agents = vec![profile("current", 0.5, 0.5), profile("better", 0.5, 0.9)];
        let state = RoutingState::default()
            .with_reward("current", 0.4)
            .with_reward("better", 0.9);
        assert!(controller()
            .should_switch(&running_task("current"), 2, degraded(), &agents, &state, Some(0.4))
            .is_none());
    }

    #[test]
    fn open_candidate_is_not_proposed() {
        let agents = vec![profile("current", 0.5, 0.5), profile("better", 0.5, 0.9)];
        let state = RoutingState::default()
            .with_reward("current", 0.4)
            .with_reward("better", 0.9)
            .with_circuit("better", CircuitState::Open);
        assert!(controller()
            .should_switch(&running_task("current"), 2, degraded(), &agents, &state, None)
            .is_none());
    }

    #[test]
    fn switch_count_never_exceeds_cap() {
        let agents = vec![profile("a", 0.5, 0.5), profile("b", 0.5, 0.5)];
        let ctl = controller();
        let mut task = running_task("a");
        for iteration in 1..=10 {
            let current = task.assigned_agent().unwrap().to_string();
            let other = if current == "a" { "b" } else { "a" };
            // always make the other agent look much better
            let state = RoutingState::default()
                .with_reward(&current, 0.0)
                .with_reward(other, 1.0);
            if let Some(d) = ctl.should_switch(&task, iteration, degraded(), &agents, &state, None) {
                task.record_switch(&d.to_agent);
            }
            assert!(task.agent_switch_count() <= 3);
        }
        assert_eq!(task.agent_switch_count(), 3);
    }
}
