//! Exponentially smoothed per-agent reward.
//!
//! `reward ← (1 - α)·reward + α·observed`, seeded from each profile's
//! baseline `quality_score` before the first observation.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use crate::agents::AgentProfile;

/// Baseline used for agents that were never seeded.
pub const DEFAULT_BASELINE: f64 = 0.5;

const SPEED_WEIGHT: f64 = 0.3;
const COST_WEIGHT: f64 = 0.3;
const QUALITY_WEIGHT: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RewardState {
    pub reward: f64,
    pub observations: u64,
    pub last_observed: Option<f64>,
}

impl RewardState {
    fn seeded(baseline: f64) -> Self {
        Self {
            reward: baseline.clamp(0.0, 1.0),
            observations: 0,
            last_observed: None,
        }
    }
}

pub struct RewardTracker {
    alpha: f64,
    states: RwLock<HashMap<String, Arc<Mutex<RewardState>>>>,
}

impl RewardTracker {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Tracker seeded with every profile's `quality_score`.
    pub fn seeded(alpha: f64, profiles: &[AgentProfile]) -> Self {
        let tracker = Self::new(alpha);
        for profile in profiles {
            tracker.seed(&profile.name, profile.quality_score);
        }
        tracker
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Set the baseline for `agent` if it has none yet.
    pub fn seed(&self, agent: &str, baseline: f64) {
        self.states
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(agent.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RewardState::seeded(baseline))));
    }

    fn state(&self, agent: &str) -> Arc<Mutex<RewardState>> {
        if let Some(existing) = self
            .states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(agent)
        {
            return Arc::clone(existing);
        }
        self.seed(agent, DEFAULT_BASELINE);
        self.state(agent)
    }

    /// Fold one observation into the agent's reward and return the new value.
    pub fn update(&self, agent: &str, observed_reward: f64) -> f64 {
        let observed = if observed_reward.is_finite() {
            observed_reward.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let state = self.state(agent);
        let mut s = state.lock().unwrap_or_else(PoisonError::into_inner);
        s.reward = (1.0 - self.alpha) * s.reward + self.alpha * observed;
        s.observations += 1;
        s.last_observed = Some(observed);
        tracing::debug!(
            agent = %agent,
            observed = observed,
            reward = s.reward,
            "Reward updated"
        );
        s.reward
    }

    pub fn get(&self, agent: &str) -> f64 {
        match self
            .states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(agent)
        {
            Some(state) => state.lock().unwrap_or_else(PoisonError::into_inner).reward,
            None => DEFAULT_BASELINE,
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, RewardState> {
        self.states
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, state)| {
                (
                    name.clone(),
                    *state.lock().unwrap_or_else(PoisonError::into_inner),
                )
            })
            .collect()
    }

    /// Current reward of every known agent.
    pub fn rewards(&self) -> HashMap<String, f64> {
        self.snapshot()
            .into_iter()
            .map(|(name, state)| (name, state.reward))
            .collect()
    }
}

/// `1 / (1 + cost)`: free calls score 1.0.
pub fn cost_score(cost_usd: f64) -> f64 {
    1.0 / (1.0 + cost_usd.max(0.0))
}

/// Ratio of typical to observed latency, capped at 1.0.
pub fn speed_score(typical: Duration, observed: Duration) -> f64 {
    if observed.is_zero() {
        return 1.0;
    }
    (typical.as_secs_f64() / observed.as_secs_f64()).min(1.0)
}

/// Weighted blend fed to [`RewardTracker::update`]:
/// `0.3·speed + 0.3·cost + 0.4·quality`.
pub fn observed_reward(
    profile: &AgentProfile,
    duration: Duration,
    cost_usd: f64,
    quality: f64,
) -> f64 {
    SPEED_WEIGHT * speed_score(profile.typical_latency(), duration)
        + COST_WEIGHT * cost_score(cost_usd)
        + QUALITY_WEIGHT * quality.clamp(0.0, 1.0)
}
