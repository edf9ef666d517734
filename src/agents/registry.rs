use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use super::AgentProfile;
use crate::backend::{AdapterRegistry, AgentAdapter};
use crate::circuit_breaker::{BreakerConfig, CircuitBreaker};
use crate::config::{Config, ConfigError};
use crate::error::AgentError;
use crate::reward::RewardTracker;
use crate::routing::RoutingState;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Duplicate agent profile: {0}")]
    DuplicateAgent(String),

    #[error("Agent {agent} uses unknown backend {backend}")]
    UnknownBackend { agent: String, backend: String },

    #[error("Invalid profile for {agent}: {message}")]
    InvalidProfile { agent: String, message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// The agent pool: profiles plus the shared breaker, reward tracker and
/// adapters that back them.
pub struct AgentRegistry {
    profiles: Vec<AgentProfile>,
    breaker: CircuitBreaker,
    rewards: RewardTracker,
    adapters: AdapterRegistry,
}

impl AgentRegistry {
    /// Validate profiles against the adapter set. Rewards start at each
    /// profile's baseline quality.
    pub fn new(
        profiles: Vec<AgentProfile>,
        breaker: BreakerConfig,
        reward_alpha: f64,
        adapters: AdapterRegistry,
    ) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        for profile in &profiles {
            if !seen.insert(profile.name.as_str()) {
                return Err(RegistryError::DuplicateAgent(profile.name.clone()));
            }
            profile
                .validate()
                .map_err(|message| RegistryError::InvalidProfile {
                    agent: profile.name.clone(),
                    message,
                })?;
            if !adapters.contains(&profile.backend) {
                return Err(RegistryError::UnknownBackend {
                    agent: profile.name.clone(),
                    backend: profile.backend.clone(),
                });
            }
        }

        let rewards = RewardTracker::seeded(reward_alpha, &profiles);
        Ok(Self {
            profiles,
            breaker: CircuitBreaker::new(breaker),
            rewards,
            adapters,
        })
    }

    /// Registry over the configured profiles and the CLI adapters.
    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        let profiles = config.load_agents()?;
        let registry = Self::new(
            profiles,
            BreakerConfig {
                failure_threshold: config.failure_threshold,
                timeout: config.breaker_timeout,
            },
            config.reward_alpha,
            AdapterRegistry::with_cli_adapters(),
        )?;
        info!(
            agents = registry.profiles.len(),
            "Agent registry ready: {}",
            registry
                .profiles
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(registry)
    }

    pub fn profiles(&self) -> &[AgentProfile] {
        &self.profiles
    }

    pub fn profile(&self, name: &str) -> Option<&AgentProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    pub fn adapter_for(&self, name: &str) -> Result<Arc<dyn AgentAdapter>, AgentError> {
        let profile = self
            .profile(name)
            .ok_or_else(|| AgentError::UnknownAgent(name.to_string()))?;
        self.adapters.get(&profile.backend).ok_or_else(|| {
            AgentError::invocation(name, format!("no adapter for backend {}", profile.backend))
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn rewards(&self) -> &RewardTracker {
        &self.rewards
    }

    /// Snapshot of every profile's circuit state and reward.
    pub fn routing_state(&self) -> RoutingState {
        let mut state = RoutingState::default();
        for profile in &self.profiles {
            state
                .circuits
                .insert(profile.name.clone(), self.breaker.state(&profile.name));
            state
                .rewards
                .insert(profile.name.clone(), self.rewards.get(&profile.name));
        }
        state
    }
}
