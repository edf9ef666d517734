//! Configuration management for the switchboard.
//!
//! Configuration can be set via environment variables:
//! - `SWITCHBOARD_AGENTS_FILE` - Optional. JSON file with agent profiles. Built-in profiles otherwise.
//! - `SWITCHBOARD_WORKING_DIR` - Optional. Directory the agent CLIs run in. Defaults to current directory.
//! - `SWITCHBOARD_FAILURE_THRESHOLD` - Optional. Consecutive failures before a circuit opens. Defaults to `5`.
//! - `SWITCHBOARD_BREAKER_TIMEOUT_SECS` - Optional. Cooldown before an open circuit allows a trial. Defaults to `60`.
//! - `SWITCHBOARD_INVOCATION_TIMEOUT_SECS` - Optional. Wall-clock limit per invocation. Defaults to `600`.
//! - `SWITCHBOARD_LARGE_CONTEXT_THRESHOLD` - Optional. Tokens above which a task routes to a large-context agent. Defaults to `100000`.
//! - `SWITCHBOARD_REWARD_ALPHA` - Optional. Reward smoothing factor. Defaults to `0.1`.
//! - `SWITCHBOARD_DEGRADATION_MARGIN` - Optional. Quality margin below target that triggers a switch. Defaults to `0.20`.
//! - `SWITCHBOARD_COST_BENEFIT_FACTOR` - Optional. Weight on relative cost increase when switching. Defaults to `0.8`.
//! - `SWITCHBOARD_MAX_SWITCHES` - Optional. Per-task switch cap. Defaults to `3`.
//! - `SWITCHBOARD_MAX_PARALLEL` - Optional. Concurrent tasks in `execute_parallel`. Defaults to `4`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::agents::AgentProfile;
use crate::task::TaskType;
use crate::util::env_var_parse;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to read agents file {path}: {source}")]
    AgentsFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse agents file {path}: {source}")]
    AgentsFileParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Routing and resilience configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Agent profiles file; `None` uses the built-in profiles
    pub agents_file: Option<PathBuf>,

    /// Working directory passed to every agent CLI
    pub working_dir: PathBuf,

    /// Consecutive failures before a circuit opens
    pub failure_threshold: u32,

    /// OPEN → HALF_OPEN cooldown
    pub breaker_timeout: Duration,

    /// Wall-clock limit per agent invocation
    pub invocation_timeout: Duration,

    /// Tasks above this many context tokens route to the largest context window
    pub large_context_threshold: u64,

    pub reward_alpha: f64,
    pub degradation_margin: f64,
    pub cost_benefit_factor: f64,
    pub max_switches: u32,
    pub max_parallel: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agents_file: None,
            working_dir: PathBuf::from("."),
            failure_threshold: 5,
            breaker_timeout: Duration::from_secs(60),
            invocation_timeout: Duration::from_secs(600),
            large_context_threshold: 100_000,
            reward_alpha: 0.1,
            degradation_margin: 0.20,
            cost_benefit_factor: 0.8,
            max_switches: 3,
            max_parallel: 4,
        }
    }
}

fn invalid((name, msg): (String, String)) -> ConfigError {
    ConfigError::InvalidValue(name, msg)
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` if a variable is set but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let agents_file = std::env::var("SWITCHBOARD_AGENTS_FILE")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let working_dir = std::env::var("SWITCHBOARD_WORKING_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or(defaults.working_dir.clone()));

        let failure_threshold: u32 =
            env_var_parse("SWITCHBOARD_FAILURE_THRESHOLD", defaults.failure_threshold)
                .map_err(invalid)?;
        if failure_threshold == 0 {
            return Err(ConfigError::InvalidValue(
                "SWITCHBOARD_FAILURE_THRESHOLD".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let breaker_timeout = Duration::from_secs(
            env_var_parse(
                "SWITCHBOARD_BREAKER_TIMEOUT_SECS",
                defaults.breaker_timeout.as_secs(),
            )
            .map_err(invalid)?,
        );
        let invocation_timeout = Duration::from_secs(
            env_var_parse(
                "SWITCHBOARD_INVOCATION_TIMEOUT_SECS",
                defaults.invocation_timeout.as_secs(),
            )
            .map_err(invalid)?,
        );
        let large_context_threshold = env_var_parse(
            "SWITCHBOARD_LARGE_CONTEXT_THRESHOLD",
            defaults.large_context_threshold,
        )
        .map_err(invalid)?;

        let reward_alpha = unit_interval(
            "SWITCHBOARD_REWARD_ALPHA",
            env_var_parse("SWITCHBOARD_REWARD_ALPHA", defaults.reward_alpha).map_err(invalid)?,
        )?;
        let degradation_margin = unit_interval(
            "SWITCHBOARD_DEGRADATION_MARGIN",
            env_var_parse("SWITCHBOARD_DEGRADATION_MARGIN", defaults.degradation_margin)
                .map_err(invalid)?,
        )?;
        let cost_benefit_factor: f64 =
            env_var_parse("SWITCHBOARD_COST_BENEFIT_FACTOR", defaults.cost_benefit_factor)
                .map_err(invalid)?;
        if !cost_benefit_factor.is_finite() || cost_benefit_factor < 0.0 {
            return Err(ConfigError::InvalidValue(
                "SWITCHBOARD_COST_BENEFIT_FACTOR".to_string(),
                "must be a non-negative number".to_string(),
            ));
        }

        let max_switches =
            env_var_parse("SWITCHBOARD_MAX_SWITCHES", defaults.max_switches).map_err(invalid)?;
        let max_parallel: usize =
            env_var_parse("SWITCHBOARD_MAX_PARALLEL", defaults.max_parallel).map_err(invalid)?;

        Ok(Self {
            agents_file,
            working_dir,
            failure_threshold,
            breaker_timeout,
            invocation_timeout,
            large_context_threshold,
            reward_alpha,
            degradation_margin,
            cost_benefit_factor,
            max_switches,
            max_parallel: max_parallel.max(1),
        })
    }

    /// Load agent profiles from `agents_file`, or the built-in set.
    pub fn load_agents(&self) -> Result<Vec<AgentProfile>, ConfigError> {
        match &self.agents_file {
            Some(path) => Ok(AgentsFile::load(path)?.agents),
            None => Ok(AgentsFile::builtin().agents),
        }
    }
}

fn unit_interval(name: &str, value: f64) -> Result<f64, ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("{} is outside [0, 1]", value),
        ))
    }
}

/// On-disk agent profile list: `{"agents": [...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsFile {
    pub agents: Vec<AgentProfile>,
}

impl AgentsFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::AgentsFileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let file: Self =
            serde_json::from_str(&raw).map_err(|source| ConfigError::AgentsFileParse {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::info!(path = %path.display(), agents = file.agents.len(), "Loaded agent profiles");
        Ok(file)
    }

    /// Default profiles for the three supported CLIs.
    pub fn builtin() -> Self {
        let profile = |name: &str,
                       cost: f64,
                       latency_ms: u64,
                       quality: f64,
                       tags: &[TaskType],
                       backend: &str,
                       model: Option<&str>,
                       context_window: u64| AgentProfile {
            name: name.to_string(),
            cost_per_call: cost,
            typical_latency_ms: latency_ms,
            quality_score: quality,
            strength_tags: tags.to_vec(),
            backend: backend.to_string(),
            model: model.map(str::to_string),
            context_window,
        };

        Self {
            agents: vec![
                profile(
                    "claude-opus",
                    0.75,
                    120_000,
                    0.95,
                    &[TaskType::Security, TaskType::Architecture],
                    "claudecode",
                    Some("claude-opus-4-1"),
                    200_000,
                ),
                profile(
                    "claude-sonnet",
                    0.25,
                    60_000,
                    0.85,
                    &[TaskType::General, TaskType::GithubWorkflow],
                    "claudecode",
                    Some("claude-sonnet-4-5"),
                    200_000,
                ),
                profile(
                    "codex",
                    0.20,
                    90_000,
                    0.82,
                    &[TaskType::GithubWorkflow, TaskType::General],
                    "codex",
                    None,
                    272_000,
                ),
                profile(
                    "amp",
                    0.30,
                    150_000,
                    0.80,
                    &[TaskType::BulkAnalysis],
                    "amp",
                    None,
                    1_000_000,
                ),
            ],
        }
    }
}
