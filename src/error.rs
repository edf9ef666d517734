//! Error taxonomy for agent invocation and orchestration.
//!
//! Distinguishes between errors that feed the circuit breaker (the agent
//! itself misbehaved), errors that only ask the caller to pick another
//! agent, and terminal conditions that are surfaced to the caller.

use std::time::Duration;

/// Errors produced while selecting or invoking an agent.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AgentError {
    /// The agent's circuit is open; no invocation was attempted.
    #[error("circuit open for agent {agent}")]
    CircuitOpen { agent: String },

    /// Subprocess spawn/exit/parse failure.
    #[error("agent {agent} invocation failed: {message}")]
    InvocationFailed { agent: String, message: String },

    /// The invocation exceeded its wall-clock limit and was killed.
    #[error("agent {agent} timed out after {}s", .after.as_secs())]
    Timeout { agent: String, after: Duration },

    /// Every candidate agent is unavailable.
    #[error("no agent available: {reason}")]
    NoAgentAvailable { reason: String },

    /// Caller-initiated cancellation.
    #[error("task cancelled")]
    Cancelled,

    /// A profile or adapter lookup failed.
    #[error("unknown agent: {0}")]
    UnknownAgent(String),
}

impl AgentError {
    pub fn invocation(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvocationFailed {
            agent: agent.into(),
            message: message.into(),
        }
    }

    /// Whether this error should be recorded as a failure by the circuit breaker.
    ///
    /// Cancellation and open circuits never touch breaker state.
    pub fn counts_as_failure(&self) -> bool {
        matches!(self, Self::InvocationFailed { .. } | Self::Timeout { .. })
    }

    /// Whether the pipeline may absorb this error by re-selecting an agent.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. } | Self::InvocationFailed { .. } | Self::Timeout { .. }
        )
    }

    /// The agent this error is attributed to, if any.
    pub fn agent(&self) -> Option<&str> {
        match self {
            Self::CircuitOpen { agent }
            | Self::InvocationFailed { agent, .. }
            | Self::Timeout { agent, .. } => Some(agent),
            Self::UnknownAgent(agent) => Some(agent),
            Self::NoAgentAvailable { .. } | Self::Cancelled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_classification() {
        assert!(AgentError::invocation("a", "exit 1").counts_as_failure());
        assert!(AgentError::Timeout {
            agent: "a".into(),
            after: Duration::from_secs(5)
        }
        .counts_as_failure());
        assert!(!AgentError::Cancelled.counts_as_failure());
        assert!(!AgentError::CircuitOpen { agent: "a".into() }.counts_as_failure());
    }

    #[test]
    fn retryable_classification() {
        assert!(AgentError::CircuitOpen { agent: "a".into() }.is_retryable());
        assert!(AgentError::invocation("a", "boom").is_retryable());
        assert!(!AgentError::Cancelled.is_retryable());
        assert!(!AgentError::NoAgentAvailable {
            reason: "all open".into()
        }
        .is_retryable());
    }

    #[test]
    fn timeout_display_uses_seconds() {
        let err = AgentError::Timeout {
            agent: "codex".into(),
            after: Duration::from_secs(600),
        };
        assert_eq!(err.to_string(), "agent codex timed out after 600s");
        assert_eq!(err.agent(), Some("codex"));
    }
}
