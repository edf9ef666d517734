//! Quality evaluation hook.
//!
//! Scoring produced artifacts is an external capability; the orchestrator
//! only needs a score in [0, 1] at each iteration.

use async_trait::async_trait;

use crate::task::Task;

#[async_trait]
pub trait QualityEvaluator: Send + Sync {
    /// Score `artifact` for `task`. Values outside [0, 1] are clamped by the caller.
    async fn evaluate(&self, task: &Task, artifact: &str) -> f64;
}

/// Returns the same score for every artifact. The default scores 1.0, so a
/// task without a real evaluator completes after its first successful run.
#[derive(Debug, Clone, Copy)]
pub struct ConstantEvaluator(pub f64);

impl Default for ConstantEvaluator {
    fn default() -> Self {
        Self(1.0)
    }
}

#[async_trait]
impl QualityEvaluator for ConstantEvaluator {
    async fn evaluate(&self, _task: &Task, _artifact: &str) -> f64 {
        self.0
    }
}
