//! Orchestrator: the composition root.
//!
//! Owns one [`ExecutionPipeline`] (and through it the agent registry) and
//! runs tasks on it, one at a time or many concurrently. Running tasks are
//! tracked by id so callers can cancel them.

pub mod events;
mod pipeline;

pub use events::{OrchestratorEvent, TraceRecord, TraceSink};
pub use pipeline::ExecutionPipeline;

use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agents::{AgentRegistry, RegistryError};
use crate::circuit_breaker::AgentHealthSnapshot;
use crate::config::Config;
use crate::reward::RewardState;
use crate::task::{Task, TaskId, TaskOutcome};

type RunningTasks = Arc<Mutex<HashMap<TaskId, CancellationToken>>>;

#[derive(Clone)]
pub struct Orchestrator {
    pipeline: Arc<ExecutionPipeline>,
    running: RunningTasks,
    max_parallel: usize,
}

/// Removes a task's cancellation token once it stops running.
struct RunningGuard {
    running: RunningTasks,
    task_id: TaskId,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.task_id);
    }
}

impl Orchestrator {
    pub fn new(pipeline: ExecutionPipeline, max_parallel: usize) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            running: Arc::new(Mutex::new(HashMap::new())),
            max_parallel: max_parallel.max(1),
        }
    }

    /// Orchestrator over the configured agents and the CLI adapters.
    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        let registry = Arc::new(AgentRegistry::from_config(config)?);
        let pipeline = ExecutionPipeline::new(registry, config);
        Ok(Self::new(pipeline, config.max_parallel))
    }

    pub fn pipeline(&self) -> &ExecutionPipeline {
        &self.pipeline
    }

    /// Run one task to completion. Cancellable through [`cancel`](Self::cancel).
    pub async fn execute(&self, task: &mut Task) -> TaskOutcome {
        self.execute_with_cancel(task, CancellationToken::new()).await
    }

    /// Run one task under a caller-owned token. The task can also be
    /// cancelled by id while it runs.
    pub async fn execute_with_cancel(
        &self,
        task: &mut Task,
        cancel: CancellationToken,
    ) -> TaskOutcome {
        let _guard = self.register(&task.id, cancel.clone());
        self.pipeline.run(task, &cancel).await
    }

    /// Run tasks concurrently, at most `max_parallel` at a time. Outcomes are
    /// returned in input order.
    ///
    /// Every task is cancellable by id from the start, including tasks still
    /// waiting for a slot; those finish as `Cancelled` without invoking an
    /// agent.
    pub async fn execute_parallel(&self, tasks: Vec<Task>) -> Vec<TaskOutcome> {
        info!(
            tasks = tasks.len(),
            max_parallel = self.max_parallel,
            "Executing tasks in parallel"
        );
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut handles = Vec::with_capacity(tasks.len());

        for mut task in tasks {
            let cancel = CancellationToken::new();
            let guard = self.register(&task.id, cancel.clone());
            let pipeline = Arc::clone(&self.pipeline);
            let semaphore = Arc::clone(&semaphore);
            let task_id = task.id.clone();
            let handle = tokio::spawn(async move {
                let _guard = guard;
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!(task_id = %task.id, "Task cancelled before it started");
                        return TaskOutcome::cancelled(task.id.clone());
                    }
                    permit = semaphore.acquire_owned() => permit,
                };
                let Ok(_permit) = permit else {
                    return TaskOutcome::failed(task.id.clone(), "scheduler closed");
                };
                pipeline.run(&mut task, &cancel).await
            });
            handles.push((task_id, handle));
        }

        let joined = join_all(
            handles
                .into_iter()
                .map(|(task_id, handle)| async move { (task_id, handle.await) }),
        )
        .await;

        let mut outcomes = Vec::with_capacity(joined.len());
        for (task_id, result) in joined {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!(task_id = %task_id, "Task worker failed: {}", e);
                    outcomes.push(TaskOutcome::failed(task_id, format!("task worker failed: {}", e)));
                }
            }
        }
        outcomes
    }

    /// Track `cancel` under `task_id` until the returned guard drops.
    fn register(&self, task_id: &TaskId, cancel: CancellationToken) -> RunningGuard {
        let previous = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task_id.clone(), cancel);
        if previous.is_some() {
            warn!(task_id = %task_id, "Task id already running; only the newest run can be cancelled by id");
        }
        RunningGuard {
            running: Arc::clone(&self.running),
            task_id: task_id.clone(),
        }
    }

    /// Cancel a running task. Returns `false` if no task with that id is running.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        let token = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(task_id)
            .cloned();
        match token {
            Some(token) => {
                info!(task_id = %task_id, "Cancelling task");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn running(&self) -> Vec<TaskId> {
        let mut ids: Vec<_> = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.pipeline.subscribe()
    }

    /// Breaker state of every agent that has been called.
    pub fn health(&self) -> Vec<AgentHealthSnapshot> {
        self.pipeline.registry().breaker().snapshot_all()
    }

    pub fn rewards(&self) -> BTreeMap<String, RewardState> {
        self.pipeline.registry().rewards().snapshot()
    }
}
