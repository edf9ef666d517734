//! Drives one task through its refinement loop.
//!
//! Each iteration resolves an agent (sticky across iterations until a switch
//! or failover), invokes it through the circuit breaker under a wall-clock
//! limit, scores the result, feeds the reward tracker and finally lets the
//! switch controller decide whether the next iteration should run on a
//! different agent.

use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{emit, OrchestratorEvent, TraceRecord, TraceSink};
use crate::agents::AgentRegistry;
use crate::backend::{AgentOutput, InvocationRequest, ProgressSink};
use crate::config::Config;
use crate::cost::cost_usd_from_usage;
use crate::error::AgentError;
use crate::quality::{ConstantEvaluator, QualityEvaluator};
use crate::reward::observed_reward;
use crate::routing::{
    is_checkpoint, AgentSelector, Checkpoint, SwitchController, SwitchDecision, SwitchPolicy,
};
use crate::task::{AgentSwitchRecord, ExecutionResult, Task, TaskOutcome, TaskStatus};
use crate::util::build_history_context;

/// Upper bound on the prior-progress summary handed to a new agent.
const HANDOFF_SUMMARY_CHARS: usize = 4000;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub struct ExecutionPipeline {
    registry: Arc<AgentRegistry>,
    selector: AgentSelector,
    switches: SwitchController,
    evaluator: Arc<dyn QualityEvaluator>,
    events: broadcast::Sender<OrchestratorEvent>,
    trace: Option<Arc<dyn TraceSink>>,
    invocation_timeout: Duration,
    working_dir: PathBuf,
}

/// A successful adapter call, before scoring.
struct Invocation {
    agent: String,
    output: AgentOutput,
    duration: Duration,
}

/// Everything accumulated while a task runs.
#[derive(Default)]
struct RunLog {
    attempts: Vec<ExecutionResult>,
    switches: Vec<AgentSwitchRecord>,
    history: Vec<(String, String)>,
    /// Continuation token of the currently assigned agent.
    session_id: Option<String>,
    content: Option<String>,
    quality: Option<f64>,
    total_cost_usd: f64,
    total_tokens: u64,
    iterations: u32,
}

impl RunLog {
    fn final_agent(&self) -> Option<String> {
        self.attempts
            .iter()
            .rev()
            .find(|a| a.succeeded)
            .map(|a| a.agent.clone())
    }
}

impl ExecutionPipeline {
    pub fn new(registry: Arc<AgentRegistry>, config: &Config) -> Self {
        let selector = AgentSelector::new(config.large_context_threshold);
        let policy = SwitchPolicy {
            degradation_margin: config.degradation_margin,
            cost_benefit_factor: config.cost_benefit_factor,
            max_switches: config.max_switches,
        };
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            registry,
            switches: SwitchController::new(policy, selector.clone()),
            selector,
            evaluator: Arc::new(ConstantEvaluator::default()),
            events,
            trace: None,
            invocation_timeout: config.invocation_timeout,
            working_dir: config.working_dir.clone(),
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn QualityEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn with_trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Run `task` to a terminal status.
    ///
    /// Never returns an error: failures, cancellation and missed targets are
    /// all reported through [`TaskOutcome::status`].
    pub async fn run(&self, task: &mut Task, cancel: &CancellationToken) -> TaskOutcome {
        let started = Instant::now();
        let limit = task.iteration_limit();
        let policy = self.switches.policy();
        let mut log = RunLog::default();
        let mut stop_reason: Option<&'static str> = None;
        let mut switch_cap_hit = false;

        info!(
            task_id = %task.id,
            task_type = %task.task_type,
            max_iterations = limit,
            target_quality = task.target_quality,
            "Starting task"
        );

        for iteration in 1..=limit {
            if let Some(budget) = task.budget {
                if log.total_cost_usd >= budget {
                    info!(
                        task_id = %task.id,
                        spent = log.total_cost_usd,
                        budget = budget,
                        "Task budget exhausted"
                    );
                    stop_reason = Some(TaskStatus::BUDGET_EXHAUSTED);
                    break;
                }
            }

            let invocation = match self
                .invoke_with_failover(task, iteration, &mut log, cancel)
                .await
            {
                Ok(invocation) => invocation,
                Err(AgentError::Cancelled) => {
                    info!(task_id = %task.id, iteration = iteration, "Task cancelled");
                    return self.finish(task, TaskStatus::Cancelled, log, started);
                }
                Err(e) => {
                    warn!(task_id = %task.id, iteration = iteration, error = %e, "Task failed");
                    let status = TaskStatus::Failed {
                        reason: e.to_string(),
                    };
                    return self.finish(task, status, log, started);
                }
            };

            let (quality, completed) = self.record_success(task, iteration, invocation, &mut log).await;

            if completed && quality >= task.target_quality {
                return self.finish(task, TaskStatus::Completed, log, started);
            }
            if iteration == limit {
                break;
            }

            let fatal = !completed;
            if fatal || is_checkpoint(iteration, limit) {
                let degraded = fatal || quality < task.target_quality - policy.degradation_margin;
                if degraded && task.agent_switch_count() >= policy.max_switches {
                    switch_cap_hit = true;
                }
                let remaining = task.budget.map(|b| (b - log.total_cost_usd).max(0.0));
                let state = self.registry.routing_state();
                if let Some(decision) = self.switches.should_switch(
                    task,
                    iteration,
                    Checkpoint { quality, fatal },
                    self.registry.profiles(),
                    &state,
                    remaining,
                ) {
                    self.apply_switch(task, iteration, decision, &mut log);
                }
            }
        }

        let status = if log.content.is_none() {
            TaskStatus::Failed {
                reason: stop_reason
                    .unwrap_or("no successful invocation")
                    .to_string(),
            }
        } else {
            let reason = stop_reason.unwrap_or(if switch_cap_hit {
                TaskStatus::SWITCH_BUDGET_EXHAUSTED
            } else {
                TaskStatus::MAX_ITERATIONS_REACHED
            });
            TaskStatus::CompletedBelowTarget {
                reason: reason.to_string(),
            }
        };
        self.finish(task, status, log, started)
    }

    /// Invoke the assigned agent, re-selecting on retryable errors until a
    /// call succeeds or no candidate is left for this iteration.
    async fn invoke_with_failover(
        &self,
        task: &mut Task,
        iteration: u32,
        log: &mut RunLog,
        cancel: &CancellationToken,
    ) -> Result<Invocation, AgentError> {
        let mut failed: Vec<String> = Vec::new();
        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }

            let current = task.assigned_agent().map(str::to_string);
            let agent = match current {
                Some(agent) if !failed.contains(&agent) => agent,
                previous => {
                    let selection = self.selector.select(
                        task,
                        self.registry.profiles(),
                        &self.registry.routing_state(),
                        &failed,
                    )?;
                    if let Some(previous) = previous {
                        info!(
                            task_id = %task.id,
                            from = %previous,
                            to = %selection.agent,
                            iteration = iteration,
                            "Failing over to another agent"
                        );
                        log.session_id = None;
                    }
                    info!(
                        task_id = %task.id,
                        agent = %selection.agent,
                        rule = selection.rule.as_str(),
                        "Agent selected"
                    );
                    task.assign(&selection.agent);
                    emit(
                        &self.events,
                        OrchestratorEvent::AgentSelected {
                            task_id: task.id.clone(),
                            agent: selection.agent.clone(),
                            reason: selection.rule.as_str().to_string(),
                        },
                    );
                    selection.agent
                }
            };

            let prompt = build_prompt(task, log);
            let session_id = log.session_id.clone();
            let started = Instant::now();
            match self.invoke_once(task, &agent, prompt, session_id, cancel).await {
                Ok(output) => {
                    return Ok(Invocation {
                        agent,
                        output,
                        duration: started.elapsed(),
                    })
                }
                Err(AgentError::Cancelled) => return Err(AgentError::Cancelled),
                Err(e) if e.is_retryable() => {
                    warn!(
                        task_id = %task.id,
                        agent = %agent,
                        iteration = iteration,
                        error = %e,
                        "Agent invocation failed, re-selecting"
                    );
                    if !matches!(e, AgentError::CircuitOpen { .. }) {
                        log.attempts.push(ExecutionResult::failed(
                            &agent,
                            iteration,
                            started.elapsed().as_millis() as u64,
                            e.to_string(),
                        ));
                    }
                    failed.push(agent);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One breaker-guarded, time-limited adapter call. Cancellation drops the
    /// call before it settles, so breaker state is left untouched.
    async fn invoke_once(
        &self,
        task: &Task,
        agent: &str,
        prompt: String,
        session_id: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<AgentOutput, AgentError> {
        let adapter = self.registry.adapter_for(agent)?;
        let request = InvocationRequest {
            agent: agent.to_string(),
            model: self.registry.profile(agent).and_then(|p| p.model.clone()),
            prompt,
            session_id,
            working_dir: self.working_dir.clone(),
        };
        let progress = ProgressSink::new(task.id.clone(), agent, self.events.clone());
        let limit = self.invocation_timeout;

        debug!(
            task_id = %task.id,
            agent = %agent,
            resume = ?request.session_id,
            "Invoking agent"
        );
        let invocation = async {
            match tokio::time::timeout(limit, adapter.invoke(&request, &progress, cancel)).await {
                Ok(result) => result,
                Err(_) => Err(AgentError::Timeout {
                    agent: agent.to_string(),
                    after: limit,
                }),
            }
        };
        let call = self.registry.breaker().call_async(agent, move || invocation);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            result = call => result,
        }
    }

    /// Price, score and log a successful call. Returns `(quality, completed)`.
    async fn record_success(
        &self,
        task: &Task,
        iteration: u32,
        invocation: Invocation,
        log: &mut RunLog,
    ) -> (f64, bool) {
        let Invocation {
            agent,
            output,
            duration,
        } = invocation;
        let profile = self.registry.profile(&agent);

        // reported cost, else priced tokens, else the profile's flat estimate
        let cost_usd = output
            .cost_usd
            .or_else(|| {
                profile
                    .and_then(|p| p.model.as_deref())
                    .and_then(|model| cost_usd_from_usage(model, &output.usage()))
            })
            .or_else(|| profile.map(|p| p.cost_per_call))
            .unwrap_or(0.0);

        let quality = if output.completed {
            let score = self.evaluator.evaluate(task, &output.content).await;
            if score.is_finite() {
                score.clamp(0.0, 1.0)
            } else {
                0.0
            }
        } else {
            warn!(task_id = %task.id, agent = %agent, iteration = iteration, "Agent run ended incomplete");
            0.0
        };

        if let Some(profile) = profile {
            let observed = observed_reward(profile, duration, cost_usd, quality);
            self.registry.rewards().update(&agent, observed);
        }

        let tokens = output.usage().total();
        let duration_ms = duration.as_millis() as u64;
        log.total_cost_usd += cost_usd;
        log.total_tokens = log.total_tokens.saturating_add(tokens);
        log.iterations = iteration;

        if let Some(trace) = &self.trace {
            trace.record(TraceRecord {
                task_id: task.id.clone(),
                agent: agent.clone(),
                iteration,
                cost_usd,
                tokens,
                duration_ms,
            });
        }

        info!(
            task_id = %task.id,
            agent = %agent,
            iteration = iteration,
            cost_usd = cost_usd,
            tokens = tokens,
            quality = quality,
            "Iteration finished"
        );

        log.session_id = output.session_id.clone();
        log.history.push((
            format!("{} (iteration {})", agent, iteration),
            output.content.clone(),
        ));
        log.content = Some(output.content.clone());
        log.quality = Some(quality);
        log.attempts.push(ExecutionResult {
            agent,
            iteration,
            content: output.content,
            input_tokens: output.input_tokens,
            output_tokens: output.output_tokens,
            cost_usd,
            duration_ms,
            session_id: output.session_id,
            succeeded: true,
            completed: output.completed,
            quality: Some(quality),
            error: None,
        });
        (quality, output.completed)
    }

    fn apply_switch(
        &self,
        task: &mut Task,
        iteration: u32,
        decision: SwitchDecision,
        log: &mut RunLog,
    ) {
        info!(
            task_id = %task.id,
            from = %decision.from_agent,
            to = %decision.to_agent,
            reason = %decision.reason,
            iteration = iteration,
            "Switching agent"
        );
        task.record_switch(&decision.to_agent);
        // the new agent starts a fresh session and gets a summary instead
        log.session_id = None;
        emit(
            &self.events,
            OrchestratorEvent::AgentSwitched {
                task_id: task.id.clone(),
                from: decision.from_agent.clone(),
                to: decision.to_agent.clone(),
                reason: decision.reason,
                iteration,
            },
        );
        log.switches.push(AgentSwitchRecord {
            from_agent: decision.from_agent,
            to_agent: decision.to_agent,
            reason: decision.reason,
            iteration,
            cost_impact: decision.cost_impact,
            at: Utc::now(),
        });
    }

    fn finish(&self, task: &Task, status: TaskStatus, log: RunLog, started: Instant) -> TaskOutcome {
        let duration_ms = started.elapsed().as_millis() as u64;
        let final_agent = log.final_agent();

        if let (Some(agent), false) = (&final_agent, status.is_terminal_failure()) {
            emit(
                &self.events,
                OrchestratorEvent::TaskCompleted {
                    task_id: task.id.clone(),
                    agent: agent.clone(),
                    cost_usd: log.total_cost_usd,
                    tokens: log.total_tokens,
                    duration_ms,
                },
            );
        }
        info!(
            task_id = %task.id,
            status = ?status,
            agent = ?final_agent,
            iterations = log.iterations,
            switches = task.agent_switch_count(),
            cost_usd = log.total_cost_usd,
            "Task finished"
        );

        TaskOutcome {
            task_id: task.id.clone(),
            target_met: matches!(status, TaskStatus::Completed),
            status,
            final_agent,
            content: log.content,
            quality: log.quality,
            iterations: log.iterations,
            total_cost_usd: log.total_cost_usd,
            total_tokens: log.total_tokens,
            duration_ms,
            agent_switch_count: task.agent_switch_count(),
            switches: log.switches,
            attempts: log.attempts,
        }
    }
}

/// Prompt for the next call. The first call gets the task prompt as is; a
/// resumed session gets a short continuation; anything else (switch,
/// failover, or a CLI without sessions) gets the task plus a summary of the
/// work so far.
fn build_prompt(task: &Task, log: &RunLog) -> String {
    if log.history.is_empty() {
        return task.prompt.clone();
    }
    if log.session_id.is_some() {
        let mut prompt = format!(
            "Continue working on this task and improve your previous result.\n\nTask:\n{}",
            task.prompt
        );
        if let Some(quality) = log.quality {
            prompt.push_str(&format!(
                "\n\nYour previous result scored {:.2}; the target is {:.2}.",
                quality, task.target_quality
            ));
        }
        return prompt;
    }
    let summary = build_history_context(&log.history, HANDOFF_SUMMARY_CHARS);
    format!(
        "{}\n\n## Progress so far\n\nOther runs have already worked on this task. Their latest results:\n\n{}Continue from this point instead of starting over.",
        task.prompt, summary
    )
}
