//! Per-agent circuit breaker.
//!
//! Three states: CLOSED (calls flow), OPEN (calls rejected without invoking
//! the agent), HALF_OPEN (one trial call allowed). There is no background
//! timer: an OPEN circuit whose cooldown has elapsed is moved to HALF_OPEN
//! the next time anyone reads it.
//!
//! Each agent has its own mutex, so tasks targeting different agents never
//! contend. Timestamps use `tokio::time::Instant`, which lets tests drive
//! cooldowns with a paused clock.

use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures that open a closed circuit.
    pub failure_threshold: u32,
    /// Time an open circuit waits before allowing a trial call.
    pub timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Mutable per-agent record.
///
/// # Invariants
/// - `state == Open` implies `failure_count >= failure_threshold`
/// - `trial_in_flight` is only set while `state == HalfOpen`
#[derive(Debug)]
struct AgentCircuit {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<chrono::DateTime<chrono::Utc>>,
    trial_in_flight: bool,
    total_calls: u64,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
}

impl AgentCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            last_failure_at: None,
            trial_in_flight: false,
            total_calls: 0,
            total_successes: 0,
            total_failures: 0,
            total_rejections: 0,
        }
    }

    /// Apply the lazy OPEN → HALF_OPEN transition and return the current state.
    fn refresh(&mut self, agent: &str, timeout: Duration) -> CircuitState {
        if self.state == CircuitState::Open {
            let elapsed = self
                .last_failure
                .map(|t| Instant::now().saturating_duration_since(t))
                .unwrap_or(timeout);
            if elapsed >= timeout {
                self.state = CircuitState::HalfOpen;
                self.trial_in_flight = false;
                tracing::info!(agent = %agent, "Circuit half-open, allowing a trial call");
            }
        }
        self.state
    }

    fn cooldown_remaining(&self, timeout: Duration) -> Option<Duration> {
        if self.state != CircuitState::Open {
            return None;
        }
        let since = self.last_failure?;
        timeout.checked_sub(Instant::now().saturating_duration_since(since))
    }
}

fn lock(circuit: &Mutex<AgentCircuit>) -> MutexGuard<'_, AgentCircuit> {
    circuit.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Serializable view of one agent's circuit.
#[derive(Debug, Clone, Serialize)]
pub struct AgentHealthSnapshot {
    pub agent: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<chrono::DateTime<chrono::Utc>>,
    pub cooldown_remaining_secs: Option<f64>,
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    circuits: RwLock<HashMap<String, Arc<Mutex<AgentCircuit>>>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            circuits: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    fn circuit(&self, agent: &str) -> Arc<Mutex<AgentCircuit>> {
        if let Some(existing) = self
            .circuits
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(agent)
        {
            return Arc::clone(existing);
        }
        let mut circuits = self.circuits.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            circuits
                .entry(agent.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(AgentCircuit::new()))),
        )
    }

    /// Current state, with the lazy cooldown transition applied.
    /// Unknown agents are closed.
    pub fn state(&self, agent: &str) -> CircuitState {
        let circuit = self.circuit(agent);
        let mut guard = lock(&circuit);
        guard.refresh(agent, self.config.timeout)
    }

    pub fn is_open(&self, agent: &str) -> bool {
        self.state(agent) == CircuitState::Open
    }

    pub fn failure_count(&self, agent: &str) -> u32 {
        lock(&self.circuit(agent)).failure_count
    }

    /// Reserve a call slot for `agent`.
    ///
    /// Fails with `CircuitOpen` while the circuit is open, or while a
    /// half-open trial is already running.
    pub fn acquire(&self, agent: &str) -> Result<CallPermit, AgentError> {
        let circuit = self.circuit(agent);
        let trial = {
            let mut guard = lock(&circuit);
            match guard.refresh(agent, self.config.timeout) {
                CircuitState::Closed => false,
                CircuitState::HalfOpen if !guard.trial_in_flight => {
                    guard.trial_in_flight = true;
                    true
                }
                CircuitState::HalfOpen | CircuitState::Open => {
                    guard.total_rejections += 1;
                    tracing::debug!(agent = %agent, state = %guard.state, "Call rejected by circuit breaker");
                    return Err(AgentError::CircuitOpen {
                        agent: agent.to_string(),
                    });
                }
            }
        };
        Ok(CallPermit {
            agent: agent.to_string(),
            circuit,
            config: self.config,
            trial,
            settled: false,
        })
    }

    /// Run `f` through the breaker.
    ///
    /// Errors that count as failures (`InvocationFailed`, `Timeout`) feed the
    /// breaker; any other error leaves it untouched.
    pub fn call<T, F>(&self, agent: &str, f: F) -> Result<T, AgentError>
    where
        F: FnOnce() -> Result<T, AgentError>,
    {
        let permit = self.acquire(agent)?;
        let result = f();
        permit.settle(&result);
        result
    }

    /// Async form of [`call`](Self::call). If the returned future is dropped
    /// before completion the call is treated as neither success nor failure.
    pub async fn call_async<T, F, Fut>(&self, agent: &str, f: F) -> Result<T, AgentError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let permit = self.acquire(agent)?;
        let result = f().await;
        permit.settle(&result);
        result
    }

    /// Force an agent's circuit closed.
    pub fn reset(&self, agent: &str) {
        let circuit = self.circuit(agent);
        let mut guard = lock(&circuit);
        guard.state = CircuitState::Closed;
        guard.failure_count = 0;
        guard.trial_in_flight = false;
        tracing::info!(agent = %agent, "Circuit manually reset");
    }

    pub fn snapshot(&self, agent: &str) -> AgentHealthSnapshot {
        let circuit = self.circuit(agent);
        let mut guard = lock(&circuit);
        guard.refresh(agent, self.config.timeout);
        AgentHealthSnapshot {
            agent: agent.to_string(),
            state: guard.state,
            failure_count: guard.failure_count,
            last_failure_at: guard.last_failure_at,
            cooldown_remaining_secs: guard
                .cooldown_remaining(self.config.timeout)
                .map(|d| d.as_secs_f64()),
            total_calls: guard.total_calls,
            total_successes: guard.total_successes,
            total_failures: guard.total_failures,
            total_rejections: guard.total_rejections,
        }
    }

    /// Snapshots of every agent the breaker has seen, sorted by name.
    pub fn snapshot_all(&self) -> Vec<AgentHealthSnapshot> {
        let mut names: Vec<String> = self
            .circuits
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names.iter().map(|name| self.snapshot(name)).collect()
    }
}

/// A reserved call slot. Report the outcome with [`success`](Self::success)
/// or [`failure`](Self::failure); dropping it unsettled changes nothing
/// except releasing a half-open trial slot.
pub struct CallPermit {
    agent: String,
    circuit: Arc<Mutex<AgentCircuit>>,
    config: BreakerConfig,
    trial: bool,
    settled: bool,
}

impl CallPermit {
    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        let mut c = lock(&self.circuit);
        c.total_calls += 1;
        c.total_successes += 1;
        if self.trial {
            c.trial_in_flight = false;
        }
        match c.state {
            CircuitState::HalfOpen if self.trial => {
                c.state = CircuitState::Closed;
                c.failure_count = 0;
                tracing::info!(agent = %self.agent, "Circuit closed after successful trial call");
            }
            CircuitState::Closed => c.failure_count = 0,
            // a slot taken before the circuit tripped; the trip stands
            _ => tracing::debug!(
                agent = %self.agent,
                state = %c.state,
                "Late success ignored by circuit breaker"
            ),
        }
    }

    pub fn failure(mut self) {
        self.settled = true;
        let mut c = lock(&self.circuit);
        c.total_calls += 1;
        c.total_failures += 1;
        if self.trial {
            c.trial_in_flight = false;
        }
        c.failure_count = c.failure_count.saturating_add(1);
        c.last_failure = Some(Instant::now());
        c.last_failure_at = Some(chrono::Utc::now());

        match c.state {
            CircuitState::HalfOpen => {
                c.state = CircuitState::Open;
                tracing::warn!(
                    agent = %self.agent,
                    failure_count = c.failure_count,
                    cooldown_secs = self.config.timeout.as_secs_f64(),
                    "Trial call failed, circuit re-opened"
                );
            }
            CircuitState::Closed if c.failure_count >= self.config.failure_threshold => {
                c.state = CircuitState::Open;
                tracing::warn!(
                    agent = %self.agent,
                    failure_count = c.failure_count,
                    cooldown_secs = self.config.timeout.as_secs_f64(),
                    "Circuit breaker tripped, agent unavailable until cooldown elapses"
                );
            }
            _ => {
                tracing::debug!(
                    agent = %self.agent,
                    failure_count = c.failure_count,
                    "Agent invocation failed"
                );
            }
        }
    }

    /// Settle from a call result using the error's failure classification.
    pub fn settle<T>(self, result: &Result<T, AgentError>) {
        match result {
            Ok(_) => self.success(),
            Err(e) if e.counts_as_failure() => self.failure(),
            Err(_) => drop(self),
        }
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            lock(&self.circuit).trial_in_flight = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, timeout_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: threshold,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    fn fail() -> Result<(), AgentError> {
        Err(AgentError::invocation("a", "exit status 1"))
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_recovers_after_cooldown() {
        let cb = breaker(3, 60);
        let invocations = AtomicU32::new(0);

        for _ in 0..3 {
            let _ = cb.call("a", || {
                invocations.fetch_add(1, Ordering::SeqCst);
                fail()
            });
        }
        assert_eq!(cb.state("a"), CircuitState::Open);
        assert_eq!(invocations.load(Ordering::SeqCst), 3);

        tokio::time::advance(Duration::from_secs(10)).await;
        let err = cb
            .call("a", || {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err, AgentError::CircuitOpen { agent: "a".into() });
        assert_eq!(invocations.load(Ordering::SeqCst), 3);

        tokio::time::advance(Duration::from_secs(51)).await;
        assert_eq!(cb.state("a"), CircuitState::HalfOpen);
        cb.call_async("a", || async {
            invocations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(invocations.load(Ordering::SeqCst), 4);
        assert_eq!(cb.state("a"), CircuitState::Closed);
        assert_eq!(cb.failure_count("a"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens() {
        let cb = breaker(2, 30);
        let _ = cb.call("a", fail);
        let _ = cb.call("a", fail);
        assert!(cb.is_open("a"));

        tokio::time::advance(Duration::from_secs(30)).await;
        let _ = cb.call("a", fail);
        assert_eq!(cb.state("a"), CircuitState::Open);

        // cooldown restarts from the failed trial
        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cb.is_open("a"));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cb.state("a"), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_allows_a_single_trial() {
        let cb = breaker(1, 5);
        let _ = cb.call("a", fail);
        tokio::time::advance(Duration::from_secs(5)).await;

        let trial = cb.acquire("a").unwrap();
        assert!(trial.is_trial());
        assert!(matches!(cb.acquire("a"), Err(AgentError::CircuitOpen { .. })));

        // abandoning the trial frees the slot without changing state
        drop(trial);
        assert_eq!(cb.state("a"), CircuitState::HalfOpen);
        assert!(cb.acquire("a").is_ok());
    }

    #[test]
    fn late_success_does_not_undo_a_trip() {
        let cb = breaker(2, 60);
        let slow = cb.acquire("a").unwrap();
        let _ = cb.call("a", fail);
        let _ = cb.call("a", fail);
        assert!(cb.is_open("a"));

        slow.success();
        let snap = cb.snapshot("a");
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.failure_count, 2);
        assert_eq!(snap.total_successes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_closed_permit_does_not_settle_the_trial() {
        let cb = breaker(1, 5);
        let stale = cb.acquire("a").unwrap();
        let _ = cb.call("a", fail);
        tokio::time::advance(Duration::from_secs(5)).await;

        let trial = cb.acquire("a").unwrap();
        stale.success();
        assert_eq!(cb.state("a"), CircuitState::HalfOpen);
        assert!(matches!(cb.acquire("a"), Err(AgentError::CircuitOpen { .. })));

        trial.success();
        assert_eq!(cb.state("a"), CircuitState::Closed);
        assert_eq!(cb.failure_count("a"), 0);
    }

    #[test]
    fn success_while_closed_resets_failure_count() {
        let cb = breaker(5, 60);
        let _ = cb.call("a", fail);
        let _ = cb.call("a", fail);
        assert_eq!(cb.failure_count("a"), 2);
        cb.call("a", || Ok(())).unwrap();
        assert_eq!(cb.failure_count("a"), 0);
        assert_eq!(cb.state("a"), CircuitState::Closed);
    }

    #[test]
    fn non_failure_errors_leave_state_untouched() {
        let cb = breaker(1, 60);
        let result: Result<(), _> = cb.call("a", || Err(AgentError::Cancelled));
        assert_eq!(result.unwrap_err(), AgentError::Cancelled);
        assert_eq!(cb.failure_count("a"), 0);
        assert_eq!(cb.state("a"), CircuitState::Closed);
        assert_eq!(cb.snapshot("a").total_calls, 0);
    }

    #[test]
    fn dropped_async_call_is_not_recorded() {
        let cb = breaker(1, 60);
        {
            let fut = cb.call_async("a", || async {
                std::future::pending::<Result<(), AgentError>>().await
            });
            // poll once, then drop mid-flight
            let mut fut = Box::pin(fut);
            let waker = futures::task::noop_waker();
            let mut cx = std::task::Context::from_waker(&waker);
            assert!(fut.as_mut().poll(&mut cx).is_pending());
        }
        assert_eq!(cb.failure_count("a"), 0);
        assert_eq!(cb.state("a"), CircuitState::Closed);
    }

    #[test]
    fn agents_are_independent() {
        let cb = breaker(1, 60);
        let _ = cb.call("a", fail);
        assert!(cb.is_open("a"));
        assert!(!cb.is_open("b"));
        assert!(tokio_test::block_on(cb.call_async("b", || async { Ok(()) })).is_ok());
    }

    #[test]
    fn snapshot_reports_totals() {
        let cb = breaker(2, 60);
        cb.call("a", || Ok(())).unwrap();
        let _ = cb.call("a", fail);
        let _ = cb.call("a", fail);
        let _ = cb.call("a", || Ok(()));

        let snap = cb.snapshot("a");
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.total_calls, 3);
        assert_eq!(snap.total_successes, 1);
        assert_eq!(snap.total_failures, 2);
        assert_eq!(snap.total_rejections, 1);
        assert!(snap.last_failure_at.is_some());
        assert!(snap.cooldown_remaining_secs.is_some());

        let all = cb.snapshot_all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].agent, "a");
    }
}
