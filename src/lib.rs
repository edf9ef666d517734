//! # Agent Switchboard
//!
//! Routes coding tasks across several external coding-agent CLIs (Claude
//! Code, Amp, Codex), each with its own cost, latency and strengths.
//!
//! ## Architecture
//!
//! ```text
//!   Orchestrator ── execute / execute_parallel / cancel
//!        │
//!        ▼
//!   ExecutionPipeline ── select → invoke → score → reward → maybe switch
//!        │          │
//!        │          ├── AgentSelector / SwitchController   (routing)
//!        │          └── QualityEvaluator                   (pluggable)
//!        ▼
//!   AgentRegistry ── profiles + CircuitBreaker + RewardTracker + adapters
//!        │
//!        ▼
//!   AgentAdapter ── claude / amp / codex child processes (NDJSON)
//! ```
//!
//! ## Modules
//! - `agents`: agent profiles and the registry holding per-agent state
//! - `backend`: CLI adapters and their stream parsers
//! - `circuit_breaker`: per-agent CLOSED / OPEN / HALF_OPEN gate
//! - `reward`: exponentially smoothed reward per agent
//! - `routing`: agent selection and mid-task switching
//! - `orchestrator`: the execution loop, events and the composition root

pub mod agents;
pub mod backend;
pub mod circuit_breaker;
pub mod config;
pub mod cost;
pub mod error;
pub mod orchestrator;
pub mod quality;
pub mod reward;
pub mod routing;
pub mod task;
pub mod util;

pub use agents::{AgentProfile, AgentRegistry};
pub use config::Config;
pub use error::AgentError;
pub use orchestrator::{ExecutionPipeline, Orchestrator, OrchestratorEvent};
pub use task::{Task, TaskId, TaskOutcome, TaskStatus, TaskType};
