//! switchboard - run a batch of tasks across the configured coding agents.
//!
//! Usage: `switchboard <tasks.json>` (or `-` for stdin). The file holds a
//! JSON array of tasks; outcomes are printed to stdout as a JSON array.

use agent_switchboard::{config::Config, Orchestrator, OrchestratorEvent, Task};
use anyhow::Context;
use std::io::Read;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

fn read_tasks(path: &str) -> anyhow::Result<Vec<Task>> {
    let raw = if path == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read tasks from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?
    };
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse tasks from {}", path))
}

async fn async_main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_switchboard=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let path = std::env::args()
        .nth(1)
        .context("usage: switchboard <tasks.json | ->")?;
    let tasks = read_tasks(&path)?;

    let config = Config::from_env()?;
    info!(
        "Loaded configuration: working_dir={}, max_parallel={}",
        config.working_dir.display(),
        config.max_parallel
    );
    let orchestrator = Orchestrator::from_config(&config)?;

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(OrchestratorEvent::ProgressLine { task_id, agent, line }) => {
                    debug!(task_id = %task_id, agent = %agent, "{}", line);
                }
                Ok(other) => info!(task_id = %other.task_id(), event = ?other, "Orchestrator event"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Event logger lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let interrupt = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling running tasks");
            for task_id in interrupt.running() {
                interrupt.cancel(&task_id);
            }
        }
    });

    let outcomes = orchestrator.execute_parallel(tasks).await;
    let failed = outcomes.iter().filter(|o| o.status.is_terminal_failure()).count();
    info!(tasks = outcomes.len(), failed = failed, "All tasks finished");

    println!("{}", serde_json::to_string_pretty(&outcomes)?);
    Ok(())
}
