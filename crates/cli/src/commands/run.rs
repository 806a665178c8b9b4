//! `swarmclaw run`: Run a swarm plan until nothing is left to dispatch.

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use swarmclaw_agent::context::MessageStore;
use swarmclaw_agent::step::StepExecutor;
use swarmclaw_core::blackboard::{SubtaskStatus, recruitment};
use swarmclaw_core::event::{EventBus, EventEnvelope, topics};
use swarmclaw_core::provider::ResponseSource;
use swarmclaw_core::swarm::{RunSnapshot, SwarmId};
use swarmclaw_providers::{BackendSource, OpenAiCompatProvider, ScriptedSource};
use swarmclaw_security::{AuditLogger, AuthorizedInvoker, RuleAuthorizer};
use swarmclaw_store::{InMemoryDefinitionStore, persistence_from_config};
use swarmclaw_swarm::{SwarmCoordinator, SwarmSpec};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use super::load_config;
use crate::plan::Plan;

pub struct RunArgs {
    pub plan: PathBuf,
    pub script: Option<PathBuf>,
    pub routines: Option<PathBuf>,
    pub snapshot: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

/// Returns whether every subtask finished `done`.
pub async fn run(args: RunArgs) -> anyhow::Result<bool> {
    let config = load_config(args.config.as_deref())?;
    let plan = Plan::load(&args.plan)?;
    let driver = plan.driver()?;

    let source: Arc<dyn ResponseSource> = match &args.script {
        Some(path) => {
            info!(script = %path.display(), "Serving scripted responses");
            Arc::new(ScriptedSource::load(path)?)
        }
        None => {
            let provider = OpenAiCompatProvider::from_config(&config.backend)
                .context("no backend available; pass --script for a dry run")?;
            Arc::new(BackendSource::new(Arc::new(provider)))
        }
    };

    let events = Arc::new(EventBus::new(config.events.capacity));
    let authorizer = RuleAuthorizer::new(&config.authorization);
    for agent in &plan.agents {
        authorizer.register_agent(agent);
    }
    let tools = AuthorizedInvoker::new(
        Arc::new(plan.tools()),
        Arc::new(authorizer),
        Arc::new(AuditLogger::new()),
    )
    .with_events(events.clone());
    let executor = StepExecutor::from_config(
        &config,
        source,
        Arc::new(tools),
        events.clone(),
        Arc::new(MessageStore::new()),
    );

    let definitions = InMemoryDefinitionStore::new();
    if let Some(dir) = &args.routines {
        definitions.load_dir(dir)?;
    }
    for routine in &plan.routines {
        definitions.publish_routine(routine.clone())?;
    }

    let coordinator = SwarmCoordinator::new(
        &config,
        Arc::new(executor),
        Arc::new(definitions),
        persistence_from_config(&config.persistence),
    );
    let progress = tokio::spawn(report_progress(events.clone()));

    let mut spec = SwarmSpec::new(plan.goal()).with_blackboard(plan.initial_update());
    spec.agents = plan.agents.clone();
    spec.id = plan.swarm.id.as_deref().map(SwarmId::from);
    let swarm_id = coordinator.spawn_swarm(spec).await?;
    println!("🐝 Swarm {swarm_id} started: {}", plan.swarm.goal);

    let mut snapshot = coordinator.run_until_idle(&swarm_id, &driver).await?;
    if snapshot.is_active() {
        let finished = all_done(&snapshot);
        if !finished && coordinator.requires_recruitment(&swarm_id, &driver).await? {
            warn!(
                swarm_id = %swarm_id,
                driver = %driver,
                "Goal is complex: add '{}' and '{}' subtasks to the plan",
                recruitment::SEARCH_TEAM,
                recruitment::RESOLVE_TEAM
            );
        }
        let note = (!finished).then(|| "nothing left to dispatch".to_string());
        snapshot = coordinator.end_swarm(&swarm_id, &driver, note).await?;
    }
    progress.abort();

    print_summary(&snapshot);
    if let Some(path) = &args.snapshot {
        tokio::fs::write(path, serde_json::to_string_pretty(&snapshot)?)
            .await
            .with_context(|| format!("cannot write snapshot {}", path.display()))?;
        println!("💾 Snapshot written to {}", path.display());
    }
    Ok(all_done(&snapshot))
}

fn all_done(snapshot: &RunSnapshot) -> bool {
    snapshot
        .blackboard
        .subtasks
        .iter()
        .all(|s| s.status == SubtaskStatus::Done)
}

/// Print routine lifecycle events as they happen.
async fn report_progress(events: Arc<EventBus>) {
    let mut stream = events.stream();
    loop {
        match stream.recv().await {
            Ok(event) => {
                if let Some(line) = progress_line(&event) {
                    println!("{line}");
                }
            }
            Err(RecvError::Lagged(missed)) => warn!(missed, "Progress output fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn progress_line(event: &EventEnvelope) -> Option<String> {
    let p = &event.payload;
    let routine = p["routine_id"].as_str().unwrap_or_default();
    match event.topic.as_str() {
        topics::ROUTINE_STARTED => Some(format!("   ▶️  {routine} ({} subroutines)", p["subtasks"])),
        topics::ROUTINE_COMPLETED => Some(format!("   ✅ {routine} ({} credits)", p["credits"])),
        topics::ROUTINE_FAILED => Some(format!("   ❌ {routine} failed: {} blocked: {}", p["failed"], p["blocked"])),
        topics::ROUTINE_CANCELLED => Some(format!("   ⏹️  {routine} cancelled")),
        topics::STEP_RETRYING => Some(format!(
            "      ↻ {} attempt {} failed, retrying in {}ms",
            p["subroutine_id"].as_str().unwrap_or_default(),
            p["attempt"],
            p["delay_ms"]
        )),
        _ => None,
    }
}

fn print_summary(snapshot: &RunSnapshot) {
    println!();
    println!("🐝 Swarm {}", snapshot.swarm_id);
    println!("{:-<72}", "");
    if let Some(reason) = &snapshot.end_reason {
        println!("  Ended:     {}", reason.describe());
    }
    println!("  Credits:   {}", snapshot.credits_spent);
    println!("  Routines:  {}", snapshot.routines.len());
    println!("  Subtasks:");
    for task in &snapshot.blackboard.subtasks {
        let icon = match task.status {
            SubtaskStatus::Done => "✅",
            SubtaskStatus::Failed => "❌",
            SubtaskStatus::Blocked => "⛔",
            SubtaskStatus::Doing => "⏳",
            SubtaskStatus::Todo => "⏸️ ",
        };
        println!("    {icon} {:<28} {}", task.id, task.status.as_str());
    }
    if !snapshot.errors.is_empty() {
        println!("  Errors:");
        for error in &snapshot.errors {
            println!("    ⚠️  {}", error.message);
        }
    }
}
