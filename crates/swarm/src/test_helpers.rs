//! Shared fixtures for orchestrator and coordinator tests.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use swarmclaw_agent::context::MessageStore;
use swarmclaw_agent::step::{RetryPolicy, StepExecutor};
use swarmclaw_config::EngineConfig;
use swarmclaw_core::agent::{AgentRole, BotParticipant};
use swarmclaw_core::error::ToolError;
use swarmclaw_core::event::EventBus;
use swarmclaw_core::provider::ResponseSource;
use swarmclaw_core::tool::{Tool, ToolRegistry, ToolResult};
use swarmclaw_providers::scripted::ScriptedSource;
use swarmclaw_security::{AuditLogger, AuthorizedInvoker, RuleAuthorizer};
use swarmclaw_store::{InMemoryDefinitionStore, InMemoryRunStore};

use crate::coordinator::SwarmCoordinator;
use crate::orchestrator::RoutineOrchestrator;

/// `kb_search {"q": ...}` answers `{"hits": ["kb:<q>"]}`.
pub struct KnowledgeTool;

#[async_trait]
impl Tool for KnowledgeTool {
    fn name(&self) -> &str {
        "kb_search"
    }
    fn description(&self) -> &str {
        "Search the knowledge base"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"q": {"type": "string"}}})
    }
    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let q = arguments["q"].as_str().unwrap_or_default();
        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output: format!("1 hit for {q}"),
            data: Some(json!({"hits": [format!("kb:{q}")]})),
        })
    }
}

pub fn contributor(id: &str) -> BotParticipant {
    BotParticipant::new(id, id, AgentRole::Contributor)
}

pub fn leader(id: &str) -> BotParticipant {
    BotParticipant::new(id, id, AgentRole::Leader)
}

/// A step executor over `source` with the authorized knowledge-base tool
/// and millisecond backoff.
pub fn executor(config: &EngineConfig, source: Arc<dyn ResponseSource>) -> Arc<StepExecutor> {
    let events = Arc::new(EventBus::new(config.events.capacity));
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(KnowledgeTool));
    let tools = AuthorizedInvoker::new(
        Arc::new(registry),
        Arc::new(RuleAuthorizer::new(&config.authorization)),
        Arc::new(AuditLogger::new()),
    )
    .with_events(events.clone());

    let executor = StepExecutor::from_config(
        config,
        source,
        Arc::new(tools),
        events,
        Arc::new(MessageStore::new()),
    )
    .with_retry(RetryPolicy {
        max_attempts: config.retry.max_attempts,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
    });
    Arc::new(executor)
}

pub fn orchestrator(source: ScriptedSource, max_concurrency: usize) -> (RoutineOrchestrator, Arc<EventBus>) {
    let executor = executor(&EngineConfig::default(), Arc::new(source));
    let events = executor.events().clone();
    (RoutineOrchestrator::new(executor, max_concurrency), events)
}

pub struct Harness {
    pub coordinator: SwarmCoordinator,
    pub definitions: Arc<InMemoryDefinitionStore>,
    pub runs: Arc<InMemoryRunStore>,
    pub events: Arc<EventBus>,
}

pub fn harness(config: EngineConfig, source: ScriptedSource) -> Harness {
    let executor = executor(&config, Arc::new(source));
    let events = executor.events().clone();
    let definitions = Arc::new(InMemoryDefinitionStore::new());
    let runs = Arc::new(InMemoryRunStore::new());
    let coordinator = SwarmCoordinator::new(&config, executor, definitions.clone(), runs.clone());
    Harness {
        coordinator,
        definitions,
        runs,
        events,
    }
}
