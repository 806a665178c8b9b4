//! Shared fixtures for strategy and step executor tests.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swarmclaw_config::{ComplexityConfig, ContextConfig};
use swarmclaw_core::agent::{AgentRole, BotParticipant};
use swarmclaw_core::blackboard::Blackboard;
use swarmclaw_core::error::{ProviderError, ToolError};
use swarmclaw_core::event::EventBus;
use swarmclaw_core::goal::GoalSpec;
use swarmclaw_core::message::{MessageToolCall, Role};
use swarmclaw_core::provider::{ProviderResponse, ResponseSource, SourceRequest, ToolDefinition, Usage};
use swarmclaw_core::routine::SubroutineDefinition;
use swarmclaw_core::swarm::SwarmId;
use swarmclaw_core::tool::{Tool, ToolGateway, ToolInvoker, ToolRegistry, ToolResult};
use tokio_util::sync::CancellationToken;

use super::{CostMeter, StrategyDeps, StrategyLimits};
use crate::context::{ContextBuilder, MessageStore, SwarmView, ToolCatalog};

/// Hands out scripted replies in order and records every request.
///
/// Panics if called more often than replies were provided.
pub struct SequentialSource {
    replies: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    requests: Mutex<Vec<SourceRequest>>,
    delay: Option<Duration>,
}

impl SequentialSource {
    pub fn new(replies: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(make_text_response(t))).collect())
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<SourceRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResponseSource for SequentialSource {
    fn name(&self) -> &str {
        "sequential"
    }

    async fn respond(&self, request: SourceRequest) -> Result<ProviderResponse, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("SequentialSource: no reply left for call #{call}"))
    }
}

/// A text reply costing 15 tokens.
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse::text(
        text,
        Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
    )
}

/// A reply requesting tool calls, with optional thought content.
pub fn make_tool_call_response(tool_calls: Vec<MessageToolCall>, thought: &str) -> ProviderResponse {
    let mut response = make_text_response(thought);
    response.message.tool_calls = tool_calls;
    response
}

pub fn make_tool_call(name: &str, args: Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}

/// `lookup {"q": ...}` answers `{"answer": "answer for <q>"}`.
pub struct LookupTool;

#[async_trait]
impl Tool for LookupTool {
    fn name(&self) -> &str {
        "lookup"
    }
    fn description(&self) -> &str {
        "Look up a canned answer"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"q": {"type": "string"}}, "required": ["q"]})
    }
    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let q = arguments["q"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("q is required".into()))?;
        let answer = format!("answer for {q}");
        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output: answer.clone(),
            data: Some(json!({"answer": answer})),
        })
    }
}

/// Always times out.
pub struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }
    fn description(&self) -> &str {
        "Never finishes in time"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object"})
    }
    async fn execute(&self, _arguments: Value) -> Result<ToolResult, ToolError> {
        Err(ToolError::Timeout {
            tool_name: "slow".into(),
            timeout_secs: 1,
        })
    }
}

/// Gateway over a registry with `lookup` and `slow`, denying selected tools.
pub struct TestGateway {
    registry: ToolRegistry,
    denied: Vec<String>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl TestGateway {
    pub fn new() -> Self {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(LookupTool));
        registry.register(Box::new(SlowTool));
        Self {
            registry,
            denied: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn deny(mut self, tool: &str) -> Self {
        self.denied.push(tool.to_string());
        self
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolGateway for TestGateway {
    async fn call(&self, agent_id: &str, name: &str, arguments: Value) -> Result<ToolResult, ToolError> {
        if self.denied.iter().any(|d| d == name) {
            return Err(ToolError::PermissionDenied {
                tool_name: name.to_string(),
                reason: format!("{agent_id} is not allowed"),
            });
        }
        self.calls.lock().unwrap().push((name.to_string(), arguments.clone()));
        self.registry.invoke_tool(name, arguments).await
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        ToolInvoker::definitions(&self.registry)
    }
}

pub fn agent() -> BotParticipant {
    BotParticipant::new("ada", "Ada", AgentRole::Contributor)
}

/// Strategy dependencies for `subroutine` with an empty blackboard.
pub fn deps(
    subroutine: SubroutineDefinition,
    source: Arc<dyn ResponseSource>,
    tools: Arc<dyn ToolGateway>,
) -> StrategyDeps {
    deps_with_board(subroutine, source, tools, Blackboard::new())
}

pub fn deps_with_board(
    subroutine: SubroutineDefinition,
    source: Arc<dyn ResponseSource>,
    tools: Arc<dyn ToolGateway>,
    blackboard: Blackboard,
) -> StrategyDeps {
    let swarm_id = SwarmId::from("swarm-test");
    let messages = Arc::new(MessageStore::new());
    let builder = ContextBuilder::new(
        ContextConfig::default(),
        ComplexityConfig::default(),
        ToolCatalog::from_gateway(tools.as_ref()),
        messages.clone(),
    );
    let goal = GoalSpec::new("Answer support questions");
    let agent = agent();
    let context = builder.build_context(
        &agent,
        &subroutine,
        &SwarmView {
            swarm_id: &swarm_id,
            goal: &goal,
            blackboard: &blackboard,
            run_id: Some("run-test"),
        },
    );

    StrategyDeps {
        swarm_id,
        run_id: "run-test".into(),
        agent,
        subroutine,
        attempt: 1,
        input: json!({}),
        blackboard: Arc::new(blackboard),
        context,
        source,
        tools,
        events: Arc::new(EventBus::default()),
        messages,
        limits: Arc::new(StrategyLimits::default()),
        cancel: CancellationToken::new(),
        meter: Arc::new(CostMeter::default()),
    }
}

/// The user turns of a recorded request.
pub fn user_turns(request: &SourceRequest) -> Vec<String> {
    request
        .request
        .messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .collect()
}
