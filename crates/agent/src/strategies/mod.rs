//! Execution strategies.
//!
//! A strategy carries out one invocation attempt of a subroutine. Three
//! implementations exist, from cheapest to most flexible:
//!
//! 1. **Deterministic**: planned tool calls and output templates, no
//!    generative calls at all
//! 2. **Reasoning**: plan, act on each planned step, then verify
//! 3. **Conversational**: open multi-turn loop with tool use
//!
//! The [`StrategyRegistry`] asks each registered strategy, always in that
//! order, whether it can handle a subroutine and uses the first that says
//! yes. Registration order does not matter.
//!
//! Every strategy observes the abort signal between units of work and
//! around every backend or tool call, and reports cancellation as a
//! `cancelled` result rather than an error.

pub mod conversational;
pub mod deterministic;
pub mod reasoning;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use conversational::ConversationalStrategy;
pub use deterministic::DeterministicStrategy;
pub use reasoning::ReasoningStrategy;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use swarmclaw_config::{EngineConfig, PricingConfig, StrategyConfig};
use swarmclaw_core::agent::BotParticipant;
use swarmclaw_core::blackboard::Blackboard;
use swarmclaw_core::error::ToolError;
use swarmclaw_core::event::{DomainEvent, EventBus};
use swarmclaw_core::execution::{ExecutionFailure, ResourceCost, SubroutineExecutionResult};
use swarmclaw_core::message::{Message, MessageToolCall};
use swarmclaw_core::provider::{ProviderRequest, ProviderResponse, ResponseSource, SourceRequest};
use swarmclaw_core::routine::{StrategyKind, SubroutineDefinition};
use swarmclaw_core::swarm::SwarmId;
use swarmclaw_core::tool::{ToolGateway, ToolResult};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::{MessageStore, StepContext};

/// Outputs produced by a subroutine, merged flat into routine-local state.
pub type Outputs = BTreeMap<String, Value>;

/// Why a strategy stopped before producing outputs.
#[derive(Debug, Clone, PartialEq)]
pub enum Interrupt {
    Cancelled,
    Failed(ExecutionFailure),
}

impl From<ExecutionFailure> for Interrupt {
    fn from(failure: ExecutionFailure) -> Self {
        Self::Failed(failure)
    }
}

/// Backend and loop limits shared by the generative strategies.
#[derive(Debug, Clone)]
pub struct StrategyLimits {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Conversational turns per attempt, unless the subroutine overrides it.
    pub max_turns: u32,
    /// Planned steps the reasoning strategy acts on.
    pub max_reasoning_steps: u32,
    pub pricing: PricingConfig,
}

impl StrategyLimits {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            model: config.backend.model.clone(),
            temperature: config.backend.temperature,
            max_tokens: Some(config.backend.max_tokens),
            max_turns: config.execution.max_conversation_turns,
            max_reasoning_steps: config.execution.max_reasoning_steps,
            pricing: config.pricing.clone(),
        }
    }
}

impl Default for StrategyLimits {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Running cost of one attempt. Survives the attempt being timed out, so
/// whatever was spent before the deadline is still billed.
#[derive(Debug, Default)]
pub struct CostMeter {
    credits: AtomicU64,
    tokens: AtomicU64,
}

impl CostMeter {
    pub fn add(&self, cost: ResourceCost) {
        self.credits.fetch_add(cost.credits, Ordering::Relaxed);
        self.tokens.fetch_add(cost.tokens, Ordering::Relaxed);
    }

    pub fn total(&self) -> ResourceCost {
        ResourceCost {
            credits: self.credits.load(Ordering::Relaxed),
            tokens: self.tokens.load(Ordering::Relaxed),
        }
    }
}

/// Everything a strategy may use during one attempt.
pub struct StrategyDeps {
    pub swarm_id: SwarmId,
    pub run_id: String,
    pub agent: BotParticipant,
    pub subroutine: SubroutineDefinition,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Routine inputs, outputs of earlier subroutines and configured inputs.
    pub input: Value,
    pub blackboard: Arc<Blackboard>,
    pub context: StepContext,
    pub source: Arc<dyn ResponseSource>,
    pub tools: Arc<dyn ToolGateway>,
    pub events: Arc<EventBus>,
    pub messages: Arc<MessageStore>,
    pub limits: Arc<StrategyLimits>,
    pub cancel: CancellationToken,
    pub meter: Arc<CostMeter>,
}

impl StrategyDeps {
    /// Fail fast if the abort signal was raised.
    pub fn checkpoint(&self) -> Result<(), Interrupt> {
        if self.cancel.is_cancelled() {
            Err(Interrupt::Cancelled)
        } else {
            Ok(())
        }
    }

    /// The user turn: the configured prompt (or a generic one) followed by
    /// the input as JSON.
    pub fn prompt(&self) -> String {
        let mut prompt = self
            .subroutine
            .config
            .prompt
            .clone()
            .unwrap_or_else(|| format!("Carry out '{}'.", self.subroutine.id));
        if self.input.as_object().is_some_and(|o| !o.is_empty()) {
            prompt.push_str("\n\nInput:\n");
            prompt.push_str(&serde_json::to_string_pretty(&self.input).unwrap_or_default());
        }
        prompt
    }

    /// One backend call, raced against the abort signal and metered.
    pub async fn ask(&self, messages: Vec<Message>, with_tools: bool) -> Result<ProviderResponse, Interrupt> {
        self.checkpoint()?;
        let request = SourceRequest {
            subroutine_id: self.subroutine.id.clone(),
            attempt: self.attempt,
            input: self.input.clone(),
            request: ProviderRequest {
                model: self.limits.model.clone(),
                messages,
                temperature: self.limits.temperature,
                max_tokens: self.limits.max_tokens,
                tools: if with_tools { self.context.tools.clone() } else { Vec::new() },
            },
        };

        let response = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Interrupt::Cancelled),
            r = self.source.respond(request) => r,
        };
        let response = response.map_err(|e| Interrupt::Failed(ExecutionFailure::from(&e)))?;

        let tokens = response.usage.map_or(0, |u| u64::from(u.total_tokens));
        self.meter.add(ResourceCost {
            credits: self.limits.pricing.token_credits(tokens),
            tokens,
        });
        Ok(response)
    }

    /// One tool call through the gateway, raced against the abort signal.
    /// Successful calls are billed.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Result<ToolResult, ToolError>, Interrupt> {
        self.checkpoint()?;
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Interrupt::Cancelled),
            r = self.tools.call(self.agent.id.as_str(), name, arguments) => r,
        };
        if result.is_ok() {
            self.meter
                .add(ResourceCost::credits(self.limits.pricing.credits_per_tool_call));
        }
        Ok(result)
    }

    /// Append the agent's reply to the swarm log and announce it.
    pub fn record_reply(&self, content: &str) {
        self.messages.append(
            &self.swarm_id,
            Message::assistant(content).attributed(self.agent.id.as_str(), &self.run_id),
        );
        self.events.emit(
            "strategy",
            DomainEvent::ChatMessage {
                swarm_id: self.swarm_id.to_string(),
                agent_id: self.agent.id.to_string(),
                content_preview: preview(content, 120),
            },
        );
    }

    /// Turn a strategy's outcome into the attempt result.
    pub fn finish(&self, outcome: Result<Outputs, Interrupt>) -> SubroutineExecutionResult {
        let cost = self.meter.total();
        let id = self.subroutine.id.clone();
        match outcome {
            Ok(outputs) => SubroutineExecutionResult::succeeded(id, outputs, cost),
            Err(Interrupt::Cancelled) => SubroutineExecutionResult::cancelled(id, cost),
            Err(Interrupt::Failed(failure)) => SubroutineExecutionResult::failed(id, failure, cost),
        }
    }
}

/// Run the tool calls requested by a generative reply. Returns the tool
/// messages to feed back. Tool outputs are recorded under the tool name.
/// Unknown tools, bad arguments and tool errors are reported back to the
/// model; a permission denial ends the attempt.
pub(crate) async fn run_tool_calls(
    deps: &StrategyDeps,
    calls: &[MessageToolCall],
    outputs: &mut Outputs,
) -> Result<Vec<Message>, Interrupt> {
    let mut replies = Vec::with_capacity(calls.len());
    for call in calls {
        deps.checkpoint()?;
        if !deps.context.has_tool(&call.name) {
            replies.push(Message::tool_result(
                &call.id,
                format!("error: tool '{}' is not available", call.name),
            ));
            continue;
        }
        let arguments: Value = match serde_json::from_str(&call.arguments) {
            Ok(v) => v,
            Err(e) => {
                replies.push(Message::tool_result(&call.id, format!("error: invalid arguments: {e}")));
                continue;
            }
        };

        match deps.call_tool(&call.name, arguments).await? {
            Ok(result) => {
                outputs.insert(call.name.clone(), result.as_value());
                replies.push(Message::tool_result(&call.id, result.output));
            }
            Err(e @ ToolError::PermissionDenied { .. }) => {
                return Err(Interrupt::Failed(ExecutionFailure::from(&e)));
            }
            Err(e) => {
                debug!(tool = %call.name, error = %e, "Tool call failed, reporting to model");
                replies.push(Message::tool_result(&call.id, format!("error: {e}")));
            }
        }
    }
    Ok(replies)
}

/// Outputs of a final reply: a JSON object contributes its fields, any
/// other reply is stored as text under `key`.
pub fn reply_outputs(content: &str, key: &str) -> Outputs {
    match serde_json::from_str::<Value>(content.trim()) {
        Ok(Value::Object(map)) => map.into_iter().collect(),
        _ => BTreeMap::from([(key.to_string(), Value::String(content.to_string()))]),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max_chars).collect();
        cut.push('…');
        cut
    }
}

/// Whether `sub_type` starts with one of the claimed prefixes.
pub(crate) fn claims(prefixes: &[String], sub_type: &str) -> bool {
    let sub_type = sub_type.to_ascii_lowercase();
    prefixes
        .iter()
        .any(|p| !p.is_empty() && sub_type.starts_with(&p.to_ascii_lowercase()))
}

/// The common contract of all strategies.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Whether this strategy can run `subroutine`, whose declared resource
    /// sub-type is `sub_type`. An explicit strategy hint on the subroutine
    /// always decides.
    fn can_handle(&self, sub_type: &str, subroutine: &SubroutineDefinition) -> bool;

    /// Run one attempt. Never panics on backend or tool failure; every
    /// outcome is reported in the result.
    async fn execute(&self, deps: &StrategyDeps) -> SubroutineExecutionResult;
}

fn priority(kind: StrategyKind) -> u8 {
    match kind {
        StrategyKind::Deterministic => 0,
        StrategyKind::Reasoning => 1,
        StrategyKind::Conversational => 2,
    }
}

/// Registered strategies, kept in priority order.
#[derive(Default, Clone)]
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn ExecutionStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// All three strategies, claiming sub-types per `config`.
    pub fn standard(config: &StrategyConfig) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ConversationalStrategy));
        registry.register(Arc::new(ReasoningStrategy::new(config.reasoning_sub_types.clone())));
        registry.register(Arc::new(DeterministicStrategy::new(
            config.deterministic_sub_types.clone(),
        )));
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn ExecutionStrategy>) {
        let rank = priority(strategy.kind());
        let at = self
            .strategies
            .iter()
            .position(|s| priority(s.kind()) > rank)
            .unwrap_or(self.strategies.len());
        self.strategies.insert(at, strategy);
    }

    /// The first strategy, in priority order, that can handle `subroutine`.
    pub fn select(&self, subroutine: &SubroutineDefinition) -> Option<Arc<dyn ExecutionStrategy>> {
        self.strategies
            .iter()
            .find(|s| s.can_handle(&subroutine.sub_type, subroutine))
            .cloned()
    }

    pub fn kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
