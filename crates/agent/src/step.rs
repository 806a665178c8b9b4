//! Tier 3: runs one subroutine to a terminal state.
//!
//! Per invocation: `pending → running → (succeeded | failed | cancelled)`.
//! Each attempt gets a fresh context and its own timeout. A failed attempt
//! is retried with exponential backoff only when its failure is transient
//! and attempts remain; anything else is final. The abort signal is
//! checked before every attempt and during backoff, and a step whose
//! signal fired never ends `succeeded`.

use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use swarmclaw_config::{EngineConfig, RetryConfig};
use swarmclaw_core::agent::BotParticipant;
use swarmclaw_core::blackboard::Blackboard;
use swarmclaw_core::event::{DomainEvent, EventBus};
use swarmclaw_core::execution::{
    ExecutionFailure, ResourceCost, StepOutcome, StepState, SubroutineExecutionResult,
};
use swarmclaw_core::goal::GoalSpec;
use swarmclaw_core::provider::ResponseSource;
use swarmclaw_core::routine::SubroutineDefinition;
use swarmclaw_core::swarm::SwarmId;
use swarmclaw_core::tool::ToolGateway;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{ContextBuilder, MessageStore, SwarmView, ToolCatalog};
use crate::strategies::{CostMeter, StrategyDeps, StrategyLimits, StrategyRegistry};

/// Exponential backoff between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier.max(1.0),
        }
    }

    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after `attempt` (1-based) failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(millis.min(self.max_delay.as_millis() as f64) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Everything one invocation needs. Owned by that invocation and dropped
/// when it finishes.
#[derive(Clone)]
pub struct ExecutionContext {
    pub swarm_id: SwarmId,
    /// The routine run (owning orchestrator) the step belongs to.
    pub run_id: String,
    pub agent: BotParticipant,
    /// Effective definition: the routine's strategy hint is already applied.
    pub subroutine: SubroutineDefinition,
    pub input: Value,
    pub goal: GoalSpec,
    /// Committed blackboard snapshot the step reads.
    pub blackboard: Arc<Blackboard>,
    pub cancel: CancellationToken,
    /// Keep every attempt's result. Falls back to the executor default.
    pub keep_history: Option<bool>,
}

pub struct StepExecutor {
    strategies: StrategyRegistry,
    builder: ContextBuilder,
    source: Arc<dyn ResponseSource>,
    tools: Arc<dyn ToolGateway>,
    events: Arc<EventBus>,
    messages: Arc<MessageStore>,
    limits: Arc<StrategyLimits>,
    retry: RetryPolicy,
    timeout: Duration,
    keep_history: bool,
}

impl StepExecutor {
    /// Executor with the standard strategies, configured from `config`.
    pub fn from_config(
        config: &EngineConfig,
        source: Arc<dyn ResponseSource>,
        tools: Arc<dyn ToolGateway>,
        events: Arc<EventBus>,
        messages: Arc<MessageStore>,
    ) -> Self {
        let builder = ContextBuilder::new(
            config.context.clone(),
            config.complexity.clone(),
            ToolCatalog::from_gateway(tools.as_ref()),
            messages.clone(),
        );
        Self {
            strategies: StrategyRegistry::standard(&config.strategies),
            builder,
            source,
            tools,
            events,
            messages,
            limits: Arc::new(StrategyLimits::from_config(config)),
            retry: RetryPolicy::from_config(&config.retry),
            timeout: config.execution.step_timeout(),
            keep_history: config.execution.keep_attempt_history,
        }
    }

    pub fn with_strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn strategies(&self) -> &StrategyRegistry {
        &self.strategies
    }

    pub fn context_builder(&self) -> &ContextBuilder {
        &self.builder
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn messages(&self) -> &Arc<MessageStore> {
        &self.messages
    }

    /// Run the subroutine in `ctx` until it succeeds, fails for good, or is
    /// cancelled.
    pub async fn execute(&self, ctx: &ExecutionContext) -> StepOutcome {
        let sub = &ctx.subroutine;
        let mut tally = Tally {
            keep_history: ctx.keep_history.unwrap_or(self.keep_history),
            ..Tally::default()
        };

        let Some(strategy) = self.strategies.select(sub) else {
            warn!(subroutine = %sub.id, sub_type = %sub.sub_type, "No strategy can handle subroutine");
            let failure = ExecutionFailure::permanent(
                "no_strategy",
                format!("no strategy can handle sub-type '{}'", sub.sub_type),
            );
            let result = SubroutineExecutionResult::failed(&sub.id, failure, ResourceCost::ZERO);
            return self.finish(ctx, StepState::Failed, result, tally);
        };

        let max_attempts = sub.max_attempts.unwrap_or(self.retry.max_attempts).max(1);
        let timeout = sub.timeout_ms.map_or(self.timeout, Duration::from_millis);
        let mut attempt = 0;

        loop {
            if ctx.cancel.is_cancelled() {
                let result = match tally.attempts.last() {
                    Some(last) => as_cancelled(last.clone()),
                    None => SubroutineExecutionResult::cancelled(&sub.id, ResourceCost::ZERO),
                };
                return self.finish(ctx, StepState::Cancelled, result, tally);
            }

            attempt += 1;
            self.events.emit(
                "step_executor",
                DomainEvent::StepStarted {
                    run_id: ctx.run_id.clone(),
                    subroutine_id: sub.id.clone(),
                    strategy: strategy.kind().to_string(),
                    attempt,
                },
            );
            debug!(subroutine = %sub.id, strategy = %strategy.kind(), attempt, max_attempts, "Attempt started");

            let meter = Arc::new(CostMeter::default());
            let deps = self.deps(ctx, attempt, meter.clone());
            let started = Instant::now();
            let mut result = match tokio::time::timeout(timeout, strategy.execute(&deps)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        subroutine = %sub.id,
                        attempt,
                        timeout_ms = timeout.as_millis() as u64,
                        "Attempt timed out"
                    );
                    SubroutineExecutionResult::failed(
                        &sub.id,
                        ExecutionFailure::transient(
                            "timeout",
                            format!("attempt exceeded {}ms", timeout.as_millis()),
                        ),
                        meter.total(),
                    )
                }
            };
            result.attempt = attempt;
            result.duration_ms = started.elapsed().as_millis() as u64;
            if ctx.cancel.is_cancelled() && !result.is_cancelled() {
                result = as_cancelled(result);
            }
            tally.record(&result);

            if result.success {
                return self.finish(ctx, StepState::Succeeded, result, tally);
            }
            if result.is_cancelled() {
                return self.finish(ctx, StepState::Cancelled, result, tally);
            }
            let retryable = result.failure_kind().is_some_and(|k| k.is_retryable());
            if !retryable || attempt >= max_attempts {
                return self.finish(ctx, StepState::Failed, result, tally);
            }

            let delay = self.retry.delay_for(attempt);
            let error = result
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_default();
            warn!(
                subroutine = %sub.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Attempt failed, retrying"
            );
            self.events.emit(
                "step_executor",
                DomainEvent::StepRetrying {
                    run_id: ctx.run_id.clone(),
                    subroutine_id: sub.id.clone(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    error,
                },
            );
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn deps(&self, ctx: &ExecutionContext, attempt: u32, meter: Arc<CostMeter>) -> StrategyDeps {
        let context = self.builder.build_context(
            &ctx.agent,
            &ctx.subroutine,
            &SwarmView {
                swarm_id: &ctx.swarm_id,
                goal: &ctx.goal,
                blackboard: &ctx.blackboard,
                run_id: Some(&ctx.run_id),
            },
        );
        StrategyDeps {
            swarm_id: ctx.swarm_id.clone(),
            run_id: ctx.run_id.clone(),
            agent: ctx.agent.clone(),
            subroutine: ctx.subroutine.clone(),
            attempt,
            input: ctx.input.clone(),
            blackboard: ctx.blackboard.clone(),
            context,
            source: self.source.clone(),
            tools: self.tools.clone(),
            events: self.events.clone(),
            messages: self.messages.clone(),
            limits: self.limits.clone(),
            cancel: ctx.cancel.clone(),
            meter,
        }
    }

    fn finish(
        &self,
        ctx: &ExecutionContext,
        state: StepState,
        result: SubroutineExecutionResult,
        tally: Tally,
    ) -> StepOutcome {
        let label = state_name(state);
        info!(
            subroutine = %ctx.subroutine.id,
            state = label,
            attempts = tally.count,
            credits = tally.cost.credits,
            "Step finished"
        );
        self.events.emit(
            "step_executor",
            DomainEvent::StepFinished {
                run_id: ctx.run_id.clone(),
                subroutine_id: ctx.subroutine.id.clone(),
                state: label.to_string(),
                attempts: tally.count,
                credits: tally.cost.credits,
            },
        );
        StepOutcome {
            state,
            result,
            attempts: tally.attempts,
            attempt_count: tally.count,
            total_cost: tally.cost,
            total_duration_ms: tally.duration_ms,
        }
    }
}

/// Running totals across attempts. Totals cover every attempt even when
/// only the last result is retained.
#[derive(Default)]
struct Tally {
    keep_history: bool,
    attempts: Vec<SubroutineExecutionResult>,
    count: u32,
    cost: ResourceCost,
    duration_ms: u64,
}

impl Tally {
    fn record(&mut self, result: &SubroutineExecutionResult) {
        self.count += 1;
        self.cost += result.cost;
        self.duration_ms += result.duration_ms;
        if !self.keep_history {
            self.attempts.clear();
        }
        self.attempts.push(result.clone());
    }
}

/// Rewrite an attempt result as cancelled, keeping what it cost.
fn as_cancelled(result: SubroutineExecutionResult) -> SubroutineExecutionResult {
    SubroutineExecutionResult {
        outputs: Default::default(),
        success: false,
        error: Some(ExecutionFailure::cancelled()),
        ..result
    }
}

fn state_name(state: StepState) -> &'static str {
    match state {
        StepState::Pending => "pending",
        StepState::Running => "running",
        StepState::Succeeded => "succeeded",
        StepState::Failed => "failed",
        StepState::Cancelled => "cancelled",
    }
}
