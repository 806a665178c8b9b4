//! Conversational strategy: an open multi-turn loop.
//!
//! Each turn sends the conversation so far with the step's tool schemas.
//! A reply with tool calls is answered with the tool results and the loop
//! continues; the first reply without tool calls is the final answer.

use async_trait::async_trait;
use swarmclaw_core::execution::{ExecutionFailure, SubroutineExecutionResult};
use swarmclaw_core::routine::{StrategyKind, SubroutineDefinition};
use tracing::debug;

use super::{ExecutionStrategy, Interrupt, Outputs, StrategyDeps, reply_outputs, run_tool_calls};

pub struct ConversationalStrategy;

impl ConversationalStrategy {
    async fn run(&self, deps: &StrategyDeps) -> Result<Outputs, Interrupt> {
        let max_turns = deps
            .subroutine
            .config
            .max_turns
            .unwrap_or(deps.limits.max_turns)
            .max(1);
        let mut messages = deps.context.messages(&deps.prompt());
        let mut outputs = Outputs::new();

        for turn in 1..=max_turns {
            deps.checkpoint()?;
            let reply = deps.ask(messages.clone(), true).await?.message;

            if reply.tool_calls.is_empty() {
                if reply.content.trim().is_empty() {
                    return Err(ExecutionFailure::transient("empty_reply", "backend returned an empty answer").into());
                }
                debug!(subroutine = %deps.subroutine.id, turn, "Conversation finished");
                deps.record_reply(&reply.content);
                outputs.extend(reply_outputs(&reply.content, deps.subroutine.config.output_key()));
                return Ok(outputs);
            }

            debug!(
                subroutine = %deps.subroutine.id,
                turn,
                tool_calls = reply.tool_calls.len(),
                "Running requested tools"
            );
            let calls = reply.tool_calls.clone();
            messages.push(reply);
            let results = run_tool_calls(deps, &calls, &mut outputs).await?;
            messages.extend(results);
        }

        Err(ExecutionFailure::permanent(
            "turn_limit",
            format!("no final answer after {max_turns} turns"),
        )
        .into())
    }
}

#[async_trait]
impl ExecutionStrategy for ConversationalStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Conversational
    }

    /// Handles anything not pinned to another strategy.
    fn can_handle(&self, _sub_type: &str, subroutine: &SubroutineDefinition) -> bool {
        subroutine
            .strategy
            .is_none_or(|k| k == StrategyKind::Conversational)
    }

    async fn execute(&self, deps: &StrategyDeps) -> SubroutineExecutionResult {
        deps.finish(self.run(deps).await)
    }
}
