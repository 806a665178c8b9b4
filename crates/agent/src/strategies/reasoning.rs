//! Reasoning strategy: plan, act, verify.
//!
//! 1. **Plan**: the backend lists the steps it will take (numbered lines or
//!    a JSON array of strings), capped at the configured step limit.
//! 2. **Act**: one backend call per planned step, with tools available.
//! 3. **Verify**: the backend reviews the work. A verdict starting with
//!    `REJECTED` fails the attempt as transient so it can be retried.
//!
//! Outputs are the final step's answer (parsed like a conversational
//! reply), any tool outputs, and the plan under `plan`.

use async_trait::async_trait;
use serde_json::{Value, json};
use swarmclaw_core::execution::{ExecutionFailure, SubroutineExecutionResult};
use swarmclaw_core::message::Message;
use swarmclaw_core::routine::{StrategyKind, SubroutineDefinition};
use tracing::{debug, info};

use super::{
    ExecutionStrategy, Interrupt, Outputs, StrategyDeps, claims, reply_outputs, run_tool_calls,
};

const PLAN_INSTRUCTION: &str =
    "Before acting, list the steps you will take, one per line, numbered. Do not carry them out yet.";
const VERIFY_INSTRUCTION: &str =
    "Review the work above against the task. Reply APPROVED if it is complete and correct, otherwise REJECTED: <reason>.";

pub struct ReasoningStrategy {
    sub_types: Vec<String>,
}

impl ReasoningStrategy {
    /// `sub_types`: sub-type prefixes this strategy claims.
    pub fn new(sub_types: Vec<String>) -> Self {
        Self { sub_types }
    }

    async fn run(&self, deps: &StrategyDeps) -> Result<Outputs, Interrupt> {
        let mut messages = deps.context.messages(&deps.prompt());

        // Plan
        messages.push(Message::user(PLAN_INSTRUCTION));
        let plan_reply = deps.ask(messages.clone(), false).await?.message;
        let steps = parse_plan(&plan_reply.content, deps.limits.max_reasoning_steps as usize);
        if steps.is_empty() {
            return Err(ExecutionFailure::transient("empty_plan", "backend produced no plan").into());
        }
        debug!(subroutine = %deps.subroutine.id, steps = steps.len(), "Plan accepted");
        messages.push(plan_reply);

        // Act
        let mut outputs = Outputs::new();
        let mut answer = String::new();
        for (i, step) in steps.iter().enumerate() {
            deps.checkpoint()?;
            messages.push(Message::user(format!("Step {}: {step}", i + 1)));
            let reply = deps.ask(messages.clone(), true).await?.message;
            if !reply.content.trim().is_empty() {
                answer = reply.content.clone();
            }
            let calls = reply.tool_calls.clone();
            messages.push(reply);
            if !calls.is_empty() {
                let results = run_tool_calls(deps, &calls, &mut outputs).await?;
                messages.extend(results);
            }
        }

        // Verify
        deps.checkpoint()?;
        messages.push(Message::user(VERIFY_INSTRUCTION));
        let verdict = deps.ask(messages, false).await?.message.content;
        if is_rejected(&verdict) {
            info!(subroutine = %deps.subroutine.id, verdict = %verdict.trim(), "Verification rejected the work");
            return Err(ExecutionFailure::transient("verification_rejected", verdict.trim()).into());
        }

        if !answer.is_empty() {
            deps.record_reply(&answer);
            outputs.extend(reply_outputs(&answer, deps.subroutine.config.output_key()));
        }
        outputs.insert("plan".into(), json!(steps));
        Ok(outputs)
    }
}

/// Steps from a plan reply: a JSON array of strings, or one step per
/// non-empty line with list markers (`1.`, `2)`, `-`, `*`) removed.
pub fn parse_plan(content: &str, max_steps: usize) -> Vec<String> {
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(content.trim()) {
        return items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .take(max_steps)
            .map(String::from)
            .collect();
    }

    content
        .lines()
        .map(strip_marker)
        .filter(|s| !s.is_empty())
        .take(max_steps)
        .map(String::from)
        .collect()
}

fn strip_marker(line: &str) -> &str {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix(['-', '*']) {
        return rest.trim();
    }
    let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits > 0 {
        if let Some(rest) = line[digits..].strip_prefix(['.', ')']) {
            return rest.trim();
        }
    }
    line
}

fn is_rejected(verdict: &str) -> bool {
    verdict.trim_start().to_ascii_uppercase().starts_with("REJECTED")
}

#[async_trait]
impl ExecutionStrategy for ReasoningStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Reasoning
    }

    fn can_handle(&self, sub_type: &str, subroutine: &SubroutineDefinition) -> bool {
        match subroutine.strategy {
            Some(kind) => kind == StrategyKind::Reasoning,
            None => claims(&self.sub_types, sub_type),
        }
    }

    async fn execute(&self, deps: &StrategyDeps) -> SubroutineExecutionResult {
        deps.finish(self.run(deps).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::StrategyLimits;
    use crate::strategies::test_helpers::*;
    use std::sync::Arc;
    use swarmclaw_core::execution::FailureKind;

    fn strategy() -> ReasoningStrategy {
        ReasoningStrategy::new(vec!["reasoning".into()])
    }

    fn sub() -> SubroutineDefinition {
        SubroutineDefinition::new("triage", "reasoning-triage").with_prompt("Triage the ticket.")
    }

    #[test]
    fn plan_parsing() {
        assert_eq!(
            parse_plan("1. Read ticket\n2) Find owner\n\n- Reply", 10),
            vec!["Read ticket", "Find owner", "Reply"]
        );
        assert_eq!(parse_plan(r#"["a", "b", "c"]"#, 2), vec!["a", "b"]);
        assert_eq!(parse_plan("12 monkeys", 5), vec!["12 monkeys"]);
        assert!(parse_plan("  \n", 5).is_empty());
    }

    #[tokio::test]
    async fn plan_act_verify() {
        let source = Arc::new(SequentialSource::texts(&[
            "1. Classify\n2. Route",
            "It is a billing issue",
            r#"{"queue": "billing"}"#,
            "APPROVED",
        ]));
        let d = deps(sub(), source.clone(), Arc::new(TestGateway::new()));

        let result = strategy().execute(&d).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.outputs["queue"], json!("billing"));
        assert_eq!(result.outputs["plan"], json!(["Classify", "Route"]));
        assert_eq!(source.call_count(), 4);
        assert_eq!(result.cost.credits, 4);

        let requests = source.requests();
        // planning and verification are offered no tools
        assert!(requests[0].request.tools.is_empty());
        assert!(!requests[1].request.tools.is_empty());
        assert!(requests[3].request.tools.is_empty());
        assert_eq!(user_turns(&requests[2]).last().unwrap(), "Step 2: Route");
    }

    #[tokio::test]
    async fn rejected_verification_is_transient() {
        let source = Arc::new(SequentialSource::texts(&["1. Guess", "42", "rejected: no evidence"]));
        let d = deps(sub(), source, Arc::new(TestGateway::new()));

        let result = strategy().execute(&d).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::Transient));
        let error = result.error.unwrap();
        assert_eq!(error.code, "verification_rejected");
        assert!(error.message.contains("no evidence"));
        assert!(d.messages.history(&d.swarm_id).is_empty());
    }

    #[tokio::test]
    async fn plan_is_capped_at_step_limit() {
        let source = Arc::new(SequentialSource::texts(&["1. a\n2. b\n3. c", "done", "APPROVED"]));
        let mut d = deps(sub(), source.clone(), Arc::new(TestGateway::new()));
        d.limits = Arc::new(StrategyLimits {
            max_reasoning_steps: 1,
            ..StrategyLimits::default()
        });

        let result = strategy().execute(&d).await;
        assert!(result.success);
        assert_eq!(result.outputs["plan"], json!(["a"]));
        assert_eq!(source.call_count(), 3);
    }

    #[tokio::test]
    async fn tools_run_during_act_steps() {
        let source = Arc::new(SequentialSource::new(vec![
            Ok(make_text_response("1. Look it up")),
            Ok(make_tool_call_response(
                vec![make_tool_call("lookup", json!({"q": "sla"}))],
                "Found the SLA",
            )),
            Ok(make_text_response("APPROVED")),
        ]));
        let d = deps(sub(), source, Arc::new(TestGateway::new()));

        let result = strategy().execute(&d).await;
        assert!(result.success);
        assert_eq!(result.outputs["lookup"], json!({"answer": "answer for sla"}));
        assert_eq!(result.outputs["response"], json!("Found the SLA"));
    }

    #[test]
    fn claims_configured_prefixes_unless_pinned() {
        let s = strategy();
        assert!(s.can_handle("reasoning-triage", &sub()));
        assert!(!s.can_handle("chat", &SubroutineDefinition::new("x", "chat")));
        let pinned = SubroutineDefinition::new("x", "chat").with_strategy(StrategyKind::Reasoning);
        assert!(s.can_handle("chat", &pinned));
        let other = sub().with_strategy(StrategyKind::Deterministic);
        assert!(!s.can_handle("reasoning-triage", &other));
    }
}
