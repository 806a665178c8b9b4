//! Deterministic strategy: rules and templates, no generative calls.
//!
//! Runs the subroutine's planned tool calls in order, then renders its
//! output templates. Templates reference values with `{{path}}`, where the
//! path starts at one of three roots:
//!
//! - `inputs.<key>`: the step input
//! - `blackboard.<key>`: shared state values
//! - `tools.<output>`: results of planned tool calls made so far
//!
//! Nested fields and array indices are reached with further dots
//! (`tools.lookup.answer`, `inputs.items.0`). A template that is a single
//! placeholder yields the referenced value with its JSON type; anything
//! else is string interpolation. An unresolved placeholder fails the
//! attempt permanently.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use swarmclaw_core::execution::{ExecutionFailure, SubroutineExecutionResult};
use swarmclaw_core::routine::{StrategyKind, SubroutineDefinition};
use tracing::debug;

use super::{ExecutionStrategy, Interrupt, Outputs, StrategyDeps, claims};

pub struct DeterministicStrategy {
    sub_types: Vec<String>,
}

impl DeterministicStrategy {
    /// `sub_types`: sub-type prefixes this strategy claims.
    pub fn new(sub_types: Vec<String>) -> Self {
        Self { sub_types }
    }

    async fn run(&self, deps: &StrategyDeps) -> Result<Outputs, Interrupt> {
        let config = &deps.subroutine.config;
        if config.tool_calls.is_empty() && config.outputs.is_empty() {
            return Err(ExecutionFailure::permanent(
                "no_rules",
                format!("'{}' declares no tool calls and no output templates", deps.subroutine.id),
            )
            .into());
        }

        let mut tool_values = Map::new();
        let mut outputs = Outputs::new();

        for call in &config.tool_calls {
            deps.checkpoint()?;
            if !deps.context.has_tool(&call.tool) {
                return Err(ExecutionFailure::permanent(
                    "tool_unavailable",
                    format!("tool '{}' is not available to this step", call.tool),
                )
                .into());
            }
            let arguments = render_value(&call.arguments, &scope(deps, &tool_values))?;
            let result = deps
                .call_tool(&call.tool, arguments)
                .await?
                .map_err(|e| ExecutionFailure::from(&e))?;
            if !result.success {
                return Err(ExecutionFailure::permanent("tool_failed", result.output).into());
            }
            debug!(subroutine = %deps.subroutine.id, tool = %call.tool, "Planned tool call done");
            let value = result.as_value();
            tool_values.insert(call.output_key().to_string(), value.clone());
            outputs.insert(call.output_key().to_string(), value);
        }

        let scope = scope(deps, &tool_values);
        for (key, template) in &config.outputs {
            outputs.insert(key.clone(), render_template(template, &scope)?);
        }
        Ok(outputs)
    }
}

fn scope(deps: &StrategyDeps, tool_values: &Map<String, Value>) -> Value {
    json!({
        "inputs": deps.input,
        "blackboard": deps.blackboard.values,
        "tools": tool_values,
    })
}

/// Follow a dotted path through objects and arrays.
pub fn lookup<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(scope, |value, segment| match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn unresolved(path: &str) -> ExecutionFailure {
    ExecutionFailure::permanent("unresolved_placeholder", format!("no value for '{{{{{path}}}}}'"))
}

/// Render one template against `scope`.
pub fn render_template(template: &str, scope: &Value) -> Result<Value, ExecutionFailure> {
    let trimmed = template.trim();
    if let Some(path) = trimmed
        .strip_prefix("{{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .filter(|inner| !inner.contains("{{") && !inner.contains("}}"))
    {
        let path = path.trim();
        return lookup(scope, path).cloned().ok_or_else(|| unresolved(path));
    }

    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        rendered.push_str(&rest[..start]);
        let path = rest[start + 2..start + 2 + len].trim();
        match lookup(scope, path).ok_or_else(|| unresolved(path))? {
            Value::String(s) => rendered.push_str(s),
            other => rendered.push_str(&other.to_string()),
        }
        rest = &rest[start + 2 + len + 2..];
    }
    rendered.push_str(rest);
    Ok(Value::String(rendered))
}

/// Render every string inside `value` as a template.
pub fn render_value(value: &Value, scope: &Value) -> Result<Value, ExecutionFailure> {
    Ok(match value {
        Value::String(s) if s.contains("{{") => render_template(s, scope)?,
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| render_value(v, scope))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), render_value(v, scope)?)))
                .collect::<Result<_, ExecutionFailure>>()?,
        ),
        other => other.clone(),
    })
}

#[async_trait]
impl ExecutionStrategy for DeterministicStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Deterministic
    }

    fn can_handle(&self, sub_type: &str, subroutine: &SubroutineDefinition) -> bool {
        match subroutine.strategy {
            Some(kind) => kind == StrategyKind::Deterministic,
            None => claims(&self.sub_types, sub_type),
        }
    }

    async fn execute(&self, deps: &StrategyDeps) -> SubroutineExecutionResult {
        deps.finish(self.run(deps).await)
    }
}
