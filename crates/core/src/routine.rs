//! Versioned routine definitions.
//!
//! A routine is a graph of subroutines. Definitions are immutable once
//! versioned: publishing a change means publishing a new version.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::DefinitionError;

/// The three interchangeable ways of carrying out a subroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Multi-turn loop against a generative backend.
    Conversational,
    /// Plan, act, verify.
    Reasoning,
    /// Rules and templates only. Never calls a backend.
    Deterministic,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conversational => "conversational",
            Self::Reasoning => "reasoning",
            Self::Deterministic => "deterministic",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool call planned ahead of time (used by the deterministic strategy).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedToolCall {
    pub tool: String,
    /// Arguments; string values may contain `{{...}}` placeholders.
    #[serde(default)]
    pub arguments: serde_json::Value,
    /// Output key the tool result is stored under. Defaults to the tool name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl PlannedToolCall {
    pub fn output_key(&self) -> &str {
        self.output.as_deref().unwrap_or(&self.tool)
    }
}

/// Strategy-specific configuration of a subroutine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubroutineConfig {
    /// Task prompt for generative strategies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Output templates: key → template rendered against inputs,
    /// blackboard values and tool results.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<PlannedToolCall>,

    /// Cap on conversational turns / reasoning steps for this subroutine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,

    /// Key the final text answer is stored under (default `response`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,

    /// Static inputs merged under the routine inputs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, serde_json::Value>,
}

impl SubroutineConfig {
    pub fn output_key(&self) -> &str {
        self.output_key.as_deref().unwrap_or("response")
    }
}

/// One node of a routine graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubroutineDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Resource sub-type, matched against strategy capabilities
    /// (e.g. `deterministic-lookup`).
    #[serde(default)]
    pub sub_type: String,
    /// Explicit strategy hint; wins over sub-type matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyKind>,
    #[serde(default)]
    pub config: SubroutineConfig,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Failure of an optional subroutine does not fail the routine.
    #[serde(default)]
    pub optional: bool,
    /// Tools this subroutine may use. Empty means whatever the agent may use.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Overrides the configured retry attempt limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Overrides the configured per-attempt timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl SubroutineDefinition {
    pub fn new(id: impl Into<String>, sub_type: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            sub_type: sub_type.into(),
            strategy: None,
            config: SubroutineConfig::default(),
            depends_on: Vec::new(),
            optional: false,
            tools: Vec::new(),
            max_attempts: None,
            timeout_ms: None,
        }
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn with_output(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.config.outputs.insert(key.into(), template.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// A versioned routine: metadata plus its subroutine graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub sub_type: String,
    /// Default strategy hint for subroutines without their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyKind>,
    /// Declared input names.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Declared output names.
    #[serde(default)]
    pub outputs: Vec<String>,
    pub subroutines: Vec<SubroutineDefinition>,
}

impl RoutineDefinition {
    pub fn new(id: impl Into<String>, version: u32) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version,
            sub_type: String::new(),
            strategy: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            subroutines: Vec::new(),
        }
    }

    pub fn with_subroutine(mut self, sub: SubroutineDefinition) -> Self {
        self.subroutines.push(sub);
        self
    }

    pub fn subroutine(&self, id: &str) -> Option<&SubroutineDefinition> {
        self.subroutines.iter().find(|s| s.id == id)
    }

    /// Strategy hint for a subroutine: its own, else the routine's.
    pub fn strategy_hint(&self, sub: &SubroutineDefinition) -> Option<StrategyKind> {
        sub.strategy.or(self.strategy)
    }

    /// Check the graph: non-empty unique ids, known dependencies, no cycles.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let malformed = |reason: String| DefinitionError::Malformed {
            routine: self.id.clone(),
            reason,
        };

        if self.id.trim().is_empty() {
            return Err(malformed("routine id is empty".into()));
        }
        if self.version == 0 {
            return Err(malformed("versions start at 1".into()));
        }
        if self.subroutines.is_empty() {
            return Err(malformed("routine has no subroutines".into()));
        }

        let mut seen = HashSet::new();
        for sub in &self.subroutines {
            if sub.id.trim().is_empty() {
                return Err(malformed("subroutine id is empty".into()));
            }
            if !seen.insert(sub.id.as_str()) {
                return Err(malformed(format!("duplicate subroutine '{}'", sub.id)));
            }
            if sub.max_attempts == Some(0) {
                return Err(malformed(format!("subroutine '{}' allows zero attempts", sub.id)));
            }
        }
        for sub in &self.subroutines {
            for dep in &sub.depends_on {
                if dep == &sub.id {
                    return Err(malformed(format!("subroutine '{}' depends on itself", sub.id)));
                }
                if !seen.contains(dep.as_str()) {
                    return Err(malformed(format!(
                        "subroutine '{}' depends on unknown '{dep}'",
                        sub.id
                    )));
                }
            }
        }

        self.topological_order()
            .map(|_| ())
            .ok_or_else(|| malformed("dependency cycle".into()))
    }

    /// Subroutine ids in a dependency-respecting order (Kahn's algorithm,
    /// ties broken by declaration order). `None` if the graph has a cycle.
    pub fn topological_order(&self) -> Option<Vec<&str>> {
        let mut indegree: HashMap<&str, usize> = self
            .subroutines
            .iter()
            .map(|s| (s.id.as_str(), s.depends_on.len()))
            .collect();
        let mut order = Vec::with_capacity(self.subroutines.len());

        while order.len() < self.subroutines.len() {
            let next = self
                .subroutines
                .iter()
                .map(|s| s.id.as_str())
                .find(|id| indegree.get(id) == Some(&0))?;
            indegree.remove(next);
            for sub in &self.subroutines {
                if sub.depends_on.iter().any(|d| d == next) {
                    if let Some(n) = indegree.get_mut(sub.id.as_str()) {
                        *n -= 1;
                    }
                }
            }
            order.push(next);
        }
        Some(order)
    }

    /// Every subroutine that depends on `id`, directly or transitively.
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        let mut frontier = vec![id];
        while let Some(current) = frontier.pop() {
            for sub in &self.subroutines {
                if sub.depends_on.iter().any(|d| d == current) && !out.contains(&sub.id.as_str()) {
                    out.push(sub.id.as_str());
                    frontier.push(sub.id.as_str());
                }
            }
        }
        out
    }
}

/// Terminal and non-terminal states of one routine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutineStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RoutineStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}
