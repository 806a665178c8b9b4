//! Swarm plan files.
//!
//! A plan is a TOML document declaring everything one swarm run needs:
//!
//! ```toml
//! [swarm]
//! goal = "Answer ticket T-1"
//! domains = ["billing"]
//! driver = "ada"
//!
//! [[agents]]
//! id = "ada"
//! name = "Ada"
//! role = "contributor"
//!
//! [[routines]]
//! id = "answer"
//! version = 1
//! [[routines.subroutines]]
//! id = "reply"
//! sub_type = "conversational"
//!
//! [[subtasks]]
//! id = "reply"
//! description = "Reply to the customer"
//! routine = "answer"
//!
//! [[tables]]
//! name = "plans"
//! description = "Price per plan"
//! entries = { basic = 10, pro = 30 }
//! ```

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use swarmclaw_core::agent::{AgentId, BotParticipant};
use swarmclaw_core::blackboard::{Blackboard, BlackboardUpdate, RoutineRef, SubtaskPatch};
use swarmclaw_core::error::ToolError;
use swarmclaw_core::goal::GoalSpec;
use swarmclaw_core::routine::RoutineDefinition;
use swarmclaw_core::tool::{Tool, ToolRegistry, ToolResult};

#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    pub swarm: SwarmSection,
    #[serde(default)]
    pub agents: Vec<BotParticipant>,
    #[serde(default)]
    pub routines: Vec<RoutineDefinition>,
    #[serde(default)]
    pub subtasks: Vec<PlannedSubtask>,
    /// Initial blackboard values.
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
    /// Static lookup tables exposed to the swarm as tools.
    #[serde(default)]
    pub tables: Vec<LookupTable>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwarmSection {
    #[serde(default)]
    pub id: Option<String>,
    pub goal: String,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub estimated_duration_minutes: Option<u32>,
    #[serde(default)]
    pub estimated_reasoning_steps: Option<u32>,
    /// Participant that dispatches subtasks. Defaults to the first agent.
    #[serde(default)]
    pub driver: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlannedSubtask {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub routine: Option<String>,
    /// Pinned routine version; latest when unset.
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
}

impl Plan {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("cannot read plan {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid plan {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn goal(&self) -> GoalSpec {
        let mut goal = GoalSpec::new(&self.swarm.goal).with_domains(self.swarm.domains.iter().cloned());
        goal.estimated_duration_minutes = self.swarm.estimated_duration_minutes;
        goal.estimated_reasoning_steps = self.swarm.estimated_reasoning_steps;
        goal
    }

    pub fn driver(&self) -> anyhow::Result<AgentId> {
        match (&self.swarm.driver, self.agents.first()) {
            (Some(id), _) => Ok(AgentId::new(id.as_str())),
            (None, Some(first)) => Ok(first.id.clone()),
            (None, None) => bail!("plan declares no agents"),
        }
    }

    /// The first blackboard commit: values plus subtasks.
    pub fn initial_update(&self) -> BlackboardUpdate {
        let mut update = BlackboardUpdate::new();
        for (key, value) in &self.values {
            update = update.set(key, value.clone());
        }
        for task in &self.subtasks {
            let mut patch = SubtaskPatch::new(&task.id, &task.description).depends_on(task.depends_on.iter());
            if let Some(routine) = &task.routine {
                patch = patch.routine(RoutineRef {
                    id: routine.clone(),
                    version: task.version,
                });
            }
            if let Some(assignee) = &task.assignee {
                patch = patch.assignee(AgentId::new(assignee.as_str()));
            }
            for (key, value) in &task.inputs {
                patch = patch.input(key, value.clone());
            }
            update = update.subtask(patch);
        }
        update
    }

    /// Every tool the plan's tables provide.
    pub fn tools(&self) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for table in &self.tables {
            registry.register(Box::new(table.clone()));
        }
        registry
    }

    /// Structural problems that would stop the swarm from running.
    /// `external` names routines available outside the plan.
    pub fn problems(&self, external: &HashSet<String>) -> Vec<String> {
        let mut problems = Vec::new();

        let mut agents = HashSet::new();
        for agent in &self.agents {
            if !agents.insert(agent.id.as_str()) {
                problems.push(format!("agent '{}' is declared twice", agent.id));
            }
        }
        if agents.is_empty() {
            problems.push("plan declares no agents".into());
        }
        if let Some(driver) = &self.swarm.driver {
            if !agents.contains(driver.as_str()) {
                problems.push(format!("driver '{driver}' is not a declared agent"));
            }
        }

        let mut routines: HashSet<&str> = external.iter().map(String::as_str).collect();
        for routine in &self.routines {
            if let Err(e) = routine.validate() {
                problems.push(e.to_string());
            }
            routines.insert(&routine.id);
        }

        for task in &self.subtasks {
            if let Some(routine) = &task.routine {
                if !routines.contains(routine.as_str()) {
                    problems.push(format!("subtask '{}' uses unknown routine '{routine}'", task.id));
                }
            }
            if let Some(assignee) = &task.assignee {
                if !agents.contains(assignee.as_str()) {
                    problems.push(format!("subtask '{}' is assigned to unknown agent '{assignee}'", task.id));
                }
            }
        }

        if let Err(e) = Blackboard::new().apply(&self.initial_update(), "plan") {
            problems.push(e.to_string());
        }
        problems
    }
}

/// A static key → value table answering `{"key": ...}` lookups.
#[derive(Debug, Clone, Deserialize)]
pub struct LookupTable {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub entries: BTreeMap<String, Value>,
}

#[async_trait]
impl Tool for LookupTable {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "key": {
                    "type": "string",
                    "description": "Entry to look up",
                    "enum": self.entries.keys().collect::<Vec<_>>()
                }
            },
            "required": ["key"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let key = arguments["key"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'key' argument".into()))?;
        let value = self.entries.get(key).ok_or_else(|| ToolError::ExecutionFailed {
            tool_name: self.name.clone(),
            reason: format!("no entry '{key}'"),
        })?;

        Ok(ToolResult {
            call_id: String::new(),
            success: true,
            output: value.to_string(),
            data: Some(value.clone()),
        })
    }
}
