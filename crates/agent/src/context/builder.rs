//! Builds the strategy-agnostic input for one subroutine invocation.
//!
//! The system message is laid out in this order:
//!
//! | Section | Source |
//! |---------|--------|
//! | Role block | Role template, or the built-in fallback |
//! | Mandatory subtasks | Recruitment sequence, leadership roles on complex goals only |
//! | Goal | Swarm goal |
//! | Subroutine | Definition name, sub-type and prompt |
//! | Blackboard | Truncated preview of the shared state |
//!
//! Conversation history follows as separate messages, cut to the
//! configured token budget, newest kept.

use serde_json::{Map, Value, json};
use std::sync::Arc;
use swarmclaw_config::{ComplexityConfig, ContextConfig};
use swarmclaw_core::agent::BotParticipant;
use swarmclaw_core::blackboard::{Blackboard, recruitment};
use swarmclaw_core::goal::GoalSpec;
use swarmclaw_core::message::Message;
use swarmclaw_core::provider::ToolDefinition;
use swarmclaw_core::routine::SubroutineDefinition;
use swarmclaw_core::swarm::SwarmId;
use tracing::debug;

use super::catalog::ToolCatalog;
use super::message_store::MessageStore;
use super::templates::TemplateLoader;
use super::token;

const ELLIPSIS: &str = "…";

/// The swarm-level state a step is built against.
#[derive(Debug, Clone, Copy)]
pub struct SwarmView<'a> {
    pub swarm_id: &'a SwarmId,
    pub goal: &'a GoalSpec,
    pub blackboard: &'a Blackboard,
    /// Routine run the step belongs to. Selects the history window.
    pub run_id: Option<&'a str>,
}

/// Assembled input for one invocation.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub system_prompt: String,
    /// Oldest first, already within the history budget.
    pub history: Vec<Message>,
    /// Schemas of the tools this agent may use in this subroutine.
    pub tools: Vec<ToolDefinition>,
    pub blackboard_preview: Value,
    /// The mandatory recruitment sequence was shown.
    pub recruitment_injected: bool,
    /// A template could not be loaded and the fallback was used.
    pub degraded: bool,
    pub metadata: ContextMetadata,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextMetadata {
    pub system_tokens: usize,
    pub history_tokens: usize,
    pub history_dropped: usize,
    pub tool_tokens: usize,
    pub total_tokens: usize,
}

impl StepContext {
    /// System message, history, then `prompt` as the user turn.
    pub fn messages(&self, prompt: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(Message::system(&self.system_prompt));
        messages.extend(self.history.iter().cloned());
        messages.push(Message::user(prompt));
        messages
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }
}

pub struct ContextBuilder {
    context: ContextConfig,
    complexity: ComplexityConfig,
    templates: TemplateLoader,
    catalog: ToolCatalog,
    messages: Arc<MessageStore>,
}

impl ContextBuilder {
    pub fn new(
        context: ContextConfig,
        complexity: ComplexityConfig,
        catalog: ToolCatalog,
        messages: Arc<MessageStore>,
    ) -> Self {
        let templates = TemplateLoader::new(context.template_dir.clone());
        Self {
            context,
            complexity,
            templates,
            catalog,
            messages,
        }
    }

    pub fn message_store(&self) -> &Arc<MessageStore> {
        &self.messages
    }

    /// Whether the recruitment rule applies to this agent on this goal.
    pub fn requires_recruitment(&self, agent: &BotParticipant, goal: &GoalSpec) -> bool {
        agent.role.is_leadership(&self.complexity.leadership_roles)
            && goal.assess(&self.complexity.thresholds()).exceeds_threshold()
    }

    pub fn build_context(
        &self,
        agent: &BotParticipant,
        subroutine: &SubroutineDefinition,
        swarm: &SwarmView<'_>,
    ) -> StepContext {
        let role = self.templates.render(agent);
        let mut sections = vec![role.text];

        let recruitment_injected = self.requires_recruitment(agent, swarm.goal);
        if recruitment_injected {
            sections.push(recruitment_section(swarm.blackboard));
        }

        sections.push(format!("[Goal]\n{}", swarm.goal.text));

        let mut sub_section = format!(
            "[Subroutine]\n{} ({})",
            if subroutine.name.is_empty() { &subroutine.id } else { &subroutine.name },
            subroutine.sub_type
        );
        if let Some(prompt) = &subroutine.config.prompt {
            sub_section.push('\n');
            sub_section.push_str(prompt);
        }
        sections.push(sub_section);

        let blackboard_preview = blackboard_preview(swarm.blackboard, self.context.max_preview_chars);
        sections.push(format!(
            "[Blackboard]\n{}",
            serde_json::to_string_pretty(&blackboard_preview).unwrap_or_default()
        ));

        let system_prompt = sections.join("\n\n");
        let window = self
            .messages
            .recent(swarm.swarm_id, swarm.run_id, self.context.max_history_tokens);
        let tools = self.catalog.for_step(agent, subroutine);

        let system_tokens = token::estimate_tokens(&system_prompt);
        let tool_tokens = token::estimate_tools_tokens(&tools);
        let metadata = ContextMetadata {
            system_tokens,
            history_tokens: window.tokens,
            history_dropped: window.dropped,
            tool_tokens,
            total_tokens: system_tokens + window.tokens + tool_tokens,
        };

        debug!(
            agent = %agent.id,
            subroutine = %subroutine.id,
            tokens = metadata.total_tokens,
            history = window.messages.len(),
            dropped = window.dropped,
            tools = tools.len(),
            recruitment = recruitment_injected,
            degraded = role.degraded,
            "Context assembled"
        );

        StepContext {
            system_prompt,
            history: window.messages,
            tools,
            blackboard_preview,
            recruitment_injected,
            degraded: role.degraded,
            metadata,
        }
    }
}

fn recruitment_section(board: &Blackboard) -> String {
    let mut lines = vec![
        "[Mandatory subtasks]".to_string(),
        "Complete these in order before any domain-specific work:".to_string(),
    ];
    for (i, (id, description)) in recruitment::SEQUENCE.iter().enumerate() {
        let status = board
            .subtask(id)
            .map_or("missing", |s| s.status.as_str());
        lines.push(format!("{}. {id} [{status}]: {description}", i + 1));
    }
    lines.push(format!(
        "{}. Proceed with the goal once the team is resolved.",
        recruitment::SEQUENCE.len() + 1
    ));
    lines.join("\n")
}

/// Preview of the shared state: values with long strings truncated, plus
/// the subtask list as id/status pairs.
pub fn blackboard_preview(board: &Blackboard, max_chars: usize) -> Value {
    let values: Map<String, Value> = board
        .values
        .iter()
        .map(|(k, v)| (k.clone(), truncate_strings(v, max_chars)))
        .collect();
    let subtasks: Vec<Value> = board
        .subtasks
        .iter()
        .map(|s| json!({"id": s.id, "status": s.status.as_str()}))
        .collect();
    json!({
        "version": board.version,
        "values": values,
        "subtasks": subtasks,
    })
}

/// Truncate every string longer than `max_chars` characters, recursively.
pub fn truncate_strings(value: &Value, max_chars: usize) -> Value {
    match value {
        Value::String(s) if s.chars().count() > max_chars => {
            let mut cut: String = s.chars().take(max_chars).collect();
            cut.push_str(ELLIPSIS);
            Value::String(cut)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| truncate_strings(v, max_chars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), truncate_strings(v, max_chars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmclaw_core::agent::AgentRole;
    use swarmclaw_core::blackboard::{BlackboardUpdate, SubtaskPatch};

    fn builder(context: ContextConfig, catalog: ToolCatalog) -> ContextBuilder {
        ContextBuilder::new(
            context,
            ComplexityConfig::default(),
            catalog,
            Arc::new(MessageStore::new()),
        )
    }

    fn complex_goal() -> GoalSpec {
        GoalSpec::new("Launch in three markets").with_domains(["legal", "marketing"])
    }

    #[test]
    fn leader_on_complex_goal_sees_recruitment_first() {
        let b = builder(ContextConfig::default(), ToolCatalog::default());
        let leader = BotParticipant::new("lead", "Lead", AgentRole::Leader);
        let board = Blackboard::new();
        let goal = complex_goal();
        let swarm_id = SwarmId::from("s");
        let view = SwarmView {
            swarm_id: &swarm_id,
            goal: &goal,
            blackboard: &board,
            run_id: None,
        };

        let ctx = b.build_context(&leader, &SubroutineDefinition::new("plan", "conversational"), &view);
        assert!(ctx.recruitment_injected);
        let mandatory = ctx.system_prompt.find("[Mandatory subtasks]").unwrap();
        let goal_at = ctx.system_prompt.find("[Goal]").unwrap();
        assert!(mandatory < goal_at);
        let search = ctx.system_prompt.find(recruitment::SEARCH_TEAM).unwrap();
        let resolve = ctx.system_prompt.find(recruitment::RESOLVE_TEAM).unwrap();
        assert!(search < resolve);
        assert!(ctx.system_prompt.contains("[missing]"));
    }

    #[test]
    fn no_injection_for_contributors_or_simple_goals() {
        let b = builder(ContextConfig::default(), ToolCatalog::default());
        let board = Blackboard::new();
        let swarm_id = SwarmId::from("s");
        let sub = SubroutineDefinition::new("x", "conversational");

        let complex = complex_goal();
        let contributor = BotParticipant::new("c", "C", AgentRole::Contributor);
        let view = SwarmView {
            swarm_id: &swarm_id,
            goal: &complex,
            blackboard: &board,
            run_id: None,
        };
        assert!(!b.build_context(&contributor, &sub, &view).recruitment_injected);

        let simple = GoalSpec::new("Answer one question").with_domains(["support"]);
        let leader = BotParticipant::new("l", "L", AgentRole::Leader);
        let view = SwarmView { goal: &simple, ..view };
        assert!(!b.build_context(&leader, &sub, &view).recruitment_injected);

        let long = GoalSpec::new("Migrate").with_duration_minutes(121);
        let view = SwarmView { goal: &long, ..view };
        assert!(b.build_context(&leader, &sub, &view).recruitment_injected);
    }

    #[test]
    fn preview_truncates_long_strings_with_ellipsis() {
        let board = Blackboard::new()
            .apply(
                &BlackboardUpdate::new()
                    .set("notes", json!("abcdefghij"))
                    .set("nested", json!({"list": ["short", "0123456789abc"]}))
                    .set("count", json!(3))
                    .subtask(SubtaskPatch::new("t1", "first")),
                "lead",
            )
            .unwrap();

        let preview = blackboard_preview(&board, 5);
        assert_eq!(preview["values"]["notes"], json!("abcde…"));
        assert_eq!(preview["values"]["nested"]["list"], json!(["short", "01234…"]));
        assert_eq!(preview["values"]["count"], json!(3));
        assert_eq!(preview["subtasks"][0], json!({"id": "t1", "status": "todo"}));
        assert_eq!(preview["version"], json!(1));
    }

    #[test]
    fn history_is_cut_to_budget_and_tools_filtered() {
        let catalog = ToolCatalog::new(vec![
            ToolDefinition {
                name: "lookup".into(),
                description: "Look up".into(),
                parameters: json!({}),
            },
            ToolDefinition {
                name: "deploy".into(),
                description: "Deploy".into(),
                parameters: json!({}),
            },
        ]);
        let b = builder(
            ContextConfig {
                max_history_tokens: 6,
                ..ContextConfig::default()
            },
            catalog,
        );
        let swarm_id = SwarmId::from("s");
        b.message_store().append(&swarm_id, Message::user("older"));
        b.message_store().append(&swarm_id, Message::user("newer"));

        let agent = BotParticipant::new("a", "A", AgentRole::Contributor).with_tools(["lookup"]);
        let goal = GoalSpec::new("g");
        let board = Blackboard::new();
        let view = SwarmView {
            swarm_id: &swarm_id,
            goal: &goal,
            blackboard: &board,
            run_id: None,
        };
        let ctx = b.build_context(&agent, &SubroutineDefinition::new("s1", "conversational"), &view);

        assert_eq!(ctx.history.len(), 1);
        assert_eq!(ctx.history[0].content, "newer");
        assert_eq!(ctx.metadata.history_dropped, 1);
        assert!(ctx.has_tool("lookup"));
        assert!(!ctx.has_tool("deploy"));

        let messages = ctx.messages("go");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2].content, "go");
    }

    #[test]
    fn missing_template_marks_context_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let b = builder(
            ContextConfig {
                template_dir: Some(dir.path().join("missing")),
                ..ContextConfig::default()
            },
            ToolCatalog::default(),
        );
        let swarm_id = SwarmId::from("s");
        let goal = GoalSpec::new("g");
        let board = Blackboard::new();
        let view = SwarmView {
            swarm_id: &swarm_id,
            goal: &goal,
            blackboard: &board,
            run_id: None,
        };
        let agent = BotParticipant::new("a", "A", AgentRole::Contributor);
        let ctx = b.build_context(&agent, &SubroutineDefinition::new("s1", "x"), &view);
        assert!(ctx.degraded);
        assert!(ctx.system_prompt.contains("[Goal]\ng"));
    }
}
