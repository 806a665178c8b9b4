//! Tool catalog: which tool schemas a step gets to see.

use swarmclaw_core::agent::BotParticipant;
use swarmclaw_core::provider::ToolDefinition;
use swarmclaw_core::routine::SubroutineDefinition;
use swarmclaw_core::tool::ToolGateway;

/// Snapshot of the registered tool schemas.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    definitions: Vec<ToolDefinition>,
}

impl ToolCatalog {
    pub fn new(definitions: Vec<ToolDefinition>) -> Self {
        Self { definitions }
    }

    pub fn from_gateway(gateway: &dyn ToolGateway) -> Self {
        Self::new(gateway.definitions())
    }

    /// Tools offered to `agent` while running `subroutine`: the agent's
    /// allow-list intersected with the tools the subroutine declares. An
    /// empty list on either side means no restriction from that side.
    pub fn for_step(&self, agent: &BotParticipant, subroutine: &SubroutineDefinition) -> Vec<ToolDefinition> {
        self.definitions
            .iter()
            .filter(|d| agent.may_use_tool(&d.name))
            .filter(|d| subroutine.tools.is_empty() || subroutine.tools.iter().any(|t| t == &d.name))
            .cloned()
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.definitions.iter().find(|d| d.name == name)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmclaw_core::agent::AgentRole;

    fn def(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: format!("{name} tool"),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    fn catalog() -> ToolCatalog {
        ToolCatalog::new(vec![def("search"), def("deploy"), def("lookup")])
    }

    fn names(defs: &[ToolDefinition]) -> Vec<&str> {
        defs.iter().map(|d| d.name.as_str()).collect()
    }

    #[test]
    fn unrestricted_agent_and_subroutine_see_everything() {
        let agent = BotParticipant::new("a", "A", AgentRole::Contributor);
        let sub = SubroutineDefinition::new("s", "conversational");
        assert_eq!(catalog().for_step(&agent, &sub).len(), 3);
    }

    #[test]
    fn both_restrictions_apply() {
        let agent = BotParticipant::new("a", "A", AgentRole::Contributor).with_tools(["search", "lookup"]);
        let mut sub = SubroutineDefinition::new("s", "conversational");
        sub.tools = vec!["lookup".into(), "deploy".into()];

        assert_eq!(names(&catalog().for_step(&agent, &sub)), vec!["lookup"]);
    }
}
