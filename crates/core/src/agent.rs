//! Swarm participants (bot agents).
//!
//! Agents are shared by reference across a swarm for its whole lifetime and
//! are never owned by a routine. Routines and steps refer to them by
//! [`AgentId`].

use serde::{Deserialize, Serialize};

/// Unique identifier of an agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The role an agent plays in a swarm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AgentRole {
    Leader,
    Coordinator,
    Delegator,
    Contributor,
    Other(String),
}

impl AgentRole {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Leader => "leader",
            Self::Coordinator => "coordinator",
            Self::Delegator => "delegator",
            Self::Contributor => "contributor",
            Self::Other(s) => s,
        }
    }

    /// Whether the role name appears in the configured leadership set.
    pub fn is_leadership(&self, leadership_roles: &[String]) -> bool {
        leadership_roles
            .iter()
            .any(|r| r.eq_ignore_ascii_case(self.as_str()))
    }
}

impl From<String> for AgentRole {
    fn from(s: String) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "leader" => Self::Leader,
            "coordinator" => Self::Coordinator,
            "delegator" => Self::Delegator,
            "contributor" => Self::Contributor,
            _ => Self::Other(s),
        }
    }
}

impl From<AgentRole> for String {
    fn from(role: AgentRole) -> Self {
        role.as_str().to_string()
    }
}

/// A trigger → action mapping describing how an agent reacts to events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Behavior {
    /// Event topic pattern (e.g. `routine.failed`).
    pub trigger: String,
    /// What the agent does in response, in its own words.
    pub action: String,
}

/// A named actor participating in a swarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotParticipant {
    pub id: AgentId,
    pub name: String,
    pub role: AgentRole,
    #[serde(default)]
    pub behaviors: Vec<Behavior>,
    /// Reference to the credential/identity the agent acts with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_ref: Option<String>,
    /// Extra role instructions appended to the role template.
    #[serde(default)]
    pub instructions: String,
    /// Tools this agent may use. Empty means every registered tool.
    #[serde(default)]
    pub tools: Vec<String>,
}

impl BotParticipant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id: AgentId(id.into()),
            name: name.into(),
            role,
            behaviors: Vec::new(),
            credential_ref: None,
            instructions: String::new(),
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_behavior(mut self, trigger: impl Into<String>, action: impl Into<String>) -> Self {
        self.behaviors.push(Behavior {
            trigger: trigger.into(),
            action: action.into(),
        });
        self
    }

    pub fn may_use_tool(&self, tool: &str) -> bool {
        self.tools.is_empty() || self.tools.iter().any(|t| t == tool)
    }
}
