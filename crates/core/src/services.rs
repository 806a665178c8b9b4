//! Boundary contracts for the engine's external collaborators.
//!
//! The engine never depends on a concrete implementation of these. The
//! store and security crates provide the in-process ones.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::agent::{AgentId, BotParticipant};
use crate::error::{DefinitionError, StoreError};
use crate::routine::RoutineDefinition;
use crate::swarm::{RunSnapshot, SwarmId};

/// Durable checkpointing of swarm state, for crash recovery and audit.
#[async_trait]
pub trait PersistenceService: Send + Sync {
    fn name(&self) -> &str;

    async fn save_run_state(
        &self,
        swarm_id: &SwarmId,
        snapshot: &RunSnapshot,
    ) -> std::result::Result<(), StoreError>;

    /// `Ok(None)` when nothing was ever saved for the swarm.
    async fn load_run_state(
        &self,
        swarm_id: &SwarmId,
    ) -> std::result::Result<Option<RunSnapshot>, StoreError>;
}

/// Read-only lookups of versioned routine and agent definitions.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// `version: None` resolves to the latest published version.
    async fn load_routine(
        &self,
        id: &str,
        version: Option<u32>,
    ) -> std::result::Result<Arc<RoutineDefinition>, DefinitionError>;

    async fn load_agent(&self, id: &AgentId) -> std::result::Result<BotParticipant, DefinitionError>;
}

/// Outcome of an authorization check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Allow,
    Deny,
}

impl Permission {
    pub fn is_allowed(self) -> bool {
        self == Self::Allow
    }
}

/// Consulted before any side-effecting tool invocation.
#[async_trait]
pub trait AuthorizationService: Send + Sync {
    async fn check_permission(&self, agent_id: &str, action: &str, resource_id: &str) -> Permission;
}

/// Action name used when checking tool invocations.
pub const ACTION_TOOL_INVOKE: &str = "tool.invoke";
