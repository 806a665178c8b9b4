//! Swarm identity, lifecycle status, and the run snapshot that is
//! checkpointed through the persistence service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::agent::{AgentId, BotParticipant};
use crate::blackboard::Blackboard;
use crate::execution::{FailureKind, ResourceCost};
use crate::goal::GoalSpec;
use crate::routine::RoutineStatus;

/// Unique identifier of a swarm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwarmId(pub String);

impl SwarmId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SwarmId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SwarmId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SwarmId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifies one Tier 2 routine run inside a swarm.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutineRunId(pub String);

impl RoutineRunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RoutineRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RoutineRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmStatus {
    Active,
    Ended,
}

/// Why a swarm ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EndReason {
    /// A participant declared the goal satisfied.
    GoalSatisfied { by: AgentId },
    /// A participant stopped the swarm for another reason.
    Requested { by: AgentId, note: String },
    CreditBudgetExhausted { spent: u64, limit: u64 },
    TimeBudgetExhausted { limit_secs: u64 },
}

impl EndReason {
    pub fn is_resource_exhausted(&self) -> bool {
        matches!(
            self,
            Self::CreditBudgetExhausted { .. } | Self::TimeBudgetExhausted { .. }
        )
    }

    pub fn describe(&self) -> String {
        match self {
            Self::GoalSatisfied { by } => format!("goal satisfied (declared by {by})"),
            Self::Requested { by, note } => format!("ended by {by}: {note}"),
            Self::CreditBudgetExhausted { spent, limit } => {
                format!("credit budget exhausted ({spent}/{limit})")
            }
            Self::TimeBudgetExhausted { limit_secs } => {
                format!("time budget of {limit_secs}s exhausted")
            }
        }
    }
}

/// An error recorded at swarm level, kept for post-mortem diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmErrorRecord {
    pub at: DateTime<Utc>,
    pub kind: FailureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routine_run: Option<RoutineRunId>,
    pub message: String,
}

/// What Tier 1 remembers about one routine run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineRunRecord {
    pub run_id: RoutineRunId,
    pub subtask_id: String,
    pub routine_id: String,
    pub routine_version: u32,
    pub agent_id: AgentId,
    pub status: RoutineStatus,
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub cost: ResourceCost,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Complete, serializable state of a swarm. This is what gets
/// checkpointed and what an ended swarm exposes to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub swarm_id: SwarmId,
    pub goal: GoalSpec,
    pub agents: Vec<BotParticipant>,
    pub blackboard: Blackboard,
    pub status: SwarmStatus,
    /// Whether the recruitment rule applies to this swarm.
    #[serde(default)]
    pub recruitment_required: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
    #[serde(default)]
    pub routines: Vec<RoutineRunRecord>,
    #[serde(default)]
    pub errors: Vec<SwarmErrorRecord>,
    #[serde(default)]
    pub credits_spent: u64,
}

impl RunSnapshot {
    pub fn is_active(&self) -> bool {
        self.status == SwarmStatus::Active
    }

    pub fn agent(&self, id: &AgentId) -> Option<&BotParticipant> {
        self.agents.iter().find(|a| &a.id == id)
    }

    pub fn routine_run(&self, run_id: &RoutineRunId) -> Option<&RoutineRunRecord> {
        self.routines.iter().find(|r| &r.run_id == run_id)
    }
}
