//! Step execution results and the failure taxonomy.
//!
//! A [`SubroutineExecutionResult`] is produced once per invocation attempt.
//! Tier 3 aggregates attempts into a [`StepOutcome`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

/// How a failure should be handled by the tiers above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeouts, rate limits, transient backend errors. Retried with backoff.
    Transient,
    /// Validation failure, permission denied, malformed definition. Never retried.
    Permanent,
    /// The abort signal was observed. Not retried, not billed as an error.
    Cancelled,
    /// A swarm-level budget was breached. Terminates the swarm.
    ResourceExhausted,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Why an attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub kind: FailureKind,
    /// Short machine-readable code (`timeout`, `rate_limited`, `cancelled`, ...).
    pub code: String,
    pub message: String,
}

impl ExecutionFailure {
    pub fn new(kind: FailureKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "cancelled", "abort signal observed")
    }

    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, code, message)
    }

    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(FailureKind::Permanent, code, message)
    }
}

impl From<&crate::error::ProviderError> for ExecutionFailure {
    fn from(err: &crate::error::ProviderError) -> Self {
        Self::new(err.failure_kind(), err.code(), err.to_string())
    }
}

impl From<&crate::error::ToolError> for ExecutionFailure {
    fn from(err: &crate::error::ToolError) -> Self {
        Self::new(err.failure_kind(), err.code(), err.to_string())
    }
}

/// Resources consumed by one or more attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCost {
    /// Billing credits.
    pub credits: u64,
    /// Backend tokens (prompt + completion).
    pub tokens: u64,
}

impl ResourceCost {
    pub const ZERO: Self = Self { credits: 0, tokens: 0 };

    pub fn credits(credits: u64) -> Self {
        Self { credits, tokens: 0 }
    }
}

impl Add for ResourceCost {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            credits: self.credits.saturating_add(rhs.credits),
            tokens: self.tokens.saturating_add(rhs.tokens),
        }
    }
}

impl AddAssign for ResourceCost {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for ResourceCost {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, c| acc + c)
    }
}

/// The result of a single invocation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubroutineExecutionResult {
    pub subroutine_id: String,
    /// 1-based attempt number that produced this result.
    pub attempt: u32,
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
    pub cost: ResourceCost,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionFailure>,
    /// Wall-clock duration of the attempt in milliseconds.
    pub duration_ms: u64,
}

impl SubroutineExecutionResult {
    pub fn succeeded(
        subroutine_id: impl Into<String>,
        outputs: BTreeMap<String, serde_json::Value>,
        cost: ResourceCost,
    ) -> Self {
        Self {
            subroutine_id: subroutine_id.into(),
            attempt: 0,
            outputs,
            cost,
            success: true,
            error: None,
            duration_ms: 0,
        }
    }

    pub fn failed(
        subroutine_id: impl Into<String>,
        failure: ExecutionFailure,
        cost: ResourceCost,
    ) -> Self {
        Self {
            subroutine_id: subroutine_id.into(),
            attempt: 0,
            outputs: BTreeMap::new(),
            cost,
            success: false,
            error: Some(failure),
            duration_ms: 0,
        }
    }

    pub fn cancelled(subroutine_id: impl Into<String>, cost: ResourceCost) -> Self {
        Self::failed(subroutine_id, ExecutionFailure::cancelled(), cost)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn is_cancelled(&self) -> bool {
        self.failure_kind() == Some(FailureKind::Cancelled)
    }
}

/// Per-invocation state machine: `pending → running → (succeeded | failed | cancelled)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl StepState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Legal transitions of the per-invocation state machine.
    pub fn can_transition_to(self, next: StepState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Cancelled)
                | (Self::Running, Self::Succeeded)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Cancelled)
        )
    }
}

/// Aggregated outcome of a step after all attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub state: StepState,
    /// The last attempt's result.
    pub result: SubroutineExecutionResult,
    /// Every attempt's result, oldest first. Holds only the last attempt
    /// unless full history was requested.
    pub attempts: Vec<SubroutineExecutionResult>,
    pub attempt_count: u32,
    /// Sum of per-attempt costs.
    pub total_cost: ResourceCost,
    pub total_duration_ms: u64,
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == StepState::Succeeded
    }
}
