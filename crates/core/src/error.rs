//! Error types for the SwarmClaw domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant, and the ones that can
//! surface from a step attempt know how to classify themselves into a
//! [`FailureKind`] for the retry policy.

use crate::execution::FailureKind;
use thiserror::Error;

/// The top-level error type for all SwarmClaw operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Blackboard error: {0}")]
    Blackboard(#[from] BlackboardError),

    #[error("Definition error: {0}")]
    Definition(#[from] DefinitionError),

    #[error("Swarm error: {0}")]
    Swarm(#[from] SwarmError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Rate limits, timeouts, network faults and 5xx responses are transient.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) => FailureKind::Transient,
            Self::ApiError { status_code, .. } if *status_code >= 500 => FailureKind::Transient,
            Self::ApiError { status_code: 408, .. } => FailureKind::Transient,
            _ => FailureKind::Permanent,
        }
    }

    /// Short machine-readable code used in failure records.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ApiError { .. } => "backend_error",
            Self::RateLimited { .. } => "rate_limited",
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::NotConfigured(_) => "not_configured",
            Self::Timeout(_) => "timeout",
            Self::Network(_) => "network",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

impl ToolError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Timeout { .. } => FailureKind::Transient,
            _ => FailureKind::Permanent,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "tool_not_found",
            Self::ExecutionFailed { .. } => "tool_failed",
            Self::Timeout { .. } => "timeout",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::InvalidArguments(_) => "validation_error",
        }
    }
}

/// Violations of the blackboard's subtask-list invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlackboardError {
    #[error("Subtask '{subtask}' depends on unknown subtask '{dependency}'")]
    UnknownDependency { subtask: String, dependency: String },

    #[error("Subtask '{0}' depends on itself")]
    SelfDependency(String),

    #[error("Subtask dependency cycle through '{0}'")]
    DependencyCycle(String),

    #[error("Subtask '{subtask}' cannot be done while '{dependency}' is not done")]
    DependencyNotDone { subtask: String, dependency: String },

    #[error("New subtask '{0}' needs a description")]
    MissingDescription(String),

    #[error("Subtask id must not be empty")]
    EmptyId,
}

/// Problems with routine or agent definitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("Routine not found: {id} (version {version})")]
    RoutineNotFound { id: String, version: String },

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Routine {id} v{version} already published with different content")]
    VersionConflict { id: String, version: u32 },

    #[error("Malformed routine '{routine}': {reason}")]
    Malformed { routine: String, reason: String },
}

/// Swarm-level (Tier 1) errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SwarmError {
    #[error("Swarm not found: {0}")]
    NotFound(String),

    #[error("Swarm {0} has ended")]
    Ended(String),

    #[error("Swarm {0} is already running")]
    AlreadyRunning(String),

    #[error("A swarm needs at least one participant")]
    NoParticipants,

    #[error("Agent '{agent}' is not a participant of swarm {swarm}")]
    NotParticipant { swarm: String, agent: String },

    #[error("Subtask not found: {0}")]
    SubtaskNotFound(String),

    #[error("Subtask '{0}' has no routine attached")]
    NoRoutine(String),

    #[error("Subtask '{subtask}' is not dispatchable: {reason}")]
    NotDispatchable { subtask: String, reason: String },

    #[error("Recruitment required before '{subtask}': {missing}")]
    RecruitmentRequired { subtask: String, missing: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage I/O failed at {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Stored snapshot is corrupt: {0}")]
    Corrupt(String),
}
