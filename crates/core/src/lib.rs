//! # SwarmClaw Core
//!
//! Domain types, traits, and error definitions for the SwarmClaw swarm
//! execution engine. This crate has **no framework dependencies** beyond
//! serde and a tokio broadcast channel; it defines the domain model that
//! every other crate implements against.
//!
//! ## Layout
//!
//! - [`event`]: the event bus every tier reports through
//! - [`blackboard`], [`goal`], [`agent`], [`swarm`]: Tier 1 state
//! - [`routine`]: versioned routine definitions (Tier 2)
//! - [`execution`]: step results and the failure taxonomy (Tier 3)
//! - [`provider`], [`tool`], [`services`]: boundaries to backends, tools,
//!   persistence, definition storage and authorization

pub mod agent;
pub mod blackboard;
pub mod error;
pub mod event;
pub mod execution;
pub mod goal;
pub mod message;
pub mod provider;
pub mod routine;
pub mod services;
pub mod swarm;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{AgentId, AgentRole, Behavior, BotParticipant};
pub use blackboard::{
    Blackboard, BlackboardUpdate, RoutineRef, Subtask, SubtaskPatch, SubtaskStatus,
};
pub use error::{
    BlackboardError, DefinitionError, Error, ProviderError, Result, StoreError, SwarmError,
    ToolError,
};
pub use event::{DomainEvent, EventBus, EventEnvelope, SubscriptionToken};
pub use execution::{
    ExecutionFailure, FailureKind, ResourceCost, StepOutcome, StepState,
    SubroutineExecutionResult,
};
pub use goal::{ComplexityAssessment, ComplexityThresholds, GoalSpec};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{
    Provider, ProviderRequest, ProviderResponse, ResponseSource, SourceRequest, ToolDefinition,
    Usage,
};
pub use routine::{
    PlannedToolCall, RoutineDefinition, RoutineStatus, StrategyKind, SubroutineConfig,
    SubroutineDefinition,
};
pub use services::{AuthorizationService, DefinitionStore, Permission, PersistenceService};
pub use swarm::{
    EndReason, RoutineRunId, RoutineRunRecord, RunSnapshot, SwarmErrorRecord, SwarmId,
    SwarmStatus,
};
pub use tool::{Tool, ToolGateway, ToolInvoker, ToolRegistry, ToolResult};
