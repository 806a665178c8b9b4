//! Step-level execution for the swarm engine.
//!
//! - [`context`] assembles what a participant sees for one step: role
//!   prompt, recruitment instructions, goal, blackboard and history.
//! - [`strategies`] carry out one attempt (conversational, reasoning or
//!   deterministic).
//! - [`step`] is Tier 3: it picks a strategy and drives attempts with
//!   timeouts, retries and cancellation.

pub mod context;
pub mod step;
pub mod strategies;

pub use context::{ContextBuilder, MessageStore, StepContext, SwarmView, TemplateLoader, ToolCatalog};
pub use step::{ExecutionContext, RetryPolicy, StepExecutor};
pub use strategies::{
    ConversationalStrategy, DeterministicStrategy, ExecutionStrategy, ReasoningStrategy,
    StrategyDeps, StrategyLimits, StrategyRegistry,
};
