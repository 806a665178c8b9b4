//! Routine orchestration and swarm coordination.
//!
//! - [`orchestrator`] is Tier 2: it runs one routine's subroutine graph,
//!   handing each ready subroutine to the Tier 3 step executor.
//! - [`coordinator`] is Tier 1: it owns swarms, their shared blackboard,
//!   routine dispatch, budgets and the recruitment rule.

pub mod coordinator;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use coordinator::{SwarmCoordinator, SwarmSpec};
pub use orchestrator::{RoutineOrchestrator, RoutineReport, RoutineRequest, SubroutineStatus};
