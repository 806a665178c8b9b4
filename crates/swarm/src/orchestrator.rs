//! Tier 2: runs one routine's subroutine graph.
//!
//! The orchestrator repeatedly dispatches every pending subroutine whose
//! dependencies are all done, up to the concurrency limit, and waits for
//! the next one to finish. Results are merged into the routine-local
//! output map, which the orchestrator alone writes. When a subroutine fails
//! for good, every subroutine downstream of it is marked blocked and never
//! dispatched. Retrying is Tier 3's business and never happens here.
//!
//! A run ends:
//!
//! - **cancelled** when the abort signal fired and a subroutine was cut short,
//! - **failed** when a non-optional subroutine failed or was blocked,
//! - **completed** otherwise.

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use swarmclaw_agent::step::{ExecutionContext, StepExecutor};
use swarmclaw_core::agent::BotParticipant;
use swarmclaw_core::blackboard::Blackboard;
use swarmclaw_core::event::{DomainEvent, EventBus};
use swarmclaw_core::execution::{ResourceCost, StepOutcome, StepState};
use swarmclaw_core::goal::GoalSpec;
use swarmclaw_core::routine::{RoutineDefinition, RoutineStatus, SubroutineDefinition};
use swarmclaw_core::swarm::{RoutineRunId, SwarmId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where a subroutine stands inside one routine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubroutineStatus {
    Pending,
    Running,
    Done,
    Failed,
    /// An upstream subroutine failed.
    Blocked,
    Cancelled,
}

/// Everything one routine run needs.
#[derive(Clone)]
pub struct RoutineRequest {
    pub swarm_id: SwarmId,
    pub run_id: RoutineRunId,
    pub routine: Arc<RoutineDefinition>,
    /// The participant carrying out every step of the run.
    pub agent: BotParticipant,
    pub goal: GoalSpec,
    pub inputs: BTreeMap<String, Value>,
    /// Committed blackboard snapshot taken at dispatch.
    pub blackboard: Arc<Blackboard>,
    pub cancel: CancellationToken,
}

/// Terminal report of a routine run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutineReport {
    pub run_id: RoutineRunId,
    pub routine_id: String,
    pub routine_version: u32,
    pub status: RoutineStatus,
    /// Merged outputs. Restricted to the routine's declared outputs when it
    /// declares any.
    pub outputs: BTreeMap<String, Value>,
    pub subroutines: BTreeMap<String, SubroutineStatus>,
    /// Final outcome of every subroutine that was dispatched.
    pub steps: BTreeMap<String, StepOutcome>,
    /// Subroutine ids in dispatch order.
    pub dispatched: Vec<String>,
    pub cost: ResourceCost,
    /// Set when the run could not start at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RoutineReport {
    pub fn ids_with(&self, status: SubroutineStatus) -> Vec<String> {
        self.subroutines
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

pub struct RoutineOrchestrator {
    executor: Arc<StepExecutor>,
    events: Arc<EventBus>,
    max_concurrency: usize,
}

impl RoutineOrchestrator {
    pub fn new(executor: Arc<StepExecutor>, max_concurrency: usize) -> Self {
        Self {
            events: executor.events().clone(),
            executor,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn executor(&self) -> &Arc<StepExecutor> {
        &self.executor
    }

    /// Run the routine to a terminal state.
    pub async fn run(&self, request: RoutineRequest) -> RoutineReport {
        let routine = request.routine.clone();
        let mut report = RoutineReport {
            run_id: request.run_id.clone(),
            routine_id: routine.id.clone(),
            routine_version: routine.version,
            status: RoutineStatus::Running,
            outputs: BTreeMap::new(),
            subroutines: routine
                .subroutines
                .iter()
                .map(|s| (s.id.clone(), SubroutineStatus::Pending))
                .collect(),
            steps: BTreeMap::new(),
            dispatched: Vec::new(),
            cost: ResourceCost::ZERO,
            error: None,
        };

        if let Err(e) = routine.validate() {
            warn!(routine = %routine.id, error = %e, "Refusing to run malformed routine");
            report.error = Some(e.to_string());
            for status in report.subroutines.values_mut() {
                *status = SubroutineStatus::Blocked;
            }
            return self.conclude(&request, report, RoutineStatus::Failed);
        }

        info!(
            swarm_id = %request.swarm_id,
            run_id = %request.run_id,
            routine = %routine.id,
            version = routine.version,
            "Routine started"
        );
        self.events.emit(
            request.swarm_id.as_str(),
            DomainEvent::RoutineStarted {
                swarm_id: request.swarm_id.to_string(),
                run_id: request.run_id.to_string(),
                routine_id: routine.id.clone(),
                subtasks: routine.subroutines.len(),
            },
        );

        let mut outputs: BTreeMap<String, Value> = BTreeMap::new();
        let mut in_flight = FuturesUnordered::new();

        loop {
            if !request.cancel.is_cancelled() {
                for sub in &routine.subroutines {
                    if in_flight.len() >= self.max_concurrency {
                        break;
                    }
                    if !is_ready(&report.subroutines, sub) {
                        continue;
                    }
                    debug!(run_id = %request.run_id, subroutine = %sub.id, "Dispatching subroutine");
                    report.subroutines.insert(sub.id.clone(), SubroutineStatus::Running);
                    report.dispatched.push(sub.id.clone());
                    let ctx = self.step_context(&request, sub, &outputs);
                    in_flight.push(self.run_step(ctx));
                }
            }

            let Some((id, outcome)) = in_flight.next().await else {
                break;
            };

            report.cost += outcome.total_cost;
            let status = match outcome.state {
                StepState::Succeeded => {
                    outputs.extend(outcome.result.outputs.clone());
                    SubroutineStatus::Done
                }
                StepState::Cancelled => SubroutineStatus::Cancelled,
                _ => {
                    let blocked = block_dependents(&routine, &id, &mut report.subroutines);
                    if !blocked.is_empty() {
                        info!(run_id = %request.run_id, failed = %id, ?blocked, "Blocking downstream subroutines");
                    }
                    SubroutineStatus::Failed
                }
            };
            report.subroutines.insert(id.clone(), status);
            report.steps.insert(id, outcome);
        }

        // Never reached: cut short by the abort signal.
        for status in report.subroutines.values_mut() {
            if *status == SubroutineStatus::Pending {
                *status = SubroutineStatus::Cancelled;
            }
        }

        report.outputs = if routine.outputs.is_empty() {
            outputs
        } else {
            outputs
                .into_iter()
                .filter(|(k, _)| routine.outputs.contains(k))
                .collect()
        };

        let status = final_status(&routine, &report.subroutines);
        self.conclude(&request, report, status)
    }

    async fn run_step(&self, ctx: ExecutionContext) -> (String, StepOutcome) {
        let outcome = self.executor.execute(&ctx).await;
        (ctx.subroutine.id, outcome)
    }

    fn step_context(
        &self,
        request: &RoutineRequest,
        sub: &SubroutineDefinition,
        outputs: &BTreeMap<String, Value>,
    ) -> ExecutionContext {
        let mut subroutine = sub.clone();
        subroutine.strategy = request.routine.strategy_hint(sub);
        ExecutionContext {
            swarm_id: request.swarm_id.clone(),
            run_id: request.run_id.to_string(),
            agent: request.agent.clone(),
            input: step_input(sub, &request.inputs, outputs),
            subroutine,
            goal: request.goal.clone(),
            blackboard: request.blackboard.clone(),
            cancel: request.cancel.clone(),
            keep_history: None,
        }
    }

    fn conclude(&self, request: &RoutineRequest, mut report: RoutineReport, status: RoutineStatus) -> RoutineReport {
        report.status = status;
        let swarm_id = request.swarm_id.to_string();
        let run_id = request.run_id.to_string();
        let routine_id = report.routine_id.clone();
        let event = match status {
            RoutineStatus::Completed => DomainEvent::RoutineCompleted {
                swarm_id,
                run_id,
                routine_id,
                credits: report.cost.credits,
            },
            RoutineStatus::Cancelled => DomainEvent::RoutineCancelled {
                swarm_id,
                run_id,
                routine_id,
            },
            _ => DomainEvent::RoutineFailed {
                swarm_id,
                run_id,
                routine_id,
                failed: report.ids_with(SubroutineStatus::Failed),
                blocked: report.ids_with(SubroutineStatus::Blocked),
            },
        };
        info!(
            run_id = %request.run_id,
            routine = %report.routine_id,
            status = status.as_str(),
            credits = report.cost.credits,
            "Routine finished"
        );
        self.events.emit(request.swarm_id.as_str(), event);
        report
    }
}

fn is_ready(statuses: &BTreeMap<String, SubroutineStatus>, sub: &SubroutineDefinition) -> bool {
    statuses.get(&sub.id) == Some(&SubroutineStatus::Pending)
        && sub
            .depends_on
            .iter()
            .all(|dep| statuses.get(dep) == Some(&SubroutineStatus::Done))
}

/// Mark every pending subroutine downstream of `failed` as blocked.
fn block_dependents(
    routine: &RoutineDefinition,
    failed: &str,
    statuses: &mut BTreeMap<String, SubroutineStatus>,
) -> Vec<String> {
    let mut blocked = Vec::new();
    for id in routine.dependents_of(failed) {
        if let Some(status) = statuses.get_mut(id) {
            if *status == SubroutineStatus::Pending {
                *status = SubroutineStatus::Blocked;
                blocked.push(id.to_string());
            }
        }
    }
    blocked
}

fn final_status(routine: &RoutineDefinition, statuses: &BTreeMap<String, SubroutineStatus>) -> RoutineStatus {
    if statuses.values().any(|s| *s == SubroutineStatus::Cancelled) {
        return RoutineStatus::Cancelled;
    }
    let broken = routine.subroutines.iter().any(|sub| {
        !sub.optional
            && matches!(
                statuses.get(&sub.id),
                Some(SubroutineStatus::Failed | SubroutineStatus::Blocked)
            )
    });
    if broken {
        RoutineStatus::Failed
    } else {
        RoutineStatus::Completed
    }
}

/// Step input: the subroutine's static inputs, overlaid with the routine
/// inputs, overlaid with the outputs merged so far.
fn step_input(
    sub: &SubroutineDefinition,
    routine_inputs: &BTreeMap<String, Value>,
    outputs: &BTreeMap<String, Value>,
) -> Value {
    let mut input = Map::new();
    for (key, value) in sub.config.inputs.iter().chain(routine_inputs).chain(outputs) {
        input.insert(key.clone(), value.clone());
    }
    Value::Object(input)
}
