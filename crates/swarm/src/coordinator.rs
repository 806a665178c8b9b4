//! Tier 1: the swarm coordinator.
//!
//! The coordinator owns every swarm it spawned, keyed by [`SwarmId`]:
//! goal, roster, blackboard, routine runs, errors and budget. Routines and
//! agents refer to a swarm only by id.
//!
//! # Blackboard discipline
//!
//! [`SwarmCoordinator::update_swarm_shared_state`] is the only public way to
//! change a blackboard, and the coordinator's own bookkeeping goes through
//! the same commit path. Readers get an `Arc` of the latest committed
//! version, so reading twice without a commit in between yields the same
//! snapshot.
//!
//! # Recruitment rule
//!
//! When a swarm's goal trips a complexity heuristic and the dispatching
//! agent holds a leadership role, no domain subtask may start until the
//! recruitment subtasks exist, the team search has started and team
//! resolution is done. [`SwarmCoordinator::recruitment_plan`] produces the
//! update that installs them.
//!
//! # Ending
//!
//! A swarm ends through [`SwarmCoordinator::end_swarm`], an exhausted
//! credit budget, or its time budget. Ending cancels every in-flight routine
//! through the abort signal and waits up to the configured grace period for
//! them to acknowledge; stragglers are aborted and recorded as cancelled.
//! Once the final checkpoint is stored the swarm is dropped from memory
//! along with its chat log; reads of an ended swarm are served from that
//! checkpoint.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swarmclaw_agent::step::StepExecutor;
use swarmclaw_config::{BudgetConfig, EngineConfig};
use swarmclaw_core::agent::{AgentId, BotParticipant};
use swarmclaw_core::blackboard::{
    Blackboard, BlackboardUpdate, SubtaskPatch, SubtaskStatus, recruitment,
};
use swarmclaw_core::error::{Error, Result, SwarmError};
use swarmclaw_core::event::{DomainEvent, EventBus};
use swarmclaw_core::execution::{FailureKind, ResourceCost};
use swarmclaw_core::goal::{ComplexityThresholds, GoalSpec};
use swarmclaw_core::routine::RoutineStatus;
use swarmclaw_core::services::{DefinitionStore, PersistenceService};
use swarmclaw_core::swarm::{
    EndReason, RoutineRunId, RoutineRunRecord, RunSnapshot, SwarmErrorRecord, SwarmId, SwarmStatus,
};
use tokio::sync::{RwLock, watch};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::orchestrator::{RoutineOrchestrator, RoutineReport, RoutineRequest, SubroutineStatus};

/// Name used as `updated_by` for commits the coordinator makes itself.
const COORDINATOR: &str = "coordinator";

/// What a new swarm starts with.
#[derive(Debug, Clone)]
pub struct SwarmSpec {
    /// Fixed id; a fresh one is generated when unset.
    pub id: Option<SwarmId>,
    pub goal: GoalSpec,
    pub agents: Vec<BotParticipant>,
    /// Participants to load from the definition store.
    pub agent_refs: Vec<AgentId>,
    /// Applied as the first blackboard commit.
    pub initial: BlackboardUpdate,
}

impl SwarmSpec {
    pub fn new(goal: GoalSpec) -> Self {
        Self {
            id: None,
            goal,
            agents: Vec::new(),
            agent_refs: Vec::new(),
            initial: BlackboardUpdate::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(SwarmId(id.into()));
        self
    }

    pub fn with_agent(mut self, agent: BotParticipant) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn with_agent_ref(mut self, id: impl Into<String>) -> Self {
        self.agent_refs.push(AgentId::new(id));
        self
    }

    pub fn with_blackboard(mut self, update: BlackboardUpdate) -> Self {
        self.initial = update;
        self
    }
}

/// Everything about a swarm except its blackboard.
struct Ledger {
    goal: GoalSpec,
    agents: Vec<BotParticipant>,
    status: SwarmStatus,
    recruitment_required: bool,
    started_at: chrono::DateTime<Utc>,
    ended_at: Option<chrono::DateTime<Utc>>,
    end_reason: Option<EndReason>,
    routines: Vec<RoutineRunRecord>,
    errors: Vec<SwarmErrorRecord>,
    credits_spent: u64,
}

impl Ledger {
    fn from_snapshot(snapshot: RunSnapshot) -> Self {
        Self {
            goal: snapshot.goal,
            agents: snapshot.agents,
            status: snapshot.status,
            recruitment_required: snapshot.recruitment_required,
            started_at: snapshot.started_at,
            ended_at: snapshot.ended_at,
            end_reason: snapshot.end_reason,
            routines: snapshot.routines,
            errors: snapshot.errors,
            credits_spent: snapshot.credits_spent,
        }
    }

    fn is_active(&self) -> bool {
        self.status == SwarmStatus::Active
    }

    fn record_error(&mut self, kind: FailureKind, subtask: Option<&str>, run: Option<&RoutineRunId>, message: String) {
        self.errors.push(SwarmErrorRecord {
            at: Utc::now(),
            kind,
            subtask: subtask.map(String::from),
            routine_run: run.cloned(),
            message,
        });
    }

    fn run_mut(&mut self, run_id: &RoutineRunId) -> Option<&mut RoutineRunRecord> {
        self.routines.iter_mut().find(|r| &r.run_id == run_id)
    }
}

struct SwarmHandle {
    id: SwarmId,
    /// Latest committed blackboard. Written only under the write lock.
    board: RwLock<Arc<Blackboard>>,
    ledger: Mutex<Ledger>,
    cancel: CancellationToken,
    /// In-flight routine runs. A run's entry is claimed by whoever settles
    /// it: the run itself when it finishes, or the ending swarm.
    runs: Mutex<HashMap<RoutineRunId, AbortHandle>>,
    in_flight: watch::Sender<usize>,
}

impl SwarmHandle {
    fn new(id: SwarmId, board: Blackboard, ledger: Ledger) -> Self {
        Self {
            id,
            board: RwLock::new(Arc::new(board)),
            ledger: Mutex::new(ledger),
            cancel: CancellationToken::new(),
            runs: Mutex::new(HashMap::new()),
            in_flight: watch::Sender::new(0),
        }
    }

    fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }
}

struct Inner {
    orchestrator: RoutineOrchestrator,
    definitions: Arc<dyn DefinitionStore>,
    persistence: Arc<dyn PersistenceService>,
    events: Arc<EventBus>,
    thresholds: ComplexityThresholds,
    leadership_roles: Vec<String>,
    budget: BudgetConfig,
    swarms: RwLock<HashMap<SwarmId, Arc<SwarmHandle>>>,
}

/// Owns and drives swarms. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct SwarmCoordinator {
    inner: Arc<Inner>,
}

impl SwarmCoordinator {
    pub fn new(
        config: &EngineConfig,
        executor: Arc<StepExecutor>,
        definitions: Arc<dyn DefinitionStore>,
        persistence: Arc<dyn PersistenceService>,
    ) -> Self {
        let events = executor.events().clone();
        Self {
            inner: Arc::new(Inner {
                orchestrator: RoutineOrchestrator::new(executor, config.execution.max_concurrency),
                definitions,
                persistence,
                events,
                thresholds: config.complexity.thresholds(),
                leadership_roles: config.complexity.leadership_roles.clone(),
                budget: config.budget.clone(),
                swarms: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Start a swarm for `spec.goal`.
    pub async fn spawn_swarm(&self, spec: SwarmSpec) -> Result<SwarmId> {
        let mut agents = spec.agents;
        for id in &spec.agent_refs {
            agents.push(self.inner.definitions.load_agent(id).await?);
        }
        if agents.is_empty() {
            return Err(SwarmError::NoParticipants.into());
        }

        let id = spec.id.unwrap_or_default();
        let board = if spec.initial.is_empty() {
            Blackboard::new()
        } else {
            Blackboard::new().apply(&spec.initial, COORDINATOR)?
        };
        let complex = spec.goal.assess(&self.inner.thresholds).exceeds_threshold();
        let recruitment_required =
            complex && agents.iter().any(|a| a.role.is_leadership(&self.inner.leadership_roles));

        let ledger = Ledger {
            goal: spec.goal,
            agents,
            status: SwarmStatus::Active,
            recruitment_required,
            started_at: Utc::now(),
            ended_at: None,
            end_reason: None,
            routines: Vec::new(),
            errors: Vec::new(),
            credits_spent: 0,
        };
        let (goal_text, agent_count) = (ledger.goal.text.clone(), ledger.agents.len());
        let handle = Arc::new(SwarmHandle::new(id.clone(), board, ledger));
        self.register(handle.clone()).await?;

        info!(swarm_id = %id, agents = agent_count, recruitment_required, "Swarm started");
        self.inner.events.emit(
            id.as_str(),
            DomainEvent::SwarmStarted {
                swarm_id: id.to_string(),
                goal: goal_text,
                agents: agent_count,
                recruitment_required,
            },
        );
        self.checkpoint(&handle).await;
        self.arm_time_budget(&handle);
        Ok(id)
    }

    /// Reload a checkpointed swarm and make it active again. Subtasks that
    /// were `doing` go back to `todo`; routine runs that were in flight are
    /// recorded as cancelled.
    pub async fn resume_swarm(&self, swarm_id: &SwarmId) -> Result<RunSnapshot> {
        let snapshot = self
            .inner
            .persistence
            .load_run_state(swarm_id)
            .await?
            .ok_or_else(|| SwarmError::NotFound(swarm_id.to_string()))?;
        if !snapshot.is_active() {
            return Err(SwarmError::Ended(swarm_id.to_string()).into());
        }

        let reset = snapshot
            .blackboard
            .subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Doing)
            .fold(BlackboardUpdate::new(), |update, s| {
                update.subtask(SubtaskPatch::status(&s.id, SubtaskStatus::Todo))
            });
        let board = if reset.is_empty() {
            snapshot.blackboard.clone()
        } else {
            snapshot.blackboard.apply(&reset, COORDINATOR)?
        };

        let mut ledger = Ledger::from_snapshot(snapshot);
        let now = Utc::now();
        let mut interrupted = Vec::new();
        for run in ledger.routines.iter_mut().filter(|r| r.status == RoutineStatus::Running) {
            run.status = RoutineStatus::Cancelled;
            run.finished_at = Some(now);
            interrupted.push((run.subtask_id.clone(), run.run_id.clone()));
        }
        for (subtask, run_id) in &interrupted {
            ledger.record_error(
                FailureKind::Cancelled,
                Some(subtask),
                Some(run_id),
                "routine run interrupted before the swarm was resumed".into(),
            );
        }

        let handle = Arc::new(SwarmHandle::new(swarm_id.clone(), board, ledger));
        self.register(handle.clone()).await?;
        info!(swarm_id = %swarm_id, reset = reset.subtasks.len(), interrupted = interrupted.len(), "Swarm resumed");
        self.checkpoint(&handle).await;
        self.arm_time_budget(&handle);
        Ok(self.snapshot_of(&handle).await)
    }

    /// End a swarm on behalf of one of its participants. Without a note the
    /// goal is taken as satisfied.
    pub async fn end_swarm(
        &self,
        swarm_id: &SwarmId,
        agent_id: &AgentId,
        note: Option<String>,
    ) -> Result<RunSnapshot> {
        let handle = self.handle(swarm_id).await?;
        participant(&handle, agent_id)?;
        let reason = match note {
            Some(note) => EndReason::Requested {
                by: agent_id.clone(),
                note,
            },
            None => EndReason::GoalSatisfied { by: agent_id.clone() },
        };
        Ok(self.terminate(&handle, reason).await)
    }

    // ── Shared state ────────────────────────────────────────────────────

    /// The single mutation point of a swarm's blackboard. Values merge
    /// last-writer-wins per key; subtasks are appended or updated by id.
    /// A rejected update leaves the blackboard untouched.
    pub async fn update_swarm_shared_state(
        &self,
        swarm_id: &SwarmId,
        agent_id: &AgentId,
        update: BlackboardUpdate,
    ) -> Result<Arc<Blackboard>> {
        let handle = self.handle(swarm_id).await?;
        participant(&handle, agent_id)?;
        self.commit(&handle, &update, agent_id.as_str()).await
    }

    /// Latest committed blackboard. Ended swarms answer from their final
    /// checkpoint.
    pub async fn blackboard(&self, swarm_id: &SwarmId) -> Result<Arc<Blackboard>> {
        match self.held(swarm_id).await {
            Some(handle) => Ok(handle.board.read().await.clone()),
            None => Ok(Arc::new(self.archived(swarm_id).await?.blackboard)),
        }
    }

    /// Full state of a swarm: status, roster, runs, errors and blackboard.
    pub async fn snapshot(&self, swarm_id: &SwarmId) -> Result<RunSnapshot> {
        match self.held(swarm_id).await {
            Some(handle) => Ok(self.snapshot_of(&handle).await),
            None => self.archived(swarm_id).await,
        }
    }

    /// Number of swarms held in memory.
    pub async fn live_swarms(&self) -> usize {
        self.inner.swarms.read().await.len()
    }

    /// Whether the recruitment rule binds `agent_id` in this swarm.
    pub async fn requires_recruitment(&self, swarm_id: &SwarmId, agent_id: &AgentId) -> Result<bool> {
        let handle = self.handle(swarm_id).await?;
        let agent = participant(&handle, agent_id)?;
        Ok(self.recruitment_binds(&handle, &agent))
    }

    /// The update installing the recruitment sequence in front of
    /// `goal_subtask`, given the swarm's current blackboard.
    pub async fn recruitment_plan(&self, swarm_id: &SwarmId, goal_subtask: &str) -> Result<BlackboardUpdate> {
        let handle = self.handle(swarm_id).await?;
        let goal = handle.ledger.lock().unwrap().goal.text.clone();
        let board = handle.board.read().await.clone();
        Ok(recruitment::plan(&board, goal_subtask, &goal))
    }

    // ── Dispatch ────────────────────────────────────────────────────────

    /// Start the routine attached to `subtask_id`. The subtask must be
    /// `todo` with every dependency done, and must pass the recruitment
    /// gate. It is carried out by its assignee, or by `agent_id` when it
    /// has none.
    pub async fn dispatch_subtask(
        &self,
        swarm_id: &SwarmId,
        agent_id: &AgentId,
        subtask_id: &str,
    ) -> Result<RoutineRunId> {
        let handle = self.handle(swarm_id).await?;
        let dispatcher = participant(&handle, agent_id)?;

        // Held until the subtask is marked `doing`, so a subtask is never
        // dispatched twice.
        let mut board = handle.board.write().await;
        let subtask = board
            .subtask(subtask_id)
            .cloned()
            .ok_or_else(|| SwarmError::SubtaskNotFound(subtask_id.to_string()))?;
        if subtask.status != SubtaskStatus::Todo {
            return Err(not_dispatchable(subtask_id, format!("status is {}", subtask.status.as_str())));
        }
        if !board.dependencies_done(subtask_id) {
            return Err(not_dispatchable(subtask_id, "dependencies are not done".into()));
        }
        if self.recruitment_binds(&handle, &dispatcher) && !recruitment::is_recruitment_subtask(subtask_id) {
            recruitment::gate(&board).map_err(|missing| {
                warn!(swarm_id = %swarm_id, subtask = subtask_id, %missing, "Recruitment rule blocks dispatch");
                SwarmError::RecruitmentRequired {
                    subtask: subtask_id.to_string(),
                    missing,
                }
            })?;
        }
        let routine_ref = subtask
            .routine
            .clone()
            .ok_or_else(|| SwarmError::NoRoutine(subtask_id.to_string()))?;
        let routine = self
            .inner
            .definitions
            .load_routine(&routine_ref.id, routine_ref.version)
            .await?;
        routine.validate()?;
        let performer = match &subtask.assignee {
            Some(id) => participant(&handle, id)?,
            None => dispatcher.clone(),
        };

        let update = BlackboardUpdate::new()
            .subtask(SubtaskPatch::status(subtask_id, SubtaskStatus::Doing).assignee(performer.id.clone()));
        let committed = Arc::new(board.apply(&update, dispatcher.id.as_str())?);
        *board = committed.clone();
        drop(board);

        let run_id = RoutineRunId::new();
        let goal = {
            let mut ledger = handle.ledger.lock().unwrap();
            ledger.routines.push(RoutineRunRecord {
                run_id: run_id.clone(),
                subtask_id: subtask_id.to_string(),
                routine_id: routine.id.clone(),
                routine_version: routine.version,
                agent_id: performer.id.clone(),
                status: RoutineStatus::Running,
                outputs: Default::default(),
                cost: ResourceCost::ZERO,
                started_at: Utc::now(),
                finished_at: None,
            });
            ledger.goal.clone()
        };
        let request = RoutineRequest {
            swarm_id: swarm_id.clone(),
            run_id: run_id.clone(),
            routine: routine.clone(),
            agent: performer.clone(),
            goal,
            inputs: subtask.inputs.clone(),
            blackboard: committed.clone(),
            cancel: handle.cancel.child_token(),
        };

        handle.in_flight.send_modify(|n| *n += 1);
        {
            let mut runs = handle.runs.lock().unwrap();
            let coordinator = self.clone();
            let task_handle = handle.clone();
            let task_run = run_id.clone();
            let task = tokio::spawn(async move {
                let report = coordinator.inner.orchestrator.run(request).await;
                coordinator.settle_run(&task_handle, &task_run, report).await;
            });
            runs.insert(run_id.clone(), task.abort_handle());
        }

        info!(
            swarm_id = %swarm_id,
            subtask = subtask_id,
            routine = %routine.id,
            version = routine.version,
            agent = %performer.id,
            run_id = %run_id,
            "Subtask dispatched"
        );
        self.announce(&handle, &committed, &update);
        self.checkpoint(&handle).await;
        Ok(run_id)
    }

    /// Dispatch every ready subtask that has a routine attached. Subtasks
    /// held back by the recruitment rule are skipped; subtasks whose
    /// routine cannot be loaded are marked failed.
    pub async fn dispatch_ready(
        &self,
        swarm_id: &SwarmId,
        agent_id: &AgentId,
    ) -> Result<Vec<(String, RoutineRunId)>> {
        let board = self.blackboard(swarm_id).await?;
        let candidates: Vec<String> = board
            .ready_subtasks()
            .into_iter()
            .filter(|s| s.routine.is_some())
            .map(|s| s.id.clone())
            .collect();

        let mut dispatched = Vec::new();
        for subtask in candidates {
            match self.dispatch_subtask(swarm_id, agent_id, &subtask).await {
                Ok(run_id) => dispatched.push((subtask, run_id)),
                Err(Error::Swarm(
                    e @ (SwarmError::RecruitmentRequired { .. } | SwarmError::NotDispatchable { .. }),
                )) => {
                    debug!(swarm_id = %swarm_id, subtask = %subtask, reason = %e, "Skipping subtask");
                }
                Err(Error::Definition(e)) => {
                    warn!(swarm_id = %swarm_id, subtask = %subtask, error = %e, "Cannot load routine for subtask");
                    self.fail_subtask(swarm_id, &subtask, e.to_string()).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(dispatched)
    }

    /// Keep dispatching ready subtasks until none is running and none can
    /// start, or the swarm ends. Returns the resulting snapshot.
    pub async fn run_until_idle(&self, swarm_id: &SwarmId, agent_id: &AgentId) -> Result<RunSnapshot> {
        let handle = self.handle(swarm_id).await?;
        let mut changes = handle.in_flight.subscribe();

        loop {
            if !handle.ledger.lock().unwrap().is_active() {
                break;
            }
            let dispatched = match self.dispatch_ready(swarm_id, agent_id).await {
                Ok(dispatched) => dispatched,
                Err(Error::Swarm(SwarmError::Ended(_))) => break,
                Err(e) => return Err(e),
            };
            let running = *changes.borrow_and_update();
            if running == 0 {
                if dispatched.is_empty() {
                    break;
                }
                continue;
            }
            if changes.changed().await.is_err() {
                break;
            }
        }
        Ok(self.snapshot_of(&handle).await)
    }

    // ── Internals ───────────────────────────────────────────────────────

    async fn held(&self, swarm_id: &SwarmId) -> Option<Arc<SwarmHandle>> {
        self.inner.swarms.read().await.get(swarm_id).cloned()
    }

    /// The handle of a live swarm. A swarm that was evicted after ending
    /// reports `Ended`.
    async fn handle(&self, swarm_id: &SwarmId) -> Result<Arc<SwarmHandle>> {
        if let Some(handle) = self.held(swarm_id).await {
            return Ok(handle);
        }
        self.archived(swarm_id).await?;
        Err(SwarmError::Ended(swarm_id.to_string()).into())
    }

    /// Final checkpoint of an ended swarm.
    async fn archived(&self, swarm_id: &SwarmId) -> Result<RunSnapshot> {
        match self.inner.persistence.load_run_state(swarm_id).await? {
            Some(snapshot) if !snapshot.is_active() => Ok(snapshot),
            _ => Err(SwarmError::NotFound(swarm_id.to_string()).into()),
        }
    }

    async fn register(&self, handle: Arc<SwarmHandle>) -> Result<()> {
        let mut swarms = self.inner.swarms.write().await;
        if let Some(existing) = swarms.get(&handle.id) {
            if existing.ledger.lock().unwrap().is_active() {
                return Err(SwarmError::AlreadyRunning(handle.id.to_string()).into());
            }
        }
        swarms.insert(handle.id.clone(), handle);
        Ok(())
    }

    fn recruitment_binds(&self, handle: &SwarmHandle, agent: &BotParticipant) -> bool {
        agent.role.is_leadership(&self.inner.leadership_roles)
            && handle
                .ledger
                .lock()
                .unwrap()
                .goal
                .assess(&self.inner.thresholds)
                .exceeds_threshold()
    }

    async fn commit(&self, handle: &SwarmHandle, update: &BlackboardUpdate, by: &str) -> Result<Arc<Blackboard>> {
        let committed = {
            let mut board = handle.board.write().await;
            let next = Arc::new(board.apply(update, by)?);
            *board = next.clone();
            next
        };
        self.announce(handle, &committed, update);
        self.checkpoint(handle).await;
        Ok(committed)
    }

    fn announce(&self, handle: &SwarmHandle, board: &Blackboard, update: &BlackboardUpdate) {
        let updated_by = board.updated_by.clone().unwrap_or_default();
        debug!(swarm_id = %handle.id, version = board.version, by = %updated_by, "Blackboard committed");
        self.inner.events.emit(
            handle.id.as_str(),
            DomainEvent::SwarmStateUpdated {
                swarm_id: handle.id.to_string(),
                version: board.version,
                updated_by,
                keys: update.values.keys().cloned().collect(),
                subtasks: update.subtasks.iter().map(|p| p.id.clone()).collect(),
            },
        );
    }

    async fn fail_subtask(&self, swarm_id: &SwarmId, subtask: &str, message: String) -> Result<()> {
        let handle = self.handle(swarm_id).await?;
        handle
            .ledger
            .lock()
            .unwrap()
            .record_error(FailureKind::Permanent, Some(subtask), None, message);
        let board = handle.board.read().await.clone();
        let update = failure_update(&board, subtask);
        self.commit(&handle, &update, COORDINATOR).await?;
        Ok(())
    }

    /// Record a finished routine run and reflect it on the blackboard.
    async fn settle_run(&self, handle: &Arc<SwarmHandle>, run_id: &RoutineRunId, report: RoutineReport) {
        if handle.runs.lock().unwrap().remove(run_id).is_none() {
            // Already settled by the ending swarm.
            return;
        }

        let (active, subtask, exhausted) = {
            let mut ledger = handle.ledger.lock().unwrap();
            ledger.credits_spent = ledger.credits_spent.saturating_add(report.cost.credits);
            let subtask = match ledger.run_mut(run_id) {
                Some(record) => {
                    record.status = report.status;
                    record.outputs = report.outputs.clone();
                    record.cost = report.cost;
                    record.finished_at = Some(Utc::now());
                    record.subtask_id.clone()
                }
                None => String::new(),
            };
            if report.status == RoutineStatus::Failed {
                let message = match &report.error {
                    Some(error) => format!("routine '{}' failed: {error}", report.routine_id),
                    None => format!(
                        "routine '{}' failed (failed: {:?}, blocked: {:?})",
                        report.routine_id,
                        report.ids_with(SubroutineStatus::Failed),
                        report.ids_with(SubroutineStatus::Blocked),
                    ),
                };
                ledger.record_error(FailureKind::Permanent, Some(&subtask), Some(run_id), message);
            }

            let active = ledger.is_active();
            // Marked ended in the same critical section that booked the
            // credits, so no further subtask can be dispatched.
            let exhausted = match self.inner.budget.max_credits {
                Some(limit) if active && ledger.credits_spent >= limit => {
                    let reason = EndReason::CreditBudgetExhausted {
                        spent: ledger.credits_spent,
                        limit,
                    };
                    mark_ended(&mut ledger, &reason);
                    Some(reason)
                }
                _ => None,
            };
            (active, subtask, exhausted)
        };

        // An ended swarm keeps its blackboard as of termination.
        if active && !subtask.is_empty() {
            let board = handle.board.read().await.clone();
            let update = match report.status {
                RoutineStatus::Completed => BlackboardUpdate::new()
                    .set(&subtask, Value::Object(report.outputs.clone().into_iter().collect()))
                    .subtask(SubtaskPatch::status(&subtask, SubtaskStatus::Done)),
                RoutineStatus::Failed => failure_update(&board, &subtask),
                _ => BlackboardUpdate::new().subtask(SubtaskPatch::status(&subtask, SubtaskStatus::Todo)),
            };
            if let Err(e) = self.commit(handle, &update, COORDINATOR).await {
                warn!(swarm_id = %handle.id, subtask = %subtask, error = %e, "Could not record routine outcome");
                handle.ledger.lock().unwrap().record_error(
                    FailureKind::Permanent,
                    Some(&subtask),
                    Some(run_id),
                    format!("could not record routine outcome: {e}"),
                );
            }
        }
        handle.in_flight.send_modify(|n| *n = n.saturating_sub(1));

        if let Some(reason) = exhausted {
            warn!(swarm_id = %handle.id, reason = %reason.describe(), "Credit budget exhausted");
            self.wind_down(handle, reason).await;
        }
    }

    fn arm_time_budget(&self, handle: &Arc<SwarmHandle>) {
        let Some(limit_secs) = self.inner.budget.max_duration_secs else {
            return;
        };
        let coordinator = self.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = handle.cancel.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs(limit_secs)) => {
                    warn!(swarm_id = %handle.id, limit_secs, "Time budget exhausted");
                    coordinator.terminate(&handle, EndReason::TimeBudgetExhausted { limit_secs }).await;
                }
            }
        });
    }

    /// End the swarm unless it already ended. Idempotent.
    async fn terminate(&self, handle: &Arc<SwarmHandle>, reason: EndReason) -> RunSnapshot {
        let marked = mark_ended(&mut handle.ledger.lock().unwrap(), &reason);
        if !marked {
            return self.snapshot_of(handle).await;
        }
        self.wind_down(handle, reason).await
    }

    /// Cancel in-flight routines of an ended swarm and wait (up to the
    /// grace period) for them to acknowledge.
    async fn wind_down(&self, handle: &Arc<SwarmHandle>, reason: EndReason) -> RunSnapshot {
        info!(swarm_id = %handle.id, reason = %reason.describe(), in_flight = handle.in_flight(), "Ending swarm");
        handle.cancel.cancel();

        let grace = self.inner.budget.cancel_grace();
        let mut settled = handle.in_flight.subscribe();
        let acknowledged = tokio::time::timeout(grace, settled.wait_for(|n| *n == 0))
            .await
            .is_ok();
        if !acknowledged {
            let stragglers: Vec<(RoutineRunId, AbortHandle)> = handle.runs.lock().unwrap().drain().collect();
            warn!(
                swarm_id = %handle.id,
                count = stragglers.len(),
                grace_ms = grace.as_millis() as u64,
                "Routines ignored the abort signal, aborting them"
            );
            let now = Utc::now();
            let mut ledger = handle.ledger.lock().unwrap();
            for (run_id, task) in stragglers {
                task.abort();
                if let Some(record) = ledger.run_mut(&run_id) {
                    record.status = RoutineStatus::Cancelled;
                    record.finished_at = Some(now);
                }
            }
            handle.in_flight.send_replace(0);
        }

        let (credits_spent, errors) = {
            let ledger = handle.ledger.lock().unwrap();
            (ledger.credits_spent, ledger.errors.len())
        };
        self.inner.events.emit(
            handle.id.as_str(),
            DomainEvent::SwarmEnded {
                swarm_id: handle.id.to_string(),
                reason: reason.describe(),
                credits_spent,
                errors,
            },
        );
        self.checkpoint(handle).await;
        let snapshot = self.snapshot_of(handle).await;
        self.evict(handle).await;
        snapshot
    }

    /// Release an ended swarm's in-memory state. Kept when the final
    /// checkpoint did not reach the store, so the swarm stays readable.
    async fn evict(&self, handle: &Arc<SwarmHandle>) {
        match self.inner.persistence.load_run_state(&handle.id).await {
            Ok(Some(saved)) if !saved.is_active() => {}
            _ => {
                warn!(swarm_id = %handle.id, "Final checkpoint missing, keeping swarm in memory");
                return;
            }
        }
        {
            let mut swarms = self.inner.swarms.write().await;
            if swarms.get(&handle.id).is_some_and(|held| Arc::ptr_eq(held, handle)) {
                swarms.remove(&handle.id);
            }
        }
        let dropped = self.inner.orchestrator.executor().messages().clear(&handle.id);
        debug!(swarm_id = %handle.id, messages = dropped, "Swarm evicted");
    }

    async fn snapshot_of(&self, handle: &SwarmHandle) -> RunSnapshot {
        let blackboard = handle.board.read().await.as_ref().clone();
        let ledger = handle.ledger.lock().unwrap();
        RunSnapshot {
            swarm_id: handle.id.clone(),
            goal: ledger.goal.clone(),
            agents: ledger.agents.clone(),
            blackboard,
            status: ledger.status,
            recruitment_required: ledger.recruitment_required,
            started_at: ledger.started_at,
            ended_at: ledger.ended_at,
            end_reason: ledger.end_reason.clone(),
            routines: ledger.routines.clone(),
            errors: ledger.errors.clone(),
            credits_spent: ledger.credits_spent,
        }
    }

    async fn checkpoint(&self, handle: &SwarmHandle) {
        let snapshot = self.snapshot_of(handle).await;
        if let Err(e) = self.inner.persistence.save_run_state(&handle.id, &snapshot).await {
            warn!(
                swarm_id = %handle.id,
                store = self.inner.persistence.name(),
                error = %e,
                "Checkpoint failed"
            );
        }
    }
}

fn participant(handle: &SwarmHandle, agent_id: &AgentId) -> std::result::Result<BotParticipant, SwarmError> {
    let ledger = handle.ledger.lock().unwrap();
    if !ledger.is_active() {
        return Err(SwarmError::Ended(handle.id.to_string()));
    }
    ledger
        .agents
        .iter()
        .find(|a| &a.id == agent_id)
        .cloned()
        .ok_or_else(|| SwarmError::NotParticipant {
            swarm: handle.id.to_string(),
            agent: agent_id.to_string(),
        })
}

/// Flip the ledger to ended. False when it already was.
fn mark_ended(ledger: &mut Ledger, reason: &EndReason) -> bool {
    if !ledger.is_active() {
        return false;
    }
    ledger.status = SwarmStatus::Ended;
    ledger.ended_at = Some(Utc::now());
    if reason.is_resource_exhausted() {
        ledger.record_error(FailureKind::ResourceExhausted, None, None, reason.describe());
    }
    ledger.end_reason = Some(reason.clone());
    true
}

fn not_dispatchable(subtask: &str, reason: String) -> Error {
    SwarmError::NotDispatchable {
        subtask: subtask.to_string(),
        reason,
    }
    .into()
}

/// Mark `subtask` failed and every `todo` subtask downstream of it blocked.
fn failure_update(board: &Blackboard, subtask: &str) -> BlackboardUpdate {
    let mut update = BlackboardUpdate::new().subtask(SubtaskPatch::status(subtask, SubtaskStatus::Failed));
    let mut frontier = vec![subtask.to_string()];
    let mut seen: Vec<String> = Vec::new();
    while let Some(current) = frontier.pop() {
        for task in &board.subtasks {
            if task.depends_on.contains(&current) && !seen.contains(&task.id) {
                seen.push(task.id.clone());
                frontier.push(task.id.clone());
                if task.status == SubtaskStatus::Todo {
                    update = update.subtask(SubtaskPatch::status(&task.id, SubtaskStatus::Blocked));
                }
            }
        }
    }
    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use serde_json::json;
    use swarmclaw_agent::step::StepExecutor;
    use swarmclaw_core::blackboard::RoutineRef;
    use swarmclaw_core::event::topics;
    use swarmclaw_core::routine::{RoutineDefinition, SubroutineDefinition};
    use swarmclaw_providers::scripted::{ScriptedErrorKind, ScriptedResponse, ScriptedSource};

    fn single_step(routine: &str, subroutine: &str) -> RoutineDefinition {
        RoutineDefinition::new(routine, 1)
            .with_subroutine(SubroutineDefinition::new(subroutine, "conversational"))
    }

    fn task(id: &str, routine: &str) -> SubtaskPatch {
        SubtaskPatch::new(id, format!("Work on {id}")).routine(RoutineRef::latest(routine))
    }

    fn count_topic(events: &EventBus, topic: &'static str) -> Arc<Mutex<usize>> {
        let count = Arc::new(Mutex::new(0));
        let sink = count.clone();
        events.subscribe(topic, move |_| {
            *sink.lock().unwrap() += 1;
            Ok(())
        });
        count
    }

    fn complex_goal() -> GoalSpec {
        GoalSpec::new("Launch in two markets").with_domains(["billing", "legal"])
    }

    fn swarm_error(result: Result<impl std::fmt::Debug>) -> SwarmError {
        match result {
            Err(Error::Swarm(e)) => e,
            other => panic!("expected a swarm error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn spawn_checkpoints_and_announces() {
        let h = harness(EngineConfig::default(), ScriptedSource::new());
        let started = count_topic(&h.events, topics::SWARM_STARTED);

        let id = h
            .coordinator
            .spawn_swarm(
                SwarmSpec::new(GoalSpec::new("Answer the ticket"))
                    .with_id("swarm-1")
                    .with_agent(contributor("ada"))
                    .with_blackboard(BlackboardUpdate::new().set("ticket", json!("T-1"))),
            )
            .await
            .unwrap();

        assert_eq!(id, SwarmId::from("swarm-1"));
        assert_eq!(*started.lock().unwrap(), 1);
        assert_eq!(h.runs.count().await, 1);
        let snapshot = h.coordinator.snapshot(&id).await.unwrap();
        assert!(snapshot.is_active());
        assert!(!snapshot.recruitment_required);
        assert_eq!(snapshot.blackboard.get("ticket"), Some(&json!("T-1")));
    }

    #[tokio::test]
    async fn spawn_needs_participants_and_unique_ids() {
        let h = harness(EngineConfig::default(), ScriptedSource::new());
        let empty = h.coordinator.spawn_swarm(SwarmSpec::new(GoalSpec::new("nobody"))).await;
        assert_eq!(swarm_error(empty), SwarmError::NoParticipants);

        let spec = SwarmSpec::new(GoalSpec::new("twice"))
            .with_id("dup")
            .with_agent(contributor("ada"));
        h.coordinator.spawn_swarm(spec.clone()).await.unwrap();
        let again = h.coordinator.spawn_swarm(spec).await;
        assert_eq!(swarm_error(again), SwarmError::AlreadyRunning("dup".into()));
    }

    #[tokio::test]
    async fn participants_load_from_definitions() {
        let h = harness(EngineConfig::default(), ScriptedSource::new());
        h.definitions.publish_agent(leader("lead"));
        let id = h
            .coordinator
            .spawn_swarm(SwarmSpec::new(complex_goal()).with_agent_ref("lead"))
            .await
            .unwrap();

        let snapshot = h.coordinator.snapshot(&id).await.unwrap();
        assert_eq!(snapshot.agents.len(), 1);
        assert!(snapshot.recruitment_required);

        let missing = h
            .coordinator
            .spawn_swarm(SwarmSpec::new(complex_goal()).with_agent_ref("ghost"))
            .await;
        assert!(matches!(missing, Err(Error::Definition(_))));
    }

    #[tokio::test]
    async fn disjoint_updates_merge_and_reads_are_stable() {
        let h = harness(EngineConfig::default(), ScriptedSource::new());
        let updates = count_topic(&h.events, topics::SWARM_STATE_UPDATED);
        let id = h
            .coordinator
            .spawn_swarm(
                SwarmSpec::new(GoalSpec::new("Plan the offsite"))
                    .with_agent(contributor("ada"))
                    .with_agent(contributor("bo")),
            )
            .await
            .unwrap();

        h.coordinator
            .update_swarm_shared_state(&id, &"ada".into(), BlackboardUpdate::new().set("venue", json!("Lisbon")))
            .await
            .unwrap();
        h.coordinator
            .update_swarm_shared_state(&id, &"bo".into(), BlackboardUpdate::new().set("budget", json!(1200)))
            .await
            .unwrap();

        let first = h.coordinator.blackboard(&id).await.unwrap();
        let second = h.coordinator.blackboard(&id).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.get("venue"), Some(&json!("Lisbon")));
        assert_eq!(first.get("budget"), Some(&json!(1200)));
        assert_eq!(first.updated_by.as_deref(), Some("bo"));
        assert_eq!(*updates.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn outsiders_and_invalid_updates_are_rejected() {
        let h = harness(EngineConfig::default(), ScriptedSource::new());
        let id = h
            .coordinator
            .spawn_swarm(SwarmSpec::new(GoalSpec::new("g")).with_agent(contributor("ada")))
            .await
            .unwrap();
        let before = h.coordinator.blackboard(&id).await.unwrap();

        let outsider = h
            .coordinator
            .update_swarm_shared_state(&id, &"mallory".into(), BlackboardUpdate::new().set("k", json!(1)))
            .await;
        assert!(matches!(swarm_error(outsider), SwarmError::NotParticipant { .. }));

        let dangling = BlackboardUpdate::new().subtask(SubtaskPatch::new("b", "second").depends_on(["nope"]));
        let invalid = h.coordinator.update_swarm_shared_state(&id, &"ada".into(), dangling).await;
        assert!(matches!(invalid, Err(Error::Blackboard(_))));

        let after = h.coordinator.blackboard(&id).await.unwrap();
        assert_eq!(after.version, before.version);
    }

    #[tokio::test]
    async fn dispatch_preconditions() {
        let h = harness(
            EngineConfig::default(),
            ScriptedSource::new().on(ScriptedResponse::text("*", "ok")),
        );
        h.definitions.publish_routine(single_step("answer", "reply")).unwrap();
        let id = h
            .coordinator
            .spawn_swarm(
                SwarmSpec::new(GoalSpec::new("g"))
                    .with_agent(contributor("ada"))
                    .with_blackboard(
                        BlackboardUpdate::new()
                            .subtask(task("a", "answer"))
                            .subtask(task("b", "answer").depends_on(["a"]))
                            .subtask(SubtaskPatch::new("manual", "Done by hand")),
                    ),
            )
            .await
            .unwrap();
        let ada = AgentId::from("ada");

        let early = h.coordinator.dispatch_subtask(&id, &ada, "b").await;
        assert!(matches!(swarm_error(early), SwarmError::NotDispatchable { .. }));
        let bare = h.coordinator.dispatch_subtask(&id, &ada, "manual").await;
        assert_eq!(swarm_error(bare), SwarmError::NoRoutine("manual".into()));
        let unknown = h.coordinator.dispatch_subtask(&id, &ada, "zzz").await;
        assert_eq!(swarm_error(unknown), SwarmError::SubtaskNotFound("zzz".into()));

        h.coordinator.dispatch_subtask(&id, &ada, "a").await.unwrap();
        let twice = h.coordinator.dispatch_subtask(&id, &ada, "a").await;
        assert!(matches!(swarm_error(twice), SwarmError::NotDispatchable { .. }));

        let board = h.coordinator.blackboard(&id).await.unwrap();
        let a = board.subtask("a").unwrap();
        assert_eq!(a.status, SubtaskStatus::Doing);
        assert_eq!(a.assignee, Some(ada));
    }

    #[tokio::test]
    async fn chain_runs_to_completion() {
        let h = harness(
            EngineConfig::default(),
            ScriptedSource::new()
                .on(ScriptedResponse::text("outline", r#"{"sections": 3}"#))
                .on(ScriptedResponse::text("write", "final text")),
        );
        h.definitions.publish_routine(single_step("outline", "outline")).unwrap();
        h.definitions.publish_routine(single_step("write", "write")).unwrap();
        let id = h
            .coordinator
            .spawn_swarm(
                SwarmSpec::new(GoalSpec::new("Write the report"))
                    .with_agent(contributor("ada"))
                    .with_blackboard(
                        BlackboardUpdate::new()
                            .subtask(task("plan", "outline"))
                            .subtask(task("draft", "write").depends_on(["plan"])),
                    ),
            )
            .await
            .unwrap();

        let snapshot = h.coordinator.run_until_idle(&id, &"ada".into()).await.unwrap();
        let board = &snapshot.blackboard;
        assert_eq!(board.subtask("plan").unwrap().status, SubtaskStatus::Done);
        assert_eq!(board.subtask("draft").unwrap().status, SubtaskStatus::Done);
        assert_eq!(board.get("plan"), Some(&json!({"sections": 3})));
        assert_eq!(board.get("draft"), Some(&json!({"response": "final text"})));

        assert_eq!(snapshot.routines.len(), 2);
        assert!(snapshot.routines.iter().all(|r| r.status == RoutineStatus::Completed));
        let plan_finished = snapshot.routines[0].finished_at.unwrap();
        assert!(plan_finished <= snapshot.routines[1].started_at);
        assert_eq!(
            snapshot.credits_spent,
            snapshot.routines.iter().map(|r| r.cost.credits).sum::<u64>()
        );
        assert!(snapshot.is_active());
    }

    #[tokio::test]
    async fn ended_swarms_are_released_but_stay_readable() {
        let h = harness(
            EngineConfig::default(),
            ScriptedSource::new().on(ScriptedResponse::text("reply", "Refunds take five days.")),
        );
        h.definitions.publish_routine(single_step("answer", "reply")).unwrap();
        let id = h
            .coordinator
            .spawn_swarm(
                SwarmSpec::new(GoalSpec::new("Answer ticket T-1"))
                    .with_agent(contributor("ada"))
                    .with_blackboard(BlackboardUpdate::new().subtask(task("reply", "answer"))),
            )
            .await
            .unwrap();
        h.coordinator.run_until_idle(&id, &"ada".into()).await.unwrap();
        let messages = h.coordinator.inner.orchestrator.executor().messages().clone();
        assert_eq!(messages.len(&id), 1);
        assert_eq!(h.coordinator.live_swarms().await, 1);

        let ended = h.coordinator.end_swarm(&id, &"ada".into(), None).await.unwrap();
        assert_eq!(h.coordinator.live_swarms().await, 0);
        assert_eq!(messages.len(&id), 0);

        assert_eq!(h.coordinator.snapshot(&id).await.unwrap(), ended);
        let board = h.coordinator.blackboard(&id).await.unwrap();
        assert_eq!(board.get("reply"), Some(&json!({"response": "Refunds take five days."})));

        let late = h
            .coordinator
            .update_swarm_shared_state(&id, &"ada".into(), BlackboardUpdate::new().set("k", json!(1)))
            .await;
        assert!(matches!(swarm_error(late), SwarmError::Ended(_)));
        let again = h.coordinator.end_swarm(&id, &"ada".into(), None).await;
        assert!(matches!(swarm_error(again), SwarmError::Ended(_)));
        let unknown = h.coordinator.snapshot(&SwarmId::from("never-spawned")).await;
        assert!(matches!(swarm_error(unknown), SwarmError::NotFound(_)));
    }

    #[tokio::test]
    async fn ended_swarm_id_can_be_resumed_only_while_active() {
        let h = harness(EngineConfig::default(), ScriptedSource::new());
        let id = h
            .coordinator
            .spawn_swarm(SwarmSpec::new(GoalSpec::new("g")).with_id("s-1").with_agent(contributor("ada")))
            .await
            .unwrap();
        h.coordinator
            .end_swarm(&id, &"ada".into(), Some("done early".into()))
            .await
            .unwrap();

        let resumed = h.coordinator.resume_swarm(&id).await;
        assert!(matches!(swarm_error(resumed), SwarmError::Ended(_)));
        let respawned = h
            .coordinator
            .spawn_swarm(SwarmSpec::new(GoalSpec::new("g again")).with_id("s-1").with_agent(contributor("ada")))
            .await
            .unwrap();
        assert!(h.coordinator.snapshot(&respawned).await.unwrap().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_routine_blocks_dependents() {
        let h = harness(
            EngineConfig::default(),
            ScriptedSource::new()
                .on(ScriptedResponse::error("fetch", ScriptedErrorKind::AuthenticationFailed))
                .on(ScriptedResponse::text("reply", "ok")),
        );
        h.definitions.publish_routine(single_step("fetch", "fetch")).unwrap();
        h.definitions.publish_routine(single_step("answer", "reply")).unwrap();
        let id = h
            .coordinator
            .spawn_swarm(
                SwarmSpec::new(GoalSpec::new("g"))
                    .with_agent(contributor("ada"))
                    .with_blackboard(
                        BlackboardUpdate::new()
                            .subtask(task("fetch", "fetch"))
                            .subtask(task("side", "answer"))
                            .subtask(task("use", "answer").depends_on(["fetch"]))
                            .subtask(task("ship", "answer").depends_on(["use"])),
                    ),
            )
            .await
            .unwrap();

        let snapshot = h.coordinator.run_until_idle(&id, &"ada".into()).await.unwrap();
        let status = |id: &str| snapshot.blackboard.subtask(id).unwrap().status;
        assert_eq!(status("fetch"), SubtaskStatus::Failed);
        assert_eq!(status("side"), SubtaskStatus::Done);
        assert_eq!(status("use"), SubtaskStatus::Blocked);
        assert_eq!(status("ship"), SubtaskStatus::Blocked);

        assert_eq!(snapshot.errors.len(), 1);
        assert_eq!(snapshot.errors[0].subtask.as_deref(), Some("fetch"));
        assert_eq!(snapshot.routines.len(), 2);
    }

    #[tokio::test]
    async fn unknown_routine_fails_subtask() {
        let h = harness(EngineConfig::default(), ScriptedSource::new());
        let id = h
            .coordinator
            .spawn_swarm(
                SwarmSpec::new(GoalSpec::new("g"))
                    .with_agent(contributor("ada"))
                    .with_blackboard(BlackboardUpdate::new().subtask(task("a", "missing"))),
            )
            .await
            .unwrap();

        let snapshot = h.coordinator.run_until_idle(&id, &"ada".into()).await.unwrap();
        assert_eq!(snapshot.blackboard.subtask("a").unwrap().status, SubtaskStatus::Failed);
        assert_eq!(snapshot.errors.len(), 1);
        assert!(snapshot.routines.is_empty());
    }

    #[tokio::test]
    async fn leaders_must_recruit_before_domain_work() {
        let h = harness(
            EngineConfig::default(),
            ScriptedSource::new().on(ScriptedResponse::text("*", "ok")),
        );
        h.definitions.publish_routine(single_step("answer", "reply")).unwrap();
        let id = h
            .coordinator
            .spawn_swarm(
                SwarmSpec::new(complex_goal())
                    .with_agent(leader("lead"))
                    .with_agent(contributor("ada"))
                    .with_blackboard(BlackboardUpdate::new().subtask(task("launch", "answer"))),
            )
            .await
            .unwrap();
        let lead = AgentId::from("lead");
        assert!(h.coordinator.requires_recruitment(&id, &lead).await.unwrap());
        assert!(!h.coordinator.requires_recruitment(&id, &"ada".into()).await.unwrap());

        let refused = h.coordinator.dispatch_subtask(&id, &lead, "launch").await;
        assert!(matches!(swarm_error(refused), SwarmError::RecruitmentRequired { .. }));

        let plan = h.coordinator.recruitment_plan(&id, "launch").await.unwrap();
        h.coordinator.update_swarm_shared_state(&id, &lead, plan).await.unwrap();
        let board = h.coordinator.blackboard(&id).await.unwrap();
        assert!(board.subtask("launch").unwrap().depends_on.contains(&recruitment::RESOLVE_TEAM.to_string()));

        h.coordinator
            .update_swarm_shared_state(
                &id,
                &lead,
                BlackboardUpdate::new().subtask(SubtaskPatch::status(recruitment::SEARCH_TEAM, SubtaskStatus::Done)),
            )
            .await
            .unwrap();
        let still_refused = h.coordinator.dispatch_subtask(&id, &lead, "launch").await;
        assert!(matches!(swarm_error(still_refused), SwarmError::NotDispatchable { .. }));

        h.coordinator
            .update_swarm_shared_state(
                &id,
                &lead,
                BlackboardUpdate::new().subtask(SubtaskPatch::status(recruitment::RESOLVE_TEAM, SubtaskStatus::Done)),
            )
            .await
            .unwrap();
        h.coordinator.dispatch_subtask(&id, &lead, "launch").await.unwrap();
    }

    #[tokio::test]
    async fn contributors_are_not_held_by_recruitment() {
        let h = harness(
            EngineConfig::default(),
            ScriptedSource::new().on(ScriptedResponse::text("*", "ok")),
        );
        h.definitions.publish_routine(single_step("answer", "reply")).unwrap();
        let id = h
            .coordinator
            .spawn_swarm(
                SwarmSpec::new(complex_goal())
                    .with_agent(contributor("ada"))
                    .with_blackboard(BlackboardUpdate::new().subtask(task("launch", "answer"))),
            )
            .await
            .unwrap();

        let snapshot = h.coordinator.snapshot(&id).await.unwrap();
        assert!(!snapshot.recruitment_required);
        h.coordinator.dispatch_subtask(&id, &"ada".into(), "launch").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn ending_cancels_in_flight_routines() {
        let h = harness(
            EngineConfig::default(),
            ScriptedSource::new().on(ScriptedResponse::text("*", "slow").with_delay(Duration::from_secs(60))),
        );
        let ended = count_topic(&h.events, topics::SWARM_ENDED);
        h.definitions.publish_routine(single_step("answer", "reply")).unwrap();
        let id = h
            .coordinator
            .spawn_swarm(
                SwarmSpec::new(GoalSpec::new("g"))
                    .with_agent(contributor("ada"))
                    .with_blackboard(BlackboardUpdate::new().subtask(task("a", "answer"))),
            )
            .await
            .unwrap();
        let ada = AgentId::from("ada");
        let run_id = h.coordinator.dispatch_subtask(&id, &ada, "a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let snapshot = h.coordinator.end_swarm(&id, &ada, None).await.unwrap();
        assert_eq!(snapshot.status, SwarmStatus::Ended);
        assert_eq!(snapshot.end_reason, Some(EndReason::GoalSatisfied { by: ada.clone() }));
        assert_eq!(snapshot.routine_run(&run_id).unwrap().status, RoutineStatus::Cancelled);
        assert_eq!(*ended.lock().unwrap(), 1);

        let late = h
            .coordinator
            .update_swarm_shared_state(&id, &ada, BlackboardUpdate::new().set("k", json!(1)))
            .await;
        assert_eq!(swarm_error(late), SwarmError::Ended(id.to_string()));
        let again = h.coordinator.end_swarm(&id, &ada, Some("twice".into())).await;
        assert_eq!(swarm_error(again), SwarmError::Ended(id.to_string()));
        assert_eq!(*ended.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn credit_budget_ends_the_swarm() {
        let mut config = EngineConfig::default();
        config.budget.max_credits = Some(2);
        let h = harness(config, ScriptedSource::new().on(ScriptedResponse::text("*", "ok")));
        h.definitions.publish_routine(single_step("answer", "reply")).unwrap();
        let id = h
            .coordinator
            .spawn_swarm(
                SwarmSpec::new(GoalSpec::new("g"))
                    .with_agent(contributor("ada"))
                    .with_blackboard(
                        BlackboardUpdate::new()
                            .subtask(task("a", "answer"))
                            .subtask(task("b", "answer").depends_on(["a"]))
                            .subtask(task("c", "answer").depends_on(["b"])),
                    ),
            )
            .await
            .unwrap();

        let snapshot = h.coordinator.run_until_idle(&id, &"ada".into()).await.unwrap();
        assert_eq!(snapshot.status, SwarmStatus::Ended);
        assert_eq!(
            snapshot.end_reason,
            Some(EndReason::CreditBudgetExhausted { spent: 2, limit: 2 })
        );
        assert_eq!(snapshot.blackboard.subtask("b").unwrap().status, SubtaskStatus::Done);
        assert_eq!(snapshot.blackboard.subtask("c").unwrap().status, SubtaskStatus::Todo);
        assert_eq!(snapshot.routines.len(), 2);
        assert!(snapshot.errors.iter().any(|e| e.kind == FailureKind::ResourceExhausted));
    }

    #[tokio::test(start_paused = true)]
    async fn time_budget_ends_the_swarm() {
        let mut config = EngineConfig::default();
        config.budget.max_duration_secs = Some(30);
        let h = harness(
            config,
            ScriptedSource::new().on(ScriptedResponse::text("*", "slow").with_delay(Duration::from_secs(600))),
        );
        h.definitions.publish_routine(single_step("answer", "reply")).unwrap();
        let id = h
            .coordinator
            .spawn_swarm(
                SwarmSpec::new(GoalSpec::new("g"))
                    .with_agent(contributor("ada"))
                    .with_blackboard(BlackboardUpdate::new().subtask(task("a", "answer"))),
            )
            .await
            .unwrap();

        let snapshot = h.coordinator.run_until_idle(&id, &"ada".into()).await.unwrap();
        assert_eq!(snapshot.status, SwarmStatus::Ended);
        assert_eq!(snapshot.end_reason, Some(EndReason::TimeBudgetExhausted { limit_secs: 30 }));
        assert_eq!(snapshot.routines[0].status, RoutineStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_restarts_interrupted_work() {
        let config = EngineConfig::default();
        let h = harness(
            config.clone(),
            ScriptedSource::new().on(ScriptedResponse::text("*", "slow").with_delay(Duration::from_secs(600))),
        );
        h.definitions.publish_routine(single_step("answer", "reply")).unwrap();
        let id = h
            .coordinator
            .spawn_swarm(
                SwarmSpec::new(GoalSpec::new("g"))
                    .with_id("durable")
                    .with_agent(contributor("ada"))
                    .with_blackboard(BlackboardUpdate::new().subtask(task("a", "answer"))),
            )
            .await
            .unwrap();
        let ada = AgentId::from("ada");
        h.coordinator.dispatch_subtask(&id, &ada, "a").await.unwrap();

        let busy = h.coordinator.resume_swarm(&id).await;
        assert_eq!(swarm_error(busy), SwarmError::AlreadyRunning("durable".into()));

        // A fresh process over the same stores.
        let revived: Arc<StepExecutor> = executor(
            &config,
            Arc::new(ScriptedSource::new().on(ScriptedResponse::text("*", "fast"))),
        );
        let coordinator = SwarmCoordinator::new(&config, revived, h.definitions.clone(), h.runs.clone());
        let resumed = coordinator.resume_swarm(&id).await.unwrap();
        assert_eq!(resumed.blackboard.subtask("a").unwrap().status, SubtaskStatus::Todo);
        assert_eq!(resumed.routines[0].status, RoutineStatus::Cancelled);
        assert_eq!(resumed.errors.len(), 1);

        let done = coordinator.run_until_idle(&id, &ada).await.unwrap();
        assert_eq!(done.blackboard.subtask("a").unwrap().status, SubtaskStatus::Done);
        assert_eq!(done.blackboard.get("a"), Some(&json!({"response": "fast"})));

        let missing = coordinator.resume_swarm(&SwarmId::from("never")).await;
        assert_eq!(swarm_error(missing), SwarmError::NotFound("never".into()));
    }
}
