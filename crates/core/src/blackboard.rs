//! The blackboard: a swarm's shared mutable state.
//!
//! A blackboard holds free-form key/value entries plus an ordered subtask
//! list. It is a value type: [`Blackboard::apply`] validates an update
//! against a copy and returns the next committed version, leaving `self`
//! untouched. The swarm coordinator owns the only mutable slot and hands
//! readers `Arc` snapshots.
//!
//! # Invariants
//!
//! - Every dependency of a subtask names a subtask in the same list.
//! - The dependency graph is acyclic.
//! - A subtask is `done` only while all of its dependencies are `done`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::agent::AgentId;
use crate::error::BlackboardError;

/// Status of a blackboard subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Todo,
    Doing,
    Done,
    Blocked,
    /// The routine delegated for this subtask failed.
    Failed,
}

impl SubtaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Blocked | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::Doing => "doing",
            Self::Done => "done",
            Self::Blocked => "blocked",
            Self::Failed => "failed",
        }
    }
}

/// Which routine (and optionally which version) carries out a subtask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutineRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

impl RoutineRef {
    pub fn latest(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: None,
        }
    }
}

/// One entry of the subtask list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    pub description: String,
    pub status: SubtaskStatus,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routine: Option<RoutineRef>,
    /// Inputs handed to the routine when the subtask is dispatched.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, serde_json::Value>,
}

/// Create-or-update instruction for one subtask. Only the fields that are
/// set are changed; a new id appends to the end of the list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtaskPatch {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SubtaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routine: Option<RoutineRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<BTreeMap<String, serde_json::Value>>,
}

impl SubtaskPatch {
    /// A patch creating a fresh `todo` subtask.
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: Some(description.into()),
            status: Some(SubtaskStatus::Todo),
            ..Self::default()
        }
    }

    /// A patch that only changes status.
    pub fn status(id: impl Into<String>, status: SubtaskStatus) -> Self {
        Self {
            id: id.into(),
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn depends_on(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = Some(deps.into_iter().map(Into::into).collect());
        self
    }

    pub fn routine(mut self, routine: RoutineRef) -> Self {
        self.routine = Some(routine);
        self
    }

    pub fn assignee(mut self, agent: AgentId) -> Self {
        self.assignee = Some(agent);
        self
    }

    pub fn input(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.inputs
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value);
        self
    }
}

/// A merge request against the blackboard: key-level last-writer-wins for
/// values, append/update-by-id for subtasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlackboardUpdate {
    #[serde(default)]
    pub values: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub subtasks: Vec<SubtaskPatch>,
}

impl BlackboardUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    pub fn subtask(mut self, patch: SubtaskPatch) -> Self {
        self.subtasks.push(patch);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.subtasks.is_empty()
    }
}

/// A committed blackboard version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blackboard {
    /// Incremented by every commit.
    pub version: u64,
    pub values: BTreeMap<String, serde_json::Value>,
    pub subtasks: Vec<Subtask>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

impl Default for Blackboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Blackboard {
    pub fn new() -> Self {
        Self {
            version: 0,
            values: BTreeMap::new(),
            subtasks: Vec::new(),
            updated_at: Utc::now(),
            updated_by: None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub fn subtask(&self, id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    /// Whether every dependency of `id` is `done`. Unknown ids are never ready.
    pub fn dependencies_done(&self, id: &str) -> bool {
        let Some(task) = self.subtask(id) else {
            return false;
        };
        task.depends_on.iter().all(|dep| {
            self.subtask(dep)
                .is_some_and(|d| d.status == SubtaskStatus::Done)
        })
    }

    /// `todo` subtasks whose dependencies are all `done`, in list order.
    pub fn ready_subtasks(&self) -> Vec<&Subtask> {
        self.subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Todo && self.dependencies_done(&s.id))
            .collect()
    }

    /// Validate `update` and return the next version. `self` is unchanged
    /// whether or not the update is accepted.
    pub fn apply(
        &self,
        update: &BlackboardUpdate,
        updated_by: &str,
    ) -> Result<Blackboard, BlackboardError> {
        let mut next = self.clone();

        for (key, value) in &update.values {
            next.values.insert(key.clone(), value.clone());
        }

        for patch in &update.subtasks {
            if patch.id.trim().is_empty() {
                return Err(BlackboardError::EmptyId);
            }
            match next.subtasks.iter_mut().find(|s| s.id == patch.id) {
                Some(existing) => merge_patch(existing, patch),
                None => {
                    let description = patch
                        .description
                        .clone()
                        .ok_or_else(|| BlackboardError::MissingDescription(patch.id.clone()))?;
                    next.subtasks.push(Subtask {
                        id: patch.id.clone(),
                        description,
                        status: patch.status.unwrap_or(SubtaskStatus::Todo),
                        depends_on: patch.depends_on.clone().unwrap_or_default(),
                        assignee: patch.assignee.clone(),
                        routine: patch.routine.clone(),
                        inputs: patch.inputs.clone().unwrap_or_default(),
                    });
                }
            }
        }

        validate_subtasks(&next.subtasks)?;

        next.version = self.version + 1;
        next.updated_at = Utc::now();
        next.updated_by = Some(updated_by.to_string());
        Ok(next)
    }
}

fn merge_patch(existing: &mut Subtask, patch: &SubtaskPatch) {
    if let Some(d) = &patch.description {
        existing.description = d.clone();
    }
    if let Some(s) = patch.status {
        existing.status = s;
    }
    if let Some(deps) = &patch.depends_on {
        existing.depends_on = deps.clone();
    }
    if let Some(a) = &patch.assignee {
        existing.assignee = Some(a.clone());
    }
    if let Some(r) = &patch.routine {
        existing.routine = Some(r.clone());
    }
    if let Some(inputs) = &patch.inputs {
        existing.inputs.extend(inputs.clone());
    }
}

/// Check the subtask-list invariants.
pub fn validate_subtasks(subtasks: &[Subtask]) -> Result<(), BlackboardError> {
    let by_id: HashMap<&str, &Subtask> = subtasks.iter().map(|s| (s.id.as_str(), s)).collect();

    for task in subtasks {
        for dep in &task.depends_on {
            if dep == &task.id {
                return Err(BlackboardError::SelfDependency(task.id.clone()));
            }
            let Some(dep_task) = by_id.get(dep.as_str()) else {
                return Err(BlackboardError::UnknownDependency {
                    subtask: task.id.clone(),
                    dependency: dep.clone(),
                });
            };
            if task.status == SubtaskStatus::Done && dep_task.status != SubtaskStatus::Done {
                return Err(BlackboardError::DependencyNotDone {
                    subtask: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    // Depth-first cycle detection.
    let mut done: HashSet<&str> = HashSet::new();
    let mut on_path: HashSet<&str> = HashSet::new();
    for task in subtasks {
        visit(task.id.as_str(), &by_id, &mut done, &mut on_path)?;
    }
    Ok(())
}

fn visit<'a>(
    id: &'a str,
    by_id: &HashMap<&'a str, &'a Subtask>,
    done: &mut HashSet<&'a str>,
    on_path: &mut HashSet<&'a str>,
) -> Result<(), BlackboardError> {
    if done.contains(id) {
        return Ok(());
    }
    if !on_path.insert(id) {
        return Err(BlackboardError::DependencyCycle(id.to_string()));
    }
    if let Some(task) = by_id.get(id) {
        for dep in &task.depends_on {
            visit(dep.as_str(), by_id, done, on_path)?;
        }
    }
    on_path.remove(id);
    done.insert(id);
    Ok(())
}

/// The mandatory team-recruitment sequence for complex goals led by a
/// leadership role: search for a team, connect to or create one, then
/// proceed with the goal.
pub mod recruitment {
    use super::*;

    pub const SEARCH_TEAM: &str = "recruit.search-team";
    pub const RESOLVE_TEAM: &str = "recruit.resolve-team";

    /// The recruitment subtasks in order, with their descriptions.
    pub const SEQUENCE: [(&str, &str); 2] = [
        (SEARCH_TEAM, "Search for an existing team able to pursue the goal"),
        (RESOLVE_TEAM, "Connect to the team found, or create a new one"),
    ];

    /// The update that installs the recruitment sequence in front of
    /// `goal_subtask`. Goal subtasks that already exist get the
    /// team-resolution dependency added; new ones are created.
    pub fn plan(board: &Blackboard, goal_subtask: &str, goal_description: &str) -> BlackboardUpdate {
        let mut update = BlackboardUpdate::new();
        let [(search, search_desc), (resolve, resolve_desc)] = SEQUENCE;
        if board.subtask(search).is_none() {
            update = update.subtask(SubtaskPatch::new(search, search_desc));
        }
        if board.subtask(resolve).is_none() {
            update = update.subtask(SubtaskPatch::new(resolve, resolve_desc).depends_on([search]));
        }

        let goal_patch = match board.subtask(goal_subtask) {
            Some(existing) => {
                let mut deps = existing.depends_on.clone();
                if !deps.iter().any(|d| d == RESOLVE_TEAM) {
                    deps.push(RESOLVE_TEAM.to_string());
                }
                SubtaskPatch {
                    id: goal_subtask.to_string(),
                    depends_on: Some(deps),
                    ..SubtaskPatch::default()
                }
            }
            None => SubtaskPatch::new(goal_subtask, goal_description).depends_on([RESOLVE_TEAM]),
        };
        update.subtask(goal_patch)
    }

    /// Whether the recruitment sequence allows domain work to start.
    /// Returns a description of what is still missing otherwise.
    pub fn gate(board: &Blackboard) -> Result<(), String> {
        let search = board
            .subtask(SEARCH_TEAM)
            .ok_or_else(|| format!("subtask '{SEARCH_TEAM}' is missing"))?;
        let resolve = board
            .subtask(RESOLVE_TEAM)
            .ok_or_else(|| format!("subtask '{RESOLVE_TEAM}' is missing"))?;
        if search.status == SubtaskStatus::Todo {
            return Err(format!("subtask '{SEARCH_TEAM}' has not started"));
        }
        if resolve.status != SubtaskStatus::Done {
            return Err(format!("subtask '{RESOLVE_TEAM}' is not done"));
        }
        Ok(())
    }

    /// Whether a subtask belongs to the recruitment sequence itself.
    pub fn is_recruitment_subtask(id: &str) -> bool {
        id == SEARCH_TEAM || id == RESOLVE_TEAM
    }
}
