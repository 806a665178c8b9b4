//! Versioned routine and agent definitions.
//!
//! A published `(routine id, version)` pair is immutable. Republishing the
//! same content is a no-op; republishing different content under an
//! existing version is rejected, so changes always land as a new version.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};
use swarmclaw_core::agent::{AgentId, BotParticipant};
use swarmclaw_core::error::DefinitionError;
use swarmclaw_core::routine::RoutineDefinition;
use swarmclaw_core::services::DefinitionStore;
use tracing::{debug, info};

#[derive(Default)]
pub struct InMemoryDefinitionStore {
    routines: RwLock<HashMap<String, BTreeMap<u32, Arc<RoutineDefinition>>>>,
    agents: RwLock<HashMap<AgentId, BotParticipant>>,
}

impl InMemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and publish a routine version.
    pub fn publish_routine(&self, routine: RoutineDefinition) -> Result<(), DefinitionError> {
        routine.validate()?;
        let mut routines = self.routines.write().unwrap();
        let versions = routines.entry(routine.id.clone()).or_default();
        if let Some(existing) = versions.get(&routine.version) {
            if **existing == routine {
                return Ok(());
            }
            return Err(DefinitionError::VersionConflict {
                id: routine.id,
                version: routine.version,
            });
        }
        debug!(routine = %routine.id, version = routine.version, "Routine published");
        versions.insert(routine.version, Arc::new(routine));
        Ok(())
    }

    /// Register (or replace) an agent definition.
    pub fn publish_agent(&self, agent: BotParticipant) {
        self.agents.write().unwrap().insert(agent.id.clone(), agent);
    }

    /// Published versions of a routine, ascending.
    pub fn versions(&self, id: &str) -> Vec<u32> {
        self.routines
            .read()
            .unwrap()
            .get(id)
            .map(|v| v.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Ids of every published routine, sorted.
    pub fn routine_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.routines.read().unwrap().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Publish every routine found in `dir` (`*.toml` or `*.json`, one
    /// routine per file). Returns how many were published.
    pub fn load_dir(&self, dir: &Path) -> Result<usize, DefinitionError> {
        let read_failed = |reason: String| DefinitionError::Malformed {
            routine: dir.display().to_string(),
            reason,
        };

        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .map_err(|e| read_failed(e.to_string()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("toml" | "json")))
            .collect();
        paths.sort();

        for path in &paths {
            let content = std::fs::read_to_string(path).map_err(|e| read_failed(e.to_string()))?;
            let routine: RoutineDefinition = if path.extension().is_some_and(|e| e == "json") {
                serde_json::from_str(&content).map_err(|e| read_failed(format!("{}: {e}", path.display())))?
            } else {
                toml::from_str(&content).map_err(|e| read_failed(format!("{}: {e}", path.display())))?
            };
            self.publish_routine(routine)?;
        }

        info!(dir = %dir.display(), count = paths.len(), "Routine definitions loaded");
        Ok(paths.len())
    }
}

#[async_trait]
impl DefinitionStore for InMemoryDefinitionStore {
    async fn load_routine(
        &self,
        id: &str,
        version: Option<u32>,
    ) -> Result<Arc<RoutineDefinition>, DefinitionError> {
        let routines = self.routines.read().unwrap();
        let versions = routines.get(id);
        let found = match version {
            Some(v) => versions.and_then(|vs| vs.get(&v)),
            None => versions.and_then(|vs| vs.values().next_back()),
        };
        found.cloned().ok_or_else(|| DefinitionError::RoutineNotFound {
            id: id.to_string(),
            version: version.map_or_else(|| "latest".to_string(), |v| v.to_string()),
        })
    }

    async fn load_agent(&self, id: &AgentId) -> Result<BotParticipant, DefinitionError> {
        self.agents
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| DefinitionError::AgentNotFound(id.to_string()))
    }
}
