//! In-memory run store: useful for testing and ephemeral runs.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use swarmclaw_core::error::StoreError;
use swarmclaw_core::services::PersistenceService;
use swarmclaw_core::swarm::{RunSnapshot, SwarmId};
use tokio::sync::RwLock;

/// Keeps the latest snapshot of every swarm in a map.
pub struct InMemoryRunStore {
    snapshots: Arc<RwLock<HashMap<SwarmId, RunSnapshot>>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self {
            snapshots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of swarms with a saved snapshot.
    pub async fn count(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

impl Default for InMemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceService for InMemoryRunStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn save_run_state(
        &self,
        swarm_id: &SwarmId,
        snapshot: &RunSnapshot,
    ) -> Result<(), StoreError> {
        self.snapshots
            .write()
            .await
            .insert(swarm_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load_run_state(&self, swarm_id: &SwarmId) -> Result<Option<RunSnapshot>, StoreError> {
        Ok(self.snapshots.read().await.get(swarm_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swarmclaw_core::blackboard::Blackboard;
    use swarmclaw_core::goal::GoalSpec;
    use swarmclaw_core::swarm::SwarmStatus;

    fn snapshot(id: &str, credits: u64) -> RunSnapshot {
        RunSnapshot {
            swarm_id: SwarmId::from(id),
            goal: GoalSpec::new("goal"),
            agents: vec![],
            blackboard: Blackboard::new(),
            status: SwarmStatus::Active,
            recruitment_required: false,
            started_at: chrono::Utc::now(),
            ended_at: None,
            end_reason: None,
            routines: vec![],
            errors: vec![],
            credits_spent: credits,
        }
    }

    #[tokio::test]
    async fn save_overwrites_and_load_returns_latest() {
        let store = InMemoryRunStore::new();
        let id = SwarmId::from("s1");
        store.save_run_state(&id, &snapshot("s1", 1)).await.unwrap();
        store.save_run_state(&id, &snapshot("s1", 7)).await.unwrap();

        let loaded = store.load_run_state(&id).await.unwrap().unwrap();
        assert_eq!(loaded.credits_spent, 7);
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn unknown_swarm_loads_none() {
        let store = InMemoryRunStore::new();
        assert!(store.load_run_state(&SwarmId::from("nope")).await.unwrap().is_none());
    }
}
