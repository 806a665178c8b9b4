//! File-based run store: one pretty-printed JSON snapshot per swarm.
//!
//! Storage location: `<dir>/<swarm_id>.json` (by default
//! `~/.swarmclaw/runs/`). Writes go to a temporary file first and are then
//! renamed over the old snapshot, so a crash mid-write never leaves a
//! truncated checkpoint behind.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use swarmclaw_core::error::StoreError;
use swarmclaw_core::services::PersistenceService;
use swarmclaw_core::swarm::{RunSnapshot, SwarmId};
use tokio::sync::Mutex;
use tracing::debug;

pub struct FileRunStore {
    dir: PathBuf,
    /// Serializes writers so two checkpoints never race on the temp file.
    write_lock: Mutex<()>,
}

impl FileRunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn snapshot_path(&self, swarm_id: &SwarmId) -> Result<PathBuf, StoreError> {
        let id = swarm_id.as_str();
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(StoreError::Io {
                path: self.dir.display().to_string(),
                reason: format!("invalid swarm id '{id}'"),
            });
        }
        Ok(self.dir.join(format!("{id}.json")))
    }
}

fn io_error(path: &Path, e: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl PersistenceService for FileRunStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn save_run_state(
        &self,
        swarm_id: &SwarmId,
        snapshot: &RunSnapshot,
    ) -> Result<(), StoreError> {
        let path = self.snapshot_path(swarm_id)?;
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| StoreError::Corrupt(format!("cannot serialize snapshot: {e}")))?;

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&path, e))?;

        debug!(swarm_id = %swarm_id, path = %path.display(), "Run state saved");
        Ok(())
    }

    async fn load_run_state(&self, swarm_id: &SwarmId) -> Result<Option<RunSnapshot>, StoreError> {
        let path = self.snapshot_path(swarm_id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))
    }
}
