//! Storage backends for SwarmClaw.
//!
//! - [`InMemoryRunStore`] / [`FileRunStore`]: the persistence service used
//!   for swarm checkpoints.
//! - [`InMemoryDefinitionStore`]: versioned routine and agent definitions.

pub mod definitions;
pub mod file_store;
pub mod in_memory;

pub use definitions::InMemoryDefinitionStore;
pub use file_store::FileRunStore;
pub use in_memory::InMemoryRunStore;

use std::sync::Arc;
use swarmclaw_config::{PersistenceBackend, PersistenceConfig};
use swarmclaw_core::services::PersistenceService;

/// Build the persistence service selected in config.
pub fn persistence_from_config(config: &PersistenceConfig) -> Arc<dyn PersistenceService> {
    match config.backend {
        PersistenceBackend::Memory => Arc::new(InMemoryRunStore::new()),
        PersistenceBackend::File => Arc::new(FileRunStore::new(config.resolved_dir())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_selection() {
        let memory = persistence_from_config(&PersistenceConfig::default());
        assert_eq!(memory.name(), "in_memory");

        let dir = tempfile::tempdir().unwrap();
        let file = persistence_from_config(&PersistenceConfig {
            backend: PersistenceBackend::File,
            dir: Some(dir.path().to_path_buf()),
        });
        assert_eq!(file.name(), "file");
    }
}
