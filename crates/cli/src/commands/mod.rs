pub mod config_cmd;
pub mod run;
pub mod validate;

use std::path::Path;
use swarmclaw_config::EngineConfig;

/// Load config from `path`, or from the default location with environment
/// overrides.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let config = match path {
        Some(path) => {
            let mut config = EngineConfig::load_from(path)?;
            config.apply_env_overrides(|key| std::env::var(key).ok());
            config
        }
        None => EngineConfig::load()?,
    };
    Ok(config)
}
