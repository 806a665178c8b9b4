//! `swarmclaw config`: Configuration management commands.

use std::path::Path;
use swarmclaw_config::EngineConfig;

use super::load_config;

pub fn show(path: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(path)?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn default() {
    println!("{}", EngineConfig::default_toml());
}

pub fn validate(path: Option<&Path>) -> anyhow::Result<()> {
    println!("🔍 Validating configuration...");

    let config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e);
        }
    };
    println!("   ✅ Config parsed successfully");

    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No API key set (set SWARMCLAW_API_KEY or OPENAI_API_KEY); only scripted runs will work");
    }
    if config.budget.max_credits.is_none() && config.budget.max_duration_secs.is_none() {
        warnings.push("No swarm budget configured (budget.max_credits / budget.max_duration_secs)");
    }
    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Backend:      {} ({})", config.backend.api_url, config.backend.model);
    println!(
        "   Retry:        {} attempts, {}ms base delay",
        config.retry.max_attempts, config.retry.base_delay_ms
    );
    println!("   Concurrency:  {}", config.execution.max_concurrency);
    println!("   Persistence:  {:?}", config.persistence.backend);
    println!("   Leadership:   {}", config.complexity.leadership_roles.join(", "));
    Ok(())
}

pub fn path(path: Option<&Path>) {
    match path {
        Some(path) => println!("{}", path.display()),
        None => println!("{}", EngineConfig::config_dir().join("config.toml").display()),
    }
}
