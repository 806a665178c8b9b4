//! SwarmClaw CLI: the main entry point.
//!
//! Commands:
//! - `run`: Run a swarm plan to completion
//! - `validate`: Check a plan without running it
//! - `config`: Show or validate configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod plan;

#[derive(Parser)]
#[command(
    name = "swarmclaw",
    about = "SwarmClaw: multi-tier agent swarm execution",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit log lines as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Config file (default ~/.swarmclaw/config.toml)
    #[arg(short, long, global = true, env = "SWARMCLAW_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a swarm plan until nothing is left to dispatch
    Run {
        /// Plan file (TOML)
        plan: PathBuf,

        /// Serve backend responses from a JSON script instead of the network
        #[arg(short, long)]
        script: Option<PathBuf>,

        /// Directory of extra routine definitions (*.toml / *.json)
        #[arg(short, long)]
        routines: Option<PathBuf>,

        /// Write the final swarm snapshot to this file
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Check a plan for structural problems
    Validate {
        plan: PathBuf,

        #[arg(short, long)]
        routines: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the default configuration
    Default,
    /// Validate the configuration file
    Validate,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config = cli.config.as_deref();
    let succeeded = match cli.command {
        Commands::Run {
            plan,
            script,
            routines,
            snapshot,
        } => {
            commands::run::run(commands::run::RunArgs {
                plan,
                script,
                routines,
                snapshot,
                config: config.map(PathBuf::from),
            })
            .await?
        }
        Commands::Validate { plan, routines } => commands::validate::run(&plan, routines.as_deref())?,
        Commands::Config { action } => {
            match action {
                ConfigAction::Show => commands::config_cmd::show(config)?,
                ConfigAction::Default => commands::config_cmd::default(),
                ConfigAction::Validate => commands::config_cmd::validate(config)?,
                ConfigAction::Path => commands::config_cmd::path(config),
            }
            true
        }
    };

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}
