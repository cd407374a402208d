//! rollout CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "rollout")]
#[command(about = "Pull, build and deploy a local cluster in dependency order", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute every job of a plan
    Run {
        /// Path to the plan file
        #[arg(long, env = "ROLLOUT_PLAN", default_value = "rollout.kdl")]
        plan: PathBuf,
        /// Log the commands instead of running them
        #[arg(long)]
        dry_run: bool,
        /// Maximum number of jobs running at once (overrides the plan)
        #[arg(long)]
        max_parallel: Option<usize>,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check a plan file without running it
    Validate {
        /// Path to the plan file
        #[arg(env = "ROLLOUT_PLAN", default_value = "rollout.kdl")]
        path: PathBuf,
    },
    /// Show the order in which jobs of a plan can run
    Plan {
        /// Path to the plan file
        #[arg(env = "ROLLOUT_PLAN", default_value = "rollout.kdl")]
        path: PathBuf,
        /// Print the levels as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Run {
            plan,
            dry_run,
            max_parallel,
            json,
        } => {
            commands::run::run(&plan, dry_run, max_parallel, json).await?;
        }
        Commands::Validate { path } => {
            commands::validate::validate(&path)?;
        }
        Commands::Plan { path, json } => {
            commands::plan::plan(&path, json)?;
        }
    }

    Ok(())
}
