//! cadence: release orchestration for multi-service environments.
//!
//! Reads `cadence.toml`, plans dependency-ordered batches, runs releases
//! through the configured deploy commands, and rolls back from the
//! release registry.
//!
//! # Usage
//!
//! ```text
//! cadence plan
//! cadence release --env production --strategy dependency-order
//! cadence rollback --env production --reason "bad migration" --dry-run
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use cadence_core::DeployStrategy;

mod commands;

#[derive(Parser)]
#[command(
    name = "cadence",
    about = "Dependency-aware release orchestrator",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to the project configuration.
    #[arg(short, long, global = true, default_value = "cadence.toml")]
    config: PathBuf,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Print the deployment batches (and any cycles) for the configured services.
    Plan {
        /// Strategy to shape batches with (defaults to the configured one).
        #[arg(long)]
        strategy: Option<DeployStrategy>,
    },
    /// Deploy the configured services.
    Release {
        /// Target environment.
        #[arg(long, default_value = "production")]
        env: String,
        /// Release name (defaults to [release].name).
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        strategy: Option<DeployStrategy>,
        /// Leave deployed services in place when a later one fails.
        #[arg(long)]
        no_rollback: bool,
    },
    /// Roll an environment back to an earlier deployment.
    Rollback {
        #[arg(long)]
        env: String,
        /// Deployment id to roll back to (default: the previous successful one).
        #[arg(long)]
        to: Option<String>,
        #[arg(long)]
        reason: String,
        /// Also roll data stores back (they are left untouched by default).
        #[arg(long)]
        rollback_data: bool,
        /// Proceed despite validation issues, reporting them as warnings.
        #[arg(long)]
        force: bool,
        /// Show what would happen without changing anything.
        #[arg(long)]
        dry_run: bool,
        /// Accept a target that does not cover every running service.
        #[arg(long)]
        allow_service_gap: bool,
    },
    /// Show releases and rollbacks for an environment.
    History {
        #[arg(long)]
        env: String,
    },
    /// Show deployment statistics.
    Stats {
        #[arg(long)]
        env: Option<String>,
    },
    /// Re-apply the state captured before a rollback.
    RestoreSnapshot {
        /// Rollback id whose snapshot to restore.
        rollback_id: String,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,cadence=debug"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let ok = match cli.command {
        Command::Plan { strategy } => commands::plan::run(&cli.config, strategy)?,
        Command::Release {
            env,
            name,
            strategy,
            no_rollback,
        } => {
            let ctx = commands::Context::load(&cli.config)?;
            commands::release::run(&ctx, &env, name, strategy, !no_rollback).await?
        }
        Command::Rollback {
            env,
            to,
            reason,
            rollback_data,
            force,
            dry_run,
            allow_service_gap,
        } => {
            let ctx = commands::Context::load(&cli.config)?;
            let options = commands::rollback::Options {
                env,
                to,
                reason,
                preserve_data: !rollback_data,
                force,
                dry_run,
                allow_service_gap,
            };
            commands::rollback::run(&ctx, options).await?
        }
        Command::History { env } => {
            let ctx = commands::Context::load(&cli.config)?;
            commands::history::history(&ctx, &env)?
        }
        Command::Stats { env } => {
            let ctx = commands::Context::load(&cli.config)?;
            commands::history::stats(&ctx, env.as_deref())?
        }
        Command::RestoreSnapshot { rollback_id } => {
            let ctx = commands::Context::load(&cli.config)?;
            commands::rollback::restore_snapshot(&ctx, &rollback_id).await?
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
