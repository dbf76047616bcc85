//! fnpool CLI - run commands through a pool of reusable worker processes.

mod run;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "fnpool")]
#[command(about = "Run function invocations through a pool of worker processes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Invoke the backend once per line of stdin
    Run {
        #[command(flatten)]
        pool: PoolArgs,
    },

    /// Invoke the backend once with the given payload
    Invoke {
        /// Request payload
        #[arg(short, long, default_value = "")]
        data: String,

        #[command(flatten)]
        pool: PoolArgs,
    },
}

/// Options shared by every command that builds a pool.
#[derive(Args, Debug, Clone)]
pub struct PoolArgs {
    /// JSON config file with `pool` and `backend` sections
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of worker processes
    #[arg(short = 'n', long)]
    workers: Option<usize>,

    /// How long to wait for a free worker, in milliseconds
    #[arg(long)]
    max_wait_ms: Option<u64>,

    /// Deadline for each invocation, in milliseconds
    /// [default: the config's max_runnable_time_ms, else 5000]
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Environment entry passed to every invocation (NAME=VALUE)
    #[arg(short, long = "env", value_parser = parse_env)]
    env: Vec<(String, String)>,

    /// Backend program and its arguments (overrides the config file)
    #[arg(last = true)]
    command: Vec<String>,
}

fn parse_env(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format fnpool-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(pool_err) = err.downcast_ref::<fnpool_core::Error>() {
            anyhow::anyhow!("{}", pool_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Run { pool } => run::run_lines(&pool).await.map_err(format_error)?,
        Commands::Invoke { data, pool } => {
            run::invoke_once(&pool, data).await.map_err(format_error)?
        }
    }

    Ok(())
}
