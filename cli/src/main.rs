//! Pacer CLI - narrated demos of the throttle and the async queue.
//!
//! ```text
//! main() -> init_tracing() -> load config -> throttle_demo::run | queue_demo::run
//! ```
//!
//! Settings come from `~/.pacer/config.toml` (or `--config`), then command
//! line flags override individual fields. Narration goes to stdout; tracing
//! output goes to stderr so the two can be separated.

mod queue_demo;
mod throttle_demo;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use pacer_config::PacerConfig;
use pacer_types::Concurrency;

#[derive(Parser)]
#[command(name = "pacer")]
#[command(about = "Watch a throttle and a concurrency-limited queue at work")]
struct Cli {
    /// Config file to use instead of ~/.pacer/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fire a burst of calls through a throttle and narrate what fires
    Throttle {
        /// Number of calls to make
        #[arg(long, default_value_t = 20)]
        calls: u32,
        /// Delay between calls in milliseconds
        #[arg(long, default_value_t = 30)]
        every_ms: u64,
        /// Override the throttle window in milliseconds
        #[arg(long)]
        wait_ms: Option<u64>,
        /// Do not fire on the leading edge
        #[arg(long)]
        no_leading: bool,
        /// Do not fire on the trailing edge
        #[arg(long)]
        no_trailing: bool,
    },
    /// Run simulated jobs through the queue, with pause/clear/resume
    Queue {
        /// Number of jobs to submit
        #[arg(long, default_value_t = 8)]
        tasks: u32,
        /// Override the concurrency limit
        #[arg(long)]
        concurrency: Option<usize>,
        /// Make every Nth job fail (0 disables)
        #[arg(long, default_value_t = 4)]
        fail_every: u32,
        /// Print final queue stats as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(config: Option<&PacerConfig>) {
    let configured = config.and_then(PacerConfig::log_filter);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured.as_deref().unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(env_filter)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<PacerConfig> {
    match path {
        Some(path) => PacerConfig::load_from(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(PacerConfig::load()?.unwrap_or_default()),
    }
}

async fn dispatch(command: Commands, config: &PacerConfig) -> Result<()> {
    match command {
        Commands::Throttle {
            calls,
            every_ms,
            wait_ms,
            no_leading,
            no_trailing,
        } => {
            let mut options = config.throttle_options()?;
            if let Some(ms) = wait_ms {
                options = options.with_wait(Duration::from_millis(ms))?;
            }
            if no_leading {
                options = options.leading(false);
            }
            if no_trailing {
                options = options.trailing(false);
            }
            throttle_demo::run(options, calls, Duration::from_millis(every_ms)).await
        }
        Commands::Queue {
            tasks,
            concurrency,
            fail_every,
            json,
        } => {
            let mut options = config.queue_options()?;
            if let Some(limit) = concurrency {
                options = options.with_concurrency(Concurrency::new(limit)?);
            }
            let stats = queue_demo::run(options, tasks, fail_every).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            }
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Tracing needs the config for its filter, so load first and report
    // failures once the subscriber exists.
    let loaded = load_config(cli.config.as_ref());
    init_tracing(loaded.as_ref().ok());
    let config = loaded.inspect_err(|err| tracing::error!("{err:#}"))?;

    tokio::select! {
        result = dispatch(cli.command, &config) => result,
        _ = signal::ctrl_c() => {
            tracing::info!("Interrupted");
            Ok(())
        }
    }
}
