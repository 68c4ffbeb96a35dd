//! gpuscope scheduler daemon
//!
//! Starts the capsule-facing server, optionally launches the workload
//! processes, waits for the configured world size, then stays up until
//! interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use gpuscope_scheduler::config::SchedulerConfig;
use gpuscope_scheduler::Scheduler;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "gpuscope-scheduler")]
#[command(about = "Coordinated GPU profiling scheduler", long_about = None)]
#[command(version)]
struct Args {
    /// TCP listen address for capsule connections
    #[arg(short, long)]
    listen: Option<String>,

    /// Watch-policy WASM module (or built-in policy name) to run over
    /// reported regions
    #[arg(short, long)]
    script: Option<PathBuf>,

    /// Number of capsule processes to wait for before reporting ready
    #[arg(short, long)]
    world_size: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Workload command to launch, one process per requested capsule
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let mut config = SchedulerConfig::default();
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(script) = args.script {
        config.policy_path = Some(script);
    }
    if let Some(world_size) = args.world_size {
        config.world_size = world_size;
    }

    let scheduler = Arc::new(Scheduler::new(config)?);
    scheduler.serve().await?;
    let addr = scheduler
        .local_addr()
        .context("scheduler bound no listen address")?;
    info!(%addr, "scheduler ready");

    let mut children = Vec::new();
    if !args.command.is_empty() {
        for _ in 0..scheduler.config().world_size {
            children.push(
                scheduler
                    .start_capsule(&args.command)
                    .context("failed to launch capsule process")?,
            );
        }
    }

    let want = scheduler.config().world_size;
    scheduler.wait_for_world_size(want).await?;
    info!(world_size = want, "all capsules connected");

    if children.is_empty() {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for shutdown signal")?;
        info!("shutting down");
    } else {
        for mut child in children {
            let status = child.wait().await?;
            info!(code = status.code(), "capsule process exited");
        }
    }
    Ok(())
}

fn init_tracing(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
    Ok(())
}
