//! tick-host: a minimal host loop driving the scheduler.
//!
//! Advances a manual tick clock at the configured rate, pumps the scheduler
//! once per tick and drains the sync backlog on the same thread. Runs a
//! heartbeat task and a small recipe, then shuts down and prints metrics.

use std::sync::Arc;
use std::thread;

use clap::Parser;
use tracing::{info, warn};

use tickloom_core::{config::load_dotenv, Config};
use tickloom_scheduler::{
    HostQueue, ManualTimeSource, Owner, Scheduler, ShutdownStatus, TaskError,
};

/// Drive the tickloom scheduler from a fixed-rate host loop.
#[derive(Parser, Debug)]
#[command(name = "tick-host", version, about)]
struct Cli {
    /// Path to a TOML config file. Environment variables are used when absent.
    #[arg(long, env = "TICKLOOM_CONFIG")]
    config: Option<String>,

    /// Number of host ticks to run before shutting down.
    #[arg(long, env = "TICKLOOM_HOST_TICKS", default_value_t = 180)]
    ticks: u64,

    /// Heartbeat period in ticks.
    #[arg(long, default_value_t = 60)]
    heartbeat: u64,
}

fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match Config::from_file(path) {
            Ok(cfg) => {
                info!(path = %path, "loaded tickloom config");
                cfg
            }
            Err(e) => {
                warn!(error = %e, path = %path, "failed to load config, using environment");
                Config::from_env()?
            }
        },
        None => Config::from_env()?,
    };
    config.log_summary();

    let time = Arc::new(ManualTimeSource::new(0));
    let host = Arc::new(HostQueue::new());
    let scheduler = Scheduler::new(config.scheduler.clone(), time.clone(), host.clone())?;
    let owner = Owner::new("tick-host");

    let heartbeat = {
        let clock = scheduler.clone();
        scheduler
            .schedule(&owner)
            .repeat(cli.heartbeat.max(1))
            .execute(move || info!(tick = clock.current_ticks(), "heartbeat"))
    };

    let recipe = scheduler
        .recipe(&owner, (1..=100_u64).collect::<Vec<_>>())
        .then_apply_async(|values| values.iter().sum::<u64>())
        .then_accept(|sum| info!(sum, "recipe finished on the host thread"))
        .execute();

    let tick = config.scheduler.tick_duration();
    for _ in 0..cli.ticks {
        time.advance(1);
        scheduler.pump();
        host.run_pending();
        thread::sleep(tick);
    }

    match recipe.get_timeout(tick) {
        Ok(sum) => info!(sum, "recipe result"),
        Err(TaskError::Timeout) => warn!("recipe still running at shutdown"),
        Err(e) => warn!(error = %e, "recipe did not complete"),
    }
    heartbeat.cancel();

    match scheduler.shutdown(config.scheduler.shutdown_timeout()) {
        ShutdownStatus::Drained => info!("all workers drained"),
        ShutdownStatus::TimedOut { stalled } => {
            warn!(stalled = stalled.len(), "shutdown timed out")
        }
    }
    host.run_pending();

    println!("{}", serde_json::to_string_pretty(&scheduler.metrics())?);
    Ok(())
}
