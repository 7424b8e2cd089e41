//! deckhand-supervisor - crash-recovery parent process
//!
//! Launches the `deckhand` orchestrator as a child, waits for it, and
//! restarts it unconditionally after any exit with a fixed 5-second
//! cooldown. Non-clean exits raise a crash alarm, rate-limited to one per
//! hour across restarts.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use deckhand::config::GatewayConfig;
use deckhand::notify::worker::{LogTransport, OutboxWorker};
use deckhand::notify::{Notifier, TimeCache};
use deckhand::paths::DataDirs;
use deckhand::supervisor::Supervisor;

#[derive(Parser, Debug)]
#[command(name = "deckhand-supervisor")]
#[command(about = "Restart-loop parent for the deckhand orchestrator")]
#[command(version)]
struct CliArgs {
    /// Path to the orchestrator binary (default: `deckhand` next to this one)
    #[arg(long)]
    child: Option<PathBuf>,

    /// Path to the TOML config file, forwarded to the child
    #[arg(short, long)]
    config: Option<String>,
}

/// Default to the sibling binary so a plain install just works.
fn sibling_child() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("deckhand")))
        .unwrap_or_else(|| PathBuf::from("deckhand"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let cfg = match &args.config {
        Some(path) => GatewayConfig::load_from_file(std::path::Path::new(path))
            .with_context(|| format!("loading config {}", path))?,
        None => GatewayConfig::load(),
    };

    let dirs = DataDirs::new(&cfg.paths.data_dir);
    dirs.ensure().context("creating data directory layout")?;

    // The supervisor writes its crash alarms into the same outbox the child
    // uses, and drains it itself so alarms still leave the box when the
    // child is too broken to run.
    let notifier = Notifier::new(&dirs, cfg.vessel.clone(), Arc::new(TimeCache::new()));
    let _outbox_worker = OutboxWorker::spawn(&dirs, Box::new(LogTransport));

    let child = args.child.unwrap_or_else(sibling_child);
    let mut child_args = Vec::new();
    if let Some(config_path) = &args.config {
        child_args.push("--config".to_string());
        child_args.push(config_path.clone());
    }

    info!("=== deckhand-supervisor started ===");
    let supervisor = Supervisor::new(child, child_args, dirs.crash_alarm_stamp(), notifier);

    // Runs for the life of the box; the console kills this process when the
    // operator wants the gateway down.
    let stop = AtomicBool::new(false);
    supervisor.run(&stop);
    Ok(())
}
