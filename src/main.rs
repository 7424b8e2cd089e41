//! deckhand - vessel gateway orchestrator
//!
//! The child process that does the actual work: gate checks, BLE scanning,
//! logger downloads, lockout bookkeeping and notifications. Run it under
//! `deckhand-supervisor` in production so crashes recover automatically.
//!
//! # Usage
//!
//! ```bash
//! # Run with ./deckhand.toml (or DECKHAND_CONFIG)
//! deckhand
//!
//! # One gate+scan+download pass, then exit (cron-style deployments, tests)
//! deckhand --once
//! ```
//!
//! # Environment Variables
//!
//! - `DECKHAND_CONFIG`: Path to the TOML config file
//! - `RUST_LOG`: Logging level (default: info)

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use deckhand::ble::btle::BtleRadio;
use deckhand::ble::{choose_scan_mode, FleetScanner, LoggerProtocolClient, LoggerRadio};
use deckhand::config::{self, GatewayConfig};
use deckhand::notify::worker::{LogTransport, OutboxWorker};
use deckhand::notify::{NotificationKind, Notifier, TimeCache};
use deckhand::orchestrator::{
    DownloadOrchestrator, FileFixSource, FixSource, OrchestratorSettings,
};
use deckhand::paths::DataDirs;
use deckhand::registry::{Flags, LockoutRegistry};
use deckhand::storage::{ProcessLock, SessionHistory};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "deckhand")]
#[command(about = "Vessel deck gateway for BLE sensor loggers")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML config file (overrides DECKHAND_CONFIG)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the data directory from the config file
    #[arg(long)]
    data_dir: Option<String>,

    /// Run a single gate+scan+download pass and exit
    #[arg(long)]
    once: bool,
}

// ============================================================================
// Main Entry Point
// ============================================================================

// The BLE stage is strictly sequential, so a single-threaded cooperative
// scheduler is enough; slow auxiliary work (outbox delivery) runs on its own
// OS thread and cannot stall it.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let mut cfg = match &args.config {
        Some(path) => GatewayConfig::load_from_file(std::path::Path::new(path))
            .with_context(|| format!("loading config {}", path))?,
        None => GatewayConfig::load(),
    };
    if let Some(data_dir) = &args.data_dir {
        cfg.paths.data_dir = data_dir.into();
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  deckhand - vessel logger gateway");
    info!(
        "  vessel: {} | project: {} | loggers: {}",
        cfg.vessel.name,
        if cfg.vessel.project.is_empty() {
            "unset"
        } else {
            &cfg.vessel.project
        },
        cfg.fleet.loggers.len()
    );
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let monitored = cfg.monitored_identities();
    for identity in monitored.values() {
        info!(
            "  monitored: {} ({}, sn {})",
            identity.mac, identity.kind, identity.serial_number
        );
    }

    let dirs = DataDirs::new(&cfg.paths.data_dir);
    dirs.ensure().context("creating data directory layout")?;

    let _process_lock =
        ProcessLock::acquire(dirs.root()).context("acquiring orchestrator process lock")?;
    info!("✓ Process lock acquired");

    let time_cache = Arc::new(TimeCache::new());
    let notifier = Notifier::new(&dirs, cfg.vessel.clone(), Arc::clone(&time_cache));
    let _outbox_worker = OutboxWorker::spawn(&dirs, Box::new(LogTransport));

    let history =
        SessionHistory::open(dirs.history_db()).context("opening session history store")?;
    let lockouts = LockoutRegistry::open(dirs.lockout_dir(), cfg.forget_time())
        .context("opening lockout registry")?;
    let flags = Flags::new(dirs.clone());

    let radio: Arc<dyn LoggerRadio> =
        Arc::new(BtleRadio::open().await.context("opening BLE adapter")?);
    let scan_mode = choose_scan_mode(cfg.behavior.passive_scan, &radio.stack_version());
    info!(
        "radio: antenna {} | stack {} | scan mode {}",
        radio.antenna(),
        radio.stack_version(),
        scan_mode
    );

    let fix_source: Arc<dyn FixSource> = Arc::new(FileFixSource::with_default_paths());
    match fix_source.current_fix() {
        Some(fix) => notifier.notify(NotificationKind::Boot, Some(&fix), None, ""),
        None => warn!("no GPS fix yet — boot notification skipped"),
    }

    let settings = OrchestratorSettings::from_config(&cfg);
    config::init(cfg);

    let cancel = CancellationToken::new();
    let shutdown_token = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, shutting down...");
        shutdown_token.cancel();
    });

    let scanner = FleetScanner::new(scan_mode, notifier.clone(), Arc::clone(&time_cache));
    let client = LoggerProtocolClient::new(
        Arc::clone(&radio),
        dirs.clone(),
        flags.clone(),
        notifier.clone(),
        config::get().gear.gear_type,
        config::get().behavior.dev_platform,
    );

    let mut orchestrator = DownloadOrchestrator::new(
        radio,
        fix_source,
        scanner,
        client,
        lockouts,
        flags,
        notifier,
        history,
        monitored,
        settings,
        cancel,
    );

    if args.once {
        let summary = orchestrator.run_once().await;
        info!(
            gate = %summary.gate,
            discovered = summary.discovered,
            sessions = summary.sessions_run,
            "single pass complete"
        );
    } else {
        orchestrator.run().await;
    }

    info!("✓ deckhand shutdown complete");
    Ok(())
}
