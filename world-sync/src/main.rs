//! World Sync - Main entry point
//!
//! One invocation performs one backup run; schedule it externally.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use world_sync::rcon::{Console, RconConsole};
use world_sync::retention::RetentionPolicy;
use world_sync::storage::b2::B2Store;
use world_sync::{utils, BackupRun, Config, RunSettings};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a .env file (defaults to ./.env when present)
    #[arg(short, long, value_name = "FILE")]
    env_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Archives kept locally (overrides LOCAL_KEEP; 0 deletes after upload)
    #[arg(short, long)]
    keep_local: Option<usize>,

    /// Remote retention policy: tagged or verify (overrides RETENTION_POLICY)
    #[arg(short, long)]
    policy: Option<RetentionPolicy>,

    /// Archive without freezing saves over RCON
    #[arg(long)]
    no_rcon: bool,

    /// Archive and classify only; skip upload and cleanup
    #[arg(long)]
    dry_run: bool,

    /// Remove a run lock left behind by a killed run
    #[arg(long)]
    break_lock: bool,
}

// Returning (rather than exiting) lets the runtime wait for any RCON session
// still in flight, including a pending `save-on`.
#[tokio::main]
async fn main() -> ExitCode {
    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Backup failed: {:#}", e);
            eprintln!("world-sync: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = Config::from_env(args.env_file.as_deref()).context("loading configuration")?;

    if let Some(keep) = args.keep_local {
        config.backup.keep_local = keep;
    }
    if let Some(policy) = args.policy {
        config.backup.policy = policy;
    }
    if args.no_rcon {
        config.rcon = None;
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    if let Some(rcon) = &config.rcon {
        match &rcon.discovered_in {
            Some(properties) => tracing::warn!(
                "Using RCON settings from {} ({})",
                properties.display(),
                rcon.address
            ),
            None => tracing::info!("Freezing saves through RCON at {}", rcon.address),
        }
    }

    tracing::info!(
        "Starting world-sync v{} (bucket: {}, server: {})",
        env!("CARGO_PKG_VERSION"),
        config.storage.bucket,
        config.world.server_path.display()
    );

    let store = Arc::new(B2Store::new(config.storage.clone())?);
    let console = config
        .rcon
        .as_ref()
        .map(|rcon| Arc::new(RconConsole::new(rcon)) as Arc<dyn Console>);

    let mut settings = RunSettings::from_config(&config);
    settings.dry_run = args.dry_run;
    settings.break_lock = args.break_lock;

    let report = BackupRun::new(store, console, settings).run().await?;
    tracing::info!(
        "Backup {} stored as {} ({} remote removed, {} local removed)",
        report.tag,
        report.remote_name,
        report.deleted_remote.len(),
        report.pruned_local.len()
    );

    Ok(())
}
