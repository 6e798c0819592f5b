#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for one-way incremental bucket backups.
//!
//! Loads the TOML configuration, connects to the S3-compatible endpoint, and
//! runs every configured job in order. Meant for unattended cron runs:
//! silent unless `--verbose`, exit code 0 on success and 1 on any error.

mod jobs;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use bucket_backup_cli_utils::{IndicatifProgress, MultiProgress};
use bucket_backup_config::{DEFAULT_CONFIG_FILE, load_config};
use bucket_backup_r2::R2Client;
use bucket_backup_sync::SyncEngine;
use bucket_backup_sync_models::RunContext;
use bucket_backup_sync_models::progress::null_progress;
use clap::Parser;

/// Mirror local directories into an S3-compatible bucket, uploading only
/// objects that do not exist yet.
#[derive(Parser)]
#[command(name = "bucket_backup", version)]
#[command(about = "One-way incremental backup into an S3-compatible bucket")]
struct Cli {
    /// Don't upload anything; log what would be uploaded.
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Report progress and every upload decision.
    #[arg(short, long)]
    verbose: bool,

    /// Path to the configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = RunContext::new(cli.dry_run, cli.verbose).log_filter();
    let multi = bucket_backup_cli_utils::init_logger(default_level);

    match run(&cli, &multi).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("Backup failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, multi: &MultiProgress) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&cli.config)?;
    config.trace_loaded();

    let ctx = config.run_context(cli.dry_run, cli.verbose);
    if ctx.dry_run {
        log::info!("Dry run: nothing will be uploaded");
    }

    let client = R2Client::new(&config.storage);
    let progress = if cli.verbose {
        IndicatifProgress::files_spinner(multi, "Starting")
    } else {
        null_progress()
    };
    let engine = SyncEngine::new(&client, ctx).with_progress(progress.clone());

    let start = Instant::now();
    let summary = jobs::run_jobs(&engine, &config.jobs, progress.as_ref()).await?;
    let elapsed = start.elapsed();

    log::info!(
        "Backup complete{}: {summary} in {:.1}s",
        if ctx.dry_run { " (dry run)" } else { "" },
        elapsed.as_secs_f64()
    );

    Ok(())
}
