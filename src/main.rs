// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! gpx-sync command line tool
//!
//! Uploads Garmin Connect activities to OpenStreetMap GPS traces, at most
//! once per activity.

use anyhow::Context;
use clap::Parser;
use gpx_sync::{
    cli::{Cli, Command, LogFormat},
    config::Config,
    services::{legacy, LegacyIdSet, SyncOptions},
    shutdown, AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::debug!(config = ?config, "Configuration loaded");

    let state = AppState::new(config).context("Failed to initialize local state")?;

    match cli.command {
        Command::Sync {
            limit,
            history,
            dry_run,
            max_attempts,
        } => {
            let mut options = SyncOptions::from_config(&state.config);
            options.dry_run |= dry_run;
            if let Some(max_attempts) = max_attempts {
                options.max_attempts = max_attempts;
            }
            let limit = Command::sync_limit(limit, history, state.config.max_activities);

            let cancel = shutdown::install_signal_handler();
            let engine = state.sync_engine(options)?.with_cancellation(cancel);

            tracing::info!(limit, history, "Starting sync");
            let report = engine.run_pass(limit, history).await?;
            println!("Sync finished: {}", report);
            if let Some(reason) = &report.halted {
                anyhow::bail!("Sync halted: {}", reason);
            }
        }

        Command::Migrate { file } => {
            let path = file.unwrap_or_else(|| state.config.legacy_ids_file.clone());
            let Some(legacy_ids) = LegacyIdSet::read_from(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?
            else {
                println!("No legacy id file at {}, nothing to migrate", path.display());
                return Ok(());
            };

            let report = legacy::migrate(&state.store, &legacy_ids)?;
            println!(
                "Migrated {} ids from {} ({} already present)",
                report.inserted,
                path.display(),
                report.already_present
            );
        }

        Command::Authorize => {
            let record = state.token_manager()?.authorize().await?;
            println!(
                "Authorized. Access token valid until {}",
                record.expires_at.to_rfc3339()
            );
        }

        Command::Revoke => {
            if state.token_manager()?.revoke().await? {
                println!("Credentials revoked and deleted");
            } else {
                println!("No stored credentials");
            }
        }

        Command::Status { recent } => {
            print_status(&state, recent)?;
        }
    }

    Ok(())
}

fn print_status(state: &AppState, recent: usize) -> anyhow::Result<()> {
    let (credential_state, record) = state.credential_status()?;
    match record {
        Some(record) => println!(
            "Credentials: {} (expires {}, scopes: {})",
            credential_state,
            record.expires_at.to_rfc3339(),
            record.scopes.iter().cloned().collect::<Vec<_>>().join(" ")
        ),
        None => println!("Credentials: {}", credential_state),
    }

    let summary = state.store.summary()?;
    println!(
        "Activities: {} total, {} uploaded, {} failed, {} pending",
        summary.total, summary.uploaded, summary.failed, summary.pending
    );
    if let Some(last) = state.store.last_completed_run()? {
        println!("Last completed pass: {}", last.to_rfc3339());
    }

    let records = state.store.recent(recent)?;
    if !records.is_empty() {
        println!();
        for record in records {
            println!(
                "{:<14} {:<9} {:<25} {}",
                record.activity_id,
                record.status.as_str(),
                record
                    .uploaded_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string()),
                record
                    .remote_id
                    .or(record.detail)
                    .unwrap_or_default()
            );
        }
    }
    Ok(())
}

/// Initialize logging to stderr, human-readable or flattened JSON.
fn init_logging(format: LogFormat) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("gpx_sync=debug".parse()?)
        .add_directive("info".parse()?);

    match format {
        LogFormat::Json => {
            let layer = tracing_subscriber::fmt::layer()
                .json()
                .with_target(false)
                .with_current_span(true)
                .flatten_event(true)
                .with_writer(std::io::stderr);
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .init();
        }
        LogFormat::Text => {
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr);
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .init();
        }
    }
    Ok(())
}
