// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Command line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Activity limit used by `sync --history` when `--limit` is not given.
pub const HISTORY_LIMIT: u32 = 10_000;

#[derive(Parser, Debug)]
#[command(
    name = "gpx-sync",
    version,
    about = "Upload Garmin Connect activity tracks to OpenStreetMap GPS traces"
)]
pub struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Upload activities not yet uploaded
    Sync {
        /// Number of most recent activities to consider
        #[arg(long)]
        limit: Option<u32>,

        /// Backfill the full history (large limit)
        #[arg(long)]
        history: bool,

        /// Download but do not upload or record anything
        #[arg(long)]
        dry_run: bool,

        /// Give up on failed activities after this many attempts (0 = never)
        #[arg(long)]
        max_attempts: Option<u32>,
    },

    /// Import the legacy processed-id list into the database
    Migrate {
        /// Legacy file (defaults to PROCESSED_ACTIVITIES_FILE)
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Run the browser authorization flow and store new tokens
    Authorize,

    /// Revoke the stored tokens and delete them
    Revoke,

    /// Show credential state and upload records
    Status {
        /// Number of recent records to list
        #[arg(long, default_value_t = 10)]
        recent: usize,
    },
}

impl Command {
    /// Effective activity limit for `sync`.
    pub fn sync_limit(limit: Option<u32>, history: bool, configured: u32) -> u32 {
        match (limit, history) {
            (Some(limit), _) => limit,
            (None, true) => HISTORY_LIMIT,
            (None, false) => configured,
        }
    }
}
