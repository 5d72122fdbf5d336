// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Error taxonomy shared by the token manager, the sync engine and the
//! collaborators it drives.

use crate::config::ConfigError;
use crate::db::StoreError;

/// Crate-wide error type.
///
/// Pass-level errors (`Credential`, `Store`, `Config`) propagate to the
/// caller. Per-activity errors (`DownloadFailed`, `UploadRejected`,
/// `Network` during a single activity) are converted into a `failed`
/// Dedup Record by the engine and never abort the pass.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Authorization or refresh rejected; the user has to re-authorize.
    #[error("Credential error: {0}")]
    Credential(String),

    /// Transient transport failure, safe to retry later.
    #[error("Network error: {0}")]
    Network(String),

    /// The destination rejected the bearer token.
    #[error("Destination rejected the access token")]
    Unauthorized,

    #[error("Upload rejected (HTTP {status}): {body}")]
    UploadRejected { status: u16, body: String },

    #[error("Track download failed: {0}")]
    DownloadFailed(String),

    /// The activity source could not be listed.
    #[error("Activity source error: {0}")]
    Source(String),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl SyncError {
    /// Transient failures that a later pass may succeed on.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network(_))
    }

    pub fn is_credential_error(&self) -> bool {
        matches!(self, SyncError::Credential(_) | SyncError::Unauthorized)
    }

    /// Errors scoped to one activity, recorded as `failed` on its Dedup Record.
    pub fn is_per_activity(&self) -> bool {
        matches!(
            self,
            SyncError::DownloadFailed(_)
                | SyncError::UploadRejected { .. }
                | SyncError::Network(_)
        )
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Network(err.to_string())
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, SyncError>;
