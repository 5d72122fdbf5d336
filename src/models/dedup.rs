// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Dedup records: the persisted delivery decision for each activity id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Processing status of an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupStatus {
    Pending,
    Uploaded,
    Failed,
}

impl DedupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploaded => "uploaded",
            Self::Failed => "failed",
        }
    }

    /// Parse a stored status string; unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "uploaded" => Some(Self::Uploaded),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DedupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the dedup table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupRecord {
    /// Source activity id (unique)
    pub activity_id: String,
    pub status: DedupStatus,
    /// Set when the record became `uploaded`
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Failure reason for `failed` records
    pub detail: Option<String>,
    /// Trace id assigned by the destination
    pub remote_id: Option<String>,
    /// Number of processing attempts recorded
    pub attempts: u32,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Counts by status, for the `status` command and pass logging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DedupSummary {
    pub total: u64,
    pub pending: u64,
    pub uploaded: u64,
    pub failed: u64,
}
