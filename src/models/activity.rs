// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Activity summaries as seen by the sync engine.

use serde::{Deserialize, Serialize};

/// Summary of one source activity, enough to describe its uploaded trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySummary {
    /// Source activity ID (also the dedup key)
    pub id: String,
    /// Activity name/title
    pub name: Option<String>,
    /// Activity type key (running, cycling, hiking, ...)
    pub activity_type: Option<String>,
    /// Local start time as reported by the source
    pub start_time: Option<String>,
}

impl ActivitySummary {
    /// Bare summary with only an id, used by tests and the legacy path.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            activity_type: None,
            start_time: None,
        }
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Garmin Activity {}", self.id))
    }

    /// Trace description shown on the destination.
    pub fn trace_description(&self) -> String {
        format!(
            "Garmin Activity: {} on {}",
            self.display_name(),
            self.start_time.as_deref().unwrap_or("Unknown")
        )
    }

    /// Comma-separated trace tags.
    pub fn trace_tags(&self) -> String {
        format!(
            "garmin,sync,{}",
            self.activity_type.as_deref().unwrap_or("unknown")
        )
    }

    pub fn track_filename(&self) -> String {
        format!("{}.gpx", self.id)
    }
}

/// Track bytes plus the metadata sent along with an upload.
#[derive(Debug, Clone)]
pub struct TrackUpload {
    pub filename: String,
    pub description: String,
    pub tags: String,
    pub visibility: String,
    pub data: Vec<u8>,
}

impl TrackUpload {
    pub fn for_activity(activity: &ActivitySummary, visibility: &str, data: Vec<u8>) -> Self {
        Self {
            filename: activity.track_filename(),
            description: activity.trace_description(),
            tags: activity.trace_tags(),
            visibility: visibility.to_string(),
            data,
        }
    }
}
