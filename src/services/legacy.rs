// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! One-time import of the flat processed-id list into the dedup store.

use chrono::Utc;
use std::collections::BTreeSet;
use std::path::Path;

use crate::db::{DedupStore, StoreError};

/// Activity ids from the legacy one-id-per-line file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyIdSet {
    ids: BTreeSet<String>,
}

impl LegacyIdSet {
    /// Lines are trimmed, blank lines skipped, duplicates collapse.
    pub fn parse(content: &str) -> Self {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Read the legacy file. `Ok(None)` if it does not exist.
    pub fn read_from(path: &Path) -> std::io::Result<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(Self::parse(&content))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

impl FromIterator<String> for LegacyIdSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// Counts from one migration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub inserted: u64,
    /// Ids that already had a record of any status; left untouched.
    pub already_present: u64,
}

/// Insert an `uploaded` record for every legacy id not already in `store`.
///
/// Existing records are never modified, so re-running is harmless.
pub fn migrate(store: &DedupStore, legacy: &LegacyIdSet) -> Result<MigrationReport, StoreError> {
    let ids: Vec<String> = legacy.iter().map(str::to_string).collect();
    let inserted = store.insert_uploaded_if_absent(&ids, Utc::now())?;

    let report = MigrationReport {
        inserted,
        already_present: ids.len() as u64 - inserted,
    };
    tracing::info!(
        inserted = report.inserted,
        already_present = report.already_present,
        "Legacy id migration complete"
    );
    Ok(report)
}
