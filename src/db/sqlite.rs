// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! SQLite-backed dedup store.
//!
//! Every operation is a single statement or a single transaction, so each
//! activity's record is committed atomically and independently.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::error::StoreError;
use super::schema;
use crate::models::{DedupRecord, DedupStatus, DedupSummary};
use crate::time_utils::{format_utc_rfc3339, parse_utc_rfc3339};

const RECORD_COLUMNS: &str =
    "activity_id, status, uploaded_at, detail, remote_id, attempts, first_seen_at, updated_at";

/// Statistics written to `sync_runs` when a pass finishes.
#[derive(Debug, Clone, Default)]
pub struct SyncRunStats {
    pub fetched: u32,
    pub uploaded: u32,
    pub skipped: u32,
    pub failed: u32,
    pub interrupted: bool,
}

/// Durable table of processed activity ids.
pub struct DedupStore {
    /// Wrapped in Mutex because rusqlite::Connection is not Sync.
    conn: Mutex<Connection>,
    /// Path to the database file (for error messages).
    path: PathBuf,
}

impl std::fmt::Debug for DedupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl DedupStore {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Open {
            path: path.to_path_buf(),
            source: e,
        })?;

        // WAL keeps readers (e.g. `status`) from blocking a running pass.
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(StoreError::query)?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(StoreError::query)?;

        schema::migrate(&conn)?;
        tracing::debug!(path = %path.display(), "Dedup store opened");

        Ok(Self {
            conn: Mutex::new(conn),
            path: path.to_path_buf(),
        })
    }

    /// Open an in-memory database (tests and dry runs).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Query(e.to_string()))
    }

    /// True iff a record with status `uploaded` exists for this id.
    pub fn is_processed(&self, activity_id: &str) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM processed_activities WHERE activity_id = ?1 AND status = 'uploaded'",
                [activity_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::query)?;
        Ok(found.is_some())
    }

    pub fn get(&self, activity_id: &str) -> Result<Option<DedupRecord>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM processed_activities WHERE activity_id = ?1",
                RECORD_COLUMNS
            ),
            [activity_id],
            row_to_record,
        )
        .optional()
        .map_err(StoreError::query)
    }

    /// Record first sight of an activity as `pending`.
    ///
    /// Existing records are left untouched. Returns true if a row was created.
    pub fn observe(&self, activity_id: &str) -> Result<bool, StoreError> {
        let now = format_utc_rfc3339(Utc::now());
        let conn = self.lock()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO processed_activities \
                 (activity_id, status, attempts, first_seen_at, updated_at) \
                 VALUES (?1, 'pending', 0, ?2, ?2)",
                params![activity_id, now],
            )
            .map_err(StoreError::query)?;
        Ok(inserted > 0)
    }

    /// Upsert the record for `activity_id`.
    ///
    /// `uploaded_at` is set to the current time when `status` is `uploaded`.
    /// An `uploaded` record is terminal and is never rewritten, which makes
    /// repeated calls with the same arguments harmless. A `pending` write
    /// only creates missing rows.
    pub fn mark(
        &self,
        activity_id: &str,
        status: DedupStatus,
        detail: Option<&str>,
    ) -> Result<(), StoreError> {
        self.upsert(activity_id, status, detail, None)
    }

    /// Mark an activity uploaded, keeping the destination's trace id.
    pub fn mark_uploaded(
        &self,
        activity_id: &str,
        remote_id: Option<&str>,
    ) -> Result<(), StoreError> {
        self.upsert(activity_id, DedupStatus::Uploaded, None, remote_id)
    }

    fn upsert(
        &self,
        activity_id: &str,
        status: DedupStatus,
        detail: Option<&str>,
        remote_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let now = format_utc_rfc3339(Utc::now());
        let uploaded_at = (status == DedupStatus::Uploaded).then(|| now.clone());
        // Only outcomes count as attempts.
        let attempt: i64 = if status == DedupStatus::Pending { 0 } else { 1 };

        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO processed_activities
                (activity_id, status, uploaded_at, detail, remote_id, attempts, first_seen_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ON CONFLICT(activity_id) DO UPDATE SET
                status = excluded.status,
                uploaded_at = excluded.uploaded_at,
                detail = excluded.detail,
                remote_id = COALESCE(excluded.remote_id, processed_activities.remote_id),
                attempts = processed_activities.attempts + excluded.attempts,
                updated_at = excluded.updated_at
            WHERE processed_activities.status != 'uploaded'
              AND excluded.status != 'pending'
            "#,
            params![
                activity_id,
                status.as_str(),
                uploaded_at,
                detail,
                remote_id,
                attempt,
                now
            ],
        )
        .map_err(StoreError::query)?;

        Ok(())
    }

    /// Total number of records.
    pub fn count(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM processed_activities", [], |row| {
                row.get(0)
            })
            .map_err(StoreError::query)?;
        Ok(count as u64)
    }

    /// Up to `n` records, most recently uploaded first.
    ///
    /// Records that were never uploaded sort after all uploaded ones.
    pub fn recent(&self, n: usize) -> Result<Vec<DedupRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM processed_activities \
                 ORDER BY uploaded_at IS NULL, uploaded_at DESC, updated_at DESC \
                 LIMIT ?1",
                RECORD_COLUMNS
            ))
            .map_err(StoreError::query)?;

        let records = stmt
            .query_map([n as i64], row_to_record)
            .map_err(StoreError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::query)?;

        Ok(records)
    }

    pub fn summary(&self) -> Result<DedupSummary, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM processed_activities GROUP BY status")
            .map_err(StoreError::query)?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
            .map_err(StoreError::query)?;

        let mut summary = DedupSummary::default();
        for row in rows {
            let (status, count) = row.map_err(StoreError::query)?;
            let count = count as u64;
            summary.total += count;
            match DedupStatus::parse(&status) {
                Some(DedupStatus::Pending) => summary.pending += count,
                Some(DedupStatus::Uploaded) => summary.uploaded += count,
                Some(DedupStatus::Failed) => summary.failed += count,
                None => tracing::warn!(status = %status, count, "Unknown status in dedup store"),
            }
        }
        Ok(summary)
    }

    /// Insert `uploaded` records for ids not yet present, in one transaction.
    ///
    /// Returns the number of rows actually inserted.
    pub fn insert_uploaded_if_absent(
        &self,
        activity_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let at = format_utc_rfc3339(at);
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(StoreError::query)?;

        let mut inserted = 0u64;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR IGNORE INTO processed_activities \
                     (activity_id, status, uploaded_at, attempts, first_seen_at, updated_at) \
                     VALUES (?1, 'uploaded', ?2, 0, ?2, ?2)",
                )
                .map_err(StoreError::query)?;
            for id in activity_ids {
                inserted += stmt.execute(params![id, at]).map_err(StoreError::query)? as u64;
            }
        }

        tx.commit().map_err(StoreError::query)?;
        Ok(inserted)
    }

    /// Start a new sync run and return its ID.
    pub fn start_sync_run(&self, history_mode: bool) -> Result<i64, StoreError> {
        let started_at = format_utc_rfc3339(Utc::now());
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sync_runs (started_at, history_mode) VALUES (?1, ?2)",
            params![started_at, history_mode],
        )
        .map_err(StoreError::query)?;
        Ok(conn.last_insert_rowid())
    }

    pub fn complete_sync_run(&self, run_id: i64, stats: &SyncRunStats) -> Result<(), StoreError> {
        let completed_at = format_utc_rfc3339(Utc::now());
        let conn = self.lock()?;
        conn.execute(
            "UPDATE sync_runs SET completed_at = ?1, fetched = ?2, uploaded = ?3, skipped = ?4, \
             failed = ?5, interrupted = ?6 WHERE id = ?7",
            params![
                completed_at,
                stats.fetched,
                stats.uploaded,
                stats.skipped,
                stats.failed,
                stats.interrupted,
                run_id
            ],
        )
        .map_err(StoreError::query)?;
        Ok(())
    }

    /// Timestamp of the last completed pass, if any.
    pub fn last_completed_run(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.lock()?;
        let completed: Option<String> = conn
            .query_row(
                "SELECT completed_at FROM sync_runs WHERE completed_at IS NOT NULL \
                 ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::query)?;
        Ok(completed.as_deref().and_then(parse_utc_rfc3339))
    }
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn timestamp_column(row: &Row<'_>, column: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(column)?;
    match raw {
        None => Ok(None),
        Some(value) => parse_utc_rfc3339(&value)
            .map(Some)
            .ok_or_else(|| conversion_error(column, format!("bad timestamp '{}'", value))),
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<DedupRecord> {
    let status_raw: String = row.get(1)?;
    let status = DedupStatus::parse(&status_raw)
        .ok_or_else(|| conversion_error(1, format!("unknown status '{}'", status_raw)))?;

    let updated_at = timestamp_column(row, 7)?.unwrap_or_else(Utc::now);
    let first_seen_at = timestamp_column(row, 6)?.unwrap_or(updated_at);

    Ok(DedupRecord {
        activity_id: row.get(0)?,
        status,
        uploaded_at: timestamp_column(row, 2)?,
        detail: row.get(3)?,
        remote_id: row.get(4)?,
        attempts: row.get::<_, i64>(5)?.max(0) as u32,
        first_seen_at,
        updated_at,
    })
}
