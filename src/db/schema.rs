// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Dedup database schema and forward migrations.
//!
//! Version 1 is the flat `processed_activities` table written by the
//! earlier sync tool (an existing `data.db` from it has `user_version = 0`
//! and is adopted in place). Version 2 adds per-record bookkeeping and the
//! `sync_runs` table.

use rusqlite::Connection;

use super::error::StoreError;

/// Current schema version. Increment when making schema changes.
pub const SCHEMA_VERSION: i32 = 2;

const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS processed_activities (
    activity_id TEXT PRIMARY KEY,
    uploaded_at TEXT,
    gpx_id TEXT,
    status TEXT,
    metadata TEXT
);
"#;

const SCHEMA_V2: &str = r#"
ALTER TABLE processed_activities RENAME COLUMN gpx_id TO remote_id;
ALTER TABLE processed_activities ADD COLUMN detail TEXT;
ALTER TABLE processed_activities ADD COLUMN attempts INTEGER NOT NULL DEFAULT 0;
ALTER TABLE processed_activities ADD COLUMN first_seen_at TEXT;
ALTER TABLE processed_activities ADD COLUMN updated_at TEXT;

UPDATE processed_activities
SET status = 'uploaded'
WHERE status IS NULL OR status = 'migrated';

UPDATE processed_activities
SET first_seen_at = COALESCE(uploaded_at, strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at = COALESCE(uploaded_at, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'));

CREATE INDEX IF NOT EXISTS idx_processed_status ON processed_activities(status);
CREATE INDEX IF NOT EXISTS idx_processed_uploaded_at ON processed_activities(uploaded_at);

CREATE TABLE IF NOT EXISTS sync_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    history_mode INTEGER NOT NULL DEFAULT 0,
    fetched INTEGER NOT NULL DEFAULT 0,
    uploaded INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    interrupted INTEGER NOT NULL DEFAULT 0
);
"#;

/// Get the current schema version from the database.
pub(crate) fn get_schema_version(conn: &Connection) -> Result<i32, StoreError> {
    let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Initialize or migrate the database schema.
///
/// Idempotent; each version step commits atomically with its
/// `user_version` bump.
pub(crate) fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let current_version = get_schema_version(conn)?;

    if current_version > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchemaVersion {
            found: current_version,
            expected: SCHEMA_VERSION,
        });
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        migrate_to_version(conn, version)?;
    }

    Ok(())
}

fn migrate_to_version(conn: &Connection, version: i32) -> Result<(), StoreError> {
    let ddl = match version {
        1 => SCHEMA_V1,
        2 => SCHEMA_V2,
        _ => {
            return Err(StoreError::UnsupportedSchemaVersion {
                found: version,
                expected: SCHEMA_VERSION,
            })
        }
    };

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(ddl)?;
    tx.pragma_update(None, "user_version", version)?;
    tx.commit()?;

    tracing::debug!(version, "Migrated dedup database schema");
    Ok(())
}
