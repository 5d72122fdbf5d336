// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Credential store: the single durable copy of the OAuth token pair.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::error::StoreError;
use crate::models::{CredentialRecord, LegacyTokenFile};

/// Sole writer of the credential record.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<CredentialRecord>, StoreError>;

    /// Overwrite the stored record in place.
    fn save(&self, record: &CredentialRecord) -> Result<(), StoreError>;

    /// Delete the record. Returns false if nothing was stored.
    fn delete(&self) -> Result<bool, StoreError>;
}

/// JSON file on disk, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::CredentialIo {
            path: self.path.clone(),
            source,
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<CredentialRecord>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        let current_err = match serde_json::from_str::<CredentialRecord>(&content) {
            Ok(record) => return Ok(Some(record)),
            Err(e) => e,
        };

        // Files from earlier releases use naive timestamps and a `scope` string.
        let legacy: LegacyTokenFile =
            serde_json::from_str(&content).map_err(|_| StoreError::CorruptCredential {
                path: self.path.clone(),
                reason: current_err.to_string(),
            })?;
        let record = legacy.into_record(chrono::Utc::now());
        match &record {
            Some(record) => tracing::warn!(
                path = %self.path.display(),
                expires_at = %record.expires_at,
                "Loaded credentials in the old file layout; they are rewritten on the next save"
            ),
            None => tracing::warn!(
                path = %self.path.display(),
                "Old credential file holds no access token, treating credentials as absent"
            ),
        }
        Ok(record)
    }

    fn save(&self, record: &CredentialRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let content =
            serde_json::to_string_pretty(record).map_err(|e| StoreError::CorruptCredential {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        // Write a sibling temp file and rename over the target so a crash
        // never leaves a half-written record behind.
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = open_private(&tmp_path).map_err(|e| self.io_error(e))?;
            file.write_all(content.as_bytes())
                .map_err(|e| self.io_error(e))?;
            file.sync_all().map_err(|e| self.io_error(e))?;
        }
        fs::rename(&tmp_path, &self.path).map_err(|e| self.io_error(e))?;

        tracing::info!(path = %self.path.display(), "Saved credentials");
        Ok(())
    }

    fn delete(&self) -> Result<bool, StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::File::create(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn sample() -> CredentialRecord {
        CredentialRecord {
            access_token: "access-1".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_at: Utc::now() + Duration::hours(1),
            scopes: ["read_gpx".to_string(), "write_gpx".to_string()]
                .into_iter()
                .collect(),
            obtained_at: Utc::now(),
            revoked_at: None,
        }
    }

    #[test]
    fn test_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("tokens.json"));
        assert!(store.load().unwrap().is_none());
        assert!(!store.delete().unwrap());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested/tokens.json"));
        let record = sample();

        store.save(&record).unwrap();
        assert_eq!(store.load().unwrap(), Some(record));
        assert!(!dir.path().join("nested/tokens.json.tmp").exists());
    }

    #[test]
    fn test_save_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("tokens.json"));
        store.save(&sample()).unwrap();

        let mut updated = sample();
        updated.access_token = "access-2".to_string();
        store.save(&updated).unwrap();

        assert_eq!(store.load().unwrap().unwrap().access_token, "access-2");
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        fs::write(&path, "{not json").unwrap();

        let store = FileCredentialStore::new(path);
        assert!(matches!(
            store.load(),
            Err(StoreError::CorruptCredential { .. })
        ));
    }

    #[test]
    fn test_loads_file_from_earlier_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        fs::write(
            &path,
            r#"{
  "access_token": "old-access",
  "refresh_token": "old-refresh",
  "expires_at": "2020-05-01T08:30:00.250000",
  "scope": "read_gpx write_gpx",
  "obtained_at": "2020-05-01T07:30:00.250000"
}"#,
        )
        .unwrap();

        let store = FileCredentialStore::new(path);
        let record = store.load().unwrap().unwrap();
        assert_eq!(record.access_token, "old-access");
        assert_eq!(record.refresh_token.as_deref(), Some("old-refresh"));
        assert!(record.has_scope("write_gpx"));
        assert!(record.expires_at < Utc::now());

        // Rewritten in the current layout on save.
        store.save(&record).unwrap();
        assert_eq!(store.load().unwrap(), Some(record));
    }

    #[test]
    fn test_old_file_without_access_token_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        fs::write(
            &path,
            r#"{"access_token": null, "refresh_token": null, "expires_at": null, "scope": null, "obtained_at": "2020-05-01T07:30:00"}"#,
        )
        .unwrap();

        assert!(FileCredentialStore::new(path).load().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        FileCredentialStore::new(&path).save(&sample()).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
