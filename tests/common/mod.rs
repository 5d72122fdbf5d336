// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use chrono::{Duration, Utc};
use gpx_sync::config::Config;
use gpx_sync::db::{CredentialStore, DedupStore, FileCredentialStore};
use gpx_sync::error::{Result, SyncError};
use gpx_sync::models::{ActivitySummary, CredentialRecord, TrackUpload};
use gpx_sync::services::{
    ActivitySource, CallbackParams, OAuthClient, RedirectReceiver, SyncEngine, SyncOptions,
    TokenManager, TrackDestination, UploadReceipt,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// In-memory activity source.
#[allow(dead_code)]
#[derive(Default)]
pub struct FakeSource {
    activities: Vec<ActivitySummary>,
    broken_tracks: HashSet<String>,
    pub list_calls: Mutex<u32>,
    pub downloads: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl FakeSource {
    pub fn with_ids(ids: &[&str]) -> Self {
        Self {
            activities: ids
                .iter()
                .map(|id| ActivitySummary {
                    id: id.to_string(),
                    name: Some(format!("Activity {}", id)),
                    activity_type: Some("running".to_string()),
                    start_time: Some("2025-08-10 07:00:00".to_string()),
                })
                .collect(),
            ..Default::default()
        }
    }

    /// Downloads of `id` fail.
    pub fn with_broken_track(mut self, id: &str) -> Self {
        self.broken_tracks.insert(id.to_string());
        self
    }

    pub fn downloaded(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }

    pub fn list_count(&self) -> u32 {
        *self.list_calls.lock().unwrap()
    }
}

#[async_trait]
impl ActivitySource for FakeSource {
    async fn list_recent_activities(&self, limit: u32) -> Result<Vec<ActivitySummary>> {
        *self.list_calls.lock().unwrap() += 1;
        Ok(self
            .activities
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn download_track(&self, activity_id: &str) -> Result<Vec<u8>> {
        self.downloads.lock().unwrap().push(activity_id.to_string());
        if self.broken_tracks.contains(activity_id) {
            return Err(SyncError::DownloadFailed(format!(
                "export of {} returned HTTP 500",
                activity_id
            )));
        }
        Ok(format!("<gpx><trk><name>{}</name></trk></gpx>", activity_id).into_bytes())
    }
}

/// What the fake destination does with an upload.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum UploadBehavior {
    Accept,
    Reject { status: u16, body: String },
    /// Reject every token except the given one.
    RequireToken(String),
}

/// In-memory destination recording every upload attempt.
#[allow(dead_code)]
pub struct FakeDestination {
    default: UploadBehavior,
    per_file: HashMap<String, UploadBehavior>,
    /// (access token, file name) per attempt
    pub attempts: Mutex<Vec<(String, String)>>,
}

#[allow(dead_code)]
impl FakeDestination {
    pub fn accepting() -> Self {
        Self {
            default: UploadBehavior::Accept,
            per_file: HashMap::new(),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_default(mut self, behavior: UploadBehavior) -> Self {
        self.default = behavior;
        self
    }

    pub fn with_activity(mut self, activity_id: &str, behavior: UploadBehavior) -> Self {
        self.per_file
            .insert(format!("{}.gpx", activity_id), behavior);
        self
    }

    pub fn uploaded_files(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, file)| file.clone())
            .collect()
    }

    pub fn tokens_used(&self) -> Vec<String> {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .map(|(token, _)| token.clone())
            .collect()
    }
}

#[async_trait]
impl TrackDestination for FakeDestination {
    async fn upload(&self, access_token: &str, track: &TrackUpload) -> Result<UploadReceipt> {
        self.attempts
            .lock()
            .unwrap()
            .push((access_token.to_string(), track.filename.clone()));

        let behavior = self
            .per_file
            .get(&track.filename)
            .unwrap_or(&self.default);
        match behavior {
            UploadBehavior::Accept => {}
            UploadBehavior::Reject { status, body } => {
                return Err(SyncError::UploadRejected {
                    status: *status,
                    body: body.clone(),
                })
            }
            UploadBehavior::RequireToken(token) if token != access_token => {
                return Err(SyncError::Unauthorized)
            }
            UploadBehavior::RequireToken(_) => {}
        }

        Ok(UploadReceipt {
            remote_id: Some(format!("trace-{}", track.filename.trim_end_matches(".gpx"))),
        })
    }
}

/// Browser stand-in: answers the redirect with the state from the URL.
#[allow(dead_code)]
pub struct EchoReceiver {
    pub code: String,
    pub seen_urls: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl EchoReceiver {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            seen_urls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RedirectReceiver for EchoReceiver {
    async fn receive(&self, authorization_url: &str) -> Result<CallbackParams> {
        self.seen_urls
            .lock()
            .unwrap()
            .push(authorization_url.to_string());
        let url = url::Url::parse(authorization_url).unwrap();
        let state = url
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned());
        Ok(CallbackParams {
            code: Some(self.code.clone()),
            state,
            ..Default::default()
        })
    }
}

/// Redirect carrying a fixed (usually forged) state.
#[allow(dead_code)]
pub struct FixedReceiver(pub CallbackParams);

#[async_trait]
impl RedirectReceiver for FixedReceiver {
    async fn receive(&self, _authorization_url: &str) -> Result<CallbackParams> {
        Ok(self.0.clone())
    }
}

/// Fails the test if the interactive flow is started.
#[allow(dead_code)]
pub struct NoBrowser;

#[async_trait]
impl RedirectReceiver for NoBrowser {
    async fn receive(&self, _authorization_url: &str) -> Result<CallbackParams> {
        panic!("interactive authorization was not expected");
    }
}

/// Stores in a temp dir, OAuth endpoints at `oauth_base`.
#[allow(dead_code)]
pub struct TestEnv {
    pub dir: tempfile::TempDir,
    pub config: Config,
    pub credentials: Arc<FileCredentialStore>,
    pub store: Arc<DedupStore>,
}

#[allow(dead_code)]
impl TestEnv {
    /// OAuth endpoints unreachable; use when no token call is expected.
    pub fn offline() -> Self {
        Self::with_oauth_base("http://127.0.0.1:9")
    }

    pub fn with_oauth_base(oauth_base: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            osm_base_url: oauth_base.to_string(),
            tokens_file: dir.path().join("tokens.json"),
            db_file: dir.path().join("data.db"),
            legacy_ids_file: dir.path().join("processed_ids.txt"),
            ..Config::default()
        };
        let credentials = Arc::new(FileCredentialStore::new(config.tokens_file.clone()));
        let store = Arc::new(DedupStore::open(&config.db_file).unwrap());

        Self {
            dir,
            config,
            credentials,
            store,
        }
    }

    /// Store a credential expiring `expires_in` from now.
    pub fn seed_credential(&self, access: &str, refresh: Option<&str>, expires_in: Duration) {
        self.credentials
            .save(&CredentialRecord {
                access_token: access.to_string(),
                refresh_token: refresh.map(str::to_string),
                expires_at: Utc::now() + expires_in,
                scopes: ["read_gpx".to_string(), "write_gpx".to_string()]
                    .into_iter()
                    .collect(),
                obtained_at: Utc::now(),
                revoked_at: None,
            })
            .unwrap();
    }

    pub fn stored_credential(&self) -> Option<CredentialRecord> {
        self.credentials.load().unwrap()
    }

    pub fn token_manager(&self, receiver: Arc<dyn RedirectReceiver>) -> Arc<TokenManager> {
        Arc::new(TokenManager::new(
            OAuthClient::new(&self.config).unwrap(),
            self.credentials.clone(),
            receiver,
            &self.config,
        ))
    }

    pub fn engine(
        &self,
        source: Arc<FakeSource>,
        destination: Arc<FakeDestination>,
        options: SyncOptions,
    ) -> SyncEngine {
        SyncEngine::new(
            source,
            destination,
            self.token_manager(Arc::new(NoBrowser)),
            self.store.clone(),
            options,
        )
    }
}

/// JSON body of a token endpoint success response.
#[allow(dead_code)]
pub fn token_json(access: &str, refresh: Option<&str>, expires_in: Option<i64>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "access_token": access,
        "token_type": "Bearer",
        "scope": "read_gpx write_gpx",
    });
    if let Some(refresh) = refresh {
        body["refresh_token"] = serde_json::json!(refresh);
    }
    if let Some(expires_in) = expires_in {
        body["expires_in"] = serde_json::json!(expires_in);
    }
    body
}
