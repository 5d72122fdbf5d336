// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Token lifecycle manager.
//!
//! Owns the path `absent -> pending_authorization -> valid -> expired ->
//! valid | revoked` for the single stored credential. All writes go
//! through the credential store.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::config::Config;
use crate::db::CredentialStore;
use crate::error::{Result, SyncError};
use crate::models::{CredentialRecord, CredentialState};
use crate::services::callback::RedirectReceiver;
use crate::services::oauth::OAuthClient;

/// Refresh tokens this long before their recorded expiry.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// Lifecycle state of `record` at `now`, with the standard expiry margin.
pub fn state_at(record: Option<&CredentialRecord>, now: DateTime<Utc>) -> CredentialState {
    match record {
        None => CredentialState::Absent,
        Some(record) => record.state_at(now, Duration::seconds(EXPIRY_MARGIN_SECS)),
    }
}

/// Load the stored record and its state. Makes no network call.
pub fn stored_state(
    store: &dyn CredentialStore,
) -> Result<(CredentialState, Option<CredentialRecord>)> {
    let record = store.load()?;
    Ok((state_at(record.as_ref(), Utc::now()), record))
}

pub struct TokenManager {
    oauth: OAuthClient,
    store: Arc<dyn CredentialStore>,
    receiver: Arc<dyn RedirectReceiver>,
    margin: Duration,
    fallback_ttl: Duration,
}

impl TokenManager {
    pub fn new(
        oauth: OAuthClient,
        store: Arc<dyn CredentialStore>,
        receiver: Arc<dyn RedirectReceiver>,
        config: &Config,
    ) -> Self {
        Self {
            oauth,
            store,
            receiver,
            margin: Duration::seconds(EXPIRY_MARGIN_SECS),
            fallback_ttl: Duration::from_std(config.token_fallback_ttl)
                .unwrap_or_else(|_| Duration::days(90)),
        }
    }

    /// Current lifecycle state of the stored credential.
    pub fn state(&self) -> Result<CredentialState> {
        Ok(stored_state(self.store.as_ref())?.0)
    }

    /// Return an access token that is not expired (within the margin).
    ///
    /// Runs the interactive flow when nothing is stored and a silent refresh
    /// when the stored token has expired. A revoked credential fails without
    /// any network call.
    pub async fn ensure_valid_token(&self) -> Result<String> {
        let record = match self.store.load()? {
            Some(record) => record,
            None => {
                tracing::info!("No stored credentials, starting interactive authorization");
                return Ok(self.authorize().await?.access_token);
            }
        };

        match record.state_at(Utc::now(), self.margin) {
            CredentialState::Valid => {
                tracing::debug!(
                    token = %fingerprint(&record.access_token),
                    expires_at = %record.expires_at,
                    "Using stored access token"
                );
                Ok(record.access_token)
            }
            CredentialState::Expired => {
                tracing::info!(expires_at = %record.expires_at, "Access token expired, refreshing");
                self.refresh(record).await
            }
            CredentialState::Revoked => Err(revoked_error()),
            CredentialState::Absent | CredentialState::PendingAuthorization => Err(
                SyncError::Credential("No usable credentials stored".to_string()),
            ),
        }
    }

    /// Refresh after the destination rejected `rejected_token`.
    ///
    /// If the store already holds a different, unexpired token (refreshed
    /// since `rejected_token` was handed out) that token is returned as is.
    pub async fn force_refresh(&self, rejected_token: &str) -> Result<String> {
        let record = self.store.load()?.ok_or_else(|| {
            SyncError::Credential("No stored credentials to refresh".to_string())
        })?;

        match record.state_at(Utc::now(), self.margin) {
            CredentialState::Revoked => Err(revoked_error()),
            CredentialState::Valid if record.access_token != rejected_token => {
                Ok(record.access_token)
            }
            _ => {
                tracing::warn!(
                    token = %fingerprint(rejected_token),
                    "Access token rejected by destination, forcing refresh"
                );
                self.refresh(record).await
            }
        }
    }

    /// Run the interactive authorization-code flow and persist the result.
    ///
    /// Replaces whatever is stored, including a revoked record.
    pub async fn authorize(&self) -> Result<CredentialRecord> {
        let pending = self.oauth.start_authorization()?;
        tracing::info!(state = %CredentialState::PendingAuthorization, "Authorization started");

        let params = self.receiver.receive(&pending.authorization_url).await?;
        let response = self.oauth.exchange_code(&pending, &params).await?;

        let record = response.into_record(
            Utc::now(),
            None,
            &self.oauth.requested_scopes(),
            self.fallback_ttl,
        );
        self.store.save(&record)?;

        tracing::info!(
            expires_at = %record.expires_at,
            scopes = ?record.scopes,
            "Authorization complete"
        );
        Ok(record)
    }

    /// Revoke the stored token at the server and delete the record.
    ///
    /// Returns false if nothing was stored. The local record is deleted
    /// even if the server call fails.
    pub async fn revoke(&self) -> Result<bool> {
        let Some(record) = self.store.load()? else {
            return Ok(false);
        };

        let token = record
            .refresh_token
            .as_deref()
            .unwrap_or(&record.access_token);
        let remote = if record.revoked_at.is_none() {
            self.oauth.revoke(token).await
        } else {
            Ok(())
        };

        self.store.delete()?;
        tracing::info!("Deleted stored credentials");
        remote.map(|_| true)
    }

    async fn refresh(&self, mut record: CredentialRecord) -> Result<String> {
        let Some(refresh_token) = record.refresh_token.clone() else {
            return Err(SyncError::Credential(
                "Access token expired and no refresh token is stored; run `gpx-sync authorize`"
                    .to_string(),
            ));
        };

        match self.oauth.refresh(&refresh_token).await {
            Ok(response) => {
                let refreshed = response.into_record(
                    Utc::now(),
                    Some(refresh_token),
                    &record.scopes,
                    self.fallback_ttl,
                );
                self.store.save(&refreshed)?;
                tracing::info!(
                    token = %fingerprint(&refreshed.access_token),
                    expires_at = %refreshed.expires_at,
                    "Access token refreshed"
                );
                Ok(refreshed.access_token)
            }
            Err(SyncError::Credential(reason)) => {
                tracing::error!(reason = %reason, "Refresh rejected, marking credentials revoked");
                record.revoked_at = Some(Utc::now());
                self.store.save(&record)?;
                Err(SyncError::Credential(format!(
                    "{}; run `gpx-sync authorize` to re-authorize",
                    reason
                )))
            }
            Err(e) => Err(e),
        }
    }
}

fn revoked_error() -> SyncError {
    SyncError::Credential(
        "Stored credentials were revoked; run `gpx-sync authorize` to re-authorize".to_string(),
    )
}

/// Short, non-reversible tag for a token in log output.
pub fn fingerprint(token: &str) -> String {
    hex::encode(&Sha256::digest(token.as_bytes())[..4])
}
