// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth credential record persisted by the credential store.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifecycle state of the stored credential.
///
/// `absent -> pending_authorization -> valid -> expired -> valid | revoked`.
/// `PendingAuthorization` only exists while an interactive flow is waiting
/// for its redirect; it is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Absent,
    PendingAuthorization,
    Valid,
    Expired,
    Revoked,
}

impl std::fmt::Display for CredentialState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::PendingAuthorization => write!(f, "pending_authorization"),
            Self::Valid => write!(f, "valid"),
            Self::Expired => write!(f, "expired"),
            Self::Revoked => write!(f, "revoked"),
        }
    }
}

/// Current access/refresh token pair.
///
/// `expires_at` is mandatory, so an access token can never be stored
/// without an expiry.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub access_token: String,
    /// Absent when the provider never issued one.
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    /// Granted scopes
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    pub obtained_at: DateTime<Utc>,
    /// Set when the token endpoint rejected the refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("obtained_at", &self.obtained_at)
            .field("revoked_at", &self.revoked_at)
            .finish()
    }
}

impl CredentialRecord {
    /// True when the token expires within `margin` of `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin >= self.expires_at
    }

    pub fn state_at(&self, now: DateTime<Utc>, margin: Duration) -> CredentialState {
        if self.revoked_at.is_some() {
            CredentialState::Revoked
        } else if self.is_expired_at(now, margin) {
            CredentialState::Expired
        } else {
            CredentialState::Valid
        }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }
}

/// Token file layout written by earlier releases of the tool.
///
/// Timestamps are naive UTC, the granted scopes are one space-separated
/// `scope` string, and `expires_at` may be null.
#[derive(Deserialize)]
pub struct LegacyTokenFile {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<NaiveDateTime>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    obtained_at: Option<NaiveDateTime>,
}

impl LegacyTokenFile {
    /// Convert to the current record. `None` if no access token was saved.
    ///
    /// An unknown expiry is recorded as already passed, so the next use
    /// refreshes the token.
    pub fn into_record(self, now: DateTime<Utc>) -> Option<CredentialRecord> {
        let access_token = self.access_token.filter(|t| !t.is_empty())?;
        let obtained_at = self.obtained_at.map(|t| t.and_utc()).unwrap_or(now);
        let expires_at = self
            .expires_at
            .map(|t| t.and_utc())
            .unwrap_or_else(|| obtained_at.min(now));

        Some(CredentialRecord {
            access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expires_at,
            scopes: self
                .scope
                .as_deref()
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            obtained_at,
            revoked_at: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(expires_in_secs: i64) -> CredentialRecord {
        let now = Utc::now();
        CredentialRecord {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: now + Duration::seconds(expires_in_secs),
            scopes: ["write_gpx".to_string()].into_iter().collect(),
            obtained_at: now,
            revoked_at: None,
        }
    }

    #[test]
    fn test_state_respects_margin() {
        let margin = Duration::seconds(60);
        assert_eq!(record(3600).state_at(Utc::now(), margin), CredentialState::Valid);
        // Expires in 30s, inside the 60s safety margin.
        assert_eq!(record(30).state_at(Utc::now(), margin), CredentialState::Expired);
        assert_eq!(record(-10).state_at(Utc::now(), margin), CredentialState::Expired);
    }

    #[test]
    fn test_revoked_wins_over_expiry() {
        let mut rec = record(3600);
        rec.revoked_at = Some(Utc::now());
        assert_eq!(
            rec.state_at(Utc::now(), Duration::seconds(60)),
            CredentialState::Revoked
        );
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let rendered = format!("{:?}", record(3600));
        assert!(!rendered.contains("\"access\""));
        assert!(!rendered.contains("\"refresh\""));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_json_without_optional_fields() {
        let json = r#"{
            "access_token": "abc",
            "expires_at": "2030-01-01T00:00:00Z",
            "obtained_at": "2029-12-31T00:00:00Z"
        }"#;
        let rec: CredentialRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.refresh_token, None);
        assert!(rec.scopes.is_empty());
        assert!(rec.revoked_at.is_none());
    }

    #[test]
    fn test_legacy_layout_converts() {
        let json = r#"{
  "access_token": "abc",
  "refresh_token": "def",
  "expires_at": "2030-01-01T12:00:00.123456",
  "scope": "read_gpx write_gpx",
  "obtained_at": "2029-12-31T12:00:00.123456"
}"#;
        let legacy: LegacyTokenFile = serde_json::from_str(json).unwrap();
        let rec = legacy.into_record(Utc::now()).unwrap();

        assert_eq!(rec.access_token, "abc");
        assert_eq!(rec.refresh_token.as_deref(), Some("def"));
        assert_eq!(rec.expires_at.to_rfc3339(), "2030-01-01T12:00:00.123456+00:00");
        assert!(rec.has_scope("read_gpx"));
        assert!(rec.has_scope("write_gpx"));
        assert!(rec.revoked_at.is_none());
    }

    #[test]
    fn test_legacy_null_expiry_is_expired() {
        let json = r#"{
  "access_token": "abc",
  "refresh_token": null,
  "expires_at": null,
  "scope": null,
  "obtained_at": "2029-12-31T12:00:00"
}"#;
        let legacy: LegacyTokenFile = serde_json::from_str(json).unwrap();
        let rec = legacy.into_record(Utc::now()).unwrap();

        assert_eq!(rec.refresh_token, None);
        assert!(rec.scopes.is_empty());
        assert_eq!(
            rec.state_at(Utc::now(), Duration::seconds(60)),
            CredentialState::Expired
        );
    }

    #[test]
    fn test_legacy_without_access_token_is_none() {
        let legacy: LegacyTokenFile =
            serde_json::from_str(r#"{"access_token": null, "expires_at": null}"#).unwrap();
        assert!(legacy.into_record(Utc::now()).is_none());
    }
}
