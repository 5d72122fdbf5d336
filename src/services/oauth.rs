// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! OAuth2 client for the map-editing service.
//!
//! Handles:
//! - Authorization URL construction with `state` and PKCE (S256)
//! - Redirect validation (state must match exactly)
//! - Code exchange and refresh against the token endpoint
//! - Token revocation

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use ring::rand::{SecureRandom, SystemRandom};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use subtle::ConstantTimeEq;

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::models::CredentialRecord;

/// Timeout for token endpoint calls.
const TOKEN_HTTP_TIMEOUT_SECS: u64 = 30;

/// Longest error body kept in error messages.
const MAX_ERROR_BODY: usize = 500;

/// Authorization server endpoints.
#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub revoke_url: String,
}

impl OAuthEndpoints {
    /// Standard endpoint layout under a service base URL.
    pub fn for_base(base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            authorize_url: format!("{}/oauth2/authorize", base),
            token_url: format!("{}/oauth2/token", base),
            revoke_url: format!("{}/oauth2/revoke", base),
        }
    }
}

/// Query parameters delivered to the redirect URI.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// An authorization request waiting for its redirect.
///
/// Holds the secrets generated for this flow only; they are never persisted.
pub struct PendingAuthorization {
    pub authorization_url: String,
    state: String,
    code_verifier: String,
}

impl PendingAuthorization {
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Validate a redirect and extract its authorization code.
    ///
    /// The returned `state` must equal the generated one byte for byte;
    /// anything else is discarded as a potential forgery.
    pub fn verify_callback<'a>(&self, params: &'a CallbackParams) -> Result<&'a str> {
        if let Some(error) = &params.error {
            return Err(SyncError::Credential(format!(
                "Authorization denied: {}{}",
                error,
                params
                    .error_description
                    .as_deref()
                    .map(|d| format!(" ({})", d))
                    .unwrap_or_default()
            )));
        }

        let returned = params.state.as_deref().unwrap_or_default();
        let matches: bool = returned.as_bytes().ct_eq(self.state.as_bytes()).into();
        if !matches {
            tracing::error!("OAuth state mismatch on redirect, discarding response");
            return Err(SyncError::Credential(
                "Redirect state does not match the authorization request".to_string(),
            ));
        }

        params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| SyncError::Credential("Redirect carried no authorization code".to_string()))
    }
}

/// Token endpoint response.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("token_type", &self.token_type)
            .finish_non_exhaustive()
    }
}

impl TokenResponse {
    /// Build the record to persist.
    ///
    /// A missing `refresh_token` falls back to `previous_refresh`; a missing
    /// `expires_in` falls back to `fallback_ttl`; a missing `scope` falls
    /// back to `previous_scopes`.
    pub fn into_record(
        self,
        now: DateTime<Utc>,
        previous_refresh: Option<String>,
        previous_scopes: &BTreeSet<String>,
        fallback_ttl: Duration,
    ) -> CredentialRecord {
        let lifetime = self
            .expires_in
            .filter(|secs| *secs > 0)
            .map(Duration::seconds)
            .unwrap_or(fallback_ttl);

        let scopes = self
            .scope
            .as_deref()
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_else(|| previous_scopes.clone());

        CredentialRecord {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: now + lifetime,
            scopes,
            obtained_at: now,
            revoked_at: None,
        }
    }
}

/// Client-side OAuth2 authorization-code + refresh flow.
#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    endpoints: OAuthEndpoints,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scopes: Vec<String>,
}

impl OAuthClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(TOKEN_HTTP_TIMEOUT_SECS))
            .build()?;

        let (client_id, client_secret) = config.require_osm_client()?;

        Ok(Self {
            http,
            endpoints: OAuthEndpoints::for_base(&config.osm_base_url),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_uri: config.redirect_uri.clone(),
            scopes: config.osm_scopes.clone(),
        })
    }

    pub fn requested_scopes(&self) -> BTreeSet<String> {
        self.scopes.iter().cloned().collect()
    }

    /// Generate state + PKCE pair and the authorization URL for them.
    pub fn start_authorization(&self) -> Result<PendingAuthorization> {
        let rng = SystemRandom::new();
        let state = random_token(&rng)?;
        let code_verifier = random_token(&rng)?;
        let code_challenge = pkce_challenge(&code_verifier);

        let authorization_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&code_challenge={}&code_challenge_method=S256",
            self.endpoints.authorize_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.redirect_uri),
            urlencoding::encode(&self.scopes.join(" ")),
            state,
            code_challenge,
        );

        Ok(PendingAuthorization {
            authorization_url,
            state,
            code_verifier,
        })
    }

    /// Validate the redirect, then exchange its code for tokens.
    ///
    /// No request is made unless the redirect passes validation.
    pub async fn exchange_code(
        &self,
        pending: &PendingAuthorization,
        params: &CallbackParams,
    ) -> Result<TokenResponse> {
        let code = pending.verify_callback(params)?;

        tracing::info!("Exchanging authorization code for tokens");
        self.token_request(
            "authorization_code",
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code_verifier", pending.code_verifier.as_str()),
            ],
        )
        .await
    }

    /// Refresh an expired access token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        self.token_request(
            "refresh_token",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ],
        )
        .await
    }

    /// Revoke a token at the authorization server.
    pub async fn revoke(&self, token: &str) -> Result<()> {
        let response = self
            .http
            .post(&self.endpoints.revoke_url)
            .form(&[
                ("token", token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("Token revocation request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Credential(format!(
                "Token revocation failed with HTTP {}: {}",
                status,
                truncate(&body)
            )));
        }

        tracing::info!("Token revoked at authorization server");
        Ok(())
    }

    async fn token_request(&self, grant: &str, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(&self.endpoints.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("Token request ({}) failed: {}", grant, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, grant, "Token endpoint returned an error");

            // 5xx and rate limiting are transient; anything else is a rejection.
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(SyncError::Network(format!(
                    "Token endpoint unavailable (HTTP {})",
                    status
                )));
            }
            return Err(SyncError::Credential(format!(
                "Token endpoint rejected {} grant (HTTP {}): {}",
                grant,
                status,
                truncate(&body)
            )));
        }

        response.json().await.map_err(|e| {
            SyncError::Credential(format!("Failed to parse token response: {}", e))
        })
    }
}

/// 32 bytes from the system CSPRNG, base64url without padding.
fn random_token(rng: &SystemRandom) -> Result<String> {
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes)
        .map_err(|_| SyncError::Internal(anyhow::anyhow!("System random generator failed")))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// S256 code challenge for a PKCE verifier.
pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OAuthClient {
        OAuthClient::new(&Config::default()).unwrap()
    }

    fn callback(code: Option<&str>, state: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(str::to_string),
            state: state.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_pkce_challenge_rfc7636_vector() {
        // Appendix B of RFC 7636.
        assert_eq!(
            pkce_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_authorization_url_contains_flow_parameters() {
        let pending = client().start_authorization().unwrap();
        let url = url::Url::parse(&pending.authorization_url).unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(url.path(), "/oauth2/authorize");
        assert_eq!(params["client_id"], "test_client_id");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:8080/callback");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["scope"], "read_gpx write_gpx");
        assert_eq!(params["state"], pending.state());
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(
            params["code_challenge"],
            pkce_challenge(&pending.code_verifier)
        );
    }

    #[test]
    fn test_each_flow_gets_fresh_state() {
        let c = client();
        let a = c.start_authorization().unwrap();
        let b = c.start_authorization().unwrap();
        assert_ne!(a.state(), b.state());
        assert_ne!(a.code_verifier, b.code_verifier);
        assert_eq!(a.state().len(), 43);
    }

    #[test]
    fn test_verify_callback_accepts_matching_state() {
        let pending = client().start_authorization().unwrap();
        let state = pending.state().to_string();
        let params = callback(Some("abc"), Some(&state));
        assert_eq!(pending.verify_callback(&params).unwrap(), "abc");
    }

    #[test]
    fn test_verify_callback_rejects_mismatched_state() {
        let pending = client().start_authorization().unwrap();
        let params = callback(Some("abc"), Some("forged"));
        assert!(matches!(
            pending.verify_callback(&params),
            Err(SyncError::Credential(_))
        ));
    }

    #[test]
    fn test_verify_callback_rejects_missing_state() {
        let pending = client().start_authorization().unwrap();
        let params = callback(Some("abc"), None);
        assert!(pending.verify_callback(&params).is_err());
    }

    #[test]
    fn test_verify_callback_reports_provider_error() {
        let pending = client().start_authorization().unwrap();
        let params = CallbackParams {
            error: Some("access_denied".to_string()),
            state: Some(pending.state().to_string()),
            ..Default::default()
        };
        let err = pending.verify_callback(&params).unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    #[test]
    fn test_into_record_fallbacks() {
        let now = Utc::now();
        let previous: BTreeSet<String> = ["write_gpx".to_string()].into_iter().collect();
        let response = TokenResponse {
            access_token: "new".to_string(),
            refresh_token: None,
            expires_in: None,
            scope: None,
            token_type: Some("Bearer".to_string()),
        };

        let record = response.into_record(
            now,
            Some("old-refresh".to_string()),
            &previous,
            Duration::days(90),
        );

        assert_eq!(record.refresh_token.as_deref(), Some("old-refresh"));
        assert_eq!(record.expires_at, now + Duration::days(90));
        assert_eq!(record.scopes, previous);
    }

    #[test]
    fn test_into_record_prefers_returned_values() {
        let now = Utc::now();
        let response = TokenResponse {
            access_token: "new".to_string(),
            refresh_token: Some("rotated".to_string()),
            expires_in: Some(3600),
            scope: Some("read_gpx write_gpx".to_string()),
            token_type: None,
        };

        let record = response.into_record(
            now,
            Some("old".to_string()),
            &BTreeSet::new(),
            Duration::days(90),
        );

        assert_eq!(record.refresh_token.as_deref(), Some("rotated"));
        assert_eq!(record.expires_at, now + Duration::seconds(3600));
        assert!(record.has_scope("write_gpx"));
        assert!(record.has_scope("read_gpx"));
    }

    #[test]
    fn test_truncate_long_body() {
        let body = "x".repeat(2000);
        assert_eq!(truncate(&body).len(), MAX_ERROR_BODY);
        assert_eq!(truncate("short"), "short");
    }
}
