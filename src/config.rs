// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! A `.env` file in the working directory is honoured for local use.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default scopes requested from the map-editing service.
pub const DEFAULT_SCOPES: &str = "read_gpx write_gpx";

/// Application configuration, loaded once at startup.
#[derive(Clone)]
pub struct Config {
    // --- OAuth client (destination service) ---
    /// OAuth client ID (public), required only by commands that talk to
    /// the authorization server
    pub osm_client_id: Option<String>,
    /// OAuth client secret
    pub osm_client_secret: Option<String>,
    /// Loopback redirect URI registered with the OAuth application
    pub redirect_uri: String,
    /// Base URL for authorize/token/revoke and the trace API
    pub osm_base_url: String,
    /// Space-separated scopes to request
    pub osm_scopes: Vec<String>,
    /// Visibility assigned to uploaded traces
    pub trace_visibility: String,

    // --- Source service ---
    pub garmin_base_url: String,
    /// Bearer token for the source API (only required by `sync`)
    pub garmin_token: Option<String>,

    // --- Local state ---
    pub tokens_file: PathBuf,
    pub db_file: PathBuf,
    pub legacy_ids_file: PathBuf,

    // --- Pass behaviour ---
    pub max_activities: u32,
    pub dry_run: bool,
    pub upload_delay: Duration,
    /// Cap on attempts for `failed` records; 0 means unlimited
    pub max_attempts: u32,
    /// Lifetime assumed when the token endpoint omits `expires_in`
    pub token_fallback_ttl: Duration,
    /// Upper bound on the wait for the authorization redirect
    pub auth_timeout: Duration,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("osm_client_id", &self.osm_client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("osm_base_url", &self.osm_base_url)
            .field("garmin_base_url", &self.garmin_base_url)
            .field("tokens_file", &self.tokens_file)
            .field("db_file", &self.db_file)
            .field("max_activities", &self.max_activities)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            osm_client_id: Some("test_client_id".to_string()),
            osm_client_secret: Some("test_secret".to_string()),
            redirect_uri: "http://127.0.0.1:8080/callback".to_string(),
            osm_base_url: "http://127.0.0.1:9".to_string(),
            osm_scopes: split_scopes(DEFAULT_SCOPES),
            trace_visibility: "identifiable".to_string(),
            garmin_base_url: "http://127.0.0.1:9".to_string(),
            garmin_token: None,
            tokens_file: PathBuf::from("tokens.json"),
            db_file: PathBuf::from("data.db"),
            legacy_ids_file: PathBuf::from("processed_ids.txt"),
            max_activities: 10,
            dry_run: false,
            upload_delay: Duration::ZERO,
            max_attempts: 0,
            token_fallback_ttl: Duration::from_secs(90 * 24 * 3600),
            auth_timeout: Duration::from_secs(300),
        }
    }
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            osm_client_id: non_empty_var("OSM_CLIENT_ID"),
            osm_client_secret: non_empty_var("OSM_CLIENT_SECRET"),
            redirect_uri: env::var("REDIRECT_URI")
                .unwrap_or_else(|_| "http://127.0.0.1:8080/callback".to_string()),
            osm_base_url: env::var("OSM_BASE_URL")
                .unwrap_or_else(|_| "https://www.openstreetmap.org".to_string())
                .trim_end_matches('/')
                .to_string(),
            osm_scopes: split_scopes(
                &env::var("OSM_SCOPES").unwrap_or_else(|_| DEFAULT_SCOPES.to_string()),
            ),
            trace_visibility: parse_visibility(
                &env::var("TRACE_VISIBILITY").unwrap_or_else(|_| "identifiable".to_string()),
            )?,
            garmin_base_url: env::var("GARMIN_BASE_URL")
                .unwrap_or_else(|_| "https://connectapi.garmin.com".to_string())
                .trim_end_matches('/')
                .to_string(),
            garmin_token: non_empty_var("GARMIN_TOKEN"),
            tokens_file: env::var("TOKENS_FILE")
                .unwrap_or_else(|_| "tokens.json".to_string())
                .into(),
            db_file: env::var("DB_FILE")
                .unwrap_or_else(|_| "data.db".to_string())
                .into(),
            legacy_ids_file: env::var("PROCESSED_ACTIVITIES_FILE")
                .unwrap_or_else(|_| "processed_ids.txt".to_string())
                .into(),
            max_activities: parse_number("MAX_ACTIVITIES", 10)?,
            dry_run: env::var("DRY_RUN")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            upload_delay: Duration::from_millis(parse_number("UPLOAD_DELAY_MS", 1000)?),
            max_attempts: parse_number("MAX_ATTEMPTS", 0)?,
            token_fallback_ttl: Duration::from_secs(parse_number(
                "TOKEN_FALLBACK_TTL_SECS",
                90 * 24 * 3600,
            )?),
            auth_timeout: Duration::from_secs(parse_number("AUTH_TIMEOUT_SECS", 300)?),
        })
    }

    /// OAuth client credentials, required only when talking to the
    /// authorization server.
    pub fn require_osm_client(&self) -> Result<(&str, &str), ConfigError> {
        let id = self
            .osm_client_id
            .as_deref()
            .ok_or(ConfigError::Missing("OSM_CLIENT_ID"))?;
        let secret = self
            .osm_client_secret
            .as_deref()
            .ok_or(ConfigError::Missing("OSM_CLIENT_SECRET"))?;
        Ok((id, secret))
    }

    /// Source API token, required only when a pass talks to the source.
    pub fn require_garmin_token(&self) -> Result<&str, ConfigError> {
        self.garmin_token
            .as_deref()
            .ok_or(ConfigError::Missing("GARMIN_TOKEN"))
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `1`, `true` and `yes` (any case) enable a flag.
fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

fn split_scopes(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

fn parse_visibility(value: &str) -> Result<String, ConfigError> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "private" | "public" | "trackable" | "identifiable" => Ok(value),
        _ => Err(ConfigError::Invalid {
            name: "TRACE_VISIBILITY",
            reason: format!("unknown visibility '{}'", value),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            reason: format!("'{}' is not a valid number", raw),
        }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env() {
        env::set_var("OSM_CLIENT_ID", "test_id");
        env::set_var("OSM_CLIENT_SECRET", " test_secret ");
        env::set_var("OSM_BASE_URL", "https://master.apis.dev.openstreetmap.org/");
        env::set_var("DRY_RUN", "Yes");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(
            config.require_osm_client().unwrap(),
            ("test_id", "test_secret")
        );
        assert_eq!(
            config.osm_base_url,
            "https://master.apis.dev.openstreetmap.org"
        );
        assert_eq!(config.osm_scopes, vec!["read_gpx", "write_gpx"]);
        assert!(config.dry_run);

        env::remove_var("DRY_RUN");
        env::remove_var("OSM_BASE_URL");
    }

    #[test]
    fn test_client_credentials_required_lazily() {
        let config = Config {
            osm_client_id: None,
            osm_client_secret: None,
            ..Config::default()
        };
        assert!(matches!(
            config.require_osm_client(),
            Err(ConfigError::Missing("OSM_CLIENT_ID"))
        ));
        assert!(config.require_garmin_token().is_err());

        let config = Config {
            osm_client_secret: None,
            ..Config::default()
        };
        assert!(matches!(
            config.require_osm_client(),
            Err(ConfigError::Missing("OSM_CLIENT_SECRET"))
        ));
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag("TRUE"));
        assert!(!parse_flag("no"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn test_parse_visibility() {
        assert_eq!(parse_visibility("Private").unwrap(), "private");
        assert!(matches!(
            parse_visibility("friends-only"),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = Config {
            garmin_token: Some("garmin-secret".to_string()),
            ..Config::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("test_secret"));
        assert!(!rendered.contains("garmin-secret"));
    }
}
