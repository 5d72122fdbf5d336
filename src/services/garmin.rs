// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Activity source: Garmin Connect.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::models::ActivitySummary;
use crate::retry::{classify, retry_with_backoff, RetryConfig};

const SOURCE_HTTP_TIMEOUT_SECS: u64 = 30;

/// Where activities come from.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// Most recent activities first, at most `limit`.
    async fn list_recent_activities(&self, limit: u32) -> Result<Vec<ActivitySummary>>;

    /// Raw GPX bytes for one activity.
    ///
    /// Any failure is reported as `DownloadFailed`.
    async fn download_track(&self, activity_id: &str) -> Result<Vec<u8>>;
}

/// Garmin Connect API client.
pub struct GarminClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
    retry: RetryConfig,
}

impl GarminClient {
    pub fn new(base_url: &str, access_token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(SOURCE_HTTP_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status.as_u16() == 429 {
            tracing::warn!("Garmin rate limit hit (429)");
            return Err(SyncError::Network("Garmin rate limit (HTTP 429)".to_string()));
        }
        if status.is_server_error() {
            return Err(SyncError::Network(format!("Garmin returned HTTP {}", status)));
        }

        let body = response.text().await.unwrap_or_default();
        Err(SyncError::Source(format!(
            "HTTP {}: {}",
            status,
            body.chars().take(200).collect::<String>()
        )))
    }
}

#[async_trait]
impl ActivitySource for GarminClient {
    async fn list_recent_activities(&self, limit: u32) -> Result<Vec<ActivitySummary>> {
        let url = format!(
            "{}/activitylist-service/activities/search/activities",
            self.base_url
        );

        let activities: Vec<GarminActivity> = retry_with_backoff(&self.retry, classify, || async {
            let response = self
                .get(&url, &[("start", "0".to_string()), ("limit", limit.to_string())])
                .await?;
            response
                .json()
                .await
                .map_err(|e| SyncError::Source(format!("JSON parse error: {}", e)))
        })
        .await
        .map_err(|e| match e {
            SyncError::Network(msg) => {
                SyncError::Source(format!("Listing activities failed: {}", msg))
            }
            other => other,
        })?;

        tracing::info!(count = activities.len(), limit, "Fetched activity list");
        Ok(activities.into_iter().map(ActivitySummary::from).collect())
    }

    async fn download_track(&self, activity_id: &str) -> Result<Vec<u8>> {
        let url = format!(
            "{}/download-service/export/gpx/activity/{}",
            self.base_url,
            urlencoding::encode(activity_id)
        );

        let bytes = retry_with_backoff(&self.retry, classify, || async {
            let response = self.get(&url, &[]).await?;
            response
                .bytes()
                .await
                .map_err(|e| SyncError::Network(format!("Reading track body failed: {}", e)))
        })
        .await
        .map_err(|e| match e {
            SyncError::DownloadFailed(msg) => SyncError::DownloadFailed(msg),
            SyncError::Network(msg) | SyncError::Source(msg) => SyncError::DownloadFailed(msg),
            other => SyncError::DownloadFailed(other.to_string()),
        })?;

        if bytes.is_empty() {
            return Err(SyncError::DownloadFailed("empty GPX export".to_string()));
        }

        tracing::debug!(activity_id, bytes = bytes.len(), "Downloaded track");
        Ok(bytes.to_vec())
    }
}

/// Activity as returned by the activity list endpoint (fields we use).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GarminActivity {
    pub activity_id: GarminActivityId,
    #[serde(default)]
    pub activity_name: Option<String>,
    #[serde(default)]
    pub activity_type: Option<GarminActivityType>,
    #[serde(default)]
    pub start_time_local: Option<String>,
    #[serde(default, rename = "startTimeGMT")]
    pub start_time_gmt: Option<String>,
}

/// Numeric in practice; accept strings too.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum GarminActivityId {
    Number(u64),
    Text(String),
}

impl std::fmt::Display for GarminActivityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GarminActivityType {
    #[serde(default)]
    pub type_key: Option<String>,
}

impl From<GarminActivity> for ActivitySummary {
    fn from(a: GarminActivity) -> Self {
        Self {
            id: a.activity_id.to_string(),
            name: a.activity_name,
            activity_type: a.activity_type.and_then(|t| t.type_key),
            start_time: a.start_time_local.or(a.start_time_gmt),
        }
    }
}
