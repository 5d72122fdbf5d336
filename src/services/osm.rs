// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Track destination: the OpenStreetMap GPS trace API.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::models::TrackUpload;

/// Uploads carry the whole track, so they get a longer bound than API calls.
const UPLOAD_HTTP_TIMEOUT_SECS: u64 = 60;

const GPX_CONTENT_TYPE: &str = "application/gpx+xml";

/// What the destination reported for a successful upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Destination trace id, when the response carried one.
    pub remote_id: Option<String>,
}

/// Where tracks go.
#[async_trait]
pub trait TrackDestination: Send + Sync {
    /// Upload one track with a bearer token.
    ///
    /// A rejected token is reported as `Unauthorized` so the caller can
    /// refresh and retry.
    async fn upload(&self, access_token: &str, track: &TrackUpload) -> Result<UploadReceipt>;
}

pub struct OsmTraceClient {
    http: reqwest::Client,
    upload_url: String,
}

impl OsmTraceClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(UPLOAD_HTTP_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            upload_url: format!("{}/api/0.6/gpx/create", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl TrackDestination for OsmTraceClient {
    async fn upload(&self, access_token: &str, track: &TrackUpload) -> Result<UploadReceipt> {
        let file = Part::bytes(track.data.clone())
            .file_name(track.filename.clone())
            .mime_str(GPX_CONTENT_TYPE)?;
        let form = Form::new()
            .part("file", file)
            .text("description", track.description.clone())
            .text("tags", track.tags.clone())
            .text("visibility", track.visibility.clone());

        let response = self
            .http
            .post(&self.upload_url)
            .bearer_auth(access_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("Upload request failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(SyncError::Unauthorized);
        }

        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            tracing::warn!(status = %status, file = %track.filename, "Upload rejected");
            return Err(SyncError::UploadRejected {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let remote_id = Some(body.trim().to_string()).filter(|id| !id.is_empty());
        tracing::info!(file = %track.filename, remote_id = ?remote_id, "Uploaded track");
        Ok(UploadReceipt { remote_id })
    }
}
