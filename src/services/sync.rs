// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Sync engine: one batch pass from source to destination.
//!
//! A pass runs strictly in order:
//! 1. obtain a valid access token (a failure here aborts with no state change)
//! 2. fetch up to `max_activities` summaries from the source
//! 3. drop ids whose Dedup Record is `uploaded`
//! 4. for each candidate: download, upload, then commit the record
//!
//! Each record commit is independent, so a pass cancelled between
//! activities leaves the store consistent. An activity is only marked
//! `uploaded` after the destination acknowledged it.

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::{DedupStore, SyncRunStats};
use crate::error::{Result, SyncError};
use crate::models::{ActivitySummary, DedupStatus, TrackUpload};
use crate::services::garmin::ActivitySource;
use crate::services::osm::TrackDestination;
use crate::services::tokens::TokenManager;

/// Knobs that stay fixed across passes.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub dry_run: bool,
    /// Cap on processing attempts for `failed` records; 0 means unlimited.
    pub max_attempts: u32,
    pub upload_delay: Duration,
    pub visibility: String,
}

impl SyncOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dry_run: config.dry_run,
            max_attempts: config.max_attempts,
            upload_delay: config.upload_delay,
            visibility: config.trace_visibility.clone(),
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            max_attempts: 0,
            upload_delay: Duration::ZERO,
            visibility: "identifiable".to_string(),
        }
    }
}

/// Outcome of one pass, by activity id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Summaries returned by the source.
    pub fetched: usize,
    pub uploaded: Vec<String>,
    pub failed: Vec<String>,
    /// Already uploaded by an earlier pass.
    pub skipped: Vec<String>,
    /// `failed` records left alone because they hit the attempt cap.
    pub exhausted: Vec<String>,
    /// Candidates a dry run would have uploaded.
    pub dry_run: Vec<String>,
    /// Why the pass stopped before the end of the list, if it did.
    pub halted: Option<String>,
}

impl PassReport {
    pub fn is_complete(&self) -> bool {
        self.halted.is_none()
    }

    fn run_stats(&self) -> SyncRunStats {
        SyncRunStats {
            fetched: self.fetched as u32,
            uploaded: self.uploaded.len() as u32,
            skipped: self.skipped.len() as u32,
            failed: self.failed.len() as u32,
            interrupted: self.halted.is_some(),
        }
    }
}

impl std::fmt::Display for PassReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "fetched {}, uploaded {}, failed {}, skipped {}",
            self.fetched,
            self.uploaded.len(),
            self.failed.len(),
            self.skipped.len()
        )?;
        if !self.exhausted.is_empty() {
            write!(f, ", exhausted {}", self.exhausted.len())?;
        }
        if !self.dry_run.is_empty() {
            write!(f, ", would upload {}", self.dry_run.len())?;
        }
        if let Some(reason) = &self.halted {
            write!(f, " (halted: {})", reason)?;
        }
        Ok(())
    }
}

pub struct SyncEngine {
    source: Arc<dyn ActivitySource>,
    destination: Arc<dyn TrackDestination>,
    tokens: Arc<TokenManager>,
    store: Arc<DedupStore>,
    options: SyncOptions,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn ActivitySource>,
        destination: Arc<dyn TrackDestination>,
        tokens: Arc<TokenManager>,
        store: Arc<DedupStore>,
        options: SyncOptions,
    ) -> Self {
        Self {
            source,
            destination,
            tokens,
            store,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop between activities once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run one pass over the `max_activities` most recent activities.
    ///
    /// `history_mode` only marks the pass as a backfill in logs and in the
    /// run table; the caller picks a large `max_activities` for it.
    ///
    /// Fails only when no access token could be established, the activity
    /// list could not be fetched, or the dedup store itself failed.
    /// Per-activity problems end up in the report and the store.
    #[tracing::instrument(skip(self), fields(dry_run = self.options.dry_run))]
    pub async fn run_pass(&self, max_activities: u32, history_mode: bool) -> Result<PassReport> {
        if self.options.dry_run {
            return self.dry_run_pass(max_activities).await;
        }

        let mut access_token = self.tokens.ensure_valid_token().await?;

        let activities = self.source.list_recent_activities(max_activities).await?;
        let run_id = self.store.start_sync_run(history_mode)?;

        let mut report = PassReport {
            fetched: activities.len(),
            ..Default::default()
        };

        let candidates = self.select_candidates(activities, &mut report)?;
        tracing::info!(
            fetched = report.fetched,
            candidates = candidates.len(),
            skipped = report.skipped.len(),
            "Selected activities to upload"
        );

        let total = candidates.len();
        for (index, activity) in candidates.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::warn!("Pass cancelled, remaining activities left for the next pass");
                report.halted = Some("cancelled".to_string());
                break;
            }

            tracing::info!(
                activity_id = %activity.id,
                position = index + 1,
                total,
                "Processing activity"
            );
            if let ControlFlow::Break(reason) = self
                .process_activity(activity, &mut access_token, &mut report)
                .await?
            {
                report.halted = Some(reason);
                break;
            }

            if index + 1 < total {
                self.pause().await;
            }
        }

        self.store.complete_sync_run(run_id, &report.run_stats())?;
        tracing::info!(report = %report, "Sync pass finished");
        Ok(report)
    }

    /// Filter the fetched list down to activities that still need uploading.
    ///
    /// Keeps source order and drops repeated ids.
    fn select_candidates(
        &self,
        activities: Vec<ActivitySummary>,
        report: &mut PassReport,
    ) -> Result<Vec<ActivitySummary>> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for activity in activities {
            if !seen.insert(activity.id.clone()) {
                continue;
            }

            match self.store.get(&activity.id)? {
                Some(record) if record.status == DedupStatus::Uploaded => {
                    tracing::debug!(activity_id = %activity.id, "Already uploaded, skipping");
                    report.skipped.push(activity.id);
                }
                Some(record)
                    if record.status == DedupStatus::Failed
                        && self.options.max_attempts > 0
                        && record.attempts >= self.options.max_attempts =>
                {
                    tracing::warn!(
                        activity_id = %activity.id,
                        attempts = record.attempts,
                        "Attempt limit reached, not retrying"
                    );
                    report.exhausted.push(activity.id);
                }
                _ => candidates.push(activity),
            }
        }

        Ok(candidates)
    }

    async fn process_activity(
        &self,
        activity: &ActivitySummary,
        access_token: &mut String,
        report: &mut PassReport,
    ) -> Result<ControlFlow<String>> {
        let id = activity.id.as_str();
        self.store.observe(id)?;

        let data = match self.source.download_track(id).await {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(activity_id = %id, error = %e, "Download failed");
                self.record_failure(id, &e, report)?;
                return Ok(ControlFlow::Continue(()));
            }
        };

        let track = TrackUpload::for_activity(activity, &self.options.visibility, data);

        let first_attempt = self.destination.upload(access_token, &track).await;
        let result = match first_attempt {
            Err(SyncError::Unauthorized) => {
                tracing::warn!(activity_id = %id, "Upload rejected the access token");
                match self.tokens.force_refresh(access_token).await {
                    Ok(fresh) => {
                        *access_token = fresh;
                        self.destination.upload(access_token, &track).await
                    }
                    Err(e) => {
                        tracing::error!(activity_id = %id, error = %e, "Forced refresh failed");
                        self.record_failure(id, &e, report)?;
                        if e.is_credential_error() {
                            return Ok(ControlFlow::Break(e.to_string()));
                        }
                        return Ok(ControlFlow::Continue(()));
                    }
                }
            }
            other => other,
        };

        match result {
            Ok(receipt) => {
                self.store.mark_uploaded(id, receipt.remote_id.as_deref())?;
                tracing::info!(
                    activity_id = %id,
                    remote_id = ?receipt.remote_id,
                    "Activity uploaded"
                );
                report.uploaded.push(id.to_string());
            }
            Err(e) => {
                tracing::warn!(activity_id = %id, error = %e, "Upload failed");
                self.record_failure(id, &e, report)?;
            }
        }

        Ok(ControlFlow::Continue(()))
    }

    fn record_failure(&self, id: &str, error: &SyncError, report: &mut PassReport) -> Result<()> {
        self.store
            .mark(id, DedupStatus::Failed, Some(&error.to_string()))?;
        report.failed.push(id.to_string());
        Ok(())
    }

    /// Download candidates without a token, upload, or store writes.
    async fn dry_run_pass(&self, max_activities: u32) -> Result<PassReport> {
        let activities = self.source.list_recent_activities(max_activities).await?;
        let mut report = PassReport {
            fetched: activities.len(),
            ..Default::default()
        };

        let candidates = self.select_candidates(activities, &mut report)?;
        for activity in candidates {
            if self.cancel.is_cancelled() {
                report.halted = Some("cancelled".to_string());
                break;
            }

            match self.source.download_track(&activity.id).await {
                Ok(data) => {
                    let track = TrackUpload::for_activity(&activity, &self.options.visibility, data);
                    tracing::info!(
                        activity_id = %activity.id,
                        bytes = track.data.len(),
                        description = %track.description,
                        "[DRY RUN] Would upload"
                    );
                    report.dry_run.push(activity.id);
                }
                Err(e) => {
                    tracing::warn!(activity_id = %activity.id, error = %e, "[DRY RUN] Download failed");
                    report.failed.push(activity.id);
                }
            }
        }

        tracing::info!(report = %report, "Dry run finished");
        Ok(report)
    }

    async fn pause(&self) {
        if self.options.upload_delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(self.options.upload_delay) => {}
            _ = self.cancel.cancelled() => {}
        }
    }
}
