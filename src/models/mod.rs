// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod activity;
pub mod credential;
pub mod dedup;

pub use activity::{ActivitySummary, TrackUpload};
pub use credential::{CredentialRecord, CredentialState, LegacyTokenFile};
pub use dedup::{DedupRecord, DedupStatus, DedupSummary};
