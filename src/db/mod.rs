// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Local persistence: the SQLite dedup store and the credential file.

pub mod credentials;
pub mod error;
pub mod schema;
pub mod sqlite;

pub use credentials::{CredentialStore, FileCredentialStore};
pub use error::StoreError;
pub use sqlite::{DedupStore, SyncRunStats};

