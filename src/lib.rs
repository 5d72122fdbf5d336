// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! gpx-sync: move fitness activity tracks to OpenStreetMap GPS traces
//!
//! Each source activity is uploaded at most once, across repeated,
//! interrupted or partially failed runs. The crate keeps the OAuth2
//! credential for the destination alive and records every activity it has
//! handled in a local SQLite database.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod retry;
pub mod services;
pub mod shutdown;
pub mod time_utils;

use std::sync::Arc;

use config::Config;
use db::{DedupStore, FileCredentialStore};
use error::Result;
use models::{CredentialRecord, CredentialState};
use services::{
    tokens, GarminClient, LoopbackReceiver, OAuthClient, OsmTraceClient, SyncEngine,
    SyncOptions, TokenManager,
};

/// Shared application state.
///
/// Opening it touches only local files. OAuth client settings are checked
/// when a command first needs the authorization server.
pub struct AppState {
    pub config: Config,
    pub store: Arc<DedupStore>,
    pub credentials: Arc<FileCredentialStore>,
}

impl AppState {
    /// Open the local stores.
    pub fn new(config: Config) -> Result<Self> {
        let store = Arc::new(DedupStore::open(&config.db_file)?);
        let credentials = Arc::new(FileCredentialStore::new(config.tokens_file.clone()));

        Ok(Self {
            config,
            store,
            credentials,
        })
    }

    /// Stored credential and its lifecycle state, without any network call.
    pub fn credential_status(&self) -> Result<(CredentialState, Option<CredentialRecord>)> {
        tokens::stored_state(self.credentials.as_ref())
    }

    /// Token manager wired to the loopback redirect receiver.
    pub fn token_manager(&self) -> Result<Arc<TokenManager>> {
        let receiver = Arc::new(LoopbackReceiver::new(
            &self.config.redirect_uri,
            self.config.auth_timeout,
        )?);
        Ok(Arc::new(TokenManager::new(
            OAuthClient::new(&self.config)?,
            self.credentials.clone(),
            receiver,
            &self.config,
        )))
    }

    /// Sync engine wired to the live source and destination.
    pub fn sync_engine(&self, options: SyncOptions) -> Result<SyncEngine> {
        let source = GarminClient::new(
            &self.config.garmin_base_url,
            self.config.require_garmin_token()?,
        )?;
        let destination = OsmTraceClient::new(&self.config.osm_base_url)?;

        Ok(SyncEngine::new(
            Arc::new(source),
            Arc::new(destination),
            self.token_manager()?,
            self.store.clone(),
            options,
        ))
    }
}
