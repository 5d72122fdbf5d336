// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod callback;
pub mod garmin;
pub mod legacy;
pub mod oauth;
pub mod osm;
pub mod sync;
pub mod tokens;

pub use callback::{LoopbackReceiver, RedirectReceiver};
pub use garmin::{ActivitySource, GarminClient};
pub use legacy::{LegacyIdSet, MigrationReport};
pub use oauth::{CallbackParams, OAuthClient};
pub use osm::{OsmTraceClient, TrackDestination, UploadReceipt};
pub use sync::{PassReport, SyncEngine, SyncOptions};
pub use tokens::TokenManager;
