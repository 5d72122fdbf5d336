// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Receiving the OAuth redirect.
//!
//! The interactive flow opens the authorization URL in a browser and waits
//! for the provider to redirect back to `redirect_uri`. `LoopbackReceiver`
//! serves exactly one request on that address and then shuts down.

use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;

use crate::error::{Result, SyncError};
use crate::services::oauth::CallbackParams;

/// Delivers the redirect for an authorization URL.
#[async_trait]
pub trait RedirectReceiver: Send + Sync {
    async fn receive(&self, authorization_url: &str) -> Result<CallbackParams>;
}

/// One-shot slot the handler hands the redirect parameters through.
pub type CallbackSlot = Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>;

/// HTTP listener on the loopback redirect address.
pub struct LoopbackReceiver {
    redirect_uri: url::Url,
    timeout: Duration,
    open_browser: bool,
}

impl LoopbackReceiver {
    pub fn new(redirect_uri: &str, timeout: Duration) -> Result<Self> {
        let redirect_uri = url::Url::parse(redirect_uri).map_err(|e| {
            SyncError::Credential(format!("Invalid redirect URI {}: {}", redirect_uri, e))
        })?;
        if redirect_uri.scheme() != "http" {
            return Err(SyncError::Credential(format!(
                "Loopback redirect URI must use http, got {}",
                redirect_uri.scheme()
            )));
        }

        Ok(Self {
            redirect_uri,
            timeout,
            open_browser: true,
        })
    }

    /// Print the URL only, without launching a browser.
    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    fn bind_address(&self) -> Result<(String, u16)> {
        let host = self
            .redirect_uri
            .host_str()
            .ok_or_else(|| SyncError::Credential("Redirect URI has no host".to_string()))?;
        let port = self.redirect_uri.port_or_known_default().unwrap_or(80);
        Ok((host.trim_matches(|c| c == '[' || c == ']').to_string(), port))
    }
}

#[async_trait]
impl RedirectReceiver for LoopbackReceiver {
    async fn receive(&self, authorization_url: &str) -> Result<CallbackParams> {
        let (host, port) = self.bind_address()?;
        let listener = tokio::net::TcpListener::bind((host.as_str(), port))
            .await
            .map_err(|e| {
                SyncError::Credential(format!(
                    "Cannot listen for redirect on {}:{}: {}",
                    host, port, e
                ))
            })?;

        let (tx, rx) = oneshot::channel();
        let slot: CallbackSlot = Arc::new(Mutex::new(Some(tx)));
        let app = callback_router(self.redirect_uri.path(), slot);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        println!("Open this URL to authorize access:\n\n  {}\n", authorization_url);
        if self.open_browser {
            if let Err(e) = open::that(authorization_url) {
                tracing::warn!(error = %e, "Could not launch a browser, open the URL manually");
            }
        }
        tracing::info!(
            redirect_uri = %self.redirect_uri,
            timeout_secs = self.timeout.as_secs(),
            "Waiting for authorization redirect"
        );

        let outcome = tokio::time::timeout(self.timeout, rx).await;

        let _ = shutdown_tx.send(());
        if tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .is_err()
        {
            tracing::warn!("Redirect listener did not shut down cleanly");
        }

        match outcome {
            Ok(Ok(params)) => Ok(params),
            Ok(Err(_)) => Err(SyncError::Internal(anyhow::anyhow!(
                "Redirect listener stopped before receiving a response"
            ))),
            Err(_) => Err(SyncError::Credential(format!(
                "Timed out after {}s waiting for the authorization redirect",
                self.timeout.as_secs()
            ))),
        }
    }
}

/// Router serving the redirect path. Other paths get 404.
pub fn callback_router(path: &str, slot: CallbackSlot) -> Router {
    let path = if path.is_empty() { "/" } else { path };
    Router::new()
        .route(path, get(handle_redirect))
        .with_state(slot)
        .layer(TraceLayer::new_for_http())
}

async fn handle_redirect(
    State(slot): State<CallbackSlot>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let success = params.error.is_none() && params.code.is_some();

    let sender = slot.lock().ok().and_then(|mut guard| guard.take());
    match sender {
        Some(sender) => {
            let _ = sender.send(params);
        }
        None => {
            // Second hit (reload, duplicate tab). The first one already won.
            return (
                StatusCode::GONE,
                [(header::CONNECTION, "close")],
                Html(page("Already handled", "This authorization response was already received.")),
            )
                .into_response();
        }
    }

    let (status, body) = if success {
        (
            StatusCode::OK,
            page(
                "Authorization complete",
                "You can close this window and return to the terminal.",
            ),
        )
    } else {
        (
            StatusCode::BAD_REQUEST,
            page(
                "Authorization failed",
                "The provider did not return an authorization code. Check the terminal.",
            ),
        )
    };

    (status, [(header::CONNECTION, "close")], Html(body)).into_response()
}

fn page(title: &str, message: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>{title}</title></head>\
         <body><h1>{title}</h1><p>{message}</p></body></html>"
    )
}
