//! Webhook server
//!
//! A deliberately small axum app: `POST /webhook` receives Telegram
//! updates, `GET /healthz` answers liveness probes. Updates are processed
//! inside the request so a non-2xx status makes Telegram redeliver; the
//! engine maps every expected failure to a user-facing message and `200`,
//! leaving `500` for failures nobody planned for.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::engine::SessionEngine;
use crate::secrets::{self, SecretStore};
use crate::telegram::Update;

/// Header Telegram echoes back once a webhook secret is registered.
const SECRET_TOKEN_HEADER: &str = "X-Telegram-Bot-Api-Secret-Token";

/// Shared handler state.
#[derive(Clone)]
pub struct ServerState {
    pub engine: Arc<SessionEngine>,
    pub secrets: Arc<SecretStore>,
}

/// Build the router. Separate from [`start`] so tests can drive it
/// without binding a socket.
pub fn app(state: ServerState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/healthz", get(healthz_handler))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
        .layer(RequestBodyLimitLayer::new(config.body_limit_bytes))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn start(state: ServerState, config: &ServerConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;
    let app = app(state, config);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("could not bind {addr}"))?;
    info!(%addr, "webhook server listening");
    axum::serve(listener, app).await.context("server stopped unexpectedly")?;
    Ok(())
}

async fn webhook_handler(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> StatusCode {
    if let Some(expected) = state.secrets.get_optional(secrets::WEBHOOK_SECRET) {
        let presented = headers.get(SECRET_TOKEN_HEADER).and_then(|value| value.to_str().ok());
        if !secret_matches(presented, &expected) {
            warn!("webhook called with a missing or wrong secret token");
            return StatusCode::UNAUTHORIZED;
        }
    }

    match state.engine.handle_update(update).await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn healthz_handler() -> StatusCode {
    StatusCode::OK
}

fn secret_matches(presented: Option<&str>, expected: &str) -> bool {
    presented.is_some_and(|token| token == expected)
}
