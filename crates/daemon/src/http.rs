// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP surface: dashboard read API and inbound webhooks, plus the
//! `/attach` WebSocket route.
//!
//! Every `/api/*` route requires `Authorization: Bearer <token>`. The
//! webhook applies its own per-source rate limit on top.

use crate::activity::ActivityEntry;
use crate::attach::AttachState;
use crate::router::WebhookOutcome;
use crate::scheduler::JobStatus;
use async_trait::async_trait;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use sb_core::usage::UsageTotals;
use sb_core::{LogEntry, RateLimiter, SystemClock};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Hard-close window after graceful shutdown begins.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Read-only snapshot capability backing the dashboard routes.
pub trait DashboardProvider: Send + Sync {
    fn uptime_ms(&self) -> u64;
    fn start_epoch_ms(&self) -> u64;
    fn current_model(&self) -> Option<String>;
    fn context_tokens(&self) -> Option<u64>;
    fn listener_count(&self) -> usize;
    fn cron_jobs(&self) -> Vec<JobStatus>;
    fn usage_today(&self) -> UsageTotals;
    fn usage_week(&self) -> UsageTotals;
    fn activity(&self) -> Vec<ActivityEntry>;
    fn logs(&self) -> Vec<LogEntry>;
    fn session_names(&self) -> Vec<String>;
}

/// Webhook dispatch capability (the daemon's router implements it).
#[async_trait]
pub trait WebhookHandler: Send + Sync {
    async fn handle(
        &self,
        message: &str,
        source: &str,
        session: Option<&str>,
        notify: Option<&str>,
    ) -> Result<WebhookOutcome, String>;
}

#[derive(Clone)]
pub struct AppState {
    token: Option<String>,
    dashboard: Arc<dyn DashboardProvider>,
    webhook: Option<Arc<dyn WebhookHandler>>,
    limiter: Arc<RateLimiter<SystemClock>>,
    attach: AttachState,
}

impl AppState {
    pub fn new(
        token: Option<String>,
        dashboard: Arc<dyn DashboardProvider>,
        webhook: Option<Arc<dyn WebhookHandler>>,
        attach: AttachState,
    ) -> Self {
        Self {
            token,
            dashboard,
            webhook,
            limiter: Arc::new(RateLimiter::new(SystemClock)),
            attach,
        }
    }
}

/// Build the full HTTP router (API + attach WebSocket).
pub fn build_router(state: AppState) -> axum::Router {
    axum::Router::new()
        .route("/api/ping", get(ping))
        .route("/api/status", get(status))
        .route("/api/cron", get(cron))
        .route("/api/usage", get(usage))
        .route("/api/activity", get(activity))
        .route("/api/logs", get(logs))
        .route("/api/webhook", post(webhook))
        .route("/attach", get(attach_ws))
        .with_state(state)
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({"error": message})))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.token.as_deref() else {
        return Err(api_error(StatusCode::UNAUTHORIZED, "Unauthorized"));
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if provided == Some(expected) {
        Ok(())
    } else {
        Err(api_error(StatusCode::UNAUTHORIZED, "Unauthorized"))
    }
}

async fn ping(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    Ok(Json(json!({"pong": true})))
}

async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    let d = &state.dashboard;
    Ok(Json(json!({
        "uptime_ms": d.uptime_ms(),
        "start_epoch_ms": d.start_epoch_ms(),
        "model": d.current_model(),
        "context_tokens": d.context_tokens(),
        "listeners": d.listener_count(),
        "sessions": d.session_names(),
        "attached_clients": state.attach.client_count(),
    })))
}

async fn cron(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    Ok(Json(json!({"jobs": state.dashboard.cron_jobs()})))
}

async fn usage(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    Ok(Json(json!({
        "today": state.dashboard.usage_today(),
        "week": state.dashboard.usage_week(),
    })))
}

async fn activity(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    Ok(Json(json!({"activity": state.dashboard.activity()})))
}

async fn logs(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;
    Ok(Json(json!({"logs": state.dashboard.logs()})))
}

async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    if let Err(e) = authorize(&state, &headers) {
        return e.into_response();
    }

    let Ok(payload) = serde_json::from_slice::<Value>(&body) else {
        return api_error(StatusCode::BAD_REQUEST, "body must be JSON").into_response();
    };

    let message = match payload.get("message").and_then(|v| v.as_str()) {
        Some(message) if !message.trim().is_empty() => message,
        _ => {
            return api_error(StatusCode::BAD_REQUEST, "message must be a non-empty string")
                .into_response()
        }
    };
    let session = payload.get("session").and_then(|v| v.as_str());
    if let Some(session) = session {
        if !state.dashboard.session_names().iter().any(|s| s == session) {
            return api_error(StatusCode::BAD_REQUEST, "unknown session").into_response();
        }
    }
    let source = payload
        .get("source")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("webhook");
    let notify = payload.get("notify").and_then(|v| v.as_str());

    if !state.limiter.check(source) {
        return api_error(StatusCode::TOO_MANY_REQUESTS, "rate limited").into_response();
    }

    let Some(handler) = state.webhook.clone() else {
        return api_error(StatusCode::SERVICE_UNAVAILABLE, "no webhook handler").into_response();
    };

    match handler.handle(message, source, session, notify).await {
        Ok(WebhookOutcome::Reply(response)) => {
            (StatusCode::OK, Json(json!({"ok": true, "response": response}))).into_response()
        }
        Ok(WebhookOutcome::Queued) => {
            (StatusCode::ACCEPTED, Json(json!({"ok": true, "queued": true}))).into_response()
        }
        Err(error) => api_error(StatusCode::INTERNAL_SERVER_ERROR, &error).into_response(),
    }
}

async fn attach_ws(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    let attach = state.attach.clone();
    upgrade.on_upgrade(move |socket| async move { attach.run_socket(socket).await })
}

/// Bind the server socket. Split from [`serve`] so tests can bind port
/// 0 and learn the address.
pub async fn bind(port: u16) -> std::io::Result<(tokio::net::TcpListener, SocketAddr)> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    let addr = listener.local_addr()?;
    Ok((listener, addr))
}

/// Run the server until `shutdown` fires; graceful drain with a 5 s
/// hard-close fallback.
pub async fn serve(
    listener: tokio::net::TcpListener,
    router: axum::Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let graceful = {
        let shutdown = shutdown.clone();
        async move { shutdown.cancelled().await }
    };
    let server = axum::serve(listener, router).with_graceful_shutdown(graceful);
    tokio::select! {
        result = server => result,
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => {
            tracing::warn!("http server hard-closed after shutdown grace");
            Ok(())
        }
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
