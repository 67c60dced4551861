//! JSON-RPC/WebSocket/ingest server (spec.md §4.4).

mod error;
mod rpc;
mod ws;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::error_handling::HandleErrorLayer;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{BoxError, Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::model::LogEntry;
use crate::store::{Store, StreamNotice};

pub use error::ApiError;
pub use ws::Streamer;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub streamer: Arc<Streamer>,
    pub auth_token: Option<String>,
    pub db_path: std::path::PathBuf,
    pub started_at: Instant,
}

/// Drains the writer's stream channel and fans each entry out to the
/// Streamer's subscription table. Runs for the lifetime of the server.
async fn run_dispatch_loop(
    mut stream_rx: tokio::sync::mpsc::UnboundedReceiver<StreamNotice>,
    streamer: Arc<Streamer>,
) {
    while let Some((entry, alerts)) = stream_rx.recv().await {
        streamer.dispatch(&entry, &alerts);
    }
}

pub async fn start_server(
    config: Config,
    store: Arc<Store>,
    stream_rx: tokio::sync::mpsc::UnboundedReceiver<StreamNotice>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    let bind_addr = config.server.bind_addr();
    let streamer = Arc::new(Streamer::new());

    tokio::spawn(run_dispatch_loop(stream_rx, streamer.clone()));

    let state = AppState {
        store,
        streamer,
        auth_token: config.server.auth_token.clone(),
        db_path: config.storage.db_path.clone(),
        started_at: Instant::now(),
    };

    let request_timeout = Duration::from_secs_f64(config.server.request_timeout_secs.max(1.0));

    // The timeout only wraps the JSON-RPC/ingest endpoints: `/ws` hands off
    // to a long-lived socket immediately after the upgrade response, and
    // `/health` is meant to answer even under load.
    let timed_routes = Router::new()
        .route("/rpc", post(handle_rpc))
        .route("/api/client-logs", post(handle_client_logs))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout_error))
                .layer(TimeoutLayer::new(request_timeout)),
        );

    let mut app = Router::new()
        .merge(timed_routes)
        .route("/health", get(handle_health))
        .route("/ws", get(ws::handle_ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if config.server.cors_enabled {
        app = app.layer(CorsLayer::permissive());
    }

    tracing::info!("server: binding on {bind_addr}");
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;

    tracing::info!("server: listening on {bind_addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.await.ok();
        })
        .await
        .context("server error")?;

    tracing::info!("server: shut down gracefully");
    Ok(())
}

/// Converts a timed-out (or otherwise unhandled) middleware error into a
/// response, as required wherever `TimeoutLayer` sits above fallible
/// axum handlers.
async fn handle_timeout_error(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower_http::timeout::error::Elapsed>() {
        (
            StatusCode::REQUEST_TIMEOUT,
            "request exceeded server.request_timeout_secs".to_string(),
        )
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("unhandled error: {err}"))
    }
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = &state.auth_token else {
        return true;
    };
    let Some(header) = headers.get("authorization").and_then(|v| v.to_str().ok()) else {
        return false;
    };
    header.strip_prefix("Bearer ").unwrap_or(header) == expected
}

async fn handle_rpc(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if !authorized(&state, &headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": { "code": error::INVALID_REQUEST, "message": "unauthorized" } })),
        )
            .into_response();
    }

    let body: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return Json(json!({
                "jsonrpc": "2.0",
                "id": Value::Null,
                "error": { "code": error::PARSE_ERROR, "message": format!("parse error: {e}") },
            }))
            .into_response();
        }
    };

    match body {
        Value::Array(requests) => {
            let mut responses = Vec::with_capacity(requests.len());
            for request in requests {
                responses.push(rpc::handle_request(&state, request).await);
            }
            Json(Value::Array(responses)).into_response()
        }
        single => Json(rpc::handle_request(&state, single).await).into_response(),
    }
}

async fn handle_client_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    if !authorized(&state, &headers) {
        return Err(ApiError::BadRequest("unauthorized".to_string()));
    }

    let logger = body
        .get("logger")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let records = body
        .get("logs")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut entries = Vec::with_capacity(records.len());
    for record in records {
        let mut entry: LogEntry = serde_json::from_value(record)
            .map_err(|e| ApiError::BadRequest(format!("invalid client log entry: {e}")))?;
        entry.source = format!("client-{logger}");
        entry.tags.push("client".to_string());
        entry.tags.push("browser".to_string());
        entries.push(entry);
    }

    let count = entries.len();
    let alerts = state
        .store
        .put_batch(entries)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let alert_count: usize = alerts.iter().map(Vec::len).sum();

    Ok(Json(json!({ "status": "received", "count": count, "alerts": alert_count })))
}

async fn handle_health() -> Json<Value> {
    Json(json!({ "status": "ok", "timestamp": Utc::now().to_rfc3339() }))
}
