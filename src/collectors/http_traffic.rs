//! HTTP traffic collector: reverse-proxies each configured port on
//! `port + proxy_port_offset` and records one LogEntry per request
//! (spec.md §4.3).

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::HttpCollectorConfig;
use crate::model::LogEntry;

use super::{now_rfc3339, spawn_periodic_flush, CollectorBuffer, LogClient};

#[derive(Clone)]
struct ProxyState {
    target_port: u16,
    ignore_paths: Arc<Vec<String>>,
    capture_headers: bool,
    capture_body: bool,
    max_body_size: usize,
    buffer: Arc<Mutex<CollectorBuffer>>,
    http: reqwest::Client,
}

pub fn spawn(
    config: HttpCollectorConfig,
    client: Arc<LogClient>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if config.ports.is_empty() {
            tracing::debug!("http_traffic collector: no ports configured, nothing to do");
            return;
        }

        let buffer = Arc::new(Mutex::new(CollectorBuffer::new(client, 100)));
        let flush_task =
            spawn_periodic_flush(buffer.clone(), Duration::from_secs(1), shutdown_rx.clone());

        // Build once and clone per port: shared connection pool to the
        // proxied backends rather than one pool per listener.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_default();

        let ignore_paths = Arc::new(config.ignore_paths.clone());
        let mut servers = Vec::new();
        for port in &config.ports {
            let proxy_port = port + config.proxy_port_offset;
            let state = ProxyState {
                target_port: *port,
                ignore_paths: ignore_paths.clone(),
                capture_headers: config.capture_headers,
                capture_body: config.capture_body,
                max_body_size: config.max_body_size,
                buffer: buffer.clone(),
                http: http.clone(),
            };

            let app = Router::new().fallback(proxy_handler).with_state(state);
            let addr = format!("127.0.0.1:{proxy_port}");
            match TcpListener::bind(&addr).await {
                Ok(listener) => {
                    tracing::info!("http_traffic collector: proxying 127.0.0.1:{port} via {addr}");
                    servers.push(tokio::spawn(async move {
                        let _ = axum::serve(
                            listener,
                            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
                        )
                        .await;
                    }));
                }
                Err(e) => {
                    tracing::warn!("http_traffic collector: failed to bind {addr}: {e}");
                }
            }
        }

        let _ = shutdown_rx.changed().await;
        for server in servers {
            server.abort();
        }
        let _ = flush_task.await;
        buffer.lock().await.flush().await;
    })
}

async fn proxy_handler(
    State(state): State<ProxyState>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    request: Request,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);

    let headers = request.headers().clone();
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let body_bytes = match axum::body::to_bytes(request.into_body(), 10 * 1024 * 1024).await {
        Ok(b) => b,
        Err(_) => Bytes::new(),
    };

    let start = Instant::now();
    let mut target_url = format!("http://127.0.0.1:{}{}", state.target_port, path);
    if let Some(q) = &query {
        target_url.push('?');
        target_url.push_str(q);
    }

    let outcome = forward(&state, &method, &target_url, &headers, body_bytes.clone()).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let should_log = !state.ignore_paths.iter().any(|p| path.starts_with(p.as_str()));
    if should_log {
        record_request(
            &state,
            &method,
            &path,
            &outcome,
            duration_ms,
            &addr,
            &user_agent,
            &body_bytes,
        )
        .await;
    }

    match outcome {
        Ok((status, response_headers, response_body)) => {
            let mut response = Response::builder().status(status);
            for (name, value) in response_headers.iter() {
                response = response.header(name, value);
            }
            response
                .body(axum::body::Body::from(response_body))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(_) => (StatusCode::BAD_GATEWAY, "proxy error").into_response(),
    }
}

type ForwardResult = Result<(StatusCode, HeaderMap, Bytes), reqwest::Error>;

async fn forward(
    state: &ProxyState,
    method: &Method,
    target_url: &str,
    headers: &HeaderMap,
    body: Bytes,
) -> ForwardResult {
    let reqwest_method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);
    let mut builder = state.http.request(reqwest_method, target_url).body(body);
    if state.capture_headers {
        for (name, value) in headers.iter() {
            if name.as_str().eq_ignore_ascii_case("host") {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_bytes());
        }
    }

    let response = builder.send().await?;
    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::OK);
    let response_headers = response.headers().clone();
    let body = response.bytes().await?;

    let mut headers_out = HeaderMap::new();
    for (name, value) in response_headers.iter() {
        if let Ok(name) = axum::http::HeaderName::from_bytes(name.as_str().as_bytes()) {
            if let Ok(value) = axum::http::HeaderValue::from_bytes(value.as_bytes()) {
                headers_out.append(name, value);
            }
        }
    }
    Ok((status, headers_out, body))
}

#[allow(clippy::too_many_arguments)]
async fn record_request(
    state: &ProxyState,
    method: &Method,
    path: &str,
    outcome: &ForwardResult,
    duration_ms: u64,
    addr: &std::net::SocketAddr,
    user_agent: &str,
    body: &Bytes,
) {
    let (status, content_length) = match outcome {
        Ok((status, _, body)) => (status.as_u16(), body.len()),
        Err(_) => (502, 0),
    };
    let level = if status < 400 {
        "INFO"
    } else if status < 500 {
        "WARN"
    } else {
        "ERROR"
    };

    let mut metadata = serde_json::json!({
        "method": method.as_str(),
        "path": path,
        "status": status,
        "duration_ms": duration_ms,
        "ip": addr.ip().to_string(),
        "user_agent": user_agent,
        "content_length": content_length,
    });
    if state.capture_body && body.len() <= state.max_body_size {
        if let Ok(text) = std::str::from_utf8(body) {
            metadata["request_body"] = serde_json::json!(text);
        }
    }

    let entry = LogEntry {
        id: String::new(),
        source: "http_traffic".to_string(),
        level: level.to_string(),
        timestamp: now_rfc3339(),
        message: format!("{} {} - {}", method.as_str(), path, status),
        metadata,
        tags: vec!["http".to_string(), method.as_str().to_ascii_lowercase()],
        trace_id: None,
        created_at: 0.0,
        size_bytes: 0,
    };

    state.buffer.lock().await.push(entry).await;
}
