//! WebSocket transport: the Streamer (spec.md §4.4/§5).
//!
//! Subscriptions are held in a single mutex-guarded table, as spec.md §5
//! prescribes ("guarded by a single mutex held briefly during
//! add/remove/snapshot-for-dispatch"). Delivery is a non-blocking send
//! over an unbounded channel paired with the connection's own write task -
//! there is no per-subscription queue beyond that handoff, so a send that
//! fails (the write task's receiver has dropped) immediately marks the
//! subscription dead and it is evicted at the end of the current dispatch
//! pass.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde_json::json;

use crate::model::{Alert, Filter, LogEntry};
use crate::server::AppState;

struct Subscription {
    filter: Filter,
    sender: tokio::sync::mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
pub struct Streamer {
    subscriptions: Mutex<HashMap<String, Subscription>>,
}

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

impl Streamer {
    pub fn new() -> Self {
        Self::default()
    }

    fn start(
        &self,
        key: String,
        filter: Filter,
        sender: tokio::sync::mpsc::UnboundedSender<Message>,
    ) {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(key, Subscription { filter, sender });
    }

    fn update_filters(&self, key: &str, filter: Filter) -> bool {
        let mut subs = self.subscriptions.lock().unwrap();
        if let Some(sub) = subs.get_mut(key) {
            sub.filter = filter;
            true
        } else {
            false
        }
    }

    fn stop(&self, key: &str) -> bool {
        self.subscriptions.lock().unwrap().remove(key).is_some()
    }

    fn stop_all_for_connection(&self, conn_id: u64) {
        let prefix = format!("{conn_id}:");
        self.subscriptions
            .lock()
            .unwrap()
            .retain(|key, _| !key.starts_with(&prefix));
    }

    /// Evaluate every active subscription's filter against `entry` and
    /// deliver a `log_entry` frame to matching subscribers. Subscriptions
    /// whose send fails are evicted once the snapshot has been walked.
    pub fn dispatch(&self, entry: &LogEntry, alerts: &[Alert]) {
        let snapshot: Vec<(String, Filter, tokio::sync::mpsc::UnboundedSender<Message>)> = {
            let subs = self.subscriptions.lock().unwrap();
            subs.iter()
                .map(|(key, sub)| (key.clone(), sub.filter.clone(), sub.sender.clone()))
                .collect()
        };

        let mut dead = Vec::new();
        for (key, filter, sender) in snapshot {
            if !filter.matches(entry) {
                continue;
            }
            let stream_id = key.split_once(':').map(|(_, s)| s).unwrap_or(&key);
            let frame = json!({
                "type": "log_entry",
                "stream_id": stream_id,
                "data": entry,
                "alerts": alerts,
                "timestamp": Utc::now().to_rfc3339(),
            });
            if sender.send(Message::Text(frame.to_string())).is_err() {
                dead.push(key);
            }
        }

        if !dead.is_empty() {
            let mut subs = self.subscriptions.lock().unwrap();
            for key in dead {
                subs.remove(&key);
            }
        }
    }
}

pub async fn handle_ws_upgrade(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                let parsed: Result<serde_json::Value, _> = serde_json::from_str(&text);
                match parsed {
                    Ok(value) => handle_control_message(&state, conn_id, &tx, value),
                    Err(e) => {
                        let _ = tx.send(Message::Text(
                            json!({"type": "error", "data": {"message": format!("Invalid JSON format: {e}")}})
                                .to_string(),
                        ));
                    }
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.streamer.stop_all_for_connection(conn_id);
    drop(tx);
    let _ = writer.await;
}

fn handle_control_message(
    state: &AppState,
    conn_id: u64,
    tx: &tokio::sync::mpsc::UnboundedSender<Message>,
    value: serde_json::Value,
) {
    let message_type = value.get("type").and_then(|v| v.as_str()).unwrap_or("");
    let stream_id = value
        .get("stream_id")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let key = format!("{conn_id}:{stream_id}");

    match message_type {
        "start_stream" => {
            let filter: Filter = value
                .get("data")
                .and_then(|d| d.get("filters"))
                .and_then(|f| serde_json::from_value(f.clone()).ok())
                .unwrap_or_default();
            state.streamer.start(key, filter, tx.clone());
            let _ = tx.send(Message::Text(
                json!({"type": "stream_started", "stream_id": stream_id, "timestamp": Utc::now().to_rfc3339()})
                    .to_string(),
            ));
        }
        "update_filters" => {
            let filter: Filter = value
                .get("data")
                .and_then(|d| d.get("filters"))
                .and_then(|f| serde_json::from_value(f.clone()).ok())
                .unwrap_or_default();
            if state.streamer.update_filters(&key, filter) {
                let _ = tx.send(Message::Text(
                    json!({"type": "filters_updated", "stream_id": stream_id, "timestamp": Utc::now().to_rfc3339()})
                        .to_string(),
                ));
            }
        }
        "stop_stream" => {
            if state.streamer.stop(&key) {
                let _ = tx.send(Message::Text(
                    json!({"type": "stream_stopped", "stream_id": stream_id, "timestamp": Utc::now().to_rfc3339()})
                        .to_string(),
                ));
            }
        }
        "ping" => {
            let _ = tx.send(Message::Text(
                json!({"type": "pong", "timestamp": Utc::now().to_rfc3339()}).to_string(),
            ));
        }
        other => {
            tracing::debug!("websocket: unknown message type '{other}'");
        }
    }
}
