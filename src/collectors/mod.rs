//! Collector framework (spec.md §4.3): independent producers of LogEntry
//! records that batch-post them to the core's own `log_batch` RPC method.
//!
//! Every collector owns its in-memory ring and whatever child
//! process/socket/watch handle it needs; none of them touch the store
//! directly - they are external collaborators that happen to live in the
//! same binary, talking to the core exactly as a standalone SDK would.

mod console;
mod db_query;
mod file_watcher;
mod http_traffic;
mod process_monitor;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;

use crate::config::CollectorsConfig;
use crate::model::LogEntry;

/// Shared HTTP client wrapping the `log_batch` JSON-RPC call, with the
/// collector framework's own retry/backoff policy (independent of the
/// core's handling of the request once it arrives).
pub struct LogClient {
    http: reqwest::Client,
    rpc_url: String,
    retry_count: u32,
    retry_delay: Duration,
}

impl LogClient {
    pub fn new(rpc_url: String, retry_count: u32, retry_delay: Duration) -> Self {
        // Per-attempt timeout independent of the retry/backoff loop above:
        // a hung attempt still gets abandoned and retried rather than
        // stalling the collector's flush cycle indefinitely.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .build()
            .unwrap_or_default();

        Self {
            http,
            rpc_url,
            retry_count: retry_count.max(1),
            retry_delay,
        }
    }

    /// Posts `logs` as a single `log_batch` call, retrying with exponential
    /// backoff up to `retry_count` times. Returns whether the final
    /// attempt succeeded; on exhaustion the batch is dropped by the
    /// caller and a counter should be logged (spec.md §7, Network-transient).
    pub async fn send_batch(&self, logs: Vec<LogEntry>) -> bool {
        if logs.is_empty() {
            return true;
        }

        let payload = json!({
            "jsonrpc": "2.0",
            "method": "log_batch",
            "params": { "logs": logs, "compress": false },
            "id": 1,
        });

        for attempt in 0..self.retry_count {
            match self.http.post(&self.rpc_url).json(&payload).send().await {
                Ok(resp) if resp.status().is_success() => return true,
                Ok(resp) => {
                    tracing::warn!("collector: log_batch post returned {}", resp.status());
                }
                Err(e) => {
                    tracing::warn!("collector: log_batch post failed: {e}");
                }
            }
            if attempt + 1 < self.retry_count {
                tokio::time::sleep(self.retry_delay * 2u32.pow(attempt)).await;
            }
        }
        false
    }
}

/// Buffers entries and flushes by size (immediately) or is flushed
/// periodically by the owning collector's loop. Mirrors the
/// buffer-then-batch discipline every collector shares.
pub struct CollectorBuffer {
    entries: Vec<LogEntry>,
    buffer_size: usize,
    client: Arc<LogClient>,
}

impl CollectorBuffer {
    pub fn new(client: Arc<LogClient>, buffer_size: usize) -> Self {
        Self {
            entries: Vec::new(),
            buffer_size: buffer_size.max(1),
            client,
        }
    }

    /// If the buffer is already full, flushes synchronously before
    /// enqueuing - no record is ever dropped on a full buffer.
    pub async fn push(&mut self, entry: LogEntry) {
        if self.entries.len() >= self.buffer_size {
            self.flush().await;
        }
        self.entries.push(entry);
        if self.entries.len() >= self.buffer_size {
            self.flush().await;
        }
    }

    pub async fn flush(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.entries);
        if !self.client.send_batch(batch).await {
            tracing::warn!("collector: batch dropped after exhausting retries");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Flushes `buffer` on a fixed tick until `shutdown_rx` fires - the
/// timeout half of the size-or-timeout flush rule every collector shares.
fn spawn_periodic_flush(
    buffer: Arc<tokio::sync::Mutex<CollectorBuffer>>,
    interval: Duration,
    mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    buffer.lock().await.flush().await;
                }
                _ = shutdown_rx.changed() => break,
            }
        }
    })
}

/// Starts every collector whose config section is `enabled`, returning a
/// manager the caller holds onto for the process lifetime.
pub struct CollectorManager {
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl CollectorManager {
    pub fn start(config: &CollectorsConfig, rpc_url: &str) -> Self {
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let mut handles = Vec::new();

        if config.console.enabled {
            let client = Arc::new(LogClient::new(rpc_url.to_string(), 3, Duration::from_secs(1)));
            handles.push(console::spawn(
                config.console.clone(),
                client,
                shutdown_rx.clone(),
            ));
        }
        if config.http_traffic.enabled {
            let client = Arc::new(LogClient::new(rpc_url.to_string(), 3, Duration::from_secs(1)));
            handles.push(http_traffic::spawn(
                config.http_traffic.clone(),
                client,
                shutdown_rx.clone(),
            ));
        }
        if config.file_watcher.enabled {
            let client = Arc::new(LogClient::new(rpc_url.to_string(), 3, Duration::from_secs(1)));
            handles.push(file_watcher::spawn(
                config.file_watcher.clone(),
                client,
                shutdown_rx.clone(),
            ));
        }
        if config.process_monitor.enabled {
            let client = Arc::new(LogClient::new(rpc_url.to_string(), 3, Duration::from_secs(1)));
            handles.push(process_monitor::spawn(
                config.process_monitor.clone(),
                client,
                shutdown_rx.clone(),
            ));
        }
        if config.database.enabled {
            let client = Arc::new(LogClient::new(rpc_url.to_string(), 3, Duration::from_secs(1)));
            handles.push(db_query::spawn(
                config.database.clone(),
                client,
                shutdown_rx.clone(),
            ));
        }

        tracing::info!("collectors: started {} collector(s)", handles.len());
        Self { shutdown_tx, handles }
    }

    /// Signals every collector to stop and waits for each to drain its
    /// buffer and return.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
