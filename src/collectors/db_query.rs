//! DB query collector: tails configured database log files and extracts
//! vendor-specific `duration:` query-timing lines (spec.md §4.3).

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use std::sync::OnceLock;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::{DatabaseCollectorConfig, DatabaseLogSource};
use crate::model::LogEntry;

use super::{now_rfc3339, spawn_periodic_flush, CollectorBuffer, LogClient};

// PostgreSQL-style: `duration: 12.345 ms  statement: SELECT ...`
fn postgres_duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"duration:\s*([\d.]+)\s*ms.*?statement:\s*(.+)$").unwrap())
}

pub fn spawn(
    config: DatabaseCollectorConfig,
    client: Arc<LogClient>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if config.databases.is_empty() {
            tracing::debug!("db_query collector: no databases configured, nothing to do");
            return;
        }

        let buffer = Arc::new(Mutex::new(CollectorBuffer::new(client, 100)));
        let flush_task =
            spawn_periodic_flush(buffer.clone(), Duration::from_secs(1), shutdown_rx.clone());

        let mut handles = Vec::new();
        for source in &config.databases {
            handles.push(tokio::spawn(monitor_log(
                source.clone(),
                config.slow_query_threshold_ms,
                config.max_query_length,
                buffer.clone(),
                shutdown_rx.clone(),
            )));
        }

        let _ = shutdown_rx.changed().await;
        for handle in handles {
            let _ = handle.await;
        }
        let _ = flush_task.await;
        buffer.lock().await.flush().await;
    })
}

async fn monitor_log(
    source: DatabaseLogSource,
    slow_query_threshold_ms: u64,
    max_query_length: usize,
    buffer: Arc<Mutex<CollectorBuffer>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let file = match tokio::fs::File::open(&source.path).await {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!("db_query collector: cannot open {}: {e}", source.path);
            return;
        }
    };

    let mut reader = BufReader::new(file);
    if let Err(e) = reader.seek(std::io::SeekFrom::End(0)).await {
        tracing::warn!("db_query collector: cannot seek {}: {e}", source.path);
        return;
    }

    let mut line = String::new();
    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        tokio::select! {
            result = reader.read_line(&mut line) => {
                match result {
                    Ok(0) => {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                    }
                    Ok(_) => {
                        parse_line(&source, slow_query_threshold_ms, max_query_length, line.trim_end(), &buffer).await;
                        line.clear();
                    }
                    Err(e) => {
                        tracing::warn!("db_query collector: read error on {}: {e}", source.path);
                        return;
                    }
                }
            }
            _ = shutdown_rx.changed() => return,
        }
    }
}

async fn parse_line(
    source: &DatabaseLogSource,
    slow_query_threshold_ms: u64,
    max_query_length: usize,
    log_line: &str,
    buffer: &Arc<Mutex<CollectorBuffer>>,
) {
    if !log_line.contains("duration:") {
        return;
    }
    let Some(captures) = postgres_duration_re().captures(log_line) else {
        return;
    };
    let Ok(duration_ms) = captures[1].parse::<f64>() else {
        return;
    };
    let query: String = captures[2].chars().take(max_query_length).collect();
    let slow = duration_ms > slow_query_threshold_ms as f64;
    let level = if slow { "WARN" } else { "INFO" };

    let entry = LogEntry {
        id: String::new(),
        source: "db_query".to_string(),
        level: level.to_string(),
        timestamp: now_rfc3339(),
        message: format!("query executed ({duration_ms}ms)"),
        metadata: serde_json::json!({
            "query": query,
            "duration_ms": duration_ms,
            "db_type": source.db_type,
            "db_name": source.name,
            "slow_query": slow,
        }),
        tags: vec!["database".to_string(), source.db_type.clone(), "query".to_string()],
        trace_id: None,
        created_at: 0.0,
        size_bytes: 0,
    };
    buffer.lock().await.push(entry).await;
}
