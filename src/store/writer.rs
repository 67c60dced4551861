//! Single-writer background thread: batches inserts, runs the analyzer
//! inline, and triggers periodic retention maintenance.
//!
//! A dedicated OS thread (not a tokio task) owns the one rusqlite
//! `Connection` permitted to write. Commands arrive over an unbounded
//! `std::sync::mpsc` channel - unbounded because spec.md describes the
//! writer as draining an "unbounded input queue" and pushing backpressure
//! onto flush cadence, not onto senders.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::{retention, schema};
use crate::analyzer::{Analyzer, AnalyzerConfig};
use crate::config::StorageConfig;
use crate::model::{Alert, LogEntry};

pub enum WriterCommand {
    PutBatch {
        entries: Vec<LogEntry>,
        respond: oneshot::Sender<Vec<Vec<Alert>>>,
    },
    Shutdown {
        respond: oneshot::Sender<()>,
    },
}

#[derive(Default)]
pub struct StoreMetrics {
    pub events_stored: AtomicU64,
    pub events_store_failed: AtomicU64,
    pub batches_flushed: AtomicU64,
    pub write_latency_us: AtomicU64,
}

impl StoreMetrics {
    pub fn snapshot(&self) -> StoreMetricsSnapshot {
        StoreMetricsSnapshot {
            events_stored: self.events_stored.load(Ordering::Relaxed),
            events_store_failed: self.events_store_failed.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            write_latency_us: self.write_latency_us.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StoreMetricsSnapshot {
    pub events_stored: u64,
    pub events_store_failed: u64,
    pub batches_flushed: u64,
    pub write_latency_us: u64,
}

/// Sent to the server for each entry as it passes through the writer, so
/// the Streamer can evaluate subscription filters without itself touching
/// the database.
pub type StreamNotice = (LogEntry, Vec<Alert>);

pub fn spawn(
    config: StorageConfig,
    analyzer_config: AnalyzerConfig,
    metrics: Arc<StoreMetrics>,
    stream_tx: tokio::sync::mpsc::UnboundedSender<StreamNotice>,
) -> Result<(Sender<WriterCommand>, std::thread::JoinHandle<()>)> {
    let (tx, rx) = std::sync::mpsc::channel();

    let handle = std::thread::Builder::new()
        .name("store-writer".into())
        .spawn(move || writer_thread(config, analyzer_config, rx, metrics, stream_tx))
        .context("failed to spawn store writer thread")?;

    Ok((tx, handle))
}

fn now_epoch() -> f64 {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_secs_f64()
}

fn writer_thread(
    config: StorageConfig,
    analyzer_config: AnalyzerConfig,
    rx: Receiver<WriterCommand>,
    metrics: Arc<StoreMetrics>,
    stream_tx: tokio::sync::mpsc::UnboundedSender<StreamNotice>,
) {
    let conn = match open_connection(&config) {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!("store: failed to open database: {e:#}");
            std::process::exit(1);
        }
    };

    let mut analyzer = Analyzer::new(analyzer_config);

    let mut pending: Vec<LogEntry> = Vec::new();
    let mut last_flush = Instant::now();
    let mut last_maintenance = Instant::now();
    let batch_timeout = Duration::from_secs_f64(config.batch_timeout_secs.max(0.05));
    let maintenance_interval = Duration::from_secs(config.vacuum_interval_secs.max(1));

    loop {
        match rx.recv_timeout(batch_timeout) {
            Ok(WriterCommand::PutBatch { entries, respond }) => {
                let now = now_epoch();
                let mut alerts_per_entry = Vec::with_capacity(entries.len());
                for entry in entries {
                    let alerts = analyzer.analyze(&entry, now);
                    alerts_per_entry.push(alerts.clone());
                    let _ = stream_tx.send((entry.clone(), alerts));
                    pending.push(entry);
                }
                let _ = respond.send(alerts_per_entry);

                if pending.len() >= config.batch_size {
                    flush(&conn, &mut pending, &metrics);
                    last_flush = Instant::now();
                }
            }
            Ok(WriterCommand::Shutdown { respond }) => {
                flush(&conn, &mut pending, &metrics);
                let _ = respond.send(());
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                if !pending.is_empty() && last_flush.elapsed() >= batch_timeout {
                    flush(&conn, &mut pending, &metrics);
                    last_flush = Instant::now();
                }
                if last_maintenance.elapsed() >= maintenance_interval {
                    let now = now_epoch();
                    match retention::run_maintenance(&conn, &config, now) {
                        Ok(archived) => {
                            if archived > 0 {
                                tracing::info!("store: archived {archived} rows during maintenance");
                            }
                        }
                        Err(e) => tracing::warn!("store: maintenance pass failed: {e:#}"),
                    }
                    last_maintenance = Instant::now();
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                flush(&conn, &mut pending, &metrics);
                break;
            }
        }
    }
}

fn open_connection(config: &StorageConfig) -> Result<Connection> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent).context("creating storage directory")?;
    }
    let conn = Connection::open(&config.db_path).context("opening sqlite database")?;
    schema::init_schema(&conn).context("initializing schema")?;
    Ok(conn)
}

/// Flush pending entries as one atomic transaction. Tolerates individual
/// row failures (best-effort durability per spec.md §4.1/§7) without
/// aborting the whole batch; a failed row increments the failure counter
/// and is dropped, not retried indefinitely.
fn flush(conn: &Connection, pending: &mut Vec<LogEntry>, metrics: &StoreMetrics) {
    if pending.is_empty() {
        return;
    }

    let start = Instant::now();
    let batch = std::mem::take(pending);
    let attempt = (|| -> Result<()> {
        conn.execute_batch("BEGIN IMMEDIATE")?;
        for entry in &batch {
            match store_entry(conn, entry) {
                Ok(()) => {
                    metrics.events_stored.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::warn!("store: failed to write entry {}: {e:#}", entry.id);
                    metrics.events_store_failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        conn.execute_batch("COMMIT")?;
        Ok(())
    })();

    if let Err(e) = attempt {
        tracing::error!("store: batch flush transaction failed: {e:#}");
        let _ = conn.execute_batch("ROLLBACK");
        metrics
            .events_store_failed
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
    } else {
        metrics.batches_flushed.fetch_add(1, Ordering::Relaxed);
    }

    metrics
        .write_latency_us
        .store(start.elapsed().as_micros() as u64, Ordering::Relaxed);
}

fn store_entry(conn: &Connection, entry: &LogEntry) -> Result<()> {
    let metadata_json = serde_json::to_string(&entry.metadata)?;
    let tags_json = serde_json::to_string(&entry.tags)?;

    // id conflicts overwrite: delete the prior FTS row (if any) before the
    // upsert so the external-content index never drifts from the base row.
    if let Some(old_rowid) = existing_rowid(conn, &entry.id)? {
        conn.execute("DELETE FROM logs_fts WHERE rowid = ?1", [old_rowid])?;
    }

    conn.execute(
        "INSERT INTO logs (id, source, level, timestamp, message, metadata_json, tags_json, trace_id, created_at, size_bytes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
            source = excluded.source, level = excluded.level, timestamp = excluded.timestamp,
            message = excluded.message, metadata_json = excluded.metadata_json,
            tags_json = excluded.tags_json, trace_id = excluded.trace_id,
            created_at = excluded.created_at, size_bytes = excluded.size_bytes",
        rusqlite::params![
            entry.id, entry.source, entry.level, entry.timestamp, entry.message,
            metadata_json, tags_json, entry.trace_id, entry.created_at, entry.size_bytes,
        ],
    )?;

    // Can't rely on `last_insert_rowid()` here: on the UPDATE branch of the
    // upsert above it doesn't advance, and instead keeps returning the rowid
    // of whatever real INSERT last ran on this connection - possibly a
    // different entry earlier in the same batch. Look the row back up by id.
    let rowid = existing_rowid(conn, &entry.id)?
        .with_context(|| format!("row for id {} missing immediately after upsert", entry.id))?;

    conn.execute(
        "INSERT INTO logs_fts(rowid, source, message, metadata_json) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![rowid, entry.source, entry.message, metadata_json],
    )?;

    upsert_stats(conn, entry)?;

    Ok(())
}

fn existing_rowid(conn: &Connection, id: &str) -> Result<Option<i64>> {
    Ok(conn
        .query_row("SELECT rowid FROM logs WHERE id = ?1", [id], |row| row.get(0))
        .ok())
}

/// Application-level equivalent of an insert trigger: upserts the daily
/// per-source-level rollup spec.md describes as `log_stats`.
fn upsert_stats(conn: &Connection, entry: &LogEntry) -> Result<()> {
    let date = entry
        .timestamp
        .get(0..10)
        .unwrap_or(&entry.timestamp)
        .to_string();

    conn.execute(
        "INSERT INTO log_stats (date, source, level, count, total_size)
         VALUES (?1, ?2, ?3, 1, ?4)
         ON CONFLICT(date, source, level) DO UPDATE SET
            count = count + 1, total_size = total_size + excluded.total_size",
        rusqlite::params![date, entry.source, entry.level, entry.size_bytes],
    )?;
    Ok(())
}
