//! Durable, indexed storage of LogEntry with batched write, full-text
//! search, tiered retention, and online statistics (spec.md §4.1).

pub(crate) mod archive;
mod query;
mod retention;
pub(crate) mod schema;
mod writer;

pub use query::{BasicStats, HourlyBucket, QueryFilter, SourceLevelCount, StatsResult, TopError};
pub use writer::{StoreMetricsSnapshot, StreamNotice};

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::oneshot;

use crate::analyzer::AnalyzerConfig;
use crate::config::StorageConfig;
use crate::model::{Alert, LogEntry};
use query::StoreReader;
use writer::{StoreMetrics, WriterCommand};

pub struct Store {
    tx: std::sync::mpsc::Sender<WriterCommand>,
    writer_handle: std::sync::Mutex<Option<std::thread::JoinHandle<()>>>,
    reader: StoreReader,
    metrics: Arc<StoreMetrics>,
    closed: std::sync::atomic::AtomicBool,
}

impl Store {
    /// Opens (creating if absent) the database at `config.db_path`, spawns
    /// the writer thread, and returns a handle plus the channel the server
    /// should drain to feed the Streamer.
    pub fn open(
        config: StorageConfig,
        analyzer_config: AnalyzerConfig,
    ) -> Result<(Self, tokio::sync::mpsc::UnboundedReceiver<StreamNotice>)> {
        let metrics = Arc::new(StoreMetrics::default());
        let (stream_tx, stream_rx) = tokio::sync::mpsc::unbounded_channel();

        let reader = StoreReader::open(&config.db_path).context("opening store read pool")?;
        let (tx, handle) = writer::spawn(config, analyzer_config, metrics.clone(), stream_tx)?;

        Ok((
            Self {
                tx,
                writer_handle: std::sync::Mutex::new(Some(handle)),
                reader,
                metrics,
                closed: std::sync::atomic::AtomicBool::new(false),
            },
            stream_rx,
        ))
    }

    /// Normalizes and ingests `entries` atomically. Returns, per entry in
    /// input order, the alerts the analyzer raised for it.
    pub async fn put_batch(&self, entries: Vec<LogEntry>) -> Result<Vec<Vec<Alert>>> {
        if self.closed.load(std::sync::atomic::Ordering::Relaxed) {
            bail!("store is closed");
        }
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let normalized: Vec<LogEntry> = entries.into_iter().map(|e| e.normalize(now)).collect();

        let (respond, recv) = oneshot::channel();
        self.tx
            .send(WriterCommand::PutBatch {
                entries: normalized,
                respond,
            })
            .map_err(|_| anyhow::anyhow!("store writer thread has shut down"))?;

        recv.await.context("store writer dropped response channel")
    }

    pub fn query(&self, filter: &QueryFilter) -> Result<Vec<LogEntry>> {
        self.reader.query(filter)
    }

    pub fn trace(&self, trace_id: &str) -> Result<Vec<LogEntry>> {
        self.reader.trace(trace_id)
    }

    pub fn stats(&self, timerange: &str) -> Result<StatsResult> {
        self.reader.stats(timerange)
    }

    pub fn metrics(&self) -> StoreMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Flushes any pending batch and stops accepting further writes.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, std::sync::atomic::Ordering::Relaxed) {
            return Ok(());
        }
        let (respond, recv) = oneshot::channel();
        if self
            .tx
            .send(WriterCommand::Shutdown { respond })
            .is_ok()
        {
            let _ = recv.await;
        }
        if let Some(handle) = self.writer_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        Ok(())
    }
}
