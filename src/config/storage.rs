//! Store configuration: batching, retention, compression.

use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub max_size_mb: u64,
    pub max_days: u32,
    pub enable_compression: bool,
    pub batch_size: usize,
    pub batch_timeout_secs: f64,
    pub vacuum_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./logs/dev_logs.db"),
            max_size_mb: 500,
            max_days: 7,
            enable_compression: true,
            batch_size: 100,
            batch_timeout_secs: 1.0,
            vacuum_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileStorageConfig {
    pub db_path: Option<String>,
    pub max_size_mb: Option<u64>,
    pub max_days: Option<u32>,
    pub enable_compression: Option<bool>,
    pub batch_size: Option<usize>,
    pub batch_timeout_secs: Option<f64>,
    pub vacuum_interval_secs: Option<u64>,
}

impl StorageConfig {
    pub fn from_file(file: Option<FileStorageConfig>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();
        Self {
            db_path: file.db_path.map(PathBuf::from).unwrap_or(defaults.db_path),
            max_size_mb: file.max_size_mb.unwrap_or(defaults.max_size_mb),
            max_days: file.max_days.unwrap_or(defaults.max_days),
            enable_compression: file
                .enable_compression
                .unwrap_or(defaults.enable_compression),
            batch_size: file.batch_size.unwrap_or(defaults.batch_size),
            batch_timeout_secs: file
                .batch_timeout_secs
                .unwrap_or(defaults.batch_timeout_secs),
            vacuum_interval_secs: file
                .vacuum_interval_secs
                .unwrap_or(defaults.vacuum_interval_secs),
        }
    }
}
