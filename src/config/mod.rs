//! Configuration for the log collector daemon.
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (`./log-collector.toml`, or `--config PATH`)
//! 3. Built-in defaults (lowest priority)

use serde::Deserialize;
use std::path::PathBuf;

mod alerts;
mod collectors;
mod logging;
mod server;
mod storage;

pub use alerts::{AlertConfig, FileAlertConfig};
pub use collectors::{
    CollectorsConfig, ConsoleCollectorConfig, DatabaseCollectorConfig, DatabaseLogSource,
    FileCollectorsConfig, FileWatcherConfig, HttpCollectorConfig, ProcessMonitorConfig,
};
pub use logging::{FileLogging, LogRotation, LoggingConfig};
pub use server::{FileServerConfig, ServerConfig};
pub use storage::{FileStorageConfig, StorageConfig};

/// Application configuration, resolved from env + file + defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_name: String,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub collectors: CollectorsConfig,
    pub alerts: AlertConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_name: "my-project".to_string(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            collectors: CollectorsConfig::default(),
            alerts: AlertConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Config file structure (subset of Config that makes sense to persist).
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    pub project_name: Option<String>,
    pub server: Option<FileServerConfig>,
    pub storage: Option<FileStorageConfig>,
    pub collectors: Option<FileCollectorsConfig>,
    pub alerts: Option<FileAlertConfig>,
    pub logging: Option<FileLogging>,
}

impl Config {
    /// Default config file location: `./log-collector.toml`.
    pub fn default_config_path() -> PathBuf {
        PathBuf::from("./log-collector.toml")
    }

    /// Load file config from an explicit path if given, else the default
    /// location. A missing file silently falls back to defaults; a file
    /// that exists but fails to parse is a fatal startup error.
    fn load_file_config(path: Option<&PathBuf>) -> FileConfig {
        let path = path.cloned().unwrap_or_else(Self::default_config_path);

        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!(
                        "\n╔══════════════════════════════════════════════════════════════╗"
                    );
                    eprintln!(
                        "║  CONFIG ERROR - Failed to parse configuration file          ║"
                    );
                    eprintln!(
                        "╚══════════════════════════════════════════════════════════════╝\n"
                    );
                    eprintln!("  File: {}\n", path.display());
                    eprintln!("  Error: {}\n", e);
                    std::process::exit(1);
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileConfig::default(),
            Err(e) => {
                eprintln!("\n╔══════════════════════════════════════════════════════════════╗");
                eprintln!("║  CONFIG ERROR - Cannot read configuration file              ║");
                eprintln!("╚══════════════════════════════════════════════════════════════╝\n");
                eprintln!("  File: {}\n", path.display());
                eprintln!("  Error: {}\n", e);
                std::process::exit(1);
            }
        }
    }

    /// Resolve configuration: env vars > config file > defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Self {
        let file = Self::load_file_config(config_path);
        let defaults = Self::default();

        let mut server = ServerConfig::from_file(file.server);
        let mut storage = StorageConfig::from_file(file.storage);
        let collectors = CollectorsConfig::from_file(file.collectors);
        let mut alerts = AlertConfig::from_file(file.alerts);
        let logging = LoggingConfig::from_file(file.logging);

        if let Ok(host) = std::env::var("LOG_COLLECTOR_HOST") {
            server.host = host;
        }
        if let Ok(port) = std::env::var("LOG_COLLECTOR_PORT") {
            if let Ok(port) = port.parse() {
                server.port = port;
            }
        }
        if let Ok(token) = std::env::var("LOG_COLLECTOR_AUTH_TOKEN") {
            server.auth_token = Some(token);
        }
        if let Ok(db_path) = std::env::var("LOG_COLLECTOR_DB_PATH") {
            storage.db_path = PathBuf::from(db_path);
        }
        if let Ok(max_size) = std::env::var("LOG_COLLECTOR_MAX_SIZE_MB") {
            if let Ok(max_size) = max_size.parse() {
                storage.max_size_mb = max_size;
            }
        }
        if let Ok(webhook) = std::env::var("LOG_COLLECTOR_WEBHOOK_URL") {
            alerts.webhook_url = Some(webhook);
        }
        if let Ok(slack_token) = std::env::var("LOG_COLLECTOR_SLACK_TOKEN") {
            alerts.slack_token = Some(slack_token);
        }

        Self {
            project_name: file.project_name.unwrap_or(defaults.project_name),
            server,
            storage,
            collectors,
            alerts,
            logging,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_resolved_schema() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8888);
        assert_eq!(config.storage.max_size_mb, 500);
        assert_eq!(config.storage.max_days, 7);
        assert_eq!(config.storage.batch_size, 100);
        assert_eq!(config.alerts.error_spike_threshold, 10);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let file = Config::load_file_config(Some(&PathBuf::from(
            "/nonexistent/path/log-collector.toml",
        )));
        assert!(file.server.is_none());
    }
}
