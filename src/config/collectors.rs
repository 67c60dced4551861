//! Per-collector configuration sections.

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct ConsoleCollectorConfig {
    pub enabled: bool,
    pub commands: Vec<String>,
    pub auto_restart: bool,
}

impl Default for ConsoleCollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            commands: vec![],
            auto_restart: true,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileConsoleCollectorConfig {
    pub enabled: Option<bool>,
    pub commands: Option<Vec<String>>,
    pub auto_restart: Option<bool>,
}

impl ConsoleCollectorConfig {
    pub fn from_file(file: Option<FileConsoleCollectorConfig>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();
        Self {
            enabled: file.enabled.unwrap_or(defaults.enabled),
            commands: file.commands.unwrap_or(defaults.commands),
            auto_restart: file.auto_restart.unwrap_or(defaults.auto_restart),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpCollectorConfig {
    pub enabled: bool,
    pub ports: Vec<u16>,
    pub proxy_port_offset: u16,
    pub ignore_paths: Vec<String>,
    pub capture_headers: bool,
    pub capture_body: bool,
    pub max_body_size: usize,
}

impl Default for HttpCollectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ports: vec![8000, 8080, 3000, 5000],
            proxy_port_offset: 1000,
            ignore_paths: vec![
                "/health".to_string(),
                "/metrics".to_string(),
                "/favicon.ico".to_string(),
            ],
            capture_headers: true,
            capture_body: false,
            max_body_size: 1024,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileHttpCollectorConfig {
    pub enabled: Option<bool>,
    pub ports: Option<Vec<u16>>,
    pub proxy_port_offset: Option<u16>,
    pub ignore_paths: Option<Vec<String>>,
    pub capture_headers: Option<bool>,
    pub capture_body: Option<bool>,
    pub max_body_size: Option<usize>,
}

impl HttpCollectorConfig {
    pub fn from_file(file: Option<FileHttpCollectorConfig>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();
        Self {
            enabled: file.enabled.unwrap_or(defaults.enabled),
            ports: file.ports.unwrap_or(defaults.ports),
            proxy_port_offset: file.proxy_port_offset.unwrap_or(defaults.proxy_port_offset),
            ignore_paths: file.ignore_paths.unwrap_or(defaults.ignore_paths),
            capture_headers: file.capture_headers.unwrap_or(defaults.capture_headers),
            capture_body: file.capture_body.unwrap_or(defaults.capture_body),
            max_body_size: file.max_body_size.unwrap_or(defaults.max_body_size),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileWatcherConfig {
    pub enabled: bool,
    pub watch_paths: Vec<String>,
    pub ignore_patterns: Vec<String>,
    pub include_extensions: Vec<String>,
    pub recursive: bool,
}

impl Default for FileWatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            watch_paths: vec!["./src".to_string(), "./config".to_string()],
            ignore_patterns: vec!["*.pyc".to_string(), "__pycache__".to_string(), ".git".to_string()],
            include_extensions: vec![
                "py".to_string(),
                "js".to_string(),
                "ts".to_string(),
                "json".to_string(),
                "toml".to_string(),
                "yaml".to_string(),
            ],
            recursive: true,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileFileWatcherConfig {
    pub enabled: Option<bool>,
    pub watch_paths: Option<Vec<String>>,
    pub ignore_patterns: Option<Vec<String>>,
    pub include_extensions: Option<Vec<String>>,
    pub recursive: Option<bool>,
}

impl FileWatcherConfig {
    pub fn from_file(file: Option<FileFileWatcherConfig>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();
        Self {
            enabled: file.enabled.unwrap_or(defaults.enabled),
            watch_paths: file.watch_paths.unwrap_or(defaults.watch_paths),
            ignore_patterns: file.ignore_patterns.unwrap_or(defaults.ignore_patterns),
            include_extensions: file.include_extensions.unwrap_or(defaults.include_extensions),
            recursive: file.recursive.unwrap_or(defaults.recursive),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessMonitorConfig {
    pub enabled: bool,
    pub check_interval_secs: f64,
    pub monitor_processes: Vec<String>,
    pub cpu_threshold: f64,
    pub memory_threshold_mb: f64,
}

impl Default for ProcessMonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval_secs: 5.0,
            monitor_processes: vec![],
            cpu_threshold: 80.0,
            memory_threshold_mb: 1000.0,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileProcessMonitorConfig {
    pub enabled: Option<bool>,
    pub check_interval_secs: Option<f64>,
    pub monitor_processes: Option<Vec<String>>,
    pub cpu_threshold: Option<f64>,
    pub memory_threshold_mb: Option<f64>,
}

impl ProcessMonitorConfig {
    pub fn from_file(file: Option<FileProcessMonitorConfig>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();
        Self {
            enabled: file.enabled.unwrap_or(defaults.enabled),
            check_interval_secs: file
                .check_interval_secs
                .unwrap_or(defaults.check_interval_secs),
            monitor_processes: file.monitor_processes.unwrap_or(defaults.monitor_processes),
            cpu_threshold: file.cpu_threshold.unwrap_or(defaults.cpu_threshold),
            memory_threshold_mb: file
                .memory_threshold_mb
                .unwrap_or(defaults.memory_threshold_mb),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseLogSource {
    pub name: String,
    pub path: String,
    pub db_type: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseCollectorConfig {
    pub enabled: bool,
    pub databases: Vec<DatabaseLogSource>,
    pub slow_query_threshold_ms: u64,
    pub max_query_length: usize,
}

impl Default for DatabaseCollectorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            databases: vec![],
            slow_query_threshold_ms: 1000,
            max_query_length: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileDatabaseCollectorConfig {
    pub enabled: Option<bool>,
    pub databases: Option<Vec<DatabaseLogSource>>,
    pub slow_query_threshold_ms: Option<u64>,
    pub max_query_length: Option<usize>,
}

impl DatabaseCollectorConfig {
    pub fn from_file(file: Option<FileDatabaseCollectorConfig>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();
        Self {
            enabled: file.enabled.unwrap_or(defaults.enabled),
            databases: file.databases.unwrap_or(defaults.databases),
            slow_query_threshold_ms: file
                .slow_query_threshold_ms
                .unwrap_or(defaults.slow_query_threshold_ms),
            max_query_length: file.max_query_length.unwrap_or(defaults.max_query_length),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CollectorsConfig {
    pub console: ConsoleCollectorConfig,
    pub http_traffic: HttpCollectorConfig,
    pub file_watcher: FileWatcherConfig,
    pub process_monitor: ProcessMonitorConfig,
    pub database: DatabaseCollectorConfig,
}

#[derive(Debug, Deserialize, Default)]
pub struct FileCollectorsConfig {
    pub console: Option<FileConsoleCollectorConfig>,
    pub http_traffic: Option<FileHttpCollectorConfig>,
    pub file_watcher: Option<FileFileWatcherConfig>,
    pub process_monitor: Option<FileProcessMonitorConfig>,
    pub database: Option<FileDatabaseCollectorConfig>,
}

impl CollectorsConfig {
    pub fn from_file(file: Option<FileCollectorsConfig>) -> Self {
        let file = file.unwrap_or_default();
        Self {
            console: ConsoleCollectorConfig::from_file(file.console),
            http_traffic: HttpCollectorConfig::from_file(file.http_traffic),
            file_watcher: FileWatcherConfig::from_file(file.file_watcher),
            process_monitor: ProcessMonitorConfig::from_file(file.process_monitor),
            database: DatabaseCollectorConfig::from_file(file.database),
        }
    }
}
