//! Command-line surface. Ambient scaffolding over the core's public
//! functions - the RPC/WS protocol is the system's real interface;
//! this is a thin convenience layer (spec.md §1, §6).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::PathBuf;

use crate::config::Config;

#[derive(Parser)]
#[command(name = "log-collector")]
#[command(version)]
#[command(about = "Local-first developer observability daemon", long_about = None)]
pub struct Cli {
    /// Path to the TOML config file (defaults to ./log-collector.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ProjectType {
    Webapp,
    Api,
    Microservice,
    Desktop,
}

impl ProjectType {
    fn default_watch_paths(&self) -> Vec<&'static str> {
        match self {
            ProjectType::Webapp => vec!["./src", "./public"],
            ProjectType::Api => vec!["./src"],
            ProjectType::Microservice => vec!["./src", "./config"],
            ProjectType::Desktop => vec!["./src"],
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a starter config file to the default location
    Init {
        #[arg(long = "type", value_enum, default_value = "webapp")]
        project_type: ProjectType,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Start the server and all enabled collectors (default if no subcommand given)
    Start,
    /// Start only the JSON-RPC/WebSocket server, no collectors
    Server,
    /// Start only the collector framework, no server (requires a running server elsewhere)
    Collectors,
    /// Print system status (via get_system_status against a running server)
    Status,
    /// Query recent logs from a running server
    Logs {
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        level: Option<String>,
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value = "50")]
        limit: i64,
        #[arg(long)]
        verbose: bool,
    },
    /// Copy hot-tier rows from one database file to another, preserving ids
    Migrate {
        #[arg(long = "from-db")]
        from_db: PathBuf,
        #[arg(long = "to-db")]
        to_db: PathBuf,
        #[arg(long)]
        force: bool,
    },
    /// Run as a background daemon, writing a pidfile
    Daemon,
}

/// `init`: writes a resolved TOML config and the default `./logs/` directory.
/// Refuses to overwrite an existing config file unless `--force` is given.
pub fn run_init(project_type: ProjectType, name: Option<String>, force: bool) -> Result<()> {
    let path = Config::default_config_path();
    if path.exists() && !force {
        eprintln!(
            "init: {} already exists; pass --force to overwrite",
            path.display()
        );
        std::process::exit(1);
    }

    let project_name = name.unwrap_or_else(|| "my-project".to_string());
    let watch_paths = project_type
        .default_watch_paths()
        .iter()
        .map(|p| format!("\"{p}\""))
        .collect::<Vec<_>>()
        .join(", ");

    let contents = format!(
        r#"project_name = "{project_name}"

[server]
host = "0.0.0.0"
port = 8888
cors_enabled = true
request_timeout_secs = 30.0
max_connections = 1000

[storage]
db_path = "./logs/dev_logs.db"
max_size_mb = 500
max_days = 7
enable_compression = true
batch_size = 100
batch_timeout_secs = 1.0
vacuum_interval_secs = 3600

[collectors.console]
enabled = true
commands = []
auto_restart = true

[collectors.http_traffic]
enabled = true
ports = [8000, 8080, 3000, 5000]
proxy_port_offset = 1000
ignore_paths = ["/health", "/metrics", "/favicon.ico"]
capture_headers = true
capture_body = false
max_body_size = 1024

[collectors.file_watcher]
enabled = true
watch_paths = [{watch_paths}]
ignore_patterns = ["*.pyc", "__pycache__", ".git"]
include_extensions = ["py", "js", "ts", "json", "toml", "yaml"]
recursive = true

[collectors.process_monitor]
enabled = false
check_interval_secs = 5.0
monitor_processes = []
cpu_threshold = 80.0
memory_threshold_mb = 1000.0

[collectors.database]
enabled = false
databases = []
slow_query_threshold_ms = 1000
max_query_length = 1000

[alerts]
enabled = true
error_spike_threshold = 10
error_spike_window_secs = 60.0
slow_response_multiplier = 3.0
channels = ["console"]

[logging]
level = "info"
file_enabled = false
"#
    );

    std::fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
    std::fs::create_dir_all("./logs").context("creating ./logs directory")?;

    println!("init: wrote {} ({project_type:?} project)", path.display());
    Ok(())
}

/// `daemon`: writes a pidfile at `./.log_collector/daemon.pid`. The caller
/// then falls through to the same startup path as `start`.
pub fn write_pidfile() -> Result<()> {
    let dir = PathBuf::from("./.log_collector");
    std::fs::create_dir_all(&dir).context("creating ./.log_collector directory")?;
    let pidfile = dir.join("daemon.pid");
    std::fs::write(&pidfile, std::process::id().to_string())
        .with_context(|| format!("writing {}", pidfile.display()))?;
    eprintln!("daemon: wrote pidfile {}", pidfile.display());
    Ok(())
}

fn rpc_base_url(config: &Config) -> String {
    let host = if config.server.host == "0.0.0.0" {
        "127.0.0.1"
    } else {
        config.server.host.as_str()
    };
    format!("http://{host}:{port}", port = config.server.port)
}

async fn call_rpc(base_url: &str, method: &str, params: Value) -> Result<Value> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .context("building RPC client")?;
    let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
    let response = client
        .post(format!("{base_url}/rpc"))
        .json(&body)
        .send()
        .await
        .with_context(|| format!("connecting to {base_url}"))?;
    response
        .json::<Value>()
        .await
        .context("parsing RPC response as JSON")
}

/// `status`: pings a running server and prints `get_system_status`. Exits 1
/// if the server cannot be reached or reports an error.
pub async fn run_status(config_path: Option<&PathBuf>) -> Result<()> {
    let config = Config::load(config_path);
    let base_url = rpc_base_url(&config);

    let result = call_rpc(&base_url, "get_system_status", json!({})).await;
    match result {
        Ok(value) if value.get("error").is_none() => {
            println!("{}", serde_json::to_string_pretty(&value["result"]).unwrap_or_default());
            Ok(())
        }
        Ok(value) => {
            eprintln!("status: server returned an error: {value}");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("status: could not reach server at {base_url}: {e:#}");
            std::process::exit(1);
        }
    }
}

/// `logs`: issues a `query` RPC call with the given filters and prints one
/// line per entry (or a pretty-printed JSON array with `--verbose`).
#[allow(clippy::too_many_arguments)]
pub async fn run_logs(
    config_path: Option<&PathBuf>,
    source: Option<String>,
    level: Option<String>,
    since: Option<String>,
    search: Option<String>,
    limit: i64,
    verbose: bool,
) -> Result<()> {
    let config = Config::load(config_path);
    let base_url = rpc_base_url(&config);

    let mut params = json!({ "limit": limit });
    if let Some(source) = source {
        params["sources"] = json!([source]);
    }
    if let Some(level) = level {
        params["levels"] = json!([level.to_uppercase()]);
    }
    if let Some(since) = since {
        params["since"] = json!(since);
    }
    if let Some(search) = search {
        params["search"] = json!(search);
    }

    let envelope = call_rpc(&base_url, "query", params).await?;
    let Some(result) = envelope.get("result") else {
        eprintln!("logs: {}", envelope);
        std::process::exit(1);
    };

    if verbose {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    let entries = result.get("logs").and_then(Value::as_array).cloned().unwrap_or_default();
    for entry in entries {
        let ts = entry.get("timestamp").and_then(Value::as_str).unwrap_or("-");
        let level = entry.get("level").and_then(Value::as_str).unwrap_or("-");
        let source = entry.get("source").and_then(Value::as_str).unwrap_or("-");
        let message = entry.get("message").and_then(Value::as_str).unwrap_or("");
        println!("{ts} [{level:>5}] {source}: {message}");
    }
    Ok(())
}

/// `migrate`: copies every hot-tier and archive-tier row from one database
/// file to another, preserving ids. Refuses to touch an existing `to_db`
/// unless `--force` is given.
pub fn run_migrate(from_db: &PathBuf, to_db: &PathBuf, force: bool) -> Result<()> {
    if !from_db.exists() {
        eprintln!("migrate: source database {} does not exist", from_db.display());
        std::process::exit(1);
    }
    if to_db.exists() && !force {
        eprintln!(
            "migrate: destination {} already exists; pass --force to overwrite",
            to_db.display()
        );
        std::process::exit(1);
    }

    let source = Connection::open(from_db)
        .with_context(|| format!("opening source database {}", from_db.display()))?;

    if let Some(parent) = to_db.parent() {
        std::fs::create_dir_all(parent).context("creating destination directory")?;
    }
    let dest = Connection::open(to_db)
        .with_context(|| format!("opening destination database {}", to_db.display()))?;
    crate::store::schema::init_schema(&dest).context("initializing destination schema")?;

    let copied_logs = copy_table(
        &source,
        &dest,
        "SELECT id, source, level, timestamp, message, metadata_json, tags_json, trace_id, created_at, size_bytes FROM logs",
        "INSERT OR REPLACE INTO logs (id, source, level, timestamp, message, metadata_json, tags_json, trace_id, created_at, size_bytes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        10,
    )?;

    let copied_archive = copy_table(
        &source,
        &dest,
        "SELECT id, source, level, timestamp, compressed_data, created_at, original_size, compressed_size FROM logs_archive",
        "INSERT OR REPLACE INTO logs_archive (id, source, level, timestamp, compressed_data, created_at, original_size, compressed_size)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        8,
    )
    .unwrap_or(0);

    // Rebuild the FTS index and stats rollup from the copied content rather
    // than re-deriving the per-row upsert logic the writer owns.
    dest.execute_batch("INSERT INTO logs_fts(logs_fts) VALUES ('rebuild')")
        .context("rebuilding FTS index on destination")?;
    dest.execute_batch(
        "INSERT INTO log_stats (date, source, level, count, total_size)
         SELECT substr(timestamp, 1, 10), source, level, COUNT(*), COALESCE(SUM(size_bytes), 0)
         FROM logs GROUP BY 1, 2, 3",
    )
    .context("rebuilding stats rollup on destination")?;

    println!(
        "migrate: copied {copied_logs} hot row(s) and {copied_archive} archive row(s) from {} to {}",
        from_db.display(),
        to_db.display()
    );
    Ok(())
}

fn copy_table(
    source: &Connection,
    dest: &Connection,
    select_sql: &str,
    insert_sql: &str,
    column_count: usize,
) -> Result<usize> {
    let mut stmt = source.prepare(select_sql)?;
    let mut rows = stmt.query([])?;

    let mut count = 0usize;
    dest.execute_batch("BEGIN IMMEDIATE")?;
    loop {
        let row = match rows.next() {
            Ok(Some(row)) => row,
            Ok(None) => break,
            Err(e) => {
                dest.execute_batch("ROLLBACK")?;
                return Err(e.into());
            }
        };

        let values: Vec<rusqlite::types::Value> = (0..column_count)
            .map(|i| row.get::<_, rusqlite::types::Value>(i))
            .collect::<rusqlite::Result<_>>()?;
        dest.execute(insert_sql, rusqlite::params_from_iter(values))?;
        count += 1;
    }
    dest.execute_batch("COMMIT")?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_source() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::store::schema::init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO logs (id, source, level, timestamp, message, created_at)
             VALUES ('1', 'console', 'INFO', '2026-01-01T00:00:00Z', 'hello', 1.0)",
            [],
        )
        .unwrap();
        conn
    }

    #[test]
    fn copy_table_carries_rows_across_connections() {
        let source = seeded_source();
        let dest = Connection::open_in_memory().unwrap();
        crate::store::schema::init_schema(&dest).unwrap();

        let copied = copy_table(
            &source,
            &dest,
            "SELECT id, source, level, timestamp, message, metadata_json, tags_json, trace_id, created_at, size_bytes FROM logs",
            "INSERT OR REPLACE INTO logs (id, source, level, timestamp, message, metadata_json, tags_json, trace_id, created_at, size_bytes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            10,
        )
        .unwrap();

        assert_eq!(copied, 1);
        let message: String = dest
            .query_row("SELECT message FROM logs WHERE id = '1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(message, "hello");
    }

    #[test]
    fn rpc_base_url_resolves_wildcard_host_to_loopback() {
        let mut config = Config::default();
        config.server.host = "0.0.0.0".to_string();
        config.server.port = 9999;
        assert_eq!(rpc_base_url(&config), "http://127.0.0.1:9999");

        config.server.host = "example.internal".to_string();
        assert_eq!(rpc_base_url(&config), "http://example.internal:9999");
    }
}
