//! Schema creation and version-gated migrations for the log store.
//!
//! Follows the version-ladder pattern: a `metadata` table holds a single
//! `schema_version` row, and each `apply_schema_vN`/`migrate_vN_to_vM`
//! function checks the current version before acting, so opening an
//! existing database at any prior version brings it forward safely.

use anyhow::{Context, Result};
use rusqlite::Connection;

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "cache_size", -64000)?;
    conn.pragma_update(None, "foreign_keys", "OFF")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )
    .context("creating metadata table")?;

    let version = schema_version(conn)?;

    if version < 1 {
        apply_schema_v1(conn)?;
    }

    Ok(())
}

fn schema_version(conn: &Connection) -> Result<i64> {
    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .ok();
    Ok(version.and_then(|v| v.parse().ok()).unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO metadata (key, value) VALUES ('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [version.to_string()],
    )?;
    Ok(())
}

fn apply_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS logs (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            level TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            message TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            tags_json TEXT NOT NULL DEFAULT '[]',
            trace_id TEXT,
            created_at REAL NOT NULL,
            size_bytes INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_logs_created_at ON logs(created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_logs_source_level ON logs(source, level);
        CREATE INDEX IF NOT EXISTS idx_logs_trace_id ON logs(trace_id);
        CREATE INDEX IF NOT EXISTS idx_logs_level_time ON logs(level, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_logs_source_time ON logs(source, created_at DESC);

        CREATE TABLE IF NOT EXISTS logs_archive (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            level TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            compressed_data BLOB NOT NULL,
            created_at REAL NOT NULL,
            original_size INTEGER NOT NULL,
            compressed_size INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_archive_created_at ON logs_archive(created_at DESC);

        CREATE VIRTUAL TABLE IF NOT EXISTS logs_fts USING fts5(
            source,
            message,
            metadata_json,
            content = 'logs',
            content_rowid = 'rowid',
            tokenize = 'porter unicode61'
        );

        CREATE TABLE IF NOT EXISTS log_stats (
            date TEXT NOT NULL,
            source TEXT NOT NULL,
            level TEXT NOT NULL,
            count INTEGER NOT NULL DEFAULT 0,
            total_size INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (date, source, level)
        );
        ",
    )
    .context("applying schema v1")?;

    set_schema_version(conn, 1)?;
    Ok(())
}
