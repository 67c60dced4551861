//! Read-path queries against a pooled set of connections, independent of
//! the writer's single connection - concurrent reads never block on the
//! writer under WAL journaling.

use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params_from_iter;

use crate::model::{parse_time_since, LogEntry};

#[derive(Debug, Default, Clone)]
pub struct QueryFilter {
    pub sources: Vec<String>,
    pub levels: Vec<String>,
    pub trace_id: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
    pub include_archived: bool,
}

pub struct StoreReader {
    pool: Pool<SqliteConnectionManager>,
}

impl StoreReader {
    pub fn open(db_path: &std::path::Path) -> Result<Self> {
        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .context("building sqlite read pool")?;
        // Verify connectivity eagerly so startup failures surface immediately.
        pool.get()?.execute_batch("SELECT 1")?;
        Ok(Self { pool })
    }

    pub fn query(&self, filter: &QueryFilter) -> Result<Vec<LogEntry>> {
        let conn = self.pool.get()?;
        let now = now_epoch();

        let mut clauses = vec!["1=1".to_string()];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filter.sources.is_empty() {
            let placeholders = filter.sources.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            clauses.push(format!("source IN ({placeholders})"));
            for s in &filter.sources {
                params.push(Box::new(s.clone()));
            }
        }
        if !filter.levels.is_empty() {
            let placeholders = filter.levels.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            clauses.push(format!("level IN ({placeholders})"));
            for l in &filter.levels {
                params.push(Box::new(l.clone()));
            }
        }
        if let Some(trace_id) = &filter.trace_id {
            clauses.push("trace_id = ?".to_string());
            params.push(Box::new(trace_id.clone()));
        }
        if let Some(since) = &filter.since {
            if let Some(ts) = parse_time_since(since, now) {
                clauses.push("created_at >= ?".to_string());
                params.push(Box::new(ts));
            }
        }
        if let Some(until) = &filter.until {
            // "now minus zero" for a bare relative duration - see SPEC_FULL.md §4.1.
            let ts = parse_time_since(until, now).unwrap_or(now);
            clauses.push("created_at <= ?".to_string());
            params.push(Box::new(ts));
        }
        if let Some(search) = &filter.search {
            clauses.push(
                "rowid IN (SELECT rowid FROM logs_fts WHERE logs_fts MATCH ?)".to_string(),
            );
            params.push(Box::new(search.clone()));
        }

        let where_clause = clauses.join(" AND ");
        let limit = if filter.limit > 0 { filter.limit } else { 100 };

        let sql = format!(
            "SELECT id, source, level, timestamp, message, metadata_json, tags_json,
                    trace_id, created_at, size_bytes
             FROM logs WHERE {where_clause}
             ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?"
        );
        params.push(Box::new(limit));
        params.push(Box::new(filter.offset));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter().map(|p| p.as_ref())), row_to_entry)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }

        if filter.include_archived {
            entries.extend(self.query_archive(&conn, filter, now)?);
            // Both the hot and archive tiers are already newest-first with a
            // rowid tiebreak within themselves (see the two queries above);
            // `sort_by` is a stable sort, so merging by `created_at` alone
            // preserves that per-tier order on ties instead of reshuffling it.
            entries.sort_by(|a, b| b.created_at.partial_cmp(&a.created_at).unwrap());
            entries.truncate(limit as usize);
        }

        Ok(entries)
    }

    fn query_archive(
        &self,
        conn: &rusqlite::Connection,
        filter: &QueryFilter,
        now: f64,
    ) -> Result<Vec<LogEntry>> {
        let mut clauses = vec!["1=1".to_string()];
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if !filter.sources.is_empty() {
            let placeholders = filter.sources.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            clauses.push(format!("source IN ({placeholders})"));
            for s in &filter.sources {
                params.push(Box::new(s.clone()));
            }
        }
        if !filter.levels.is_empty() {
            let placeholders = filter.levels.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            clauses.push(format!("level IN ({placeholders})"));
            for l in &filter.levels {
                params.push(Box::new(l.clone()));
            }
        }
        if let Some(since) = &filter.since {
            if let Some(ts) = parse_time_since(since, now) {
                clauses.push("created_at >= ?".to_string());
                params.push(Box::new(ts));
            }
        }

        let where_clause = clauses.join(" AND ");
        let sql = format!(
            "SELECT id, source, level, timestamp, compressed_data, created_at
             FROM logs_archive WHERE {where_clause} ORDER BY created_at DESC, rowid DESC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter().map(|p| p.as_ref())), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (_id, compressed): (String, Vec<u8>) = row?;
            let decompressed = super::archive::decompress(&compressed)?;
            let value: serde_json::Value = serde_json::from_slice(&decompressed)?;
            if let Ok(entry) = serde_json::from_value::<LogEntry>(value) {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    pub fn trace(&self, trace_id: &str) -> Result<Vec<LogEntry>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, source, level, timestamp, message, metadata_json, tags_json,
                    trace_id, created_at, size_bytes
             FROM logs WHERE trace_id = ?1
             ORDER BY timestamp ASC, created_at ASC",
        )?;
        let rows = stmt.query_map([trace_id], row_to_entry)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn stats(&self, timerange: &str) -> Result<StatsResult> {
        let conn = self.pool.get()?;
        let now = now_epoch();
        let since = parse_time_since(timerange, now).unwrap_or(now - 3600.0);

        let total_logs: i64 = conn.query_row(
            "SELECT COUNT(*) FROM logs WHERE created_at >= ?1",
            [since],
            |row| row.get(0),
        )?;
        let total_size: i64 = conn.query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM logs WHERE created_at >= ?1",
            [since],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT source, level, COUNT(*) FROM logs WHERE created_at >= ?1
             GROUP BY source, level ORDER BY COUNT(*) DESC",
        )?;
        let by_source_level = stmt
            .query_map([since], |row| {
                Ok(SourceLevelCount {
                    source: row.get(0)?,
                    level: row.get(1)?,
                    count: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(
            "SELECT CAST(created_at / 3600 AS INTEGER) AS bucket, COUNT(*),
                    SUM(CASE WHEN level IN ('ERROR','FATAL') THEN 1 ELSE 0 END)
             FROM logs WHERE created_at >= ?1
             GROUP BY bucket ORDER BY bucket DESC LIMIT 24",
        )?;
        let hourly = stmt
            .query_map([since], |row| {
                Ok(HourlyBucket {
                    hour: row.get(0)?,
                    count: row.get(1)?,
                    error_count: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(
            "SELECT message, COUNT(*) FROM logs
             WHERE created_at >= ?1 AND level IN ('ERROR','FATAL')
             GROUP BY message ORDER BY COUNT(*) DESC LIMIT 10",
        )?;
        let top_errors = stmt
            .query_map([since], |row| {
                Ok(TopError {
                    message: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(StatsResult {
            timerange: timerange.to_string(),
            basic: BasicStats {
                total_logs,
                total_size_bytes: total_size,
            },
            by_source_level,
            hourly,
            top_errors,
        })
    }
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<LogEntry> {
    let metadata_json: String = row.get(5)?;
    let tags_json: String = row.get(6)?;
    Ok(LogEntry {
        id: row.get(0)?,
        source: row.get(1)?,
        level: row.get(2)?,
        timestamp: row.get(3)?,
        message: row.get(4)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        trace_id: row.get(7)?,
        created_at: row.get(8)?,
        size_bytes: row.get(9)?,
    })
}

fn now_epoch() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BasicStats {
    pub total_logs: i64,
    pub total_size_bytes: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SourceLevelCount {
    pub source: String,
    pub level: String,
    pub count: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HourlyBucket {
    pub hour: i64,
    pub count: i64,
    pub error_count: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TopError {
    pub message: String,
    pub count: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatsResult {
    pub timerange: String,
    pub basic: BasicStats,
    pub by_source_level: Vec<SourceLevelCount>,
    pub hourly: Vec<HourlyBucket>,
    pub top_errors: Vec<TopError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogEntry;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_db_path() -> std::path::PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "log-collector-query-test-{}-{n}.db",
            std::process::id()
        ))
    }

    fn seeded_reader(rows: &[(&str, &str, f64)]) -> (StoreReader, std::path::PathBuf) {
        let path = temp_db_path();
        let conn = rusqlite::Connection::open(&path).unwrap();
        crate::store::schema::init_schema(&conn).unwrap();
        for (source, level, created_at) in rows {
            let entry = LogEntry {
                id: format!("id-{created_at}"),
                source: source.to_string(),
                level: level.to_string(),
                timestamp: "2026-01-01T00:00:00Z".to_string(),
                message: "seeded".to_string(),
                metadata: serde_json::json!({}),
                tags: vec![],
                trace_id: None,
                created_at: *created_at,
                size_bytes: 7,
            };
            conn.execute(
                "INSERT INTO logs (id, source, level, timestamp, message, metadata_json,
                    tags_json, trace_id, created_at, size_bytes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    entry.id,
                    entry.source,
                    entry.level,
                    entry.timestamp,
                    entry.message,
                    "{}",
                    "[]",
                    entry.trace_id,
                    entry.created_at,
                    entry.size_bytes,
                ],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO logs_fts(rowid, message) SELECT rowid, message FROM logs WHERE id = ?1",
                [&entry.id],
            )
            .unwrap();
        }
        drop(conn);
        (StoreReader::open(&path).unwrap(), path)
    }

    #[test]
    fn query_filters_by_source_and_level() {
        let now = now_epoch();
        let (reader, path) = seeded_reader(&[
            ("http_traffic", "INFO", now),
            ("http_traffic", "ERROR", now),
            ("console", "ERROR", now),
        ]);

        let filter = QueryFilter {
            sources: vec!["http_traffic".to_string()],
            levels: vec!["ERROR".to_string()],
            limit: 10,
            ..Default::default()
        };
        let results = reader.query(&filter).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, "http_traffic");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn stats_buckets_errors_separately() {
        let now = now_epoch();
        let (reader, path) = seeded_reader(&[
            ("console", "INFO", now),
            ("console", "ERROR", now),
            ("console", "ERROR", now),
        ]);

        let stats = reader.stats("1h").unwrap();
        assert_eq!(stats.basic.total_logs, 3);
        assert_eq!(stats.top_errors.len(), 1);
        assert_eq!(stats.top_errors[0].count, 2);
        let _ = std::fs::remove_file(path);
    }
}
