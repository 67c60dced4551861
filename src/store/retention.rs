//! Retention and maintenance: age eviction, size eviction, compaction.
//!
//! Ordering matches spec.md §4.1: age eviction, then size eviction, then
//! compaction. Within age eviction, FTS rows are removed before base rows
//! to preserve the external-content sync contract (an FTS5 `content=`
//! table references base-table rowids; deleting the base row first without
//! updating the index leaves ghost rowids behind).

use anyhow::Result;
use rusqlite::Connection;

use super::archive;
use crate::config::StorageConfig;

/// Runs the full maintenance pass. Returns the number of rows archived,
/// for logging.
pub fn run_maintenance(conn: &Connection, config: &StorageConfig, now: f64) -> Result<usize> {
    let archived = age_eviction(conn, config, now)?;
    size_eviction(conn, config)?;
    compact(conn)?;
    Ok(archived)
}

/// Rows past `max_days` move to the archive (gzip of their JSON form) and
/// are removed from hot storage. ERROR/FATAL rows are archived at the same
/// `max_days` cutoff but not deleted until `2 * max_days` has elapsed -
/// this policy is adopted per spec.md §9's open question on ERROR/FATAL
/// retention, since the reference implementation leaves it ambiguous.
fn age_eviction(conn: &Connection, config: &StorageConfig, now: f64) -> Result<usize> {
    let max_days = config.max_days as f64;
    let cutoff = now - max_days * 86400.0;
    let hard_cutoff = now - 2.0 * max_days * 86400.0;

    let mut archived = 0usize;

    {
        let mut stmt = conn.prepare(
            "SELECT id, source, level, timestamp, message, metadata_json, tags_json,
                    trace_id, created_at, size_bytes
             FROM logs WHERE created_at < ?1",
        )?;
        let rows = stmt.query_map([cutoff], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, f64>(8)?,
                row.get::<_, i64>(9)?,
            ))
        })?;

        let mut to_archive = Vec::new();
        for row in rows {
            to_archive.push(row?);
        }

        for (id, source, level, timestamp, message, metadata_json, tags_json, trace_id, created_at, _size) in to_archive {
            let json = serde_json::json!({
                "id": id, "source": source, "level": level, "timestamp": timestamp,
                "message": message, "metadata": serde_json::from_str::<serde_json::Value>(&metadata_json).unwrap_or_default(),
                "tags": serde_json::from_str::<serde_json::Value>(&tags_json).unwrap_or_default(),
                "trace_id": trace_id, "created_at": created_at,
            });
            let serialized = serde_json::to_vec(&json)?;
            let original_size = serialized.len() as i64;
            let compressed = archive::compress(&serialized)?;
            let compressed_size = compressed.len() as i64;

            conn.execute(
                "INSERT OR REPLACE INTO logs_archive
                    (id, source, level, timestamp, compressed_data, created_at, original_size, compressed_size)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![id, source, level, timestamp, compressed, created_at, original_size, compressed_size],
            )?;
            archived += 1;
        }
    }

    // Delete from FTS before the base table.
    conn.execute(
        "DELETE FROM logs_fts WHERE rowid IN (
            SELECT rowid FROM logs
            WHERE created_at < ?1 AND level NOT IN ('ERROR', 'FATAL')
        )",
        [cutoff],
    )?;
    conn.execute(
        "DELETE FROM logs WHERE created_at < ?1 AND level NOT IN ('ERROR', 'FATAL')",
        [cutoff],
    )?;

    // ERROR/FATAL rows are only deleted from hot storage once the hard
    // cutoff (2 * max_days) has passed - they were already archived above.
    conn.execute(
        "DELETE FROM logs_fts WHERE rowid IN (
            SELECT rowid FROM logs
            WHERE created_at < ?1 AND level IN ('ERROR', 'FATAL')
        )",
        [hard_cutoff],
    )?;
    conn.execute(
        "DELETE FROM logs WHERE created_at < ?1 AND level IN ('ERROR', 'FATAL')",
        [hard_cutoff],
    )?;

    Ok(archived)
}

/// If the database file exceeds `max_size_mb`, delete the oldest rows in
/// batches of 1000 until the file is at 80% of the cap or progress stalls.
fn size_eviction(conn: &Connection, config: &StorageConfig) -> Result<()> {
    let mut stmt = conn.prepare("PRAGMA database_list")?;
    let db_path: String = stmt
        .query_map([], |row| row.get::<_, String>(2))?
        .next()
        .transpose()?
        .unwrap_or_default();
    drop(stmt);
    if db_path.is_empty() {
        return Ok(());
    }

    let max_bytes = config.max_size_mb * 1024 * 1024;
    let target_bytes = (max_bytes as f64 * 0.8) as u64;

    loop {
        let size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);
        if size <= max_bytes {
            break;
        }

        let deleted = conn.execute(
            "DELETE FROM logs_fts WHERE rowid IN (
                SELECT rowid FROM logs ORDER BY created_at ASC LIMIT 1000
            )",
            [],
        )?;
        conn.execute(
            "DELETE FROM logs WHERE rowid IN (
                SELECT rowid FROM logs ORDER BY created_at ASC LIMIT 1000
            )",
            [],
        )?;

        if deleted == 0 {
            break;
        }

        let new_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);
        if new_size <= target_bytes || new_size >= size {
            break;
        }
    }

    Ok(())
}

fn compact(conn: &Connection) -> Result<()> {
    conn.execute_batch("VACUUM; ANALYZE;")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn_with_row(level: &str, created_at: f64) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::store::schema::init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO logs (id, source, level, timestamp, message, created_at)
             VALUES ('1', 'console', ?1, '2026-01-01T00:00:00Z', 'hi', ?2)",
            rusqlite::params![level, created_at],
        )
        .unwrap();
        conn
    }

    #[test]
    fn age_eviction_archives_and_removes_stale_info_rows() {
        let config = StorageConfig {
            max_days: 1,
            ..Default::default()
        };
        let now = 10.0 * 86400.0;
        let conn = conn_with_row("INFO", 0.0);

        let archived = age_eviction(&conn, &config, now).unwrap();
        assert_eq!(archived, 1);

        let remaining: i64 = conn.query_row("SELECT COUNT(*) FROM logs", [], |r| r.get(0)).unwrap();
        assert_eq!(remaining, 0);
        let in_archive: i64 =
            conn.query_row("SELECT COUNT(*) FROM logs_archive", [], |r| r.get(0)).unwrap();
        assert_eq!(in_archive, 1);
    }

    #[test]
    fn age_eviction_keeps_error_rows_in_hot_storage_until_hard_cutoff() {
        let config = StorageConfig {
            max_days: 1,
            ..Default::default()
        };
        // Past the soft cutoff (1 day) but not the hard cutoff (2 days).
        let now = 1.5 * 86400.0;
        let conn = conn_with_row("ERROR", 0.0);

        age_eviction(&conn, &config, now).unwrap();

        let remaining: i64 = conn.query_row("SELECT COUNT(*) FROM logs", [], |r| r.get(0)).unwrap();
        assert_eq!(remaining, 1, "ERROR rows stay hot until 2x max_days");
        let in_archive: i64 =
            conn.query_row("SELECT COUNT(*) FROM logs_archive", [], |r| r.get(0)).unwrap();
        assert_eq!(in_archive, 1);
    }
}
