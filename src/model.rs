//! Core data types shared by the store, analyzer, server and collectors.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Severity of a [`LogEntry`]. Serializes to its uppercase name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Level::Error | Level::Fatal)
    }

    /// Parse a level string. Unknown values normalize to `Info` per the
    /// ingest contract - callers that need the "level:normalized" tag
    /// should compare the result against the raw input themselves.
    pub fn parse(raw: &str) -> Level {
        match raw.to_ascii_uppercase().as_str() {
            "DEBUG" => Level::Debug,
            "INFO" => Level::Info,
            "WARN" | "WARNING" => Level::Warn,
            "ERROR" => Level::Error,
            "FATAL" => Level::Fatal,
            _ => Level::Info,
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monotonic id generator used when an ingested entry doesn't carry one.
///
/// Timestamp + atomic counter, not a UUID - id generation is explicitly
/// out of core scope as an external collaborator.
static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn generate_id() -> String {
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let millis = chrono::Utc::now().timestamp_millis();
    format!("{:x}-{:x}", millis, counter)
}

/// The canonical record ingested, stored, queried and streamed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub source: String,
    pub level: String,
    pub timestamp: String,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub trace_id: Option<String>,
    /// Ingest time, monotonic floating-point epoch seconds. Assigned by
    /// the store, not the producer.
    #[serde(default)]
    pub created_at: f64,
    /// Byte length of the serialized entry. Assigned by the store.
    #[serde(default)]
    pub size_bytes: i64,
}

impl LogEntry {
    /// Normalize an entry as it crosses the ingest boundary: fill in a
    /// missing id, normalize an unrecognized level (tagging it), and
    /// stamp `created_at`/`size_bytes`.
    pub fn normalize(mut self, now: f64) -> Self {
        if self.id.is_empty() {
            self.id = generate_id();
        }

        let upper = self.level.to_ascii_uppercase();
        let known = matches!(upper.as_str(), "DEBUG" | "INFO" | "WARN" | "ERROR" | "FATAL");
        if !known {
            self.tags.push("level:normalized".to_string());
            self.level = "INFO".to_string();
        } else {
            self.level = upper;
        }

        self.created_at = now;
        self.size_bytes = serde_json::to_vec(&self).map(|b| b.len() as i64).unwrap_or(0);
        self
    }

    pub fn metadata_duration_ms(&self) -> Option<f64> {
        self.metadata.get("duration_ms").and_then(|v| v.as_f64())
    }
}

/// A filter predicate evaluated against every ingested [`LogEntry`] to
/// decide delivery to a WebSocket subscription, or as the conjunction of
/// constraints for a `query` RPC call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub levels: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Filter {
    /// Missing or empty fields are wildcards; all present fields conjoin.
    pub fn matches(&self, entry: &LogEntry) -> bool {
        if !self.levels.is_empty() && !self.levels.iter().any(|l| l == &entry.level) {
            return false;
        }
        if !self.sources.is_empty() && !self.sources.iter().any(|s| s == &entry.source) {
            return false;
        }
        if let Some(pattern) = &self.pattern {
            if !entry.message.contains(pattern.as_str()) {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| entry.tags.contains(t)) {
            return false;
        }
        true
    }
}

/// An alert descriptor emitted by the [`crate::analyzer::Analyzer`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Alert {
    #[serde(rename = "error_spike")]
    ErrorSpike { source: String, count: usize },
    #[serde(rename = "slow_response")]
    SlowResponse {
        source: String,
        duration: f64,
        average: f64,
    },
}

/// Parse `since`/`until`/`timerange` values: either an absolute ISO-8601
/// timestamp, or a relative duration `<N><s|m|h|d>`. A bare integer with
/// no suffix is interpreted as minutes (matches the reference
/// implementation's `_parse_time_since` fallback).
///
/// Returns epoch seconds.
pub fn parse_time_since(raw: &str, now: f64) -> Option<f64> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp() as f64 + dt.timestamp_subsec_millis() as f64 / 1000.0);
    }

    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (digits, unit_seconds) = match raw.chars().last() {
        Some('s') => (&raw[..raw.len() - 1], 1.0),
        Some('m') => (&raw[..raw.len() - 1], 60.0),
        Some('h') => (&raw[..raw.len() - 1], 3600.0),
        Some('d') => (&raw[..raw.len() - 1], 86400.0),
        _ => (raw, 60.0), // unsuffixed: minutes
    };

    let value: f64 = digits.parse().ok()?;
    Some(now - value * unit_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_normalizes_unknown_to_info() {
        assert_eq!(Level::parse("TRACE"), Level::Info);
        assert_eq!(Level::parse("error"), Level::Error);
    }

    #[test]
    fn entry_normalize_tags_unknown_level() {
        let entry = LogEntry {
            id: String::new(),
            source: "svc".into(),
            level: "TRACE".into(),
            timestamp: "2024-01-01T00:00:00Z".into(),
            message: "hi".into(),
            metadata: serde_json::json!({}),
            tags: vec![],
            trace_id: None,
            created_at: 0.0,
            size_bytes: 0,
        };
        let entry = entry.normalize(1.0);
        assert_eq!(entry.level, "INFO");
        assert!(entry.tags.contains(&"level:normalized".to_string()));
        assert!(!entry.id.is_empty());
    }

    #[test]
    fn filter_wildcards_on_empty_fields() {
        let filter = Filter::default();
        let entry = LogEntry {
            id: "1".into(),
            source: "a".into(),
            level: "INFO".into(),
            timestamp: "t".into(),
            message: "m".into(),
            metadata: serde_json::json!({}),
            tags: vec![],
            trace_id: None,
            created_at: 0.0,
            size_bytes: 0,
        };
        assert!(filter.matches(&entry));
    }

    #[test]
    fn filter_pattern_is_case_sensitive_substring() {
        let filter = Filter {
            pattern: Some("boom".into()),
            ..Default::default()
        };
        let mut entry = LogEntry {
            id: "1".into(),
            source: "a".into(),
            level: "ERROR".into(),
            timestamp: "t".into(),
            message: "silent boom".into(),
            metadata: serde_json::json!({}),
            tags: vec![],
            trace_id: None,
            created_at: 0.0,
            size_bytes: 0,
        };
        assert!(filter.matches(&entry));
        entry.message = "Boom".into();
        assert!(!filter.matches(&entry));
    }

    #[test]
    fn parse_time_since_unsuffixed_is_minutes() {
        let now = 1_000_000.0;
        let since = parse_time_since("5", now).unwrap();
        assert_eq!(since, now - 300.0);
    }

    #[test]
    fn parse_time_since_suffixes() {
        let now = 1_000_000.0;
        assert_eq!(parse_time_since("30s", now).unwrap(), now - 30.0);
        assert_eq!(parse_time_since("2h", now).unwrap(), now - 7200.0);
        assert_eq!(parse_time_since("3d", now).unwrap(), now - 3.0 * 86400.0);
    }
}
