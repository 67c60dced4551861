//! In-memory sliding-window analyzer: error-spike and slow-response alerts.
//!
//! Runs synchronously on the ingest path, inline with the store's writer
//! (see `store::writer`), so per-source state needs no locking - ingest is
//! already serialized by the writer's input channel.

use std::collections::{HashMap, VecDeque};

use crate::model::{Alert, LogEntry};

const ERROR_WINDOW_CAPACITY: usize = 256;
const RESPONSE_WINDOW_CAPACITY: usize = 100;

/// Per-source bounded queues described in spec.md §3 as `StatsWindow`.
#[derive(Default)]
struct SourceWindow {
    /// Timestamps (seconds) of recent ERROR/FATAL entries.
    error_timestamps: VecDeque<f64>,
    /// Recent `duration_ms` samples for latency-sensitive sources.
    response_times: VecDeque<f64>,
}

pub struct AnalyzerConfig {
    pub error_spike_threshold: usize,
    pub error_spike_window_secs: f64,
    pub slow_response_multiplier: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            error_spike_threshold: 10,
            error_spike_window_secs: 60.0,
            slow_response_multiplier: 3.0,
        }
    }
}

/// Sources for which `duration_ms` is interpreted as a latency sample.
const LATENCY_SOURCES: &[&str] = &["http_traffic", "db_query"];

pub struct Analyzer {
    config: AnalyzerConfig,
    windows: HashMap<String, SourceWindow>,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
        }
    }

    /// Feed one entry through both signals, returning any alerts raised.
    /// `now` is epoch seconds, passed in so callers can use the same clock
    /// reading they stamped `created_at` with.
    pub fn analyze(&mut self, entry: &LogEntry, now: f64) -> Vec<Alert> {
        let mut alerts = Vec::new();

        if entry.level == "ERROR" || entry.level == "FATAL" {
            let window = self.windows.entry(entry.source.clone()).or_default();
            window.error_timestamps.push_back(now);
            while window.error_timestamps.len() > ERROR_WINDOW_CAPACITY {
                window.error_timestamps.pop_front();
            }

            let cutoff = now - self.config.error_spike_window_secs;
            let recent = window
                .error_timestamps
                .iter()
                .filter(|&&t| t >= cutoff)
                .count();

            if recent >= self.config.error_spike_threshold {
                alerts.push(Alert::ErrorSpike {
                    source: entry.source.clone(),
                    count: recent,
                });
            }
        }

        if LATENCY_SOURCES.contains(&entry.source.as_str()) {
            if let Some(duration) = entry.metadata_duration_ms() {
                if duration > 0.0 {
                    let window = self.windows.entry(entry.source.clone()).or_default();
                    window.response_times.push_back(duration);
                    while window.response_times.len() > RESPONSE_WINDOW_CAPACITY {
                        window.response_times.pop_front();
                    }

                    if window.response_times.len() >= 10 {
                        let average = window.response_times.iter().sum::<f64>()
                            / window.response_times.len() as f64;
                        if duration > average * self.config.slow_response_multiplier {
                            alerts.push(Alert::SlowResponse {
                                source: entry.source.clone(),
                                duration,
                                average,
                            });
                        }
                    }
                }
            }
        }

        alerts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(source: &str, level: &str, duration_ms: Option<f64>) -> LogEntry {
        let metadata = match duration_ms {
            Some(d) => serde_json::json!({ "duration_ms": d }),
            None => serde_json::json!({}),
        };
        LogEntry {
            id: "1".into(),
            source: source.into(),
            level: level.into(),
            timestamp: "t".into(),
            message: "m".into(),
            metadata,
            tags: vec![],
            trace_id: None,
            created_at: 0.0,
            size_bytes: 0,
        }
    }

    #[test]
    fn error_spike_fires_at_threshold() {
        let mut analyzer = Analyzer::new(AnalyzerConfig::default());
        let mut last = vec![];
        for i in 0..10 {
            last = analyzer.analyze(&entry("svc1", "ERROR", None), i as f64);
        }
        assert!(last
            .iter()
            .any(|a| matches!(a, Alert::ErrorSpike { count, .. } if *count == 10)));
    }

    #[test]
    fn error_spike_does_not_fire_below_threshold() {
        let mut analyzer = Analyzer::new(AnalyzerConfig::default());
        let mut all_alerts = vec![];
        for i in 0..9 {
            all_alerts.extend(analyzer.analyze(&entry("svc1", "ERROR", None), i as f64));
        }
        assert!(all_alerts.is_empty());
    }

    #[test]
    fn slow_response_fires_above_multiplier() {
        let mut analyzer = Analyzer::new(AnalyzerConfig::default());
        for i in 0..10 {
            analyzer.analyze(&entry("http_traffic", "INFO", Some(100.0)), i as f64);
        }
        let alerts = analyzer.analyze(&entry("http_traffic", "INFO", Some(1000.0)), 11.0);
        assert!(alerts
            .iter()
            .any(|a| matches!(a, Alert::SlowResponse { .. })));
    }

    #[test]
    fn non_latency_source_ignores_duration() {
        let mut analyzer = Analyzer::new(AnalyzerConfig::default());
        let alerts = analyzer.analyze(&entry("console", "INFO", Some(99999.0)), 0.0);
        assert!(alerts.is_empty());
    }
}
