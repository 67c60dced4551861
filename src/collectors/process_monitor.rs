//! Process monitor collector: polls the system process table and emits
//! events on process start/stop and CPU/memory threshold crossings
//! (spec.md §4.3).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::ProcessMonitorConfig;
use crate::model::LogEntry;

use super::{now_rfc3339, CollectorBuffer, LogClient};

#[derive(Clone)]
struct ProcStats {
    name: String,
    cpu_percent: f32,
    memory_mb: f64,
}

pub fn spawn(
    config: ProcessMonitorConfig,
    client: Arc<LogClient>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let buffer = Arc::new(Mutex::new(CollectorBuffer::new(client, 100)));
        let mut system = System::new_all();
        let mut last_stats: HashMap<Pid, ProcStats> = HashMap::new();
        let interval = Duration::from_secs_f64(config.check_interval_secs.max(0.5));

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    last_stats = check_processes(&config, &mut system, last_stats, &buffer).await;
                }
                _ = shutdown_rx.changed() => break,
            }
        }

        buffer.lock().await.flush().await;
    })
}

async fn check_processes(
    config: &ProcessMonitorConfig,
    system: &mut System,
    last_stats: HashMap<Pid, ProcStats>,
    buffer: &Arc<Mutex<CollectorBuffer>>,
) -> HashMap<Pid, ProcStats> {
    system.refresh_processes();

    let mut current_stats = HashMap::new();
    for (pid, process) in system.processes() {
        let name = process.name().to_string();
        if !config.monitor_processes.is_empty() && !config.monitor_processes.iter().any(|n| n == &name) {
            continue;
        }
        current_stats.insert(
            *pid,
            ProcStats {
                name,
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            },
        );
    }

    for (pid, stats) in &current_stats {
        match last_stats.get(pid) {
            Some(old) => {
                if stats.cpu_percent > 80.0 && old.cpu_percent < 50.0 {
                    record(
                        buffer,
                        "WARN",
                        format!("high cpu usage: {} ({:.1}%)", stats.name, stats.cpu_percent),
                        serde_json::json!({ "pid": pid.as_u32(), "name": stats.name, "cpu_percent": stats.cpu_percent, "memory_mb": stats.memory_mb }),
                        vec!["process", "cpu", "high_usage"],
                    )
                    .await;
                }
                if stats.memory_mb > old.memory_mb * 1.5 && old.memory_mb > 0.0 {
                    record(
                        buffer,
                        "WARN",
                        format!("memory usage increase: {} ({:.1}MB)", stats.name, stats.memory_mb),
                        serde_json::json!({ "pid": pid.as_u32(), "name": stats.name, "memory_mb": stats.memory_mb }),
                        vec!["process", "memory", "increase"],
                    )
                    .await;
                }
            }
            None => {
                record(
                    buffer,
                    "INFO",
                    format!("process started: {} (pid {})", stats.name, pid.as_u32()),
                    serde_json::json!({ "pid": pid.as_u32(), "name": stats.name }),
                    vec!["process", "start"],
                )
                .await;
            }
        }
    }

    for (pid, old) in &last_stats {
        if !current_stats.contains_key(pid) {
            record(
                buffer,
                "INFO",
                format!("process stopped: {} (pid {})", old.name, pid.as_u32()),
                serde_json::json!({ "pid": pid.as_u32(), "name": old.name }),
                vec!["process", "stop"],
            )
            .await;
        }
    }

    current_stats
}

async fn record(
    buffer: &Arc<Mutex<CollectorBuffer>>,
    level: &str,
    message: String,
    metadata: serde_json::Value,
    tags: Vec<&str>,
) {
    let entry = LogEntry {
        id: String::new(),
        source: "process_monitor".to_string(),
        level: level.to_string(),
        timestamp: now_rfc3339(),
        message,
        metadata,
        tags: tags.into_iter().map(String::from).collect(),
        trace_id: None,
        created_at: 0.0,
        size_bytes: 0,
    };
    buffer.lock().await.push(entry).await;
}
