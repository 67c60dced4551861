//! File watcher collector: recursive filesystem watch over configured
//! directories, emitting one LogEntry per create/modify/delete
//! (spec.md §4.3).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::FileWatcherConfig;
use crate::model::LogEntry;

use super::{now_rfc3339, spawn_periodic_flush, CollectorBuffer, LogClient};

pub fn spawn(
    config: FileWatcherConfig,
    client: Arc<LogClient>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let buffer = Arc::new(Mutex::new(CollectorBuffer::new(client, 100)));
        let flush_task =
            spawn_periodic_flush(buffer.clone(), Duration::from_secs(1), shutdown_rx.clone());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
        let mut watcher = match RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default(),
        ) {
            Ok(w) => w,
            Err(e) => {
                tracing::error!("file_watcher collector: failed to create watcher: {e}");
                return;
            }
        };

        let recursive = if config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        for path in &config.watch_paths {
            if Path::new(path).exists() {
                if let Err(e) = watcher.watch(Path::new(path), recursive) {
                    tracing::warn!("file_watcher collector: failed to watch {path}: {e}");
                } else {
                    tracing::info!("file_watcher collector: watching {path}");
                }
            } else {
                tracing::warn!("file_watcher collector: path does not exist: {path}");
            }
        }

        loop {
            tokio::select! {
                Some(event) = rx.recv() => {
                    handle_event(&config, &buffer, event).await;
                }
                _ = shutdown_rx.changed() => break,
                else => break,
            }
        }

        drop(watcher);
        let _ = flush_task.await;
        buffer.lock().await.flush().await;
    })
}

fn should_ignore(config: &FileWatcherConfig, file_path: &str) -> bool {
    for pattern in &config.ignore_patterns {
        if let Some(suffix) = pattern.strip_prefix('*') {
            if file_path.ends_with(suffix) {
                return true;
            }
        } else if file_path.contains(pattern.as_str()) {
            return true;
        }
    }

    let extension = Path::new(file_path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    !config.include_extensions.is_empty() && !config.include_extensions.iter().any(|e| e == extension)
}

async fn handle_event(
    config: &FileWatcherConfig,
    buffer: &Arc<Mutex<CollectorBuffer>>,
    event: Event,
) {
    let action = match event.kind {
        EventKind::Create(_) => "created",
        EventKind::Modify(_) => "modified",
        EventKind::Remove(_) => "deleted",
        _ => return,
    };

    for path in event.paths {
        let Some(path_str) = path.to_str() else { continue };
        if path.is_dir() || should_ignore(config, path_str) {
            continue;
        }

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path_str)
            .to_string();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string();
        let directory = path
            .parent()
            .and_then(|p| p.to_str())
            .unwrap_or("")
            .to_string();

        let mut metadata = serde_json::json!({
            "action": action,
            "file_path": path_str,
            "file_name": file_name,
            "directory": directory,
        });
        if action != "deleted" {
            if let Ok(meta) = std::fs::metadata(&path) {
                metadata["size"] = serde_json::json!(meta.len());
                if let Ok(modified) = meta.modified() {
                    let datetime: chrono::DateTime<chrono::Utc> = modified.into();
                    metadata["modified_time"] = serde_json::json!(datetime.to_rfc3339());
                }
            }
        }

        let entry = LogEntry {
            id: String::new(),
            source: "file_watcher".to_string(),
            level: "INFO".to_string(),
            timestamp: now_rfc3339(),
            message: format!("file {action}: {file_name}"),
            metadata,
            tags: vec!["file".to_string(), action.to_string(), extension],
            trace_id: None,
            created_at: 0.0,
            size_bytes: 0,
        };
        buffer.lock().await.push(entry).await;
    }
}
