//! Console collector: supervises configured child processes and turns
//! their stdout/stderr into LogEntry records (spec.md §4.3).

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::ConsoleCollectorConfig;
use crate::model::LogEntry;

use super::{now_rfc3339, spawn_periodic_flush, CollectorBuffer, LogClient};

pub fn spawn(
    config: ConsoleCollectorConfig,
    client: Arc<LogClient>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if config.commands.is_empty() {
            tracing::debug!("console collector: no commands configured, nothing to do");
            return;
        }

        let buffer = Arc::new(Mutex::new(CollectorBuffer::new(client, 100)));
        let flush_task =
            spawn_periodic_flush(buffer.clone(), Duration::from_secs(1), shutdown_rx.clone());

        let mut handles = Vec::new();
        for command in &config.commands {
            handles.push(tokio::spawn(monitor_command(
                command.clone(),
                config.auto_restart,
                buffer.clone(),
                shutdown_rx.clone(),
            )));
        }

        let _ = shutdown_rx.changed().await;
        for handle in handles {
            let _ = handle.await;
        }
        let _ = flush_task.await;
        buffer.lock().await.flush().await;
    })
}

async fn monitor_command(
    command: String,
    auto_restart: bool,
    buffer: Arc<Mutex<CollectorBuffer>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(&command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!("console collector: failed to spawn '{command}': {e}");
                record_error(&buffer, &command, e.to_string()).await;
                return;
            }
        };

        let cmd_tag = command
            .split_whitespace()
            .next()
            .unwrap_or(&command)
            .to_string();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let out_task = tokio::spawn(read_stream(
            stdout,
            "INFO".to_string(),
            command.clone(),
            cmd_tag.clone(),
            buffer.clone(),
        ));
        let err_task = tokio::spawn(read_stream(
            stderr,
            "ERROR".to_string(),
            command.clone(),
            cmd_tag,
            buffer.clone(),
        ));

        tokio::select! {
            _ = shutdown_rx.changed() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
            _ = child.wait() => {}
        }

        let _ = out_task.await;
        let _ = err_task.await;

        if *shutdown_rx.borrow() || !auto_restart {
            return;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

async fn read_stream<R: AsyncRead + Unpin>(
    stream: Option<R>,
    level: String,
    command: String,
    cmd_tag: String,
    buffer: Arc<Mutex<CollectorBuffer>>,
) {
    let Some(stream) = stream else { return };
    let stream_name = if level == "INFO" { "stdout" } else { "stderr" };
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.is_empty() {
            continue;
        }
        let entry = LogEntry {
            id: String::new(),
            source: "console".to_string(),
            level: level.clone(),
            timestamp: now_rfc3339(),
            message: line,
            metadata: serde_json::json!({ "command": command, "stream": stream_name }),
            tags: vec!["console".to_string(), cmd_tag.clone()],
            trace_id: None,
            created_at: 0.0,
            size_bytes: 0,
        };
        buffer.lock().await.push(entry).await;
    }
}

async fn record_error(buffer: &Arc<Mutex<CollectorBuffer>>, command: &str, error: String) {
    let entry = LogEntry {
        id: String::new(),
        source: "console".to_string(),
        level: "ERROR".to_string(),
        timestamp: now_rfc3339(),
        message: format!("failed to launch command: {command}"),
        metadata: serde_json::json!({ "error": error, "command": command }),
        tags: vec!["console".to_string()],
        trace_id: None,
        created_at: 0.0,
        size_bytes: 0,
    };
    buffer.lock().await.push(entry).await;
}
