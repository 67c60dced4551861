//! JSON-RPC 2.0 method dispatch (spec.md §4.4).
//!
//! A single request object or a batch array are both accepted on `POST
//! /rpc`; each produces its own response object (dispatch never drops a
//! request silently - there are no notifications in this wire protocol,
//! every call expects a correlated response).

use base64::Engine;
use chrono::Utc;
use serde_json::{json, Value};
use sysinfo::System;

use crate::model::LogEntry;
use crate::store::QueryFilter;

use super::error::RpcError;
use super::AppState;

const SERVER_NAME: &str = "Recursive Log System";

pub async fn handle_request(state: &AppState, request: Value) -> Value {
    let id = request.get("id").cloned().unwrap_or(Value::Null);

    let method = match request.get("method").and_then(Value::as_str) {
        Some(m) => m.to_string(),
        None => return error_envelope(id, RpcError::new(super::error::INVALID_REQUEST, "missing method")),
    };
    let params = request.get("params").cloned().unwrap_or(json!({}));

    match dispatch(state, &method, params).await {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err(e) => error_envelope(id, e),
    }
}

fn error_envelope(id: Value, e: RpcError) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": e.code, "message": e.message } })
}

async fn dispatch(state: &AppState, method: &str, params: Value) -> Result<Value, RpcError> {
    match method {
        "ping" => Ok(json!({
            "pong": true,
            "timestamp": Utc::now().to_rfc3339(),
            "server": SERVER_NAME,
        })),
        "log" => rpc_log(state, params).await,
        "log_batch" => rpc_log_batch(state, params).await,
        "query" => rpc_query(state, params),
        "search" => rpc_search(state, params),
        "get_stats" => rpc_get_stats(state, params),
        "get_system_status" => rpc_get_system_status(state),
        "run_analysis" => rpc_run_analysis(state, params),
        "get_error_patterns" => rpc_run_analysis(state, merge_analysis_type(params, "errors")),
        "get_performance_analysis" => rpc_run_analysis(state, merge_analysis_type(params, "performance")),
        "get_trend_analysis" => rpc_run_analysis(state, merge_analysis_type(params, "trends")),
        "detect_anomalies" => rpc_run_analysis(state, merge_analysis_type(params, "patterns")),
        other => Err(RpcError::method_not_found(other)),
    }
}

fn merge_analysis_type(mut params: Value, analysis_type: &str) -> Value {
    if let Value::Object(ref mut map) = params {
        map.entry("analysis_type").or_insert_with(|| json!(analysis_type));
    } else {
        params = json!({ "analysis_type": analysis_type });
    }
    params
}

async fn rpc_log(state: &AppState, params: Value) -> Result<Value, RpcError> {
    let entry: LogEntry = serde_json::from_value(params)
        .map_err(|e| RpcError::invalid_params(format!("invalid log entry: {e}")))?;

    let mut alerts = state
        .store
        .put_batch(vec![entry.clone()])
        .await
        .map_err(RpcError::internal)?;
    let alerts = alerts.pop().unwrap_or_default();

    Ok(json!({
        "status": "received",
        "id": entry.id,
        "alerts": alerts.len(),
    }))
}

async fn rpc_log_batch(state: &AppState, params: Value) -> Result<Value, RpcError> {
    let compress = params.get("compress").and_then(Value::as_bool).unwrap_or(false);

    let entries: Vec<LogEntry> = if compress {
        let encoded = params
            .get("logs")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("compress=true requires 'logs' as base64 string"))?;
        let gz = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| RpcError::invalid_params(format!("invalid base64: {e}")))?;
        let json_bytes = crate::store::archive::decompress(&gz).map_err(RpcError::internal)?;
        serde_json::from_slice(&json_bytes)
            .map_err(|e| RpcError::invalid_params(format!("invalid decompressed logs array: {e}")))?
    } else {
        let logs = params
            .get("logs")
            .cloned()
            .ok_or_else(|| RpcError::invalid_params("missing 'logs'"))?;
        serde_json::from_value(logs)
            .map_err(|e| RpcError::invalid_params(format!("invalid logs array: {e}")))?
    };

    if entries.is_empty() {
        return Ok(json!({ "status": "received", "count": 0, "alerts": 0 }));
    }

    let count = entries.len();
    let alerts = state
        .store
        .put_batch(entries)
        .await
        .map_err(RpcError::internal)?;
    let alert_count: usize = alerts.iter().map(Vec::len).sum();

    Ok(json!({ "status": "received", "count": count, "alerts": alert_count }))
}

fn rpc_query(state: &AppState, params: Value) -> Result<Value, RpcError> {
    let filter = query_filter_from_params(&params);
    let entries = state.store.query(&filter).map_err(RpcError::internal)?;
    let count = entries.len();
    Ok(json!({ "logs": entries, "count": count }))
}

fn rpc_search(state: &AppState, params: Value) -> Result<Value, RpcError> {
    let query = params
        .get("query")
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::invalid_params("missing 'query'"))?
        .to_string();

    let mut filter = QueryFilter {
        search: Some(query.clone()),
        limit: params.get("limit").and_then(Value::as_i64).unwrap_or(100),
        ..Default::default()
    };
    if let Some(timerange) = params.get("timerange").and_then(Value::as_str) {
        filter.since = Some(timerange.to_string());
    }

    let entries = state.store.query(&filter).map_err(RpcError::internal)?;
    let count = entries.len();
    Ok(json!({ "logs": entries, "count": count, "query": query }))
}

fn rpc_get_stats(state: &AppState, params: Value) -> Result<Value, RpcError> {
    let timerange = params
        .get("timerange")
        .and_then(Value::as_str)
        .unwrap_or("1h");
    let stats = state.store.stats(timerange).map_err(RpcError::internal)?;
    serde_json::to_value(stats).map_err(RpcError::internal)
}

fn rpc_get_system_status(state: &AppState) -> Result<Value, RpcError> {
    let stats = state.store.stats("24h").map_err(RpcError::internal)?;
    let metrics = state.store.metrics();
    let db_size_mb = std::fs::metadata(&state.db_path)
        .map(|m| m.len() as f64 / 1_048_576.0)
        .unwrap_or(0.0);
    let memory_usage_mb = current_process_memory_mb();

    Ok(json!({
        "status": "ok",
        "total_logs": stats.basic.total_logs,
        "disk_usage_mb": db_size_mb,
        "memory_usage_mb": memory_usage_mb,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "last_check": Utc::now().to_rfc3339(),
        "events_stored": metrics.events_stored,
        "events_store_failed": metrics.events_store_failed,
    }))
}

fn current_process_memory_mb() -> f64 {
    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0.0;
    };
    let mut system = System::new();
    system.refresh_process(pid);
    system
        .process(pid)
        .map(|p| p.memory() as f64 / 1024.0 / 1024.0)
        .unwrap_or(0.0)
}

fn rpc_run_analysis(state: &AppState, params: Value) -> Result<Value, RpcError> {
    let analysis_type = params
        .get("analysis_type")
        .and_then(Value::as_str)
        .unwrap_or("errors")
        .to_string();
    let time_range = params
        .get("time_range")
        .and_then(Value::as_str)
        .unwrap_or("1h");

    let stats = state.store.stats(time_range).map_err(RpcError::internal)?;

    let result = match analysis_type.as_str() {
        "errors" => json!({
            "analysis_type": "errors",
            "time_range": time_range,
            "top_errors": stats.top_errors,
            "error_sources": stats
                .by_source_level
                .iter()
                .filter(|s| s.level == "ERROR" || s.level == "FATAL")
                .collect::<Vec<_>>(),
        }),
        "performance" => json!({
            "analysis_type": "performance",
            "time_range": time_range,
            "hourly": stats.hourly,
        }),
        "trends" => json!({
            "analysis_type": "trends",
            "time_range": time_range,
            "hourly": stats.hourly,
            "by_source_level": stats.by_source_level,
        }),
        "patterns" => json!({
            "analysis_type": "patterns",
            "time_range": time_range,
            "top_errors": stats.top_errors,
        }),
        other => return Err(RpcError::invalid_params(format!("unknown analysis_type: {other}"))),
    };
    Ok(result)
}

fn query_filter_from_params(params: &Value) -> QueryFilter {
    QueryFilter {
        sources: string_vec(params, "sources"),
        levels: string_vec(params, "levels"),
        trace_id: params.get("trace_id").and_then(Value::as_str).map(String::from),
        since: params.get("since").and_then(Value::as_str).map(String::from),
        until: params.get("until").and_then(Value::as_str).map(String::from),
        search: params.get("search").and_then(Value::as_str).map(String::from),
        limit: params.get("limit").and_then(Value::as_i64).unwrap_or(100),
        offset: params.get("offset").and_then(Value::as_i64).unwrap_or(0),
        include_archived: params
            .get("include_archived")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }
}

fn string_vec(params: &Value, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_filter_from_params_applies_defaults() {
        let filter = query_filter_from_params(&json!({ "sources": ["console"] }));
        assert_eq!(filter.sources, vec!["console".to_string()]);
        assert_eq!(filter.limit, 100);
        assert!(!filter.include_archived);
    }

    #[test]
    fn query_filter_from_params_reads_every_field() {
        let filter = query_filter_from_params(&json!({
            "sources": ["console", "http_traffic"],
            "levels": ["ERROR"],
            "trace_id": "abc",
            "since": "1h",
            "limit": 25,
            "offset": 5,
            "include_archived": true,
        }));
        assert_eq!(filter.levels, vec!["ERROR".to_string()]);
        assert_eq!(filter.trace_id.as_deref(), Some("abc"));
        assert_eq!(filter.since.as_deref(), Some("1h"));
        assert_eq!(filter.limit, 25);
        assert_eq!(filter.offset, 5);
        assert!(filter.include_archived);
    }

    #[test]
    fn merge_analysis_type_inserts_only_when_absent() {
        let merged = merge_analysis_type(json!({}), "errors");
        assert_eq!(merged["analysis_type"], "errors");

        let merged = merge_analysis_type(json!({ "analysis_type": "trends" }), "errors");
        assert_eq!(merged["analysis_type"], "trends");
    }

    #[test]
    fn string_vec_ignores_non_string_elements() {
        let values = string_vec(&json!({ "sources": ["a", 1, "b"] }), "sources");
        assert_eq!(values, vec!["a".to_string(), "b".to_string()]);
    }
}
