use crate::format::SchoolMetadata;
use crate::google::{SheetSource, TextGenerator};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::pipeline;
use crate::results::JobStatus;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

fn parse_metadata(params: &Value) -> Result<SchoolMetadata, HandlerErr> {
    let Some(raw) = params.get("metadata") else {
        return Err(HandlerErr::bad_params("missing metadata"));
    };
    serde_json::from_value::<SchoolMetadata>(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid metadata: {e}")))
}

fn parse_rows(params: &Value) -> Result<Vec<Vec<Value>>, HandlerErr> {
    let Some(rows) = params.get("rows").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("rows must be an array of arrays"));
    };
    rows.iter()
        .enumerate()
        .map(|(i, row)| match row {
            Value::Array(cells) => Ok(cells.clone()),
            _ => Err(HandlerErr::bad_params(format!("rows[{i}] must be an array"))),
        })
        .collect()
}

fn handle_format_start(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let file_id = get_required_str(&req.params, "fileId")?;
    let metadata = parse_metadata(&req.params)?;

    let folder_id = metadata
        .folder_id
        .clone()
        .filter(|f| !f.trim().is_empty())
        .or_else(|| state.default_folder_id.clone());
    if !state.access.can_access(&file_id, folder_id.as_deref()) {
        return Err(HandlerErr {
            code: "access_denied",
            message: "Access denied to the specified file".to_string(),
            details: None,
        });
    }

    let request_id = Uuid::new_v4().to_string();
    state.store.begin(&request_id);

    let store = Arc::clone(&state.store);
    let sheets = Arc::clone(&state.sheets);
    let generator = state.generator.clone();
    let worker_id = request_id.clone();
    let spawned = std::thread::Builder::new()
        .name(format!("format-{}", &request_id[..8]))
        .spawn(move || {
            let sheets: &dyn SheetSource = &*sheets;
            let generator: Option<&dyn TextGenerator> = generator.as_deref();
            pipeline::process_request(&store, &worker_id, &file_id, &metadata, sheets, generator);
        });
    if let Err(e) = spawned {
        warn!(request_id, error = %e, "failed to start formatting worker");
        state
            .store
            .fail(&request_id, format!("Error starting sheet formatting: {e}"));
    }

    let swept = state.store.sweep_expired();
    if swept > 0 {
        info!(swept, remaining = state.store.len(), "expired results removed");
    }

    Ok(json!({
        "requestId": request_id,
        "status": "processing",
        "message": "Sheet formatting started",
    }))
}

fn handle_format_status(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let request_id = get_required_str(&req.params, "requestId")?;
    let Some(entry) = state.store.get(&request_id) else {
        return Err(HandlerErr {
            code: "not_found",
            message: "Request ID not found".to_string(),
            details: None,
        });
    };

    let mut result = json!({
        "status": entry.status,
        "message": entry.message,
    });
    if entry.status == JobStatus::Completed {
        if let Some(data) = entry.data {
            result["data"] = json!(data);
        }
    }
    Ok(result)
}

fn handle_format_rows(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let rows = parse_rows(&req.params)?;
    let metadata = parse_metadata(&req.params)?;
    let (sheet, source) =
        pipeline::format_sheet_data(&rows, &metadata, state.generator.as_deref());
    Ok(json!({
        "headers": sheet.headers,
        "rows": sheet.rows,
        "source": source,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "format.start" => handle_format_start(state, req),
        "format.status" => handle_format_status(state, req),
        "format.rows" => handle_format_rows(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
