use crate::ipc::error::ok;
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};
use tracing::info;

fn handle_health(_state: &mut AppState, req: &Request) -> Value {
    ok(
        &req.id,
        json!({
            "status": "healthy",
            "service": "Google Sheets Formatter",
            "version": env!("CARGO_PKG_VERSION"),
        }),
    )
}

fn handle_permissions_test(state: &mut AppState, req: &Request) -> Value {
    let mut details = Map::new();

    let sheets_api = match state.google.probe_sheets() {
        Ok(()) => {
            details.insert("sheets".into(), json!("Successfully connected to Sheets API"));
            true
        }
        Err(e) => {
            details.insert("sheets".into(), json!(format!("Sheets API Error: {e}")));
            false
        }
    };

    let drive_api = match state.google.probe_drive() {
        Ok(()) => {
            details.insert("drive".into(), json!("Successfully connected to Drive API"));
            true
        }
        Err(e) => {
            details.insert("drive".into(), json!(format!("Drive API Error: {e}")));
            false
        }
    };

    let gemini = match state.generator.as_ref() {
        Some(generator) => generator.generate("Test").map(|_| ()).map_err(|e| e.to_string()),
        None => Err("gemini api key is not configured".to_string()),
    };
    let gemini_api = match gemini {
        Ok(()) => {
            details.insert("gemini".into(), json!("Successfully connected to Gemini API"));
            true
        }
        Err(e) => {
            details.insert("gemini".into(), json!(format!("Gemini API Error: {e}")));
            false
        }
    };

    details.insert(
        "serviceAccount".into(),
        json!(state.google.service_account_email().unwrap_or("Not found")),
    );
    info!(sheets_api, drive_api, gemini_api, "permissions checked");

    ok(
        &req.id,
        json!({
            "sheetsApi": sheets_api,
            "driveApi": drive_api,
            "geminiApi": gemini_api,
            "details": Value::Object(details),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "permissions.test" => Some(handle_permissions_test(state, req)),
        _ => None,
    }
}
