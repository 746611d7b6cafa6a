mod config;
mod format;
mod google;
mod ipc;
mod llm;
mod pipeline;
mod results;

use anyhow::Context;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::google::{AccessChecker, GeminiClient, GoogleClient, SheetSource, TextGenerator};
use crate::results::{ResultStore, SystemClock};

fn build_state(cfg: config::Config) -> anyhow::Result<ipc::AppState> {
    let http = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(120))
        .build()
        .context("failed to build http client")?;

    if cfg.credentials.is_none() {
        warn!("no google credentials configured; file access checks will fail");
    }
    let google = Arc::new(GoogleClient::new(
        http.clone(),
        cfg.credentials,
        &cfg.sheet_range,
    ));
    let generator: Option<Arc<dyn TextGenerator>> = match cfg.gemini_api_key {
        Some(key) => Some(Arc::new(GeminiClient::new(http, &key, &cfg.gemini_model)) as Arc<dyn TextGenerator>),
        None => {
            warn!("GOOGLE_API_KEY not set; using rule-based formatting only");
            None
        }
    };
    let store = Arc::new(ResultStore::new(
        chrono::Duration::hours(cfg.result_ttl_hours),
        Arc::new(SystemClock),
    ));

    let access: Arc<dyn AccessChecker> = google.clone();
    let sheets: Arc<dyn SheetSource> = google.clone();

    Ok(ipc::AppState {
        google,
        access,
        sheets,
        generator,
        store,
        default_folder_id: cfg.default_folder_id,
    })
}

fn main() -> anyhow::Result<()> {
    // stdout carries the protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = config::Config::from_env()?;
    let mut state = build_state(cfg)?;
    info!(version = env!("CARGO_PKG_VERSION"), "rosterd ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to echo back.
                let _ = writeln!(
                    stdout,
                    "{}",
                    serde_json::json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string() }
                    })
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }

    Ok(())
}
