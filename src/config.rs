use crate::google::{Credentials, ServiceAccountKey};
use anyhow::Context;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_SHEET_RANGE: &str = "A1:Z";
pub const DEFAULT_RESULT_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Option<Credentials>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub default_folder_id: Option<String>,
    pub sheet_range: String,
    pub result_ttl_hours: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Blank values are treated as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let credentials = match get("GOOGLE_SHEETS_CREDENTIALS") {
            Some(text) if text != "{}" => {
                let key: ServiceAccountKey = serde_json::from_str(&text)
                    .context("GOOGLE_SHEETS_CREDENTIALS is not a service account key")?;
                Some(Credentials::ServiceAccount(key))
            }
            _ => get("GOOGLE_ACCESS_TOKEN").map(Credentials::AccessToken),
        };

        let result_ttl_hours = match get("RESULT_TTL_HOURS") {
            Some(v) => v
                .parse::<i64>()
                .ok()
                .filter(|h| *h > 0)
                .with_context(|| format!("RESULT_TTL_HOURS must be a positive integer, got {v}"))?,
            None => DEFAULT_RESULT_TTL_HOURS,
        };

        Ok(Config {
            credentials,
            gemini_api_key: get("GOOGLE_API_KEY"),
            gemini_model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            default_folder_id: get("GOOGLE_DRIVE_FOLDER_ID"),
            sheet_range: get("SHEET_RANGE").unwrap_or_else(|| DEFAULT_SHEET_RANGE.to_string()),
            result_ttl_hours,
        })
    }
}
