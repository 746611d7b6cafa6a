use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::blocking::Client;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Mutex;
use tracing::{debug, warn};

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const SHEETS_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DRIVE_BASE: &str = "https://www.googleapis.com/drive/v3/files";
const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

#[derive(Debug, thiserror::Error)]
pub enum GoogleError {
    #[error("google credentials are not configured")]
    MissingCredentials,
    #[error("gemini api key is not configured")]
    MissingApiKey,
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{api} returned {status}: {body}")]
    Status {
        api: &'static str,
        status: u16,
        body: String,
    },
    #[error("failed to sign token assertion: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("invalid request url: {0}")]
    InvalidUrl(String),
}

pub trait SheetSource: Send + Sync {
    fn fetch_rows(&self, file_id: &str) -> Result<Vec<Vec<Value>>, GoogleError>;
}

pub trait AccessChecker: Send + Sync {
    /// Fails closed: any error means no access.
    fn can_access(&self, file_id: &str, folder_id: Option<&str>) -> bool;
}

pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String, GoogleError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Credentials {
    ServiceAccount(ServiceAccountKey),
    AccessToken(String),
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct CachedToken {
    scope: String,
    token: String,
    expires_at: DateTime<Utc>,
}

/// Appends each segment percent-encoded, so ids cannot add path parts or a query.
pub fn api_url(base: &str, segments: &[&str]) -> Result<Url, GoogleError> {
    let mut url = Url::parse(base).map_err(|e| GoogleError::InvalidUrl(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| GoogleError::InvalidUrl(format!("{base} cannot take path segments")))?
        .extend(segments);
    Ok(url)
}

fn check_status(
    api: &'static str,
    resp: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, GoogleError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(GoogleError::Status {
        api,
        status: status.as_u16(),
        body,
    })
}

/// Sheets and Drive access on behalf of one set of credentials.
pub struct GoogleClient {
    http: Client,
    credentials: Option<Credentials>,
    sheet_range: String,
    tokens: Mutex<Vec<CachedToken>>,
}

impl GoogleClient {
    pub fn new(http: Client, credentials: Option<Credentials>, sheet_range: &str) -> Self {
        GoogleClient {
            http,
            credentials,
            sheet_range: sheet_range.to_string(),
            tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn service_account_email(&self) -> Option<&str> {
        match self.credentials.as_ref()? {
            Credentials::ServiceAccount(key) => Some(key.client_email.as_str()),
            Credentials::AccessToken(_) => None,
        }
    }

    fn access_token(&self, scope: &str) -> Result<String, GoogleError> {
        let key = match self.credentials.as_ref() {
            None => return Err(GoogleError::MissingCredentials),
            Some(Credentials::AccessToken(t)) => return Ok(t.clone()),
            Some(Credentials::ServiceAccount(key)) => key,
        };

        let now = Utc::now();
        {
            let cache = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.iter().find(|t| t.scope == scope && t.expires_at > now) {
                return Ok(hit.token.clone());
            }
        }

        let token_uri = key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let claims = AssertionClaims {
            iss: &key.client_email,
            scope,
            aud: token_uri,
            iat: now.timestamp(),
            exp: (now + Duration::hours(1)).timestamp(),
        };
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &signing_key)?;

        debug!(scope, "requesting service account token");
        let resp = self
            .http
            .post(token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()?;
        let parsed: TokenResponse = check_status("oauth2", resp)?.json()?;

        // Refresh a minute early.
        let lifetime = parsed.expires_in.unwrap_or(3600).max(120) - 60;
        let mut cache = self.tokens.lock().unwrap_or_else(|e| e.into_inner());
        cache.retain(|t| t.scope != scope);
        cache.push(CachedToken {
            scope: scope.to_string(),
            token: parsed.access_token.clone(),
            expires_at: now + Duration::seconds(lifetime),
        });
        Ok(parsed.access_token)
    }

    fn file_parents(&self, file_id: &str) -> Result<Vec<String>, GoogleError> {
        let token = self.access_token(DRIVE_SCOPE)?;
        let resp = self
            .http
            .get(api_url(DRIVE_BASE, &[file_id])?)
            .bearer_auth(token)
            .query(&[("fields", "parents"), ("supportsAllDrives", "true")])
            .send()?;
        let body: Value = check_status("drive", resp)?.json()?;
        Ok(body
            .get("parents")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|p| p.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default())
    }

    pub fn probe_sheets(&self) -> Result<(), GoogleError> {
        self.access_token(SHEETS_SCOPE).map(|_| ())
    }

    pub fn probe_drive(&self) -> Result<(), GoogleError> {
        let token = self.access_token(DRIVE_SCOPE)?;
        let resp = self
            .http
            .get(DRIVE_BASE)
            .bearer_auth(token)
            .query(&[("pageSize", "1")])
            .send()?;
        check_status("drive", resp)?;
        Ok(())
    }
}

impl SheetSource for GoogleClient {
    fn fetch_rows(&self, file_id: &str) -> Result<Vec<Vec<Value>>, GoogleError> {
        let token = self.access_token(SHEETS_SCOPE)?;
        let resp = self
            .http
            .get(api_url(SHEETS_BASE, &[file_id, "values", &self.sheet_range])?)
            .bearer_auth(token)
            .send()?;
        let body: Value = check_status("sheets", resp)?.json()?;
        values_grid(&body)
    }
}

impl AccessChecker for GoogleClient {
    fn can_access(&self, file_id: &str, folder_id: Option<&str>) -> bool {
        match self.file_parents(file_id) {
            Ok(parents) => match folder_id {
                Some(folder) => parents.iter().any(|p| p == folder),
                None => true,
            },
            Err(e) => {
                warn!(file_id, error = %e, "file access check failed");
                false
            }
        }
    }
}

/// Extracts the `values` grid of a Sheets response. A sheet with no data
/// has no `values` key at all.
pub fn values_grid(body: &Value) -> Result<Vec<Vec<Value>>, GoogleError> {
    let Some(values) = body.get("values") else {
        return Ok(Vec::new());
    };
    let Some(rows) = values.as_array() else {
        return Err(GoogleError::Decode("values is not an array".to_string()));
    };
    rows.iter()
        .map(|row| match row {
            Value::Array(cells) => Ok(cells.clone()),
            _ => Err(GoogleError::Decode("row is not an array".to_string())),
        })
        .collect()
}

pub struct GeminiClient {
    http: Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(http: Client, api_key: &str, model: &str) -> Self {
        GeminiClient {
            http,
            api_key: api_key.to_string(),
            model: model.trim_start_matches("models/").to_string(),
        }
    }
}

impl TextGenerator for GeminiClient {
    fn generate(&self, prompt: &str) -> Result<String, GoogleError> {
        if self.api_key.trim().is_empty() {
            return Err(GoogleError::MissingApiKey);
        }
        let resp = self
            .http
            .post(api_url(GEMINI_BASE, &[&format!("{}:generateContent", self.model)])?)
            .query(&[("key", self.api_key.as_str())])
            .json(&json!({
                "contents": [{ "parts": [{ "text": prompt }] }]
            }))
            .send()?;
        let body: Value = check_status("gemini", resp)?.json()?;
        candidate_text(&body)
    }
}

/// Concatenates the text parts of the first candidate.
pub fn candidate_text(body: &Value) -> Result<String, GoogleError> {
    let parts = body
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| GoogleError::Decode("response has no candidate content".to_string()))?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        return Err(GoogleError::Decode("candidate has no text".to_string()));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_grid_handles_missing_and_ragged_rows() {
        assert!(values_grid(&json!({ "range": "A1:Z" })).expect("empty").is_empty());
        let grid = values_grid(&json!({ "values": [["Year 3"], ["Anaru Ngata", "M"]] }))
            .expect("grid");
        assert_eq!(grid.len(), 2);
        assert_eq!(grid[1].len(), 2);
        assert!(values_grid(&json!({ "values": ["flat"] })).is_err());
    }

    #[test]
    fn api_url_escapes_ids_and_ranges() {
        let url = api_url(SHEETS_BASE, &["a/b?c#d", "values", "Sheet 1!A1:Z"]).expect("url");
        assert_eq!(url.path(), "/v4/spreadsheets/a%2Fb%3Fc%23d/values/Sheet%201!A1:Z");
        assert!(url.query().is_none());
        assert!(url.fragment().is_none());

        let gemini = api_url(GEMINI_BASE, &["gemini-2.0-flash:generateContent"]).expect("url");
        assert_eq!(
            gemini.as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn candidate_text_joins_parts() {
        let body = json!({
            "candidates": [{ "content": { "parts": [{ "text": "{\"rows\"" }, { "text": ": []}" }] } }]
        });
        assert_eq!(candidate_text(&body).expect("text"), "{\"rows\": []}");
        assert!(candidate_text(&json!({ "candidates": [] })).is_err());
    }

    #[test]
    fn missing_credentials_fail_closed() {
        let client = GoogleClient::new(Client::new(), None, "A1:Z");
        assert!(!client.can_access("file", None));
        assert!(matches!(
            client.fetch_rows("file"),
            Err(GoogleError::MissingCredentials)
        ));
        assert!(client.service_account_email().is_none());
    }

    #[test]
    fn gemini_without_key_is_an_error() {
        let gemini = GeminiClient::new(Client::new(), " ", "models/gemini-2.0-flash");
        assert_eq!(gemini.model, "gemini-2.0-flash");
        assert!(matches!(gemini.generate("Test"), Err(GoogleError::MissingApiKey)));
    }
}
