use std::sync::Arc;

use serde::Deserialize;

use crate::google::{AccessChecker, GoogleClient, SheetSource, TextGenerator};
use crate::results::ResultStore;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    /// Credential probes and the service-account email for `permissions.test`.
    pub google: Arc<GoogleClient>,
    pub access: Arc<dyn AccessChecker>,
    pub sheets: Arc<dyn SheetSource>,
    pub generator: Option<Arc<dyn TextGenerator>>,
    pub store: Arc<ResultStore>,
    pub default_folder_id: Option<String>,
}
