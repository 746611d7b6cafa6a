use crate::format::FormattedSheet;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for exercising expiry.
#[cfg(test)]
pub struct ManualClock(Mutex<DateTime<Utc>>);

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        ManualClock(Mutex::new(Utc::now()))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone)]
pub struct JobEntry {
    pub status: JobStatus,
    pub message: String,
    pub data: Option<FormattedSheet>,
    pub created_at: DateTime<Utc>,
}

/// Request results keyed by request id, dropped once older than the TTL.
pub struct ResultStore {
    entries: Mutex<HashMap<String, JobEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ResultStore {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        ResultStore {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, JobEntry>) -> T) -> T {
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn begin(&self, request_id: &str) {
        let entry = JobEntry {
            status: JobStatus::Processing,
            message: "Starting sheet formatting".to_string(),
            data: None,
            created_at: self.clock.now(),
        };
        self.with_entries(|m| m.insert(request_id.to_string(), entry));
    }

    pub fn complete(&self, request_id: &str, data: FormattedSheet) {
        self.with_entries(|m| {
            if let Some(e) = m.get_mut(request_id) {
                e.status = JobStatus::Completed;
                e.message = "Sheet formatting completed successfully".to_string();
                e.data = Some(data);
            }
        });
    }

    pub fn fail(&self, request_id: &str, message: String) {
        self.with_entries(|m| {
            if let Some(e) = m.get_mut(request_id) {
                e.status = JobStatus::Error;
                e.message = message;
                e.data = None;
            }
        });
    }

    pub fn get(&self, request_id: &str) -> Option<JobEntry> {
        self.with_entries(|m| m.get(request_id).cloned())
    }

    /// Removes entries older than the TTL; returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let ttl = self.ttl;
        self.with_entries(|m| {
            let before = m.len();
            m.retain(|_, e| now - e.created_at <= ttl);
            before - m.len()
        })
    }

    pub fn len(&self) -> usize {
        self.with_entries(|m| m.len())
    }
}
