// ============================================
// History Provider (瀏覽歷史)
// ============================================

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use tracing::debug;

use crate::error::{PersonalizationError, Result};
use crate::models::HistoryEntry;

/// Which entries the engine wants back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryQuery {
    /// Fields that must be non-empty
    pub required_fields: Vec<String>,
    /// Oldest visit to include
    pub since: Option<DateTime<Utc>>,
}

impl HistoryQuery {
    /// Query covering the last `limit_secs` seconds before `now` (everything when `None`).
    pub fn new(
        required_fields: Vec<String>,
        limit_secs: Option<u64>,
        now: DateTime<Utc>,
    ) -> Self {
        let since = limit_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(Duration::try_seconds)
            .and_then(|window| now.checked_sub_signed(window));

        Self {
            required_fields,
            since,
        }
    }

    pub fn matches(&self, entry: &HistoryEntry) -> bool {
        self.since.map_or(true, |since| entry.visit_timestamp >= since)
            && self.required_fields.iter().all(|field| entry.has_field(field))
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Snapshot of the user's history; an empty history is not an error.
    async fn fetch_history(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>>;
}

/// History exported as a JSON array of entries.
pub struct JsonHistoryProvider {
    path: PathBuf,
}

impl JsonHistoryProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl HistoryProvider for JsonHistoryProvider {
    async fn fetch_history(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No history export found");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(PersonalizationError::History(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let entries: Vec<HistoryEntry> = serde_json::from_slice(&bytes)
            .map_err(|e| PersonalizationError::History(format!("malformed history: {}", e)))?;
        let total = entries.len();

        let entries: Vec<HistoryEntry> = entries.into_iter().filter(|e| query.matches(e)).collect();
        debug!(total = total, kept = entries.len(), "Loaded history export");

        Ok(entries)
    }
}
