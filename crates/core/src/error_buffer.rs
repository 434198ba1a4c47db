//! Per-run accumulator of failed API requests.
//!
//! An [`ErrorBuffer`] is created at the start of a run, threaded by reference
//! through every push stage, and flushed once by the orchestrator when the
//! run ends, whether it succeeded or not.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::{ApiError, RequestInfo, StoreError};
use crate::models::EntityKind;

/// One failed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub request: RequestInfo,
    pub error: String,
}

impl ErrorRecord {
    pub fn from_api_error(kind: EntityKind, id: impl Into<String>, err: &ApiError) -> Self {
        Self {
            timestamp: Utc::now(),
            entity_kind: kind,
            entity_id: id.into(),
            request: err.request.clone(),
            error: err.kind.to_string(),
        }
    }
}

/// Thread-safe buffer of [`ErrorRecord`]s.
#[derive(Debug, Default)]
pub struct ErrorBuffer {
    records: Mutex<Vec<ErrorRecord>>,
}

impl ErrorBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: ErrorRecord) {
        warn!(
            kind = %record.entity_kind,
            id = %record.entity_id,
            method = %record.request.method,
            uri = %record.request.uri,
            error = %record.error,
            "request failed"
        );
        self.lock().push(record);
    }

    /// Record a failed API call for one entity.
    pub fn record(&self, kind: EntityKind, id: &str, err: &ApiError) {
        self.push(ErrorRecord::from_api_error(kind, id, err));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// A copy of the buffered records in insertion order.
    pub fn records(&self) -> Vec<ErrorRecord> {
        self.lock().clone()
    }

    /// Write the buffered records to `path` as a JSON array. The buffer is
    /// left untouched.
    pub fn flush(&self, path: &Path) -> Result<usize, StoreError> {
        let records = self.records();
        let json = serde_json::to_string_pretty(&records)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, json).map_err(|e| StoreError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        info!(count = records.len(), path = %path.display(), "flushed error log");
        Ok(records.len())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ErrorRecord>> {
        // A poisoned buffer still holds valid records.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ApiErrorKind;

    fn api_error(uri: &str) -> ApiError {
        ApiError::new(
            RequestInfo::new("PUT", uri),
            ApiErrorKind::Validation("missing field".into()),
        )
    }

    #[test]
    fn test_push_and_len() {
        let buffer = ErrorBuffer::new();
        assert!(buffer.is_empty());
        buffer.record(EntityKind::Entry, "e1", &api_error("/spaces/dst/entries/e1"));
        buffer.record(EntityKind::Asset, "a1", &api_error("/spaces/dst/assets/a1"));
        assert_eq!(buffer.len(), 2);
        let records = buffer.records();
        assert_eq!(records[0].entity_id, "e1");
        assert_eq!(records[1].request.uri, "/spaces/dst/assets/a1");
        assert!(records[0].error.contains("missing field"));
    }

    #[test]
    fn test_flush_writes_json_and_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("errors.json");
        let buffer = ErrorBuffer::new();
        buffer.record(EntityKind::Entry, "e1", &api_error("erroruri"));

        let written = buffer.flush(&path).unwrap();
        assert_eq!(written, 1);
        assert_eq!(buffer.len(), 1);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("erroruri"));
        let parsed: Vec<ErrorRecord> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].request.method, "PUT");
    }

    #[test]
    fn test_flush_empty_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.json");
        assert_eq!(ErrorBuffer::new().flush(&path).unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "[]");
    }
}
