//! Error types for the space-sync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`.
//! [`SyncError`] is what a run returns and wraps the store failures that
//! abort it.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// API errors
// ---------------------------------------------------------------------------

/// The request that produced an [`ApiError`]. Recorded verbatim in the
/// error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub method: String,
    pub uri: String,
}

impl RequestInfo {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
        }
    }
}

impl fmt::Display for RequestInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.uri)
    }
}

/// A failed call against the delivery or management API.
#[derive(Debug, Error)]
#[error("{request}: {kind}")]
pub struct ApiError {
    pub request: RequestInfo,
    pub kind: ApiErrorKind,
}

impl ApiError {
    pub fn new(request: RequestInfo, kind: ApiErrorKind) -> Self {
        Self { request, kind }
    }

    /// Whether the call may succeed if issued again.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self.kind, ApiErrorKind::VersionConflict)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, ApiErrorKind::NotFound)
    }

    /// Server-provided wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.kind {
            ApiErrorKind::RateLimited { retry_after } => retry_after,
            _ => None,
        }
    }
}

/// Classification of an [`ApiError`].
#[derive(Debug, Error)]
pub enum ApiErrorKind {
    /// HTTP 429.
    #[error("rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    /// HTTP 409: the version sent is not the current one.
    #[error("version conflict")]
    VersionConflict,

    /// HTTP 401 / 403.
    #[error("authentication failed (HTTP {0})")]
    Unauthorized(u16),

    /// HTTP 404.
    #[error("resource not found")]
    NotFound,

    /// HTTP 422: payload rejected (missing reference, invalid field, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// HTTP 5xx.
    #[error("server error (HTTP {status}): {body}")]
    Server { status: u16, body: String },

    /// Any other non-success status.
    #[error("API error (HTTP {status}): {body}")]
    Http { status: u16, body: String },

    /// Network / TLS / timeout failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The response body did not have the expected shape.
    #[error("response parse error: {0}")]
    Parse(String),
}

impl ApiErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::VersionConflict | Self::Server { .. } | Self::Transport(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Sync errors
// ---------------------------------------------------------------------------

/// Errors that abort a sync run. Per-item push failures never surface here;
/// they are collected in the [`ErrorBuffer`](crate::error_buffer::ErrorBuffer).
#[derive(Debug, Error)]
pub enum SyncError {
    /// A fresh sync was requested against a destination that already holds
    /// content types or assets.
    #[error("destination space already has content (EXISTING_CONTENT)")]
    ExistingContentConflict,

    /// The source space could not be read.
    #[error("source space unavailable: {0}")]
    SourceUnavailable(#[source] ApiError),

    /// The destination space could not be read.
    #[error("destination space unavailable: {0}")]
    DestinationUnavailable(#[source] ApiError),

    /// The sync feed ended without handing out a continuation token.
    #[error("source sync feed ended without a sync token")]
    MissingSyncToken,

    /// Another run on the same [`SpaceSync`](crate::sync_engine::SpaceSync)
    /// is in progress.
    #[error("a sync run is already in progress (started at {started_at})")]
    AlreadyRunning { started_at: String },

    /// A state-machine transition was invalid.
    #[error("invalid push state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Token or error log persistence failed.
    #[error("sync store error: {0}")]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Errors from the sync token store and the error log writer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing a file failed.
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The error log could not be serialized.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
