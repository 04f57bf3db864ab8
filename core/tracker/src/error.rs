//! Error types for the track recorder daemon.

use std::path::PathBuf;

/// All errors that can occur while handling tracker commands.
///
/// Protocol responses carry only `code()` and the display string; the
/// variants keep their sources for logging.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    // ─────────────────────────────────────────────────────────────────────
    // Store Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Track store error: {context}: {source}")]
    Store {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Track store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Track not found: {0}")]
    TrackNotFound(i64),

    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Configuration file malformed: {path}: {details}")]
    ConfigMalformed { path: PathBuf, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // I/O Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl TrackerError {
    /// Busy or locked databases are reported as unavailable so callers can
    /// tell a transient failure from a broken store.
    pub fn store(context: impl Into<String>) -> impl FnOnce(rusqlite::Error) -> Self {
        let context = context.into();
        move |source| match source.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked) => {
                TrackerError::StoreUnavailable(format!("{}: {}", context, source))
            }
            _ => TrackerError::Store { context, source },
        }
    }

    pub fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| TrackerError::Io { context, source }
    }

    pub fn json(context: impl Into<String>) -> impl FnOnce(serde_json::Error) -> Self {
        let context = context.into();
        move |source| TrackerError::Json { context, source }
    }

    /// Stable code reported in protocol error responses.
    pub fn code(&self) -> &'static str {
        match self {
            TrackerError::Store { .. } | TrackerError::StoreUnavailable(_) => "store_error",
            TrackerError::TrackNotFound(_) => "track_not_found",
            TrackerError::HomeDirNotFound | TrackerError::ConfigMalformed { .. } => {
                "config_error"
            }
            TrackerError::Io { .. } => "io_error",
            TrackerError::Json { .. } => "serialization_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
