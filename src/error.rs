//! Error types for mapsync.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=storage, 3=not_found, 4=validation, etc.)
//! - Retryability flags for scripted callers
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use std::path::PathBuf;
use thiserror::Error;

use crate::api::ApiError;
use crate::host::HostError;
use crate::sync::SyncError;

/// Result type alias for mapsync operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Storage (exit 2)
    DatabaseError,

    // Not Found (exit 3)
    ProjectNotFound,
    NoMapToUpdate,

    // Validation (exit 4)
    InvalidProject,
    InvalidArgument,
    NothingToPublish,

    // Credentials (exit 5)
    NotLoggedIn,
    CredentialsRejected,
    PremiumRequired,

    // Sync (exit 6)
    SyncError,
    RemoteError,
    Cancelled,
    Busy,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Network (exit 9)
    ConnectionError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::DatabaseError => "DATABASE_ERROR",
            Self::ProjectNotFound => "PROJECT_NOT_FOUND",
            Self::NoMapToUpdate => "NO_MAP_TO_UPDATE",
            Self::InvalidProject => "INVALID_PROJECT",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::NothingToPublish => "NOTHING_TO_PUBLISH",
            Self::NotLoggedIn => "NOT_LOGGED_IN",
            Self::CredentialsRejected => "CREDENTIALS_REJECTED",
            Self::PremiumRequired => "PREMIUM_REQUIRED",
            Self::SyncError => "SYNC_ERROR",
            Self::RemoteError => "REMOTE_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Busy => "BUSY",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-9).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::DatabaseError => 2,
            Self::ProjectNotFound | Self::NoMapToUpdate => 3,
            Self::InvalidProject | Self::InvalidArgument | Self::NothingToPublish => 4,
            Self::NotLoggedIn | Self::CredentialsRejected | Self::PremiumRequired => 5,
            Self::SyncError | Self::RemoteError | Self::Cancelled | Self::Busy => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
            Self::ConnectionError => 9,
        }
    }

    /// Whether retrying the same command may succeed without user changes.
    ///
    /// True for network failures and for a sync that was busy or failed
    /// half-way (a rerun resumes from the remote state).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionError | Self::SyncError | Self::Busy | Self::DatabaseError
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in mapsync operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not logged in: no API key configured")]
    NotLoggedIn,

    #[error("API key was rejected by the server")]
    CredentialsRejected,

    #[error("Cannot reach the map service: {0}")]
    Connection(String),

    #[error("Project file not found: {path}")]
    ProjectNotFound { path: PathBuf },

    #[error("Invalid project: {0}")]
    InvalidProject(String),

    #[error(transparent)]
    Sync(SyncError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl From<ApiError> for Error {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized { .. } => Self::CredentialsRejected,
            ApiError::Transport(e) => Self::Connection(e.to_string()),
            other => Self::Sync(SyncError::Api(other)),
        }
    }
}

impl From<SyncError> for Error {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Api(e) => e.into(),
            SyncError::Host(e) => e.into(),
            SyncError::Io(e) => Self::Io(e),
            other => Self::Sync(other),
        }
    }
}

impl From<HostError> for Error {
    fn from(err: HostError) -> Self {
        match err {
            HostError::NotFound(path) => Self::ProjectNotFound { path },
            HostError::Invalid(msg) => Self::InvalidProject(msg),
            HostError::Storage(e) => Self::Database(e),
            HostError::Io(e) => Self::Io(e),
            HostError::Json(e) => Self::Json(e),
            HostError::Export(msg) => Self::Other(msg),
        }
    }
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotLoggedIn => ErrorCode::NotLoggedIn,
            Self::CredentialsRejected => ErrorCode::CredentialsRejected,
            Self::Connection(_) => ErrorCode::ConnectionError,
            Self::ProjectNotFound { .. } => ErrorCode::ProjectNotFound,
            Self::InvalidProject(_) => ErrorCode::InvalidProject,
            Self::Sync(e) => e.error_code(),
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint for humans and scripts.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotLoggedIn => Some(
                "Run `mapsync login --api-key <KEY>` or set MAPSYNC_API_KEY".to_string(),
            ),
            Self::CredentialsRejected => Some(
                "Your API key may have been deleted. Run `mapsync logout` and log in again."
                    .to_string(),
            ),
            Self::Connection(_) => Some(
                "It looks like you are not connected to the internet. \
                 Check your connection and try again."
                    .to_string(),
            ),
            Self::ProjectNotFound { path } => Some(format!(
                "No project file at {}. Pass the path to a project JSON file.",
                path.display()
            )),
            Self::Sync(e) => e.hint(),
            Self::InvalidProject(_)
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::InvalidArgument(_)
            | Self::Config(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;

    #[test]
    fn test_exit_codes_by_category() {
        assert_eq!(Error::NotLoggedIn.exit_code(), 5);
        assert_eq!(Error::Sync(SyncError::Busy).exit_code(), 6);
        assert_eq!(Error::Sync(SyncError::PremiumRequired).exit_code(), 5);
        assert_eq!(Error::Connection("down".into()).exit_code(), 9);
        assert_eq!(Error::Other("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_unauthorized_maps_to_credentials() {
        let err: Error = ApiError::Unauthorized { status: 401 }.into();
        assert!(matches!(err, Error::CredentialsRejected));
        assert!(err.hint().is_some());
    }

    #[test]
    fn test_transport_maps_to_connection() {
        let err: Error =
            ApiError::Transport(TransportError::Connection("refused".into())).into();
        assert_eq!(err.error_code(), ErrorCode::ConnectionError);
        assert!(err.error_code().is_retryable());
    }

    #[test]
    fn test_sync_errors_flatten() {
        let err: Error = SyncError::Host(HostError::Invalid("bad".into())).into();
        assert!(matches!(err, Error::InvalidProject(_)));

        let err: Error = SyncError::Api(ApiError::Unauthorized { status: 403 }).into();
        assert!(matches!(err, Error::CredentialsRejected));

        let err: Error = SyncError::NoMapToUpdate.into();
        assert_eq!(err.error_code(), ErrorCode::NoMapToUpdate);
        assert!(err.hint().is_some());
    }

    #[test]
    fn test_structured_json_shape() {
        let json = Error::NotLoggedIn.to_structured_json();
        assert_eq!(json["error"]["code"], "NOT_LOGGED_IN");
        assert_eq!(json["error"]["exit_code"], 5);
        assert!(json["error"]["hint"].is_string());
    }
}
