//! Error types for invsync.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=db, 3=not_found, 4=validation, 5=conflict, etc.)
//! - Retryability flags so the sync engine knows what to back off on
//! - Context-aware recovery hints
//! - Structured JSON output for piped / non-TTY consumers

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for invsync operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
///
/// Each code maps to a SCREAMING_SNAKE string and a category-based
/// exit code. Scripts match on the string or the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Database (exit 2)
    NotInitialized,
    AlreadyInitialized,
    DatabaseError,

    // Not Found (exit 3)
    RecordNotFound,

    // Validation (exit 4)
    ValidationError,
    InvalidArgument,

    // Conflict (exit 5)
    VersionConflict,
    UnresolvedConflict,
    DuplicateRecord,

    // Sync (exit 6)
    TransientNetwork,
    MaxRetriesExceeded,
    RemoteRejected,
    Cancelled,

    // Config (exit 7)
    UnknownStrategy,
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Integrity (exit 9)
    IntegrityError,

    // Internal (exit 1)
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::AlreadyInitialized => "ALREADY_INITIALIZED",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::RecordNotFound => "RECORD_NOT_FOUND",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::VersionConflict => "VERSION_CONFLICT",
            Self::UnresolvedConflict => "UNRESOLVED_CONFLICT",
            Self::DuplicateRecord => "DUPLICATE_RECORD",
            Self::TransientNetwork => "TRANSIENT_NETWORK",
            Self::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            Self::RemoteRejected => "REMOTE_REJECTED",
            Self::Cancelled => "CANCELLED",
            Self::UnknownStrategy => "UNKNOWN_STRATEGY",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::IntegrityError => "INTEGRITY_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-9).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::InternalError => 1,
            Self::NotInitialized | Self::AlreadyInitialized | Self::DatabaseError => 2,
            Self::RecordNotFound => 3,
            Self::ValidationError | Self::InvalidArgument => 4,
            Self::VersionConflict | Self::UnresolvedConflict | Self::DuplicateRecord => 5,
            Self::TransientNetwork
            | Self::MaxRetriesExceeded
            | Self::RemoteRejected
            | Self::Cancelled => 6,
            Self::UnknownStrategy | Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
            Self::IntegrityError => 9,
        }
    }

    /// Whether the failed operation may succeed if simply tried again.
    ///
    /// True for network hiccups, lost OCC races and a busy database.
    /// Integrity, validation and configuration failures never are.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork | Self::VersionConflict | Self::DatabaseError
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in invsync operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Not initialized: run `invsync init` first")]
    NotInitialized,

    #[error("Already initialized at {path}")]
    AlreadyInitialized { path: PathBuf },

    #[error("Record not found: {id}")]
    RecordNotFound { id: String },

    /// Stored checksum does not match the payload. Corruption, never a conflict.
    #[error("Integrity check failed for {id}: stored checksum {expected}, computed {actual}")]
    Integrity {
        id: String,
        expected: String,
        actual: String,
    },

    /// Optimistic concurrency precondition failed.
    #[error("Version conflict on {id}: expected version {expected}, found {actual}")]
    VersionConflict { id: String, expected: i64, actual: i64 },

    #[error("Record {id} has an unresolved sync conflict")]
    UnresolvedConflict { id: String },

    #[error("Unknown resolution strategy: {name}")]
    UnknownStrategy {
        name: String,
        suggestion: Option<String>,
    },

    #[error("Network error: {0}")]
    TransientNetwork(String),

    #[error("Giving up on {id} after {attempts} attempts: {reason}")]
    MaxRetriesExceeded {
        id: String,
        attempts: u32,
        reason: String,
    },

    #[error("Remote rejected request ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Validation failed: {}", format_validation_errors(.0))]
    Validation(Vec<String>),

    /// Admission refused because an existing record is the same invoice.
    #[error("Duplicate of {existing_id} (similarity {score:.3})")]
    Duplicate { existing_id: String, score: f64 },

    #[error("Operation cancelled")]
    Cancelled,

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

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::AlreadyInitialized { .. } => ErrorCode::AlreadyInitialized,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::RecordNotFound { .. } => ErrorCode::RecordNotFound,
            Self::Integrity { .. } => ErrorCode::IntegrityError,
            Self::VersionConflict { .. } => ErrorCode::VersionConflict,
            Self::UnresolvedConflict { .. } => ErrorCode::UnresolvedConflict,
            Self::UnknownStrategy { .. } => ErrorCode::UnknownStrategy,
            Self::TransientNetwork(_) => ErrorCode::TransientNetwork,
            Self::MaxRetriesExceeded { .. } => ErrorCode::MaxRetriesExceeded,
            Self::Remote { .. } => ErrorCode::RemoteRejected,
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::Duplicate { .. } => ErrorCode::DuplicateRecord,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Shorthand for `self.error_code().is_retryable()`.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.error_code().is_retryable()
    }

    /// Context-aware recovery hint for operators.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::NotInitialized => Some("Run `invsync init` to create the local store".to_string()),

            Self::AlreadyInitialized { path } => Some(format!(
                "Store already exists at {}. Use `--force` to reinitialize.",
                path.display()
            )),

            Self::RecordNotFound { id } => Some(format!(
                "No record with ID '{id}'. Use `invsync invoice list` to see stored invoices."
            )),

            Self::Integrity { id, .. } => Some(format!(
                "Record '{id}' is corrupted and will not be synced. \
                 Inspect it with `invsync invoice show {id}` and restore it from the remote copy."
            )),

            Self::VersionConflict { id, actual, .. } => Some(format!(
                "Record '{id}' changed underneath you (now version {actual}). \
                 Re-read it and retry with `--expect-version {actual}`."
            )),

            Self::UnresolvedConflict { id } => Some(format!(
                "Resolve it first: invsync sync resolve {id} --take local|remote"
            )),

            Self::UnknownStrategy { suggestion, .. } => {
                let valid = "Valid strategies: last_write_wins, field_merge, manual";
                match suggestion {
                    Some(s) => Some(format!("Did you mean '{s}'? {valid}")),
                    None => Some(valid.to_string()),
                }
            }

            Self::MaxRetriesExceeded { id, .. } => Some(format!(
                "The queue entry was kept. Once the cause is fixed: invsync sync requeue {id}"
            )),

            Self::Duplicate { existing_id, .. } => Some(format!(
                "An equivalent invoice already exists. Inspect it with `invsync invoice show {existing_id}`."
            )),

            Self::TransientNetwork(_) => {
                Some("Check connectivity to the remote; queued changes are kept locally.".to_string())
            }

            Self::Validation(_)
            | Self::Remote { .. }
            | Self::Cancelled
            | Self::Database(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::InvalidArgument(_)
            | Self::Config(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    ///
    /// Includes error code, message, retryability, exit code, and
    /// optional recovery hint.
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

        if let Self::Validation(errors) = self {
            obj["error"]["details"] = serde_json::json!(errors);
        }

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

/// Format a list of validation errors into one readable string.
///
/// A single error is returned as-is; several are numbered.
#[must_use]
pub fn format_validation_errors(errors: &[String]) -> String {
    match errors {
        [] => String::new(),
        [only] => only.clone(),
        many => {
            let mut formatted = String::from("the following issues were found:");
            for (i, error) in many.iter().enumerate() {
                formatted.push_str(&format!("\n{}. {error}", i + 1));
            }
            formatted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_category() {
        assert_eq!(Error::NotInitialized.exit_code(), 2);
        assert_eq!(Error::RecordNotFound { id: "x".into() }.exit_code(), 3);
        assert_eq!(Error::Validation(vec!["bad".into()]).exit_code(), 4);
        assert_eq!(
            Error::VersionConflict {
                id: "x".into(),
                expected: 2,
                actual: 3
            }
            .exit_code(),
            5
        );
        assert_eq!(Error::TransientNetwork("timeout".into()).exit_code(), 6);
        assert_eq!(
            Error::UnknownStrategy {
                name: "nope".into(),
                suggestion: None
            }
            .exit_code(),
            7
        );
        assert_eq!(
            Error::Integrity {
                id: "x".into(),
                expected: "a".into(),
                actual: "b".into()
            }
            .exit_code(),
            9
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::TransientNetwork("reset".into()).is_retryable());
        assert!(!Error::Validation(vec![]).is_retryable());
        assert!(!Error::Integrity {
            id: "x".into(),
            expected: "a".into(),
            actual: "b".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_structured_json_includes_validation_details() {
        let err = Error::Validation(vec!["Customer name cannot be empty".into()]);
        let json = err.to_structured_json();
        assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(json["error"]["details"][0], "Customer name cannot be empty");
    }

    #[test]
    fn test_format_validation_errors() {
        assert_eq!(format_validation_errors(&[]), "");
        assert_eq!(format_validation_errors(&["one".into()]), "one");
        let many = format_validation_errors(&["a".into(), "b".into()]);
        assert!(many.contains("1. a"));
        assert!(many.contains("2. b"));
    }

    #[test]
    fn test_unknown_strategy_hint_mentions_suggestion() {
        let err = Error::UnknownStrategy {
            name: "feild_merge".into(),
            suggestion: Some("field_merge".into()),
        };
        assert!(err.hint().unwrap().contains("field_merge"));
    }
}
