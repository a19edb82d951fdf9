use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use anyhow::Error as AnyhowError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use sqlx::Error as SqlxError;
use std::io::Error as IoError;
use ts_rs::TS;

/// A structured application error carried through every service layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AppError {
    /// Machine readable error code, namespaced as `AREA/DETAIL`.
    pub code: String,
    /// Human friendly message. Only surfaced to clients for non-storage errors.
    pub message: String,
    /// Arbitrary key/value pairs that provide additional context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    #[ts(as = "Option<_>", optional)]
    pub context: HashMap<String, String>,
    /// Optional nested cause that preserves the error chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

/// Client-facing classification of an [`AppError`], derived from its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidEntityType,
    Validation,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    StorageUnavailable,
    Internal,
}

impl ErrorKind {
    pub fn status_code(self) -> u16 {
        match self {
            ErrorKind::InvalidEntityType | ErrorKind::Validation => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::StorageUnavailable => 503,
            ErrorKind::Internal => 500,
        }
    }
}

impl AppError {
    /// Default code used when an upstream error does not expose a specific code.
    pub const UNKNOWN_CODE: &'static str = "APP/UNKNOWN";
    /// Code used for errors created from free-form messages.
    pub const GENERIC_CODE: &'static str = "APP/GENERIC";

    pub const INVALID_ENTITY_TYPE: &'static str = "ENTITY/INVALID_TYPE";
    pub const MISSING_FIELD: &'static str = "VALIDATION/MISSING_FIELD";
    pub const INVALID_FIELD: &'static str = "VALIDATION/INVALID_FIELD";
    pub const UNKNOWN_FIELD: &'static str = "VALIDATION/UNKNOWN_FIELD";
    pub const UNAUTHORIZED: &'static str = "AUTH/UNAUTHORIZED";
    pub const FORBIDDEN: &'static str = "AUTH/FORBIDDEN";
    pub const ACCOUNT_DISABLED: &'static str = "AUTH/ACCOUNT_DISABLED";
    pub const NOT_FOUND: &'static str = "RECORD/NOT_FOUND";
    pub const CONFLICT: &'static str = "RECORD/CONFLICT";
    pub const STORAGE_UNAVAILABLE: &'static str = "STORAGE/UNAVAILABLE";

    /// Construct a new application error with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn invalid_entity_type(entity_type: &str) -> Self {
        AppError::new(
            Self::INVALID_ENTITY_TYPE,
            format!("Invalid table name: {entity_type}"),
        )
        .with_context("entity_type", entity_type.to_string())
    }

    pub fn missing_field(field: &str) -> Self {
        AppError::new(
            Self::MISSING_FIELD,
            format!("Missing required field: {field}"),
        )
        .with_context("field", field.to_string())
    }

    pub fn invalid_field(field: &str, reason: impl fmt::Display) -> Self {
        AppError::new(Self::INVALID_FIELD, format!("Invalid value for {field}: {reason}"))
            .with_context("field", field.to_string())
    }

    pub fn not_found(what: &str) -> Self {
        AppError::new(Self::NOT_FOUND, format!("{what} not found"))
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        AppError::new(Self::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        AppError::new(Self::FORBIDDEN, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        AppError::new(Self::CONFLICT, message)
    }

    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        AppError::new(Self::STORAGE_UNAVAILABLE, message)
    }

    /// Returns the error code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the contextual metadata associated with the error.
    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    /// Returns the nested cause if one is present.
    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    /// Classifies the error for transport. Unrecognised codes are internal.
    pub fn kind(&self) -> ErrorKind {
        let code = self.code.as_str();
        match code {
            Self::INVALID_ENTITY_TYPE => ErrorKind::InvalidEntityType,
            Self::UNAUTHORIZED => ErrorKind::Unauthorized,
            Self::FORBIDDEN | Self::ACCOUNT_DISABLED => ErrorKind::Forbidden,
            Self::NOT_FOUND => ErrorKind::NotFound,
            Self::CONFLICT => ErrorKind::Conflict,
            Self::STORAGE_UNAVAILABLE => ErrorKind::StorageUnavailable,
            _ if code.starts_with("VALIDATION/") || code.starts_with("ATTACHMENTS/") => {
                ErrorKind::Validation
            }
            _ => ErrorKind::Internal,
        }
    }

    /// Adds a contextual key/value pair to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Extends the context map with additional key/value pairs.
    pub fn with_contexts<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.context
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the nested cause for the error.
    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            write!(f, "[{}] {} ({:?})", self.code, self.message, self.context)
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<&str> for AppError {
    fn from(message: &str) -> Self {
        AppError::new(AppError::GENERIC_CODE, message)
    }
}

impl From<String> for AppError {
    fn from(message: String) -> Self {
        AppError::new(AppError::GENERIC_CODE, message)
    }
}

impl From<AnyhowError> for AppError {
    fn from(error: AnyhowError) -> Self {
        fn convert(err: &(dyn StdError + 'static)) -> AppError {
            if let Some(app) = err.downcast_ref::<AppError>() {
                return app.clone();
            }

            let mut root = AppError::new(AppError::UNKNOWN_CODE, err.to_string());
            if let Some(source) = err.source() {
                root.cause = Some(Box::new(convert(source)));
            }
            root
        }

        convert(error.as_ref())
    }
}

impl From<IoError> for AppError {
    fn from(error: IoError) -> Self {
        let code = format!("IO/{:?}", error.kind());
        let mut app_error = AppError::new(code, error.to_string());
        if let Some(os_code) = error.raw_os_error() {
            app_error = app_error.with_context("os_code", os_code.to_string());
        }
        app_error
    }
}

impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        let code = if error.is_data() {
            "JSON/DATA"
        } else if error.is_syntax() {
            "JSON/SYNTAX"
        } else if error.is_eof() {
            "JSON/EOF"
        } else if error.is_io() {
            "JSON/IO"
        } else {
            "JSON/ERROR"
        };

        let mut app_error = AppError::new(code, error.to_string());
        let line = error.line();
        if line > 0 {
            app_error = app_error.with_context("line", line.to_string());
        }
        let column = error.column();
        if column > 0 {
            app_error = app_error.with_context("column", column.to_string());
        }
        app_error
    }
}

// SQLITE_BUSY and SQLITE_LOCKED, including their extended variants.
fn is_busy_code(code: &str) -> bool {
    code.parse::<i64>()
        .map(|c| matches!(c & 0xff, 5 | 6))
        .unwrap_or(false)
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::RowNotFound => AppError::not_found("Record"),
            SqlxError::ColumnNotFound(name) => {
                AppError::new("SQLX/COLUMN_NOT_FOUND", format!("Column not found: {name}"))
            }
            SqlxError::PoolTimedOut => {
                AppError::storage_unavailable("Timed out acquiring a database connection")
                    .with_context("source", "pool_timeout")
            }
            SqlxError::PoolClosed => AppError::storage_unavailable("Database pool is closed")
                .with_context("source", "pool_closed"),
            SqlxError::Io(err) => AppError::from(err).with_context("source", "sqlx"),
            SqlxError::Database(db) => {
                let raw_code = db.code().map(|c| c.to_string());
                let mut app_error = if db.is_unique_violation() {
                    AppError::conflict("A record with the same unique value already exists")
                } else if raw_code.as_deref().is_some_and(is_busy_code) {
                    AppError::storage_unavailable("Database is busy")
                } else {
                    let code = raw_code
                        .as_deref()
                        .map(|code| format!("Sqlite/{code}"))
                        .unwrap_or_else(|| "SQLX/DATABASE".to_string());
                    AppError::new(code, db.message().to_string())
                };
                app_error = app_error.with_context("db_message", db.message().to_string());
                if let Some(constraint) = db.constraint() {
                    app_error = app_error.with_context("constraint", constraint.to_string());
                }
                app_error
            }
            SqlxError::ColumnDecode { index, source } => {
                AppError::new("SQLX/COLUMN_DECODE", source.to_string())
                    .with_context("column_index", index.to_string())
            }
            SqlxError::Decode(decode_err) => AppError::new("SQLX/DECODE", decode_err.to_string()),
            other => AppError::new("SQLX/ERROR", other.to_string()),
        }
    }
}
