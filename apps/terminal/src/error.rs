//! # Terminal Errors
//!
//! `TerminalError` is what the terminal's operations return. The UI layer
//! receives the serializable [`ApiError`] form.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Error Flow in Keel POS                            │
//! │                                                                         │
//! │  Terminal::add_sale(...)                                                │
//! │         │                                                               │
//! │         ▼                                                               │
//! │  LedgerError ── Core(InsufficientStock) ──┐                            │
//! │              └─ Database(..)  ────────────┤                            │
//! │  SyncError ─── InvalidConfig, ... ────────┼──► TerminalError           │
//! │  DbError ───── ConnectionFailed, ... ─────┘          │                 │
//! │                                                      ▼                 │
//! │                                       ApiError { code, message }        │
//! │                                                      │                 │
//! │                                                      ▼                 │
//! │  UI: switch (e.code) { case 'INSUFFICIENT_STOCK': ... }                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::Serialize;
use thiserror::Error;

use keel_core::CoreError;
use keel_db::DbError;
use keel_ledger::LedgerError;
use keel_sync::SyncError;

/// Result type alias for terminal operations.
pub type TerminalResult<T> = Result<T, TerminalError>;

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TerminalError {
    /// True when a sale or movement was refused for lack of stock.
    pub fn is_insufficient_stock(&self) -> bool {
        matches!(self, TerminalError::Ledger(e) if e.is_insufficient_stock())
    }

    /// The ledger rule that was violated, if any.
    pub fn as_core(&self) -> Option<&CoreError> {
        match self {
            TerminalError::Ledger(e) => e.as_core(),
            _ => None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            TerminalError::Ledger(LedgerError::Core(e)) => match e {
                CoreError::ProductNotFound(_) | CoreError::OutboxEntryNotFound(_) => {
                    ErrorCode::NotFound
                }
                CoreError::InsufficientStock { .. } => ErrorCode::InsufficientStock,
                CoreError::InvalidOutboxTransition { .. }
                | CoreError::DuplicateOutboxEntry(_) => ErrorCode::BusinessLogic,
                CoreError::Validation(_) => ErrorCode::ValidationError,
            },
            TerminalError::Ledger(LedgerError::Database(_)) | TerminalError::Database(_) => {
                ErrorCode::DatabaseError
            }
            TerminalError::Sync(e) if e.is_config_error() => ErrorCode::ConfigError,
            TerminalError::Sync(_) => ErrorCode::SyncError,
            TerminalError::Config(_) => ErrorCode::ConfigError,
            TerminalError::Io(_) => ErrorCode::Internal,
        }
    }
}

// =============================================================================
// UI-facing form
// =============================================================================

/// Error as delivered to the UI.
///
/// ```json
/// {
///   "code": "INSUFFICIENT_STOCK",
///   "message": "Insufficient stock: P-1 (requested 5, available 1)"
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Machine-readable error code for programmatic handling
    pub code: ErrorCode,

    /// Human-readable error message for display
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    ValidationError,
    InsufficientStock,
    /// The request is valid but not allowed in the current state
    BusinessLogic,
    DatabaseError,
    SyncError,
    ConfigError,
    Internal,
}

impl From<TerminalError> for ApiError {
    fn from(err: TerminalError) -> Self {
        let code = err.code();
        let message = match &err {
            TerminalError::Ledger(LedgerError::Database(e)) | TerminalError::Database(e) => {
                // storage details stay in the log
                tracing::error!(error = %e, "Storage operation failed");
                "Database operation failed".to_string()
            }
            other => other.to_string(),
        };
        ApiError { code, message }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:?}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_stock_maps_to_its_code() {
        let err: TerminalError = LedgerError::from(CoreError::insufficient("P-1", 5, 1)).into();
        assert!(err.is_insufficient_stock());

        let api = ApiError::from(err);
        assert_eq!(api.code, ErrorCode::InsufficientStock);
        assert!(api.message.contains("P-1"));
    }

    #[test]
    fn test_storage_details_are_hidden() {
        let err: TerminalError = DbError::QueryFailed("disk I/O error".into()).into();
        let api = ApiError::from(err);
        assert_eq!(api.code, ErrorCode::DatabaseError);
        assert_eq!(api.message, "Database operation failed");
    }

    #[test]
    fn test_api_error_serialization() {
        let api = ApiError {
            code: ErrorCode::NotFound,
            message: "Product not found: P-9".into(),
        };
        let json = serde_json::to_value(&api).unwrap();
        assert_eq!(json["code"], "NOT_FOUND");
        assert_eq!(json["message"], "Product not found: P-9");
    }
}
