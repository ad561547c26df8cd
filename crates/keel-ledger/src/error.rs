//! # Ledger Service Errors
//!
//! ```text
//!   CoreError (rule violated, nothing computed)  ─┐
//!                                                 ├──► LedgerError
//!   DbError   (commit failed, memory untouched)  ─┘
//! ```
//!
//! Either way the in-memory ledger and outbox are exactly as they were
//! before the call.

use thiserror::Error;

use keel_core::CoreError;
use keel_db::DbError;

/// Result type alias for ledger service operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    /// A ledger or outbox rule rejected the command.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The change set could not be persisted.
    #[error("Persistence failed: {0}")]
    Database(#[from] DbError),
}

impl LedgerError {
    /// True when the command was rejected for lack of stock.
    pub fn is_insufficient_stock(&self) -> bool {
        matches!(self, LedgerError::Core(e) if e.is_insufficient_stock())
    }

    /// The core rule violation, if that is what this is.
    pub fn as_core(&self) -> Option<&CoreError> {
        match self {
            LedgerError::Core(e) => Some(e),
            LedgerError::Database(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_stock_is_detected() {
        let err: LedgerError = CoreError::insufficient("A", 2, 1).into();
        assert!(err.is_insufficient_stock());
        assert!(err.as_core().is_some());

        let err: LedgerError = DbError::PoolExhausted.into();
        assert!(!err.is_insufficient_stock());
        assert_eq!(err.to_string(), "Persistence failed: Connection pool exhausted");
    }
}
