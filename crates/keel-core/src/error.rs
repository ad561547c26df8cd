//! # Error Types
//!
//! Domain-specific error types for keel-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  keel-core errors (this file)                                          │
//! │  ├── CoreError        - Ledger / outbox rule violations                │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  keel-db errors       └── DbError      - Persistence failures          │
//! │  keel-ledger errors   └── LedgerError  - Core + Db                     │
//! │  keel-sync errors     └── SyncError    - Remote / realtime failures    │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → LedgerError → TerminalError       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (product id, local id, ...)
//! 3. Errors are enum variants, never String
//! 4. A returned error always means "nothing was mutated"

use thiserror::Error;

use crate::outbox::OutboxState;
use crate::types::Shortfall;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Product is not known to the ledger.
    ///
    /// ## When This Occurs
    /// - Product was never seeded from the catalog
    /// - A sale references a product id typed by hand
    #[error("Product not found: {0}")]
    ProductNotFound(String),

    /// Insufficient stock to satisfy a request.
    ///
    /// ## User Workflow
    /// ```text
    /// add_sale([P x 5])
    ///      │
    ///      ▼
    /// available = current - reserved = 3
    ///      │
    ///      ▼
    /// InsufficientStock { shortfalls: [(P, 5, 3)] }
    ///      │
    ///      ▼
    /// UI shows: "Only 3 of P available"   (nothing queued)
    /// ```
    #[error("Insufficient stock: {}", describe_shortfalls(.shortfalls))]
    InsufficientStock { shortfalls: Vec<Shortfall> },

    /// Outbox entry does not exist.
    #[error("Outbox entry not found: {0}")]
    OutboxEntryNotFound(String),

    /// Outbox entry already exists (local ids are never reused).
    #[error("Outbox entry already exists: {0}")]
    DuplicateOutboxEntry(String),

    /// Outbox entry is not in a state that allows the requested action.
    ///
    /// ## When This Occurs
    /// - Confirming an entry that is already confirmed
    /// - Cancelling a sale whose push is in flight
    /// - Requeueing an entry that is not failed-permanent
    #[error("Outbox entry {local_id} is {state}, cannot {action}")]
    InvalidOutboxTransition {
        local_id: String,
        state: OutboxState,
        action: &'static str,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Creates an InsufficientStock error for a single product.
    pub fn insufficient(product_id: impl Into<String>, requested: i64, available: i64) -> Self {
        CoreError::InsufficientStock {
            shortfalls: vec![Shortfall {
                product_id: product_id.into(),
                requested,
                available,
            }],
        }
    }

    /// Returns true for stock shortfalls (the caller must re-decide).
    pub fn is_insufficient_stock(&self) -> bool {
        matches!(self, CoreError::InsufficientStock { .. })
    }
}

fn describe_shortfalls(shortfalls: &[Shortfall]) -> String {
    shortfalls
        .iter()
        .map(|s| {
            format!(
                "{} (requested {}, available {})",
                s.product_id, s.requested, s.available
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when caller input doesn't meet requirements.
/// Used for early validation before any ledger rule runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Quantity sign doesn't match the movement type.
    #[error("{movement_type} movement cannot carry quantity {quantity}")]
    WrongSign {
        movement_type: String,
        quantity: i64,
    },

    /// Invalid format (e.g., invalid product id characters).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Duplicate value (e.g., seeding a product twice).
    #[error("{field} '{value}' already exists")]
    Duplicate { field: String, value: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
