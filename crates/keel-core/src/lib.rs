//! # keel-core: Pure Ledger Logic for Keel POS
//!
//! This crate is the **heart** of the offline-first consistency layer. It
//! contains the stock ledger state machine and the outbox entry lifecycle as
//! pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Keel POS Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     UI layer (external)                         │   │
//! │  │   add_sale, cancel_sale, low_stock_alerts, sync_status, sync    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │        keel-ledger / keel-sync (async services)                 │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ LedgerCommand / OutboxAction          │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ keel-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │  ledger   │  │  outbox   │  │  alerts   │  │ validation│  │   │
//! │  │   │LedgerBook │  │OutboxBook │  │ priority  │  │   rules   │  │   │
//! │  │   │ commands  │  │transitions│  │ reorder   │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │ ChangeSet                             │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    keel-db (Persistence)                        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (StockItem, StockMovement, SalePayload, ...)
//! - [`ledger`] - `LedgerBook` and the `LedgerCommand` mutation entry point
//! - [`outbox`] - `OutboxEntry` lifecycle and the in-memory `OutboxBook`
//! - [`changes`] - `ChangeSet`, the unit persisted in one transaction
//! - [`alerts`] - Low-stock priority rules
//! - [`clock`] - Injectable time source
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use chrono::Utc;
//! use keel_core::ledger::{LedgerBook, LedgerCommand, SeedItem};
//! use keel_core::StockRequest;
//!
//! let mut book = LedgerBook::new();
//! book.execute(
//!     LedgerCommand::SeedItem(SeedItem::new("P-1", 5, 2, 10)),
//!     Utc::now(),
//! )
//! .unwrap();
//!
//! let check = book.check_availability(&[StockRequest::new("P-1", 6)]).unwrap();
//! assert!(!check.available);
//! assert_eq!(check.shortfalls[0].available, 5);
//! ```

pub mod alerts;
pub mod changes;
pub mod clock;
pub mod error;
pub mod ledger;
pub mod outbox;
pub mod types;
pub mod validation;

pub use changes::ChangeSet;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, CoreResult, ValidationError};
pub use outbox::{OutboxAction, OutboxBook, OutboxCounts, OutboxEntry, OutboxState, RemoteReceipt};
pub use types::*;

/// Maximum quantity of a single product on one sale line or reservation.
///
/// ## Business Reason
/// Prevents accidental over-ordering (e.g., typing 1000 instead of 10).
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Maximum absolute quantity of a single stock movement (restock, adjustment).
pub const MAX_MOVEMENT_QUANTITY: i64 = 100_000;

/// Upper bound for stock figures, reorder levels and reorder quantities.
pub const MAX_STOCK_LEVEL: i64 = 1_000_000_000;

/// Maximum lines allowed in a single sale.
pub const MAX_SALE_LINES: usize = 100;

/// Reorder level applied to products whose catalog row carries none.
pub const DEFAULT_REORDER_LEVEL: i64 = 10;

/// Reorder quantity applied to products whose catalog row carries none.
pub const DEFAULT_REORDER_QUANTITY: i64 = 20;
