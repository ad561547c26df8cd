//! # keel-ledger: Stock Ledger & Transaction Outbox
//!
//! Async services over a [`keel_db::LocalStore`]:
//!
//! - [`StockLedger`] - per-product stock, reservations, movement log,
//!   low-stock alert broadcast
//! - [`TransactionOutbox`] - ordered queue of sales awaiting confirmation
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Terminal (add_sale, restock, ...)     SyncOrchestrator (keel-sync)   │
//! │          │                                   │            │             │
//! │          ▼                                   ▼            ▼             │
//! │   ┌──────────────┐  record_sale   ┌───────────────────┐  seed_item     │
//! │   │ StockLedger  │───────────────►│ TransactionOutbox │                 │
//! │   └──────┬───────┘ (ledger lock   └─────────┬─────────┘                 │
//! │          │          then outbox)            │                           │
//! │          └──────────────┬───────────────────┘                           │
//! │                         ▼                                               │
//! │                 Arc<dyn LocalStore>  (one commit per change set)        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod ledger;
pub mod outbox;

pub use error::{LedgerError, LedgerResult};
pub use ledger::StockLedger;
pub use outbox::TransactionOutbox;

pub use keel_core::ledger::{MovementRequest, SeedItem};
