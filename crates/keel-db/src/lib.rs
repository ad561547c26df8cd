//! # keel-db: Database Layer for Keel POS
//!
//! This crate persists the ledger, the outbox and the catalog cache.
//! It uses SQLite for local storage with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Keel POS Data Flow                               │
//! │                                                                         │
//! │  StockLedger / TransactionOutbox (keel-ledger)                         │
//! │       │  commit(ChangeSet)                                              │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     keel-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │  LocalStore   │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │  (store.rs)   │    │               │    │  (embedded)  │  │   │
//! │  │   │               │    │ StockItemRepo │    │ 001_stock    │  │   │
//! │  │   │ SqliteStore   │───►│ MovementRepo  │    │ 002_outbox   │  │   │
//! │  │   │ MemoryStore   │    │ OutboxRepo    │    │ 003_catalog  │  │   │
//! │  │   └───────────────┘    │ CatalogRepo   │    └──────────────┘  │   │
//! │  │                        └───────────────┘                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keel_db::{Database, DbConfig, LocalStore, SqliteStore};
//!
//! let db = Database::new(DbConfig::new("path/to/keel.db")).await?;
//! let store = SqliteStore::new(db);
//! let items = store.load_stock_items().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod memory;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod sqlite;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use memory::MemoryStore;
pub use pool::{Database, DbConfig};
pub use sqlite::SqliteStore;
pub use store::LocalStore;

pub use repository::catalog::CatalogRepository;
pub use repository::movement::MovementRepository;
pub use repository::outbox::OutboxRepository;
pub use repository::stock::StockItemRepository;
