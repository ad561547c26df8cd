//! # Repository Module
//!
//! Table-level access for Keel POS.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern                                   │
//! │                                                                         │
//! │  SqliteStore / diagnostics                                             │
//! │       │                                                                 │
//! │       │  db.outbox().list()                                            │
//! │       ▼                                                                 │
//! │  OutboxRepository                                                      │
//! │  ├── list(&self)                     ← reads use the pool              │
//! │  ├── get(&self, local_id)                                              │
//! │  ├── upsert(conn, entry)             ← writes take a connection, so    │
//! │  └── delete(conn, local_id)            one transaction can span tables │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`StockItemRepository`](stock::StockItemRepository) - Current stock per product
//! - [`MovementRepository`](movement::MovementRepository) - Append-only movement log
//! - [`OutboxRepository`](outbox::OutboxRepository) - Queued sales
//! - [`CatalogRepository`](catalog::CatalogRepository) - Remote catalog cache

pub mod catalog;
pub mod movement;
pub mod outbox;
pub mod stock;
