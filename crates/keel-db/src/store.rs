//! # Local Store
//!
//! The persistence seam used by the ledger and outbox services.
//!
//! ```text
//!   StockLedger ─┐                         ┌──► SqliteStore (production)
//!                ├──► Arc<dyn LocalStore> ─┤
//!   Outbox ──────┘                         └──► MemoryStore (tests)
//! ```
//!
//! Writes go through [`LocalStore::commit`] only: a [`ChangeSet`] is applied
//! in full or not at all.

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DbResult;
use keel_core::{CatalogProduct, ChangeSet, OutboxEntry, StockItem, StockMovement};

/// Durable storage for ledger, outbox and catalog state.
#[async_trait]
pub trait LocalStore: Send + Sync + Debug {
    /// Every stock item, ordered by product id.
    async fn load_stock_items(&self) -> DbResult<Vec<StockItem>>;

    /// Movements in sequence order, optionally for a single product.
    async fn load_movements(&self, product_id: Option<&str>) -> DbResult<Vec<StockMovement>>;

    /// Highest movement sequence persisted (0 when empty).
    async fn last_movement_sequence(&self) -> DbResult<i64>;

    /// Every outbox entry, oldest first.
    async fn load_outbox(&self) -> DbResult<Vec<OutboxEntry>>;

    /// Persists a change set atomically.
    async fn commit(&self, changes: &ChangeSet) -> DbResult<()>;

    async fn load_catalog(&self) -> DbResult<Vec<CatalogProduct>>;

    /// Inserts or replaces cached catalog rows.
    async fn save_catalog(&self, products: &[CatalogProduct]) -> DbResult<()>;

    /// Newest `updated_at` among cached catalog rows.
    async fn catalog_watermark(&self) -> DbResult<Option<DateTime<Utc>>>;
}
