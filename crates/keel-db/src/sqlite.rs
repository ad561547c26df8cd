//! # SQLite Store
//!
//! [`LocalStore`] over a [`Database`]. A change set commit is one SQLite
//! transaction:
//!
//! ```text
//!   BEGIN
//!     upsert stock_items      (items first: movements reference them)
//!     insert stock_movements
//!     upsert outbox_entries
//!     delete outbox_entries
//!   COMMIT                    (any failure rolls everything back)
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{DbError, DbResult};
use crate::pool::Database;
use crate::repository::movement::MovementRepository;
use crate::repository::outbox::OutboxRepository;
use crate::repository::stock::StockItemRepository;
use crate::store::LocalStore;
use keel_core::{CatalogProduct, ChangeSet, OutboxEntry, StockItem, StockMovement};

/// SQLite-backed store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        SqliteStore { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn load_stock_items(&self) -> DbResult<Vec<StockItem>> {
        self.db.stock_items().list().await
    }

    async fn load_movements(&self, product_id: Option<&str>) -> DbResult<Vec<StockMovement>> {
        match product_id {
            Some(id) => self.db.movements().list_for_product(id).await,
            None => self.db.movements().list().await,
        }
    }

    async fn last_movement_sequence(&self) -> DbResult<i64> {
        self.db.movements().last_sequence().await
    }

    async fn load_outbox(&self) -> DbResult<Vec<OutboxEntry>> {
        self.db.outbox().list().await
    }

    async fn commit(&self, changes: &ChangeSet) -> DbResult<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .db
            .pool()
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        for item in &changes.items {
            StockItemRepository::upsert(&mut tx, item).await?;
        }
        for movement in &changes.movements {
            MovementRepository::append(&mut tx, movement).await?;
        }
        for entry in &changes.outbox_upserts {
            OutboxRepository::upsert(&mut tx, entry).await?;
        }
        for local_id in &changes.outbox_deletes {
            OutboxRepository::delete(&mut tx, local_id).await?;
        }

        tx.commit().await.map_err(|e| {
            warn!(error = %e, "Change set commit failed");
            DbError::TransactionFailed(e.to_string())
        })?;

        debug!(
            items = changes.items.len(),
            movements = changes.movements.len(),
            outbox_upserts = changes.outbox_upserts.len(),
            outbox_deletes = changes.outbox_deletes.len(),
            "Change set committed"
        );
        Ok(())
    }

    async fn load_catalog(&self) -> DbResult<Vec<CatalogProduct>> {
        self.db.catalog().list().await
    }

    async fn save_catalog(&self, products: &[CatalogProduct]) -> DbResult<()> {
        self.db.catalog().upsert_many(products).await
    }

    async fn catalog_watermark(&self) -> DbResult<Option<DateTime<Utc>>> {
        self.db.catalog().watermark().await
    }
}
