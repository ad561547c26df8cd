//! # In-Memory Store
//!
//! A [`LocalStore`] that keeps everything in process memory. Used by tests
//! that do not care about SQLite, and by tests that need a commit to fail on
//! demand ([`MemoryStore::fail_commits`]).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{DbError, DbResult};
use crate::store::LocalStore;
use keel_core::{CatalogProduct, ChangeSet, OutboxEntry, StockItem, StockMovement};

#[derive(Debug, Default)]
struct MemoryState {
    items: BTreeMap<String, StockItem>,
    movements: Vec<StockMovement>,
    outbox: BTreeMap<String, OutboxEntry>,
    catalog: BTreeMap<String, CatalogProduct>,
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_commits: AtomicBool,
    commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following commit fail (or succeed again).
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Number of successful commits.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn load_stock_items(&self) -> DbResult<Vec<StockItem>> {
        Ok(self.state().items.values().cloned().collect())
    }

    async fn load_movements(&self, product_id: Option<&str>) -> DbResult<Vec<StockMovement>> {
        let state = self.state();
        let mut out: Vec<StockMovement> = state
            .movements
            .iter()
            .filter(|m| product_id.map_or(true, |id| m.product_id == id))
            .cloned()
            .collect();
        out.sort_by_key(|m| m.sequence);
        Ok(out)
    }

    async fn last_movement_sequence(&self) -> DbResult<i64> {
        Ok(self
            .state()
            .movements
            .iter()
            .map(|m| m.sequence)
            .max()
            .unwrap_or(0))
    }

    async fn load_outbox(&self) -> DbResult<Vec<OutboxEntry>> {
        let mut out: Vec<OutboxEntry> = self.state().outbox.values().cloned().collect();
        out.sort_by_key(|e| (e.created_at, e.sequence));
        Ok(out)
    }

    async fn commit(&self, changes: &ChangeSet) -> DbResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(DbError::TransactionFailed("simulated commit failure".to_string()));
        }

        let mut state = self.state();
        for movement in &changes.movements {
            if state.movements.iter().any(|m| m.sequence == movement.sequence) {
                return Err(DbError::duplicate(
                    "stock_movements.sequence",
                    movement.sequence.to_string(),
                ));
            }
        }

        for item in &changes.items {
            state.items.insert(item.product_id.clone(), item.clone());
        }
        state.movements.extend(changes.movements.iter().cloned());
        for entry in &changes.outbox_upserts {
            state.outbox.insert(entry.local_id.clone(), entry.clone());
        }
        for local_id in &changes.outbox_deletes {
            state.outbox.remove(local_id);
        }

        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_catalog(&self) -> DbResult<Vec<CatalogProduct>> {
        Ok(self.state().catalog.values().cloned().collect())
    }

    async fn save_catalog(&self, products: &[CatalogProduct]) -> DbResult<()> {
        let mut state = self.state();
        for p in products {
            state.catalog.insert(p.product_id.clone(), p.clone());
        }
        Ok(())
    }

    async fn catalog_watermark(&self) -> DbResult<Option<DateTime<Utc>>> {
        Ok(self.state().catalog.values().map(|p| p.updated_at).max())
    }
}
