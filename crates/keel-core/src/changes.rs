//! # Change Sets
//!
//! The rows produced by one ledger or outbox command. A store persists a
//! change set in a single transaction; the in-memory state is only swapped
//! in after that commit succeeds.

use crate::outbox::OutboxEntry;
use crate::types::{StockItem, StockMovement};

/// Item upserts, movement appends and outbox row changes of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Items to insert or replace, keyed by `product_id`.
    pub items: Vec<StockItem>,
    /// Movements to append, in sequence order.
    pub movements: Vec<StockMovement>,
    /// Outbox rows to insert or replace, keyed by `local_id`.
    pub outbox_upserts: Vec<OutboxEntry>,
    /// Outbox rows to delete.
    pub outbox_deletes: Vec<String>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
            && self.movements.is_empty()
            && self.outbox_upserts.is_empty()
            && self.outbox_deletes.is_empty()
    }

    /// Records an item upsert, replacing an earlier upsert of the same item.
    pub fn upsert_item(&mut self, item: StockItem) {
        if let Some(existing) = self
            .items
            .iter_mut()
            .find(|i| i.product_id == item.product_id)
        {
            *existing = item;
        } else {
            self.items.push(item);
        }
    }

    /// Appends everything in `other` after this set's rows.
    pub fn merge(&mut self, other: ChangeSet) {
        for item in other.items {
            self.upsert_item(item);
        }
        self.movements.extend(other.movements);
        for entry in other.outbox_upserts {
            self.outbox_upserts.retain(|e| e.local_id != entry.local_id);
            self.outbox_upserts.push(entry);
        }
        self.outbox_deletes.extend(other.outbox_deletes);
    }
}
