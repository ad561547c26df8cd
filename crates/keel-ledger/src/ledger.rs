//! # Stock Ledger Service
//!
//! The single write path into local stock state.
//!
//! ## Mutation Protocol
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  lock(book) ──► clone ──► execute(cmd) ──► store.commit(changes)       │
//! │      │                        │                    │                    │
//! │      │                        ▼                    ▼                    │
//! │      │                  CoreError: return    DbError: return            │
//! │      │                  (book untouched)     (book untouched)           │
//! │      │                                             │ Ok                 │
//! │      │                                             ▼                    │
//! │      └──────────────── swap in working copy, unlock, broadcast alerts  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Readers take the same lock, so no caller ever sees a state that has not
//! been committed.
//!
//! ## Sales
//! `record_sale` and `cancel_sale` span the ledger and the outbox. They take
//! the ledger lock first, then the outbox lock, and commit both halves in one
//! change set. Nothing else takes both locks, and nothing takes them in the
//! other order.

use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use keel_core::ledger::{replay, CommandOutcome, LedgerBook, LedgerCommand, MovementRequest, SeedItem};
use keel_core::{
    Availability, ChangeSet, Clock, CoreError, LowStockAlert, OutboxEntry, SalePayload,
    StockItem, StockMovement, StockRequest,
};
use keel_db::LocalStore;

use crate::error::LedgerResult;
use crate::outbox::TransactionOutbox;

/// Capacity of the low-stock alert broadcast channel.
const ALERT_CHANNEL_CAPACITY: usize = 64;

/// Async service owning the ledger book.
#[derive(Debug)]
pub struct StockLedger {
    book: Mutex<LedgerBook>,
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    alerts: broadcast::Sender<LowStockAlert>,
}

impl StockLedger {
    /// Rebuilds the ledger from `store`.
    pub async fn load(store: Arc<dyn LocalStore>, clock: Arc<dyn Clock>) -> LedgerResult<Self> {
        let items = store.load_stock_items().await?;
        let last_sequence = store.last_movement_sequence().await?;
        let book = LedgerBook::from_parts(items, last_sequence);

        info!(
            items = book.len(),
            last_sequence,
            "Stock ledger loaded"
        );

        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Ok(Self {
            book: Mutex::new(book),
            store,
            clock,
            alerts,
        })
    }

    /// Receives an alert each time an item crosses into low stock.
    pub fn subscribe_alerts(&self) -> broadcast::Receiver<LowStockAlert> {
        self.alerts.subscribe()
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub async fn check_availability(&self, requests: &[StockRequest]) -> LedgerResult<Availability> {
        Ok(self.book.lock().await.check_availability(requests)?)
    }

    pub async fn item(&self, product_id: &str) -> Option<StockItem> {
        self.book.lock().await.item(product_id).cloned()
    }

    pub async fn items(&self) -> Vec<StockItem> {
        self.book.lock().await.items()
    }

    pub async fn contains(&self, product_id: &str) -> bool {
        self.book.lock().await.contains(product_id)
    }

    /// Items at or below their reorder level, most urgent first.
    pub async fn low_stock_alerts(&self) -> Vec<LowStockAlert> {
        self.book.lock().await.low_stock_alerts()
    }

    /// The movement log in sequence order, optionally for one product.
    pub async fn movements(&self, product_id: Option<&str>) -> LedgerResult<Vec<StockMovement>> {
        Ok(self.store.load_movements(product_id).await?)
    }

    /// Recomputes a product's stock from its opening stock and movements.
    pub async fn replay_stock(&self, product_id: &str) -> LedgerResult<i64> {
        let opening = self
            .item(product_id)
            .await
            .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()))?
            .opening_stock;
        let movements = self.store.load_movements(Some(product_id)).await?;
        Ok(replay(opening, &movements))
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Holds stock for an open cart. All-or-nothing.
    pub async fn reserve(&self, requests: Vec<StockRequest>) -> LedgerResult<()> {
        self.execute(LedgerCommand::Reserve(requests)).await?;
        Ok(())
    }

    /// Drops holds. Reserved stock never goes below zero.
    pub async fn release(&self, requests: Vec<StockRequest>) -> LedgerResult<()> {
        self.execute(LedgerCommand::Release(requests)).await?;
        Ok(())
    }

    /// Applies one movement and returns it.
    pub async fn apply_movement(&self, request: MovementRequest) -> LedgerResult<StockMovement> {
        let product_id = request.product_id.clone();
        let outcome = self.execute(LedgerCommand::ApplyMovement(request)).await?;
        single_movement(outcome, &product_id)
    }

    /// Applies independent movements; each succeeds or fails on its own.
    ///
    /// Successful movements are committed together. The outer error is only
    /// returned when that commit fails, in which case none of them applied.
    pub async fn batch_apply_movements(
        &self,
        requests: Vec<MovementRequest>,
    ) -> LedgerResult<Vec<LedgerResult<StockMovement>>> {
        let now = self.clock.now();
        let mut book = self.book.lock().await;
        let mut next = book.clone();

        let mut changes = ChangeSet::new();
        let mut raised = Vec::new();
        let mut results = Vec::with_capacity(requests.len());

        for request in requests {
            let product_id = request.product_id.clone();
            match next.execute(LedgerCommand::ApplyMovement(request), now) {
                Ok(outcome) => {
                    results.push(single_movement(outcome.clone(), &product_id));
                    changes.merge(outcome.changes);
                    raised.extend(outcome.raised_alerts);
                }
                Err(e) => results.push(Err(e.into())),
            }
        }

        self.store.commit(&changes).await?;
        *book = next;
        drop(book);

        debug!(
            applied = changes.movements.len(),
            total = results.len(),
            "Batch movements applied"
        );
        self.publish(raised);
        Ok(results)
    }

    pub async fn set_reorder_policy(
        &self,
        product_id: &str,
        reorder_level: i64,
        reorder_quantity: i64,
    ) -> LedgerResult<StockItem> {
        let outcome = self
            .execute(LedgerCommand::SetReorderPolicy {
                product_id: product_id.to_string(),
                reorder_level,
                reorder_quantity,
            })
            .await?;
        first_item(outcome, product_id)
    }

    /// Registers a product not yet known to the ledger.
    pub async fn seed_item(&self, seed: SeedItem) -> LedgerResult<StockItem> {
        let product_id = seed.product_id.clone();
        let outcome = self.execute(LedgerCommand::SeedItem(seed)).await?;
        first_item(outcome, &product_id)
    }

    /// Records a sale and queues it, in one commit.
    ///
    /// Every line becomes a `sale` movement whose transaction id is the
    /// payload's local id. If any line lacks stock nothing is written and
    /// nothing is queued.
    pub async fn record_sale(
        &self,
        outbox: &TransactionOutbox,
        payload: SalePayload,
        consume_reservation: bool,
    ) -> LedgerResult<OutboxEntry> {
        let now = self.clock.now();
        let mut book = self.book.lock().await;
        let mut queue = outbox.lock_book().await;
        let mut next_book = book.clone();
        let mut next_queue = queue.clone();

        let outcome = next_book.execute(
            LedgerCommand::RecordSale {
                transaction_id: payload.local_id.clone(),
                actor_id: payload.actor_id.clone(),
                lines: payload.lines.clone(),
                consume_reservation,
            },
            now,
        )?;
        let entry = next_queue.draft(payload, now)?;
        next_queue.insert(entry.clone())?;

        let mut changes = outcome.changes;
        changes.outbox_upserts.push(entry.clone());
        self.store.commit(&changes).await?;

        *book = next_book;
        *queue = next_queue;
        drop(queue);
        drop(book);

        info!(
            local_id = %entry.local_id,
            lines = entry.payload.lines.len(),
            total_cents = entry.payload.total_cents,
            "Sale recorded"
        );
        self.publish(outcome.raised_alerts);
        Ok(entry)
    }

    /// Cancels a queued sale: returns its stock and removes the entry.
    ///
    /// Only pending and failed-permanent sales can be cancelled; an
    /// in-flight or confirmed sale may already exist on the server.
    pub async fn cancel_sale(
        &self,
        outbox: &TransactionOutbox,
        local_id: &str,
        actor_id: &str,
        reason: Option<String>,
    ) -> LedgerResult<Vec<StockMovement>> {
        let now = self.clock.now();
        let mut book = self.book.lock().await;
        let mut queue = outbox.lock_book().await;
        let mut next_book = book.clone();
        let mut next_queue = queue.clone();

        let (entry, mut changes) = next_queue.discard(local_id)?;
        let outcome = next_book.execute(
            LedgerCommand::ReverseSale {
                transaction_id: entry.local_id.clone(),
                actor_id: actor_id.to_string(),
                lines: entry.payload.lines.clone(),
                reason,
            },
            now,
        )?;
        changes.merge(outcome.changes.clone());
        self.store.commit(&changes).await?;

        *book = next_book;
        *queue = next_queue;
        drop(queue);
        drop(book);

        info!(local_id = %local_id, "Sale cancelled, stock returned");
        self.publish(outcome.raised_alerts);
        Ok(outcome.changes.movements)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn execute(&self, cmd: LedgerCommand) -> LedgerResult<CommandOutcome> {
        let name = cmd.name();
        let mut book = self.book.lock().await;
        let mut next = book.clone();
        let outcome = next.execute(cmd, self.clock.now())?;

        self.store.commit(&outcome.changes).await?;
        *book = next;
        drop(book);

        debug!(
            command = name,
            movements = outcome.changes.movements.len(),
            "Ledger command applied"
        );
        self.publish(outcome.raised_alerts.clone());
        Ok(outcome)
    }

    fn publish(&self, alerts: Vec<LowStockAlert>) {
        for alert in alerts {
            warn!(
                product_id = %alert.product_id,
                current_stock = alert.current_stock,
                reorder_level = alert.reorder_level,
                priority = %alert.priority,
                "Low stock"
            );
            // no subscribers is fine
            let _ = self.alerts.send(alert);
        }
    }
}

fn single_movement(outcome: CommandOutcome, product_id: &str) -> LedgerResult<StockMovement> {
    outcome
        .changes
        .movements
        .into_iter()
        .next()
        .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()).into())
}

fn first_item(outcome: CommandOutcome, product_id: &str) -> LedgerResult<StockItem> {
    outcome
        .changes
        .items
        .into_iter()
        .next()
        .ok_or_else(|| CoreError::ProductNotFound(product_id.to_string()).into())
}
