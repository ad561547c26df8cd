//! # Transaction Outbox
//!
//! Durable, ordered queue of locally created sales awaiting confirmation.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     TransactionOutbox                                   │
//! │                                                                         │
//! │   Mutex<OutboxBook> ──clone──► working copy ──transition──► ChangeSet  │
//! │          ▲                                                     │        │
//! │          │                                                     ▼        │
//! │          └────────── swap in ◄───── Ok ◄──── store.commit(changes)     │
//! │                                                                         │
//! │   On load: every in-flight entry goes back to pending                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Retry policy lives with the sync orchestrator. This service only records
//! what happened to each entry.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use keel_core::validation::validate_sale_lines;
use keel_core::{
    ChangeSet, Clock, OutboxAction, OutboxBook, OutboxCounts, OutboxEntry, OutboxState,
    RemoteReceipt, SalePayload,
};
use keel_db::LocalStore;

use crate::error::LedgerResult;

/// Async service over the persisted outbox.
#[derive(Debug)]
pub struct TransactionOutbox {
    book: Mutex<OutboxBook>,
    store: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
}

impl TransactionOutbox {
    /// Loads the outbox from `store` and resets interrupted pushes.
    pub async fn load(store: Arc<dyn LocalStore>, clock: Arc<dyn Clock>) -> LedgerResult<Self> {
        let entries = store.load_outbox().await?;
        let mut book = OutboxBook::from_entries(entries);

        let recovery = book.recover_in_flight();
        if !recovery.is_empty() {
            warn!(
                count = recovery.outbox_upserts.len(),
                "Resetting in-flight outbox entries left by a previous run"
            );
            store.commit(&recovery).await?;
        }

        let counts = book.counts();
        info!(
            pending = counts.pending,
            failed_permanent = counts.failed_permanent,
            "Transaction outbox loaded"
        );

        Ok(Self {
            book: Mutex::new(book),
            store,
            clock,
        })
    }

    /// Queues a sale on its own, with no stock movement.
    ///
    /// Sales made at the till go through `StockLedger::record_sale`, which
    /// writes the entry together with its movements.
    pub async fn enqueue(&self, payload: SalePayload) -> LedgerResult<String> {
        validate_sale_lines(&payload.lines).map_err(keel_core::CoreError::from)?;

        let mut book = self.book.lock().await;
        let entry = book.draft(payload, self.clock.now())?;
        let changes = ChangeSet {
            outbox_upserts: vec![entry.clone()],
            ..ChangeSet::default()
        };
        self.store.commit(&changes).await?;

        let local_id = entry.local_id.clone();
        book.insert(entry)?;
        debug!(local_id = %local_id, "Sale queued");
        Ok(local_id)
    }

    pub async fn mark_in_flight(&self, local_id: &str) -> LedgerResult<OutboxEntry> {
        self.transition(local_id, OutboxAction::MarkInFlight).await
    }

    pub async fn mark_confirmed(
        &self,
        local_id: &str,
        receipt: RemoteReceipt,
    ) -> LedgerResult<OutboxEntry> {
        self.transition(local_id, OutboxAction::MarkConfirmed(receipt))
            .await
    }

    /// Records a retryable failure: the entry goes back to pending.
    pub async fn mark_failed(&self, local_id: &str, error: &str) -> LedgerResult<OutboxEntry> {
        self.transition(local_id, OutboxAction::MarkFailed(error.to_string()))
            .await
    }

    /// Parks the entry until an operator requeues or cancels it.
    pub async fn mark_failed_permanent(
        &self,
        local_id: &str,
        error: &str,
    ) -> LedgerResult<OutboxEntry> {
        self.transition(
            local_id,
            OutboxAction::MarkFailedPermanent(error.to_string()),
        )
        .await
    }

    /// Returns a failed-permanent entry to pending with a fresh retry budget.
    pub async fn requeue(&self, local_id: &str) -> LedgerResult<OutboxEntry> {
        self.transition(local_id, OutboxAction::Requeue).await
    }

    /// Pending entries oldest first.
    pub async fn list_pending(&self, limit: Option<usize>, offset: Option<usize>) -> Vec<OutboxEntry> {
        self.book.lock().await.list_pending(limit, offset)
    }

    /// Entries waiting for an operator decision.
    pub async fn list_failed_permanent(&self) -> Vec<OutboxEntry> {
        self.book
            .lock()
            .await
            .list_by_state(OutboxState::FailedPermanent)
    }

    pub async fn get(&self, local_id: &str) -> Option<OutboxEntry> {
        self.book.lock().await.get(local_id).cloned()
    }

    pub async fn counts(&self) -> OutboxCounts {
        self.book.lock().await.counts()
    }

    pub async fn pending_count(&self) -> i64 {
        self.counts().await.pending
    }

    /// Deletes confirmed entries. Returns how many were removed.
    pub async fn purge_confirmed(&self) -> LedgerResult<usize> {
        let mut book = self.book.lock().await;
        let mut next = book.clone();
        let changes = next.purge_confirmed();
        if changes.is_empty() {
            return Ok(0);
        }

        self.store.commit(&changes).await?;
        *book = next;

        let purged = changes.outbox_deletes.len();
        debug!(purged, "Confirmed outbox entries purged");
        Ok(purged)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    async fn transition(&self, local_id: &str, action: OutboxAction) -> LedgerResult<OutboxEntry> {
        let name = action.name();
        let mut book = self.book.lock().await;
        let mut next = book.clone();
        let changes = next.transition(local_id, action, self.clock.now())?;

        self.store.commit(&changes).await?;
        *book = next;

        let entry = changes
            .outbox_upserts
            .into_iter()
            .next()
            .ok_or_else(|| keel_core::CoreError::OutboxEntryNotFound(local_id.to_string()))?;
        debug!(
            local_id = %local_id,
            action = name,
            state = %entry.state,
            attempts = entry.attempt_count,
            "Outbox entry updated"
        );
        Ok(entry)
    }

    /// Locks the book for a combined ledger + outbox commit.
    ///
    /// Callers must already hold the ledger lock.
    pub(crate) async fn lock_book(&self) -> MutexGuard<'_, OutboxBook> {
        self.book.lock().await
    }
}
