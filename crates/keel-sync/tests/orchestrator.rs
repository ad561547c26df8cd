//! Integration tests for the sync orchestrator against an in-memory remote.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use keel_core::{CatalogProduct, ManualClock, OutboxState, RemoteReceipt, SaleLine, SalePayload};
use keel_db::{LocalStore, MemoryStore};
use keel_ledger::{SeedItem, StockLedger, TransactionOutbox};
use keel_sync::{
    ConnectionState, CycleKind, CycleOutcome, LedgerSettings, RemoteAuthority, SyncError,
    SyncOrchestrator, SyncResult, SyncSettings, SyncTrigger,
};

// =============================================================================
// Fake remote
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Behaviour {
    Accept,
    /// Never answers; only the request timeout ends the call.
    Hang,
    Reject,
    Fail,
}

#[derive(Debug)]
struct FakeRemote {
    online: AtomicBool,
    catalog_down: AtomicBool,
    catalog: Mutex<Vec<CatalogProduct>>,
    behaviours: Mutex<HashMap<String, Behaviour>>,
    pushes: Mutex<Vec<String>>,
    probes: AtomicUsize,
}

impl FakeRemote {
    fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            catalog_down: AtomicBool::new(false),
            catalog: Mutex::new(Vec::new()),
            behaviours: Mutex::new(HashMap::new()),
            pushes: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
        }
    }

    fn behave(&self, local_id: &str, behaviour: Behaviour) {
        self.behaviours
            .lock()
            .unwrap()
            .insert(local_id.to_string(), behaviour);
    }

    fn pushes(&self) -> Vec<String> {
        self.pushes.lock().unwrap().clone()
    }

    fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteAuthority for FakeRemote {
    async fn probe(&self) -> SyncResult<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::ConnectivityUnavailable("no route to host".into()))
        }
    }

    async fn catalog(&self, since: Option<DateTime<Utc>>) -> SyncResult<Vec<CatalogProduct>> {
        if self.catalog_down.load(Ordering::SeqCst) {
            return Err(SyncError::RetryableNetwork("HTTP 503: catalog down".into()));
        }
        Ok(self
            .catalog
            .lock()
            .unwrap()
            .iter()
            .filter(|p| since.map_or(true, |since| p.updated_at > since))
            .cloned()
            .collect())
    }

    async fn push_transaction(&self, payload: &SalePayload) -> SyncResult<RemoteReceipt> {
        tokio::task::yield_now().await;
        self.pushes.lock().unwrap().push(payload.local_id.clone());
        let behaviour = self
            .behaviours
            .lock()
            .unwrap()
            .get(&payload.local_id)
            .copied()
            .unwrap_or(Behaviour::Accept);

        match behaviour {
            Behaviour::Accept => Ok(RemoteReceipt {
                id: format!("R-{}", payload.local_id),
                code: "OK".into(),
            }),
            Behaviour::Hang => std::future::pending().await,
            Behaviour::Reject => Err(SyncError::RemoteRejected {
                code: "UNKNOWN_PRODUCT".into(),
                message: "product does not exist".into(),
            }),
            Behaviour::Fail => Err(SyncError::RetryableNetwork("connection reset".into())),
        }
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    ledger: Arc<StockLedger>,
    outbox: Arc<TransactionOutbox>,
    store: Arc<MemoryStore>,
    remote: Arc<FakeRemote>,
    orchestrator: Arc<SyncOrchestrator>,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

async fn harness_with(settings: SyncSettings) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(start()));
    let ledger = Arc::new(
        StockLedger::load(store.clone(), clock.clone())
            .await
            .unwrap(),
    );
    let outbox = Arc::new(
        TransactionOutbox::load(store.clone(), clock.clone())
            .await
            .unwrap(),
    );
    let remote = Arc::new(FakeRemote::new());
    let orchestrator = SyncOrchestrator::new(
        ledger.clone(),
        outbox.clone(),
        store.clone(),
        remote.clone(),
        clock,
        settings,
        LedgerSettings::default(),
    );
    Harness {
        ledger,
        outbox,
        store,
        remote,
        orchestrator,
    }
}

async fn harness() -> Harness {
    harness_with(SyncSettings::default()).await
}

async fn queue_sales(h: &Harness, n: usize) -> Vec<String> {
    let mut ids = Vec::with_capacity(n);
    for _ in 0..n {
        let payload = SalePayload::new("T-1", "cashier-7", vec![SaleLine::new("P", 1, 250)], start());
        ids.push(h.outbox.enqueue(payload).await.unwrap());
    }
    ids
}

fn product(id: &str, stock: i64, level: Option<i64>) -> CatalogProduct {
    CatalogProduct {
        product_id: id.to_string(),
        sku: format!("SKU-{id}"),
        name: format!("Product {id}"),
        price_cents: 499,
        stock,
        reorder_level: level,
        reorder_quantity: None,
        updated_at: start(),
    }
}

// =============================================================================
// Drain
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_timeout_leaves_entry_pending_and_cycle_continues() {
    let h = harness().await;
    let ids = queue_sales(&h, 3).await;
    h.remote.behave(&ids[1], Behaviour::Hang);

    let report = h.orchestrator.sync_now().await;

    assert_eq!(report.outcome, CycleOutcome::PartiallyFailed);
    assert_eq!(report.confirmed, 2);
    assert_eq!(report.retried, 1);
    assert_eq!(h.remote.pushes(), ids);

    let status = h.orchestrator.get_status();
    assert_eq!(status.pending_count, 1);
    assert!(status.last_sync_at.is_some());
    assert_eq!(status.recent_errors.len(), 1);
    assert!(status.recent_errors[0].retryable);
    assert_eq!(status.recent_errors[0].local_id.as_deref(), Some(ids[1].as_str()));

    let stuck = h.outbox.get(&ids[1]).await.unwrap();
    assert_eq!(stuck.state, OutboxState::Pending);
    assert_eq!(stuck.attempt_count, 1);
    assert!(stuck.last_error.unwrap().contains("timed out"));

    // confirmed entries are purged after the drain
    assert!(h.outbox.get(&ids[0]).await.is_none());
    assert!(h.outbox.get(&ids[2]).await.is_none());
}

#[tokio::test]
async fn test_overlapping_triggers_drain_once() {
    let h = harness().await;
    let ids = queue_sales(&h, 3).await;

    let (a, b) = tokio::join!(h.orchestrator.sync_now(), h.orchestrator.sync_now());

    let outcomes = [a.outcome, b.outcome];
    assert!(outcomes.contains(&CycleOutcome::Coalesced));
    assert!(outcomes.contains(&CycleOutcome::Succeeded));
    assert_eq!(h.remote.pushes().len(), ids.len());
    assert!(!h.orchestrator.is_running());
    assert!(!h.orchestrator.get_status().is_syncing);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_sync_still_settles_entry() {
    let h = harness().await;
    let ids = queue_sales(&h, 1).await;
    h.remote.behave(&ids[0], Behaviour::Hang);

    let abandoned =
        tokio::time::timeout(Duration::from_secs(1), h.orchestrator.sync_now()).await;
    assert!(abandoned.is_err());

    // the cycle keeps running until the push times out
    tokio::time::sleep(SyncSettings::default().request_timeout()).await;
    while h.orchestrator.is_running() {
        tokio::task::yield_now().await;
    }

    let entry = h.outbox.get(&ids[0]).await.unwrap();
    assert_eq!(entry.state, OutboxState::Pending);
    assert_eq!(entry.attempt_count, 1);
    assert_eq!(h.orchestrator.get_status().pending_count, 1);

    h.remote.behave(&ids[0], Behaviour::Accept);
    let report = h.orchestrator.sync_now().await;
    assert_eq!(report.confirmed, 1);
    assert_eq!(h.orchestrator.get_status().pending_count, 0);
}

#[tokio::test]
async fn test_rejection_parks_entry() {
    let h = harness().await;
    let ids = queue_sales(&h, 2).await;
    h.remote.behave(&ids[0], Behaviour::Reject);

    let report = h.orchestrator.sync_now().await;

    assert_eq!(report.outcome, CycleOutcome::PartiallyFailed);
    assert_eq!(report.failed_permanent, 1);
    assert_eq!(report.confirmed, 1);
    assert!(!report.errors[0].retryable);

    let parked = h.outbox.get(&ids[0]).await.unwrap();
    assert_eq!(parked.state, OutboxState::FailedPermanent);
    assert!(parked.last_error.unwrap().contains("UNKNOWN_PRODUCT"));

    let status = h.orchestrator.get_status();
    assert_eq!(status.failed_permanent_count, 1);
    assert_eq!(status.pending_count, 0);
}

#[tokio::test]
async fn test_retry_budget_escalates() {
    let h = harness_with(SyncSettings {
        max_attempts: 2,
        ..SyncSettings::default()
    })
    .await;
    let ids = queue_sales(&h, 1).await;
    h.remote.behave(&ids[0], Behaviour::Fail);

    let first = h.orchestrator.sync_now().await;
    assert_eq!(first.retried, 1);
    assert_eq!(h.outbox.get(&ids[0]).await.unwrap().state, OutboxState::Pending);

    let second = h.orchestrator.sync_now().await;
    assert_eq!(second.failed_permanent, 1);
    let entry = h.outbox.get(&ids[0]).await.unwrap();
    assert_eq!(entry.state, OutboxState::FailedPermanent);
    assert_eq!(entry.attempt_count, 2);
}

#[tokio::test]
async fn test_requeued_entry_is_pushed_again() {
    let h = harness().await;
    let ids = queue_sales(&h, 1).await;
    h.remote.behave(&ids[0], Behaviour::Reject);
    h.orchestrator.sync_now().await;

    h.remote.behave(&ids[0], Behaviour::Accept);
    h.outbox.requeue(&ids[0]).await.unwrap();
    let report = h.orchestrator.sync_now().await;

    assert_eq!(report.outcome, CycleOutcome::Succeeded);
    assert_eq!(report.confirmed, 1);
    assert_eq!(h.remote.pushes().len(), 2);
    assert_eq!(h.orchestrator.get_status().failed_permanent_count, 0);
}

// =============================================================================
// Failure modes
// =============================================================================

#[tokio::test]
async fn test_offline_cycle_fails_without_draining() {
    let h = harness().await;
    queue_sales(&h, 2).await;
    h.remote.online.store(false, Ordering::SeqCst);

    let report = h.orchestrator.sync_now().await;

    assert_eq!(report.outcome, CycleOutcome::Failed);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].operation, "probe");
    assert!(report.errors[0].message.contains("Connectivity unavailable"));
    assert!(h.remote.pushes().is_empty());

    let status = h.orchestrator.get_status();
    assert!(!status.is_online);
    assert!(status.last_sync_at.is_none());
    assert_eq!(status.pending_count, 2);
    assert_eq!(status.last_outcome, Some(CycleOutcome::Failed));
}

#[tokio::test]
async fn test_catalog_unreachable_fails_cycle() {
    let h = harness().await;
    queue_sales(&h, 1).await;
    h.remote.catalog_down.store(true, Ordering::SeqCst);

    let report = h.orchestrator.sync_now().await;

    assert_eq!(report.outcome, CycleOutcome::Failed);
    assert_eq!(report.errors[0].operation, "catalog");
    assert!(h.remote.pushes().is_empty());
    assert!(h.orchestrator.get_status().is_online);
}

// =============================================================================
// Catalog
// =============================================================================

#[tokio::test]
async fn test_catalog_seeds_unknown_products_only() {
    let h = harness().await;
    h.ledger
        .seed_item(SeedItem::new("A", 3, 2, 10))
        .await
        .unwrap();
    *h.remote.catalog.lock().unwrap() = vec![
        product("A", 50, Some(5)),
        product("B", 7, None),
        product("C", -4, Some(0)),
    ];

    let report = h.orchestrator.sync_catalog().await;

    assert_eq!(report.kind, CycleKind::CatalogOnly);
    assert_eq!(report.outcome, CycleOutcome::Succeeded);
    assert_eq!(report.catalog_received, 3);
    assert_eq!(report.products_seeded, 2);

    let a = h.ledger.item("A").await.unwrap();
    assert_eq!(a.current_stock, 3);
    assert_eq!(a.reorder_level, 2);

    let b = h.ledger.item("B").await.unwrap();
    assert_eq!(b.current_stock, 7);
    assert_eq!(b.reorder_level, keel_core::DEFAULT_REORDER_LEVEL);
    assert_eq!(b.reorder_quantity, keel_core::DEFAULT_REORDER_QUANTITY);

    let c = h.ledger.item("C").await.unwrap();
    assert_eq!(c.current_stock, 0);
    assert_eq!(c.reorder_level, keel_core::DEFAULT_REORDER_LEVEL);

    // seeding writes no movement history
    assert!(h.ledger.movements(None).await.unwrap().is_empty());
    assert_eq!(h.store.load_catalog().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_out_of_range_catalog_values_are_clamped() {
    let h = harness().await;
    let mut huge = product("H", i64::MAX, Some(i64::MAX));
    huge.reorder_quantity = Some(i64::MAX);
    *h.remote.catalog.lock().unwrap() = vec![huge];

    let report = h.orchestrator.sync_catalog().await;

    assert_eq!(report.outcome, CycleOutcome::Succeeded);
    let item = h.ledger.item("H").await.unwrap();
    assert_eq!(item.current_stock, keel_core::MAX_STOCK_LEVEL);
    assert_eq!(item.reorder_level, keel_core::DEFAULT_REORDER_LEVEL);
    assert_eq!(item.reorder_quantity, keel_core::DEFAULT_REORDER_QUANTITY);
    assert!(h.ledger.low_stock_alerts().await.is_empty());
}

#[tokio::test]
async fn test_product_that_failed_to_seed_is_pulled_again() {
    let h = harness().await;
    let mut later = product("Q", 4, Some(1));
    later.updated_at = start() + chrono::Duration::minutes(5);
    *h.remote.catalog.lock().unwrap() = vec![product("P", 8, Some(2)), later];

    h.store.fail_commits(true);
    let first = h.orchestrator.sync_catalog().await;
    assert_eq!(first.outcome, CycleOutcome::PartiallyFailed);
    assert_eq!(first.products_seeded, 0);
    assert_eq!(first.errors[0].operation, "seed_item");
    assert!(h.store.catalog_watermark().await.unwrap().is_none());

    h.store.fail_commits(false);
    let second = h.orchestrator.sync_catalog().await;
    assert_eq!(second.outcome, CycleOutcome::Succeeded);
    assert_eq!(second.catalog_received, 2);
    assert_eq!(second.products_seeded, 2);
    assert_eq!(h.ledger.item("P").await.unwrap().current_stock, 8);
    assert_eq!(h.ledger.item("Q").await.unwrap().current_stock, 4);

    let third = h.orchestrator.sync_catalog().await;
    assert_eq!(third.catalog_received, 0);
}

#[tokio::test]
async fn test_catalog_sync_does_not_drain() {
    let h = harness().await;
    queue_sales(&h, 2).await;

    let report = h.orchestrator.sync_catalog().await;

    assert_eq!(report.outcome, CycleOutcome::Succeeded);
    assert!(h.remote.pushes().is_empty());
    assert_eq!(h.outbox.pending_count().await, 2);
}

// =============================================================================
// Status
// =============================================================================

#[tokio::test]
async fn test_recent_errors_are_capped_and_clearable() {
    let h = harness_with(SyncSettings {
        max_recent_errors: 3,
        ..SyncSettings::default()
    })
    .await;
    let ids = queue_sales(&h, 5).await;
    for id in &ids {
        h.remote.behave(id, Behaviour::Fail);
    }

    let report = h.orchestrator.sync_now().await;
    assert_eq!(report.errors.len(), 5);

    let status = h.orchestrator.get_status();
    assert_eq!(status.recent_errors.len(), 3);
    assert_eq!(
        status.recent_errors[2].local_id.as_deref(),
        Some(ids[4].as_str())
    );
    assert_eq!(
        status.recent_errors[0].local_id.as_deref(),
        Some(ids[2].as_str())
    );

    h.orchestrator.clear_errors();
    assert!(h.orchestrator.get_status().recent_errors.is_empty());
}

#[tokio::test]
async fn test_status_subscribers_see_cycle_result() {
    let h = harness().await;
    queue_sales(&h, 1).await;
    h.orchestrator.refresh_status().await;
    let mut rx = h.orchestrator.subscribe_status();
    assert_eq!(rx.borrow_and_update().pending_count, 1);

    h.orchestrator.sync_now().await;

    assert!(rx.has_changed().unwrap());
    let status = rx.borrow_and_update().clone();
    assert_eq!(status.pending_count, 0);
    assert_eq!(status.last_outcome, Some(CycleOutcome::Succeeded));
}

#[tokio::test]
async fn test_realtime_state_updates_connectivity() {
    let h = harness().await;

    h.orchestrator
        .realtime_state_changed(ConnectionState::Connected);
    let status = h.orchestrator.get_status();
    assert!(status.is_online);
    assert_eq!(status.realtime_state, ConnectionState::Connected);

    h.orchestrator
        .realtime_state_changed(ConnectionState::Reconnecting);
    assert!(!h.orchestrator.get_status().is_online);

    h.orchestrator.set_online(true);
    assert!(h.orchestrator.get_status().is_online);
}

// =============================================================================
// Auto-sync
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_auto_sync_runs_until_stopped() {
    let h = harness().await;
    queue_sales(&h, 1).await;

    h.orchestrator
        .start_auto_sync(Duration::from_secs(30))
        .unwrap();
    assert_eq!(h.orchestrator.get_status().auto_sync_interval_secs, Some(30));

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(h.remote.probes(), 1);
    assert_eq!(h.remote.pushes().len(), 1);

    // re-arming replaces the timer rather than adding a second one
    h.orchestrator
        .start_auto_sync(Duration::from_secs(60))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(h.remote.probes(), 2);

    h.orchestrator.stop_auto_sync();
    assert!(h.orchestrator.auto_sync_interval().is_none());
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.remote.probes(), 2);
    assert_eq!(h.orchestrator.get_status().auto_sync_interval_secs, None);
}

#[tokio::test]
async fn test_zero_auto_sync_interval_is_rejected() {
    let h = harness().await;
    let err = h
        .orchestrator
        .start_auto_sync(Duration::ZERO)
        .unwrap_err();
    assert!(err.is_config_error());
}
