//! End-to-end terminal scenarios over in-memory collaborators.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::{
    AlertPriority, CatalogProduct, ManualClock, MovementType, OutboxState, RemoteReceipt, SaleLine,
    SalePayload, StockRequest,
};
use keel_db::MemoryStore;
use keel_sync::{CycleOutcome, RemoteAuthority, SyncError, SyncResult, TerminalConfig};
use keel_terminal::{ApiError, Components, ErrorCode, Terminal};

#[derive(Debug, Default)]
struct FakeRemote {
    catalog: Mutex<Vec<CatalogProduct>>,
    rejected: Mutex<HashSet<String>>,
    pushed: Mutex<Vec<SalePayload>>,
}

#[async_trait]
impl RemoteAuthority for FakeRemote {
    async fn probe(&self) -> SyncResult<()> {
        Ok(())
    }

    async fn catalog(&self, _since: Option<DateTime<Utc>>) -> SyncResult<Vec<CatalogProduct>> {
        Ok(self.catalog.lock().unwrap().clone())
    }

    async fn push_transaction(&self, payload: &SalePayload) -> SyncResult<RemoteReceipt> {
        self.pushed.lock().unwrap().push(payload.clone());
        if self.rejected.lock().unwrap().contains(&payload.local_id) {
            return Err(SyncError::RemoteRejected {
                code: "422".into(),
                message: "price mismatch".into(),
            });
        }
        Ok(RemoteReceipt {
            id: format!("srv-{}", self.pushed.lock().unwrap().len()),
            code: "OK".into(),
        })
    }
}

fn product(id: &str, stock: i64, level: i64) -> CatalogProduct {
    CatalogProduct {
        product_id: id.to_string(),
        sku: format!("SKU-{id}"),
        name: format!("Product {id}"),
        price_cents: 350,
        stock,
        reorder_level: Some(level),
        reorder_quantity: Some(12),
        updated_at: Utc::now(),
    }
}

fn config() -> TerminalConfig {
    let mut config = TerminalConfig::default();
    config.terminal.id = "till-1".into();
    config.sync.remote_url = Some("http://pos.test/api".into());
    config
}

async fn terminal_with(catalog: Vec<CatalogProduct>) -> (Terminal, Arc<FakeRemote>) {
    let remote = Arc::new(FakeRemote::default());
    *remote.catalog.lock().unwrap() = catalog;
    let terminal = Terminal::assemble(
        config(),
        Components {
            store: Arc::new(MemoryStore::new()),
            remote: remote.clone(),
            transport: None,
            clock: Arc::new(ManualClock::new(Utc::now())),
        },
    )
    .await
    .unwrap();

    // catalog seeds the ledger
    let report = terminal.trigger_sync_now().await;
    assert_eq!(report.outcome, CycleOutcome::Succeeded);
    (terminal, remote)
}

#[tokio::test]
async fn test_five_unit_sale_scenario() {
    let (terminal, remote) = terminal_with(vec![product("P", 5, 2)]).await;

    let local_id = terminal
        .add_sale("cashier-1", vec![SaleLine::new("P", 4, 350)])
        .await
        .unwrap();

    assert_eq!(terminal.stock_item("P").await.unwrap().current_stock, 1);
    let alerts = terminal.get_low_stock_alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].priority, AlertPriority::Medium);
    assert_eq!(terminal.get_sync_status().pending_count, 1);

    let err = terminal
        .add_sale("cashier-1", vec![SaleLine::new("P", 5, 350)])
        .await
        .unwrap_err();
    assert!(err.is_insufficient_stock());
    assert_eq!(ApiError::from(err).code, ErrorCode::InsufficientStock);
    assert_eq!(terminal.get_sync_status().pending_count, 1);

    let report = terminal.trigger_sync_now().await;
    assert_eq!(report.confirmed, 1);
    assert_eq!(terminal.get_sync_status().pending_count, 0);

    let pushed = remote.pushed.lock().unwrap().clone();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].local_id, local_id);
    assert_eq!(pushed[0].terminal_id, "till-1");
    assert_eq!(pushed[0].total_cents, 1400);
}

#[tokio::test]
async fn test_cancel_sale_returns_stock() {
    let (terminal, _remote) = terminal_with(vec![product("P", 10, 2)]).await;
    let local_id = terminal
        .add_sale("cashier-1", vec![SaleLine::new("P", 3, 350)])
        .await
        .unwrap();

    let movements = terminal
        .cancel_sale(&local_id, "manager-1", Some("customer changed mind".into()))
        .await
        .unwrap();

    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].movement_type, MovementType::Return);
    assert_eq!(terminal.stock_item("P").await.unwrap().current_stock, 10);
    assert_eq!(terminal.get_sync_status().pending_count, 0);
    assert!(terminal.pending_sales().await.is_empty());
}

#[tokio::test]
async fn test_restock_and_adjust_clear_alerts() {
    let (terminal, _remote) = terminal_with(vec![product("P", 1, 5)]).await;
    assert_eq!(terminal.get_low_stock_alerts().await.len(), 1);

    let restock = terminal
        .restock("P", 20, "stock-clerk", Some("delivery 4411".into()))
        .await
        .unwrap();
    assert_eq!(restock.quantity, 20);
    assert!(terminal.get_low_stock_alerts().await.is_empty());

    terminal
        .adjust_stock("P", -2, "stock-clerk", Some("damaged".into()))
        .await
        .unwrap();
    assert_eq!(terminal.stock_item("P").await.unwrap().current_stock, 19);

    let err = terminal
        .adjust_stock("P", 0, "stock-clerk", None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ValidationError);

    let item = terminal.set_reorder_policy("P", 25, 30).await.unwrap();
    assert_eq!(item.reorder_level, 25);
    assert_eq!(terminal.get_low_stock_alerts().await.len(), 1);
}

#[tokio::test]
async fn test_unknown_product_is_not_found() {
    let (terminal, _remote) = terminal_with(vec![]).await;

    let err = terminal
        .add_sale("cashier-1", vec![SaleLine::new("NOPE", 1, 100)])
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);

    let check = terminal
        .check_availability(&[StockRequest::new("NOPE", 1)])
        .await;
    assert!(check.is_err());
}

#[tokio::test]
async fn test_rejected_sale_can_be_requeued() {
    let (terminal, remote) = terminal_with(vec![product("P", 10, 2)]).await;
    let local_id = terminal
        .add_sale("cashier-1", vec![SaleLine::new("P", 1, 350)])
        .await
        .unwrap();
    remote.rejected.lock().unwrap().insert(local_id.clone());

    let report = terminal.trigger_sync_now().await;
    assert_eq!(report.outcome, CycleOutcome::PartiallyFailed);
    let failed = terminal.failed_sales().await;
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].state, OutboxState::FailedPermanent);
    assert_eq!(terminal.get_sync_status().failed_permanent_count, 1);

    remote.rejected.lock().unwrap().clear();
    let entry = terminal.requeue_sale(&local_id).await.unwrap();
    assert_eq!(entry.state, OutboxState::Pending);
    assert_eq!(entry.attempt_count, 0);

    let report = terminal.trigger_sync_now().await;
    assert_eq!(report.outcome, CycleOutcome::Succeeded);
    assert!(terminal.failed_sales().await.is_empty());

    terminal.clear_sync_errors();
    assert!(terminal.get_sync_status().recent_errors.is_empty());
}

#[tokio::test]
async fn test_start_and_shutdown_toggle_auto_sync() {
    let (terminal, _remote) = terminal_with(vec![]).await;
    assert!(terminal.realtime().is_none());

    terminal.start().await.unwrap();
    assert_eq!(terminal.get_sync_status().auto_sync_interval_secs, Some(30));

    terminal.shutdown().await;
    assert_eq!(terminal.get_sync_status().auto_sync_interval_secs, None);
}

#[tokio::test]
async fn test_queued_sale_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.database.path = Some(dir.path().join("keel.db"));
    config.sync.auto_sync_interval_secs = 0;

    let local_id = {
        let terminal = Terminal::open(config.clone()).await.unwrap();
        terminal
            .ledger()
            .seed_item(keel_ledger::SeedItem::new("P", 6, 2, 10))
            .await
            .unwrap();
        terminal
            .add_sale("cashier-1", vec![SaleLine::new("P", 2, 350)])
            .await
            .unwrap()
    };

    let terminal = Terminal::open(config).await.unwrap();
    assert_eq!(terminal.stock_item("P").await.unwrap().current_stock, 4);
    assert_eq!(terminal.get_sync_status().pending_count, 1);
    assert_eq!(terminal.pending_sales().await[0].local_id, local_id);
}

#[tokio::test]
async fn test_open_requires_remote_url() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.database.path = Some(dir.path().join("keel.db"));
    config.sync.remote_url = None;

    let err = Terminal::open(config).await.err().unwrap();
    assert_eq!(err.code(), ErrorCode::ConfigError);
}

#[tokio::test]
async fn test_assemble_rejects_invalid_config() {
    let mut config = config();
    config.realtime.history_size = 0;

    let err = Terminal::assemble(
        config,
        Components {
            store: Arc::new(MemoryStore::new()),
            remote: Arc::new(FakeRemote::default()),
            transport: None,
            clock: Arc::new(ManualClock::new(Utc::now())),
        },
    )
    .await
    .err()
    .unwrap();
    assert_eq!(err.code(), ErrorCode::ConfigError);
}
