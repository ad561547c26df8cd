//! # Terminal
//!
//! Composition root: owns the store, ledger, outbox, orchestrator and
//! realtime channel, and exposes the operations the UI calls.
//!
//! ## Wiring
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              Terminal                                   │
//! │                                                                         │
//! │   add_sale / cancel_sale / restock / adjust_stock / requeue_sale        │
//! │          │                                                              │
//! │          ▼                                                              │
//! │   StockLedger ──(lock order: ledger, then outbox)──► TransactionOutbox  │
//! │          │                                                 │            │
//! │          └──────────────┬──────────────────────────────────┘            │
//! │                         ▼                                               │
//! │                 Arc<dyn LocalStore>                                     │
//! │                                                                         │
//! │   SyncOrchestrator ◄── SyncTrigger ── RealtimeChannel                   │
//! │          │                                                              │
//! │          ▼                                                              │
//! │   Arc<dyn RemoteAuthority>                                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use keel_core::{
    Availability, Clock, LowStockAlert, MovementType, OutboxEntry, SaleLine, SalePayload,
    StockItem, StockMovement, StockRequest, SystemClock,
};
use keel_db::{Database, DbConfig, LocalStore, SqliteStore};
use keel_ledger::{MovementRequest, StockLedger, TransactionOutbox};
use keel_sync::{
    CycleReport, HttpRemoteAuthority, RealtimeChannel, RealtimeTransport, RemoteAuthority,
    SyncOrchestrator, SyncStatus, TerminalConfig, WsTransport,
};

use crate::error::{TerminalError, TerminalResult};

/// The collaborators a terminal is built from.
pub struct Components {
    pub store: Arc<dyn LocalStore>,
    pub remote: Arc<dyn RemoteAuthority>,
    /// `None` runs the terminal without a realtime channel.
    pub transport: Option<Arc<dyn RealtimeTransport>>,
    pub clock: Arc<dyn Clock>,
}

pub struct Terminal {
    config: TerminalConfig,
    clock: Arc<dyn Clock>,
    ledger: Arc<StockLedger>,
    outbox: Arc<TransactionOutbox>,
    orchestrator: Arc<SyncOrchestrator>,
    realtime: Option<RealtimeChannel>,
}

impl Terminal {
    /// Opens the on-disk database and the HTTP / WebSocket adapters named in
    /// `config`.
    pub async fn open(config: TerminalConfig) -> TerminalResult<Self> {
        config.validate()?;

        let path = config.database.resolved_path().ok_or_else(|| {
            TerminalError::Config("could not determine a database path".into())
        })?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        info!(?path, "Opening terminal database");

        let db = Database::new(
            DbConfig::new(path).max_connections(config.database.max_connections),
        )
        .await?;

        let remote_url = config
            .sync
            .remote_url
            .as_deref()
            .ok_or_else(|| TerminalError::Config("sync.remote_url is not set".into()))?;
        let remote = HttpRemoteAuthority::new(remote_url, config.sync.request_timeout())?;

        let transport: Option<Arc<dyn RealtimeTransport>> = match &config.realtime.url {
            Some(url) if config.realtime.enabled => Some(Arc::new(WsTransport::new(url)?)),
            _ => None,
        };

        Self::assemble(
            config,
            Components {
                store: Arc::new(SqliteStore::new(db)),
                remote: Arc::new(remote),
                transport,
                clock: Arc::new(SystemClock),
            },
        )
        .await
    }

    /// Builds a terminal from explicit collaborators.
    ///
    /// The ledger and outbox are rebuilt from the store before this returns.
    pub async fn assemble(config: TerminalConfig, parts: Components) -> TerminalResult<Self> {
        config.validate()?;

        let ledger = Arc::new(StockLedger::load(parts.store.clone(), parts.clock.clone()).await?);
        let outbox =
            Arc::new(TransactionOutbox::load(parts.store.clone(), parts.clock.clone()).await?);

        let orchestrator = SyncOrchestrator::new(
            ledger.clone(),
            outbox.clone(),
            parts.store,
            parts.remote,
            parts.clock.clone(),
            config.sync.clone(),
            config.ledger.clone(),
        );
        orchestrator.refresh_status().await;

        let realtime = parts.transport.map(|transport| {
            RealtimeChannel::new(
                config.realtime.clone(),
                config.terminal_id(),
                transport,
                parts.clock.clone(),
            )
            .with_trigger(orchestrator.clone())
        });

        info!(
            terminal_id = %config.terminal_id(),
            realtime = realtime.is_some(),
            "Terminal assembled"
        );

        Ok(Self {
            config,
            clock: parts.clock,
            ledger,
            outbox,
            orchestrator,
            realtime,
        })
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Connects the realtime channel and arms auto-sync.
    pub async fn start(&self) -> TerminalResult<()> {
        if let Some(channel) = &self.realtime {
            channel.connect();
        }
        if let Some(interval) = self.config.sync.auto_sync_interval() {
            self.orchestrator.start_auto_sync(interval)?;
        }
        self.orchestrator.refresh_status().await;

        info!(terminal_id = %self.config.terminal_id(), "Terminal started");
        Ok(())
    }

    /// Stops auto-sync and closes the realtime channel. A cycle already in
    /// progress is allowed to finish.
    pub async fn shutdown(&self) {
        self.orchestrator.stop_auto_sync();
        if let Some(channel) = &self.realtime {
            channel.disconnect().await;
        }
        info!("Terminal shut down");
    }

    // -------------------------------------------------------------------------
    // Sales
    // -------------------------------------------------------------------------

    /// Records a sale and queues it for sync. Returns the sale's local id.
    ///
    /// Fails with `InsufficientStock` (and records nothing) when any line
    /// asks for more than is available.
    pub async fn add_sale(&self, actor_id: &str, lines: Vec<SaleLine>) -> TerminalResult<String> {
        let payload = SalePayload::new(self.config.terminal_id(), actor_id, lines, self.clock.now());
        let entry = self
            .ledger
            .record_sale(&self.outbox, payload, false)
            .await?;
        self.orchestrator.refresh_status().await;
        Ok(entry.local_id)
    }

    /// Cancels a sale that has not reached the server and returns its stock.
    pub async fn cancel_sale(
        &self,
        local_id: &str,
        actor_id: &str,
        reason: Option<String>,
    ) -> TerminalResult<Vec<StockMovement>> {
        let movements = self
            .ledger
            .cancel_sale(&self.outbox, local_id, actor_id, reason)
            .await?;
        self.orchestrator.refresh_status().await;
        Ok(movements)
    }

    /// Puts a failed-permanent sale back in the queue with a fresh budget.
    pub async fn requeue_sale(&self, local_id: &str) -> TerminalResult<OutboxEntry> {
        let entry = self.outbox.requeue(local_id).await?;
        self.orchestrator.refresh_status().await;
        Ok(entry)
    }

    /// Sales the server refused or that ran out of attempts.
    pub async fn failed_sales(&self) -> Vec<OutboxEntry> {
        self.outbox.list_failed_permanent().await
    }

    pub async fn pending_sales(&self) -> Vec<OutboxEntry> {
        self.outbox.list_pending(None, None).await
    }

    // -------------------------------------------------------------------------
    // Stock
    // -------------------------------------------------------------------------

    pub async fn restock(
        &self,
        product_id: &str,
        quantity: i64,
        actor_id: &str,
        reason: Option<String>,
    ) -> TerminalResult<StockMovement> {
        let mut request = MovementRequest::new(product_id, quantity, MovementType::Restock, actor_id);
        request.reason = reason;
        Ok(self.ledger.apply_movement(request).await?)
    }

    /// Corrects stock after a count. `delta` may be negative but not zero.
    pub async fn adjust_stock(
        &self,
        product_id: &str,
        delta: i64,
        actor_id: &str,
        reason: Option<String>,
    ) -> TerminalResult<StockMovement> {
        let mut request =
            MovementRequest::new(product_id, delta, MovementType::Adjustment, actor_id);
        request.reason = reason;
        Ok(self.ledger.apply_movement(request).await?)
    }

    pub async fn set_reorder_policy(
        &self,
        product_id: &str,
        reorder_level: i64,
        reorder_quantity: i64,
    ) -> TerminalResult<StockItem> {
        Ok(self
            .ledger
            .set_reorder_policy(product_id, reorder_level, reorder_quantity)
            .await?)
    }

    pub async fn check_availability(
        &self,
        requests: &[StockRequest],
    ) -> TerminalResult<Availability> {
        Ok(self.ledger.check_availability(requests).await?)
    }

    pub async fn stock_item(&self, product_id: &str) -> Option<StockItem> {
        self.ledger.item(product_id).await
    }

    pub async fn get_low_stock_alerts(&self) -> Vec<LowStockAlert> {
        self.ledger.low_stock_alerts().await
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<LowStockAlert> {
        self.ledger.subscribe_alerts()
    }

    // -------------------------------------------------------------------------
    // Sync
    // -------------------------------------------------------------------------

    pub fn get_sync_status(&self) -> SyncStatus {
        self.orchestrator.get_status()
    }

    pub fn subscribe_sync_status(&self) -> watch::Receiver<SyncStatus> {
        self.orchestrator.subscribe_status()
    }

    pub async fn trigger_sync_now(&self) -> CycleReport {
        debug!("Manual sync requested");
        self.orchestrator.sync_now().await
    }

    pub fn clear_sync_errors(&self) {
        self.orchestrator.clear_errors();
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn config(&self) -> &TerminalConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<StockLedger> {
        &self.ledger
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    pub fn realtime(&self) -> Option<&RealtimeChannel> {
        self.realtime.as_ref()
    }
}
