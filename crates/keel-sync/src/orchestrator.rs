//! # Sync Orchestrator
//!
//! Runs reconciliation cycles against the remote authority, one at a time.
//!
//! ## Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Reconciliation Cycle                               │
//! │                                                                         │
//! │  trigger (sync_now / auto-sync tick / realtime debounce)               │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  running? ──yes──► Coalesced (no second cycle)                         │
//! │     │ no                                                                │
//! │     ▼                                                                   │
//! │  1. probe ──fail──► Failed (ConnectivityUnavailable, no drain)         │
//! │     │                                                                   │
//! │     ▼                                                                   │
//! │  2. catalog pull ──fail──► Failed                                      │
//! │     │  seed unknown products into the ledger, then cache the rows      │
//! │     ▼                                                                   │
//! │  3. outbox drain (Full only), oldest first                             │
//! │     │  in-flight ► push ► confirmed                                    │
//! │     │                  └► classify ► pending | failed-permanent        │
//! │     ▼                                                                   │
//! │  4. status recompute ► watch channel                                   │
//! │                                                                         │
//! │  Succeeded | PartiallyFailed (entry errors) | Failed                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entry-level failures never abort a cycle. Every remote call is bounded by
//! the configured request timeout.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use ts_rs::TS;

use keel_core::{CatalogProduct, Clock, OutboxEntry, MAX_STOCK_LEVEL};
use keel_db::LocalStore;
use keel_ledger::{SeedItem, StockLedger, TransactionOutbox};

use crate::config::{LedgerSettings, SyncSettings};
use crate::error::{SyncError, SyncResult};
use crate::realtime::{ConnectionState, SyncTrigger};
use crate::remote::RemoteAuthority;
use crate::retry::{classify, RetryDecision};

// =============================================================================
// Reports & Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    /// Probe, catalog pull and outbox drain.
    Full,
    /// Probe and catalog pull.
    CatalogOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    Succeeded,
    /// The cycle ran to the end but some entries failed.
    PartiallyFailed,
    Failed,
    /// Another cycle was already running; nothing was done.
    Coalesced,
}

/// One failure recorded during a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncErrorRecord {
    #[ts(as = "String")]
    pub at: DateTime<Utc>,
    /// The outbox entry involved, if any.
    pub local_id: Option<String>,
    pub operation: String,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CycleReport {
    pub kind: CycleKind,
    pub outcome: CycleOutcome,
    #[ts(as = "String")]
    pub started_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub finished_at: DateTime<Utc>,
    pub catalog_received: usize,
    pub products_seeded: usize,
    pub confirmed: usize,
    /// Entries left pending for the next cycle.
    pub retried: usize,
    pub failed_permanent: usize,
    pub errors: Vec<SyncErrorRecord>,
}

impl CycleReport {
    fn begin(kind: CycleKind, started_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            outcome: CycleOutcome::Succeeded,
            started_at,
            finished_at: started_at,
            catalog_received: 0,
            products_seeded: 0,
            confirmed: 0,
            retried: 0,
            failed_permanent: 0,
            errors: Vec::new(),
        }
    }

    fn is_failed(&self) -> bool {
        self.outcome == CycleOutcome::Failed
    }
}

/// Snapshot of sync health for the UI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    #[ts(as = "Option<String>")]
    pub last_sync_at: Option<DateTime<Utc>>,
    pub pending_count: i64,
    pub failed_permanent_count: i64,
    /// Newest last, capped at `max_recent_errors`.
    pub recent_errors: Vec<SyncErrorRecord>,
    pub last_outcome: Option<CycleOutcome>,
    pub auto_sync_interval_secs: Option<u64>,
    pub realtime_state: ConnectionState,
}

// =============================================================================
// Orchestrator
// =============================================================================

struct AutoSync {
    interval: Duration,
    /// Dropping the sender stops the timer task.
    _shutdown_tx: mpsc::Sender<()>,
}

/// Clears the running flag when a cycle ends, however it ends.
struct RunningGuard<'a> {
    orchestrator: &'a SyncOrchestrator,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.running.store(false, Ordering::SeqCst);
        self.orchestrator
            .status
            .send_modify(|status| status.is_syncing = false);
    }
}

/// Coordinates catalog pulls and outbox drains.
///
/// ## Usage
/// ```rust,ignore
/// let orchestrator = SyncOrchestrator::new(
///     ledger, outbox, store, remote, clock,
///     config.sync.clone(), config.ledger.clone(),
/// );
/// orchestrator.refresh_status().await;
/// orchestrator.start_auto_sync(Duration::from_secs(30))?;
///
/// let report = orchestrator.sync_now().await;
/// println!("{:?}: {} confirmed", report.outcome, report.confirmed);
/// ```
pub struct SyncOrchestrator {
    this: Weak<SyncOrchestrator>,
    ledger: Arc<StockLedger>,
    outbox: Arc<TransactionOutbox>,
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteAuthority>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
    defaults: LedgerSettings,
    running: AtomicBool,
    status: watch::Sender<SyncStatus>,
    auto_sync: Mutex<Option<AutoSync>>,
}

impl SyncOrchestrator {
    pub fn new(
        ledger: Arc<StockLedger>,
        outbox: Arc<TransactionOutbox>,
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteAuthority>,
        clock: Arc<dyn Clock>,
        settings: SyncSettings,
        defaults: LedgerSettings,
    ) -> Arc<Self> {
        let (status, _) = watch::channel(SyncStatus::default());
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            ledger,
            outbox,
            store,
            remote,
            clock,
            settings,
            defaults,
            running: AtomicBool::new(false),
            status,
            auto_sync: Mutex::new(None),
        })
    }

    // -------------------------------------------------------------------------
    // Cycles
    // -------------------------------------------------------------------------

    /// Runs a full cycle, or returns a `Coalesced` report if one is running.
    pub async fn sync_now(&self) -> CycleReport {
        self.run_cycle(CycleKind::Full).await
    }

    /// Probe and catalog pull only, under the same mutual exclusion.
    pub async fn sync_catalog(&self) -> CycleReport {
        self.run_cycle(CycleKind::CatalogOnly).await
    }

    /// The cycle runs on its own task. A caller that stops waiting does not
    /// cancel it, so no entry is left in flight.
    async fn run_cycle(&self, kind: CycleKind) -> CycleReport {
        let Some(this) = self.this.upgrade() else {
            return self.cycle(kind).await;
        };
        match tokio::spawn(async move { this.cycle(kind).await }).await {
            Ok(report) => report,
            Err(e) => {
                error!(?kind, error = %e, "Sync cycle task failed");
                let mut report = CycleReport::begin(kind, self.clock.now());
                report.outcome = CycleOutcome::Failed;
                report
            }
        }
    }

    async fn cycle(&self, kind: CycleKind) -> CycleReport {
        let started_at = self.clock.now();
        let mut report = CycleReport::begin(kind, started_at);

        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(?kind, "Sync already running, trigger coalesced");
            report.outcome = CycleOutcome::Coalesced;
            return report;
        }
        let _guard = RunningGuard { orchestrator: self };
        self.status.send_modify(|status| status.is_syncing = true);

        info!(?kind, "Sync cycle started");

        if let Err(e) = self.timed("probe", self.remote.probe()).await {
            warn!(error = %e, "Remote authority unreachable");
            self.status.send_modify(|status| status.is_online = false);
            let e = match e {
                SyncError::ConnectivityUnavailable(_) => e,
                other => SyncError::ConnectivityUnavailable(other.to_string()),
            };
            self.record(&mut report, None, "probe", &e);
            report.outcome = CycleOutcome::Failed;
            return self.finish(report).await;
        }
        self.status.send_modify(|status| status.is_online = true);

        if let Err(e) = self.pull_catalog(&mut report).await {
            error!(error = %e, "Catalog pull failed");
            self.record(&mut report, None, "catalog", &e);
            report.outcome = CycleOutcome::Failed;
            return self.finish(report).await;
        }

        if kind == CycleKind::Full {
            self.drain_outbox(&mut report).await;
        }

        self.finish(report).await
    }

    async fn pull_catalog(&self, report: &mut CycleReport) -> SyncResult<()> {
        let since = self.store.catalog_watermark().await?;
        let products = self.timed("catalog", self.remote.catalog(since)).await?;
        report.catalog_received = products.len();
        if products.is_empty() {
            debug!("Catalog unchanged");
            return Ok(());
        }

        // Oldest `updated_at` among rows that failed to seed. The cache
        // watermark must stay below it so the next pull returns those rows.
        let mut retry_from: Option<DateTime<Utc>> = None;
        for product in &products {
            if self.ledger.contains(&product.product_id).await {
                continue;
            }
            match self.ledger.seed_item(self.seed_for(product)).await {
                Ok(item) => {
                    report.products_seeded += 1;
                    debug!(product_id = %item.product_id, stock = item.current_stock, "Product seeded from catalog");
                }
                Err(e) => {
                    let e = SyncError::from(e);
                    warn!(product_id = %product.product_id, error = %e, "Failed to seed product");
                    self.record(report, None, "seed_item", &e);
                    retry_from = Some(match retry_from {
                        Some(at) => at.min(product.updated_at),
                        None => product.updated_at,
                    });
                }
            }
        }

        let cached: Vec<CatalogProduct> = match retry_from {
            Some(limit) => products
                .iter()
                .filter(|p| p.updated_at < limit)
                .cloned()
                .collect(),
            None => products,
        };
        if !cached.is_empty() {
            self.store.save_catalog(&cached).await?;
        }

        info!(
            received = report.catalog_received,
            seeded = report.products_seeded,
            "Catalog applied"
        );
        Ok(())
    }

    fn seed_for(&self, product: &CatalogProduct) -> SeedItem {
        let in_range = |v: &i64| (1..=MAX_STOCK_LEVEL).contains(v);
        let level = product
            .reorder_level
            .filter(in_range)
            .unwrap_or(self.defaults.default_reorder_level);
        let quantity = product
            .reorder_quantity
            .filter(in_range)
            .unwrap_or(self.defaults.default_reorder_quantity);

        SeedItem::new(
            product.product_id.clone(),
            product.stock.clamp(0, MAX_STOCK_LEVEL),
            level,
            quantity,
        )
    }

    async fn drain_outbox(&self, report: &mut CycleReport) {
        let batch = self
            .outbox
            .list_pending(Some(self.settings.drain_batch_size), None)
            .await;
        if batch.is_empty() {
            return;
        }
        debug!(entries = batch.len(), "Draining outbox");

        for entry in batch {
            self.push_entry(entry, report).await;
        }

        if report.confirmed > 0 {
            match self.outbox.purge_confirmed().await {
                Ok(purged) => debug!(purged, "Confirmed entries purged"),
                Err(e) => warn!(error = %e, "Failed to purge confirmed entries"),
            }
        }

        info!(
            confirmed = report.confirmed,
            retried = report.retried,
            failed_permanent = report.failed_permanent,
            "Outbox drained"
        );
    }

    async fn push_entry(&self, entry: OutboxEntry, report: &mut CycleReport) {
        let local_id = entry.local_id.as_str();

        let entry = match self.outbox.mark_in_flight(local_id).await {
            Ok(entry) => entry,
            // cancelled since the batch was listed
            Err(e) if e.as_core().is_some() => {
                debug!(local_id, error = %e, "Entry no longer pending, skipped");
                return;
            }
            Err(e) => {
                let e = SyncError::from(e);
                self.record(report, Some(local_id), "mark_in_flight", &e);
                return;
            }
        };

        match self
            .timed("push_transaction", self.remote.push_transaction(&entry.payload))
            .await
        {
            Ok(receipt) => match self.outbox.mark_confirmed(local_id, receipt).await {
                Ok(confirmed) => {
                    report.confirmed += 1;
                    debug!(local_id, remote_id = ?confirmed.remote_id, "Sale confirmed");
                }
                Err(e) => {
                    let e = SyncError::from(e);
                    error!(local_id, error = %e, "Failed to record confirmation");
                    self.record(report, Some(local_id), "mark_confirmed", &e);
                }
            },
            Err(push_error) => {
                let attempts = entry.attempt_count + 1;
                let decision = classify(&push_error, attempts, self.settings.max_attempts);
                let message = push_error.to_string();

                let result = if decision.is_permanent() {
                    report.failed_permanent += 1;
                    warn!(local_id, attempts, ?decision, error = %message, "Sale parked as failed-permanent");
                    self.outbox.mark_failed_permanent(local_id, &message).await
                } else {
                    report.retried += 1;
                    debug!(local_id, attempts, error = %message, "Push failed, will retry");
                    self.outbox.mark_failed(local_id, &message).await
                };

                self.record(report, Some(local_id), "push_transaction", &push_error);
                if let Err(e) = result {
                    error!(local_id, error = %e, "Failed to record push failure");
                    self.record(report, Some(local_id), "mark_failed", &SyncError::from(e));
                }
            }
        }
    }

    async fn finish(&self, mut report: CycleReport) -> CycleReport {
        report.finished_at = self.clock.now();
        if !report.is_failed() {
            report.outcome = if report.errors.is_empty() {
                CycleOutcome::Succeeded
            } else {
                CycleOutcome::PartiallyFailed
            };
        }

        let counts = self.outbox.counts().await;
        let cap = self.settings.max_recent_errors;
        self.status.send_modify(|status| {
            status.pending_count = counts.pending;
            status.failed_permanent_count = counts.failed_permanent;
            status.recent_errors.extend(report.errors.iter().cloned());
            let overflow = status.recent_errors.len().saturating_sub(cap);
            status.recent_errors.drain(..overflow);
            if !report.is_failed() {
                status.last_sync_at = Some(report.finished_at);
            }
            status.last_outcome = Some(report.outcome);
        });

        info!(
            kind = ?report.kind,
            outcome = ?report.outcome,
            confirmed = report.confirmed,
            errors = report.errors.len(),
            "Sync cycle finished"
        );
        report
    }

    fn record(
        &self,
        report: &mut CycleReport,
        local_id: Option<&str>,
        operation: &str,
        error: &SyncError,
    ) {
        report.errors.push(SyncErrorRecord {
            at: self.clock.now(),
            local_id: local_id.map(str::to_string),
            operation: operation.to_string(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        });
    }

    async fn timed<T, F>(&self, operation: &'static str, fut: F) -> SyncResult<T>
    where
        F: Future<Output = SyncResult<T>>,
    {
        let limit = self.settings.request_timeout();
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| SyncError::timeout(operation, limit))?
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    /// Latest status snapshot. Never waits on a running cycle.
    pub fn get_status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Recomputes the outbox counts without running a cycle.
    pub async fn refresh_status(&self) {
        let counts = self.outbox.counts().await;
        self.status.send_modify(|status| {
            status.pending_count = counts.pending;
            status.failed_permanent_count = counts.failed_permanent;
        });
    }

    pub fn clear_errors(&self) {
        self.status.send_modify(|status| status.recent_errors.clear());
    }

    pub fn set_online(&self, online: bool) {
        self.status.send_if_modified(|status| {
            let changed = status.is_online != online;
            status.is_online = online;
            changed
        });
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Auto-sync
    // -------------------------------------------------------------------------

    /// Runs a full cycle every `interval`. Re-arming replaces the timer.
    pub fn start_auto_sync(self: &Arc<Self>, interval: Duration) -> SyncResult<()> {
        if interval.is_zero() {
            return Err(SyncError::InvalidConfig(
                "auto-sync interval must be greater than 0".into(),
            ));
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let orchestrator = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(orchestrator) = orchestrator.upgrade() else {
                            break;
                        };
                        tokio::spawn(async move {
                            orchestrator.sync_now().await;
                        });
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            debug!("Auto-sync timer stopped");
        });

        let previous = lock(&self.auto_sync).replace(AutoSync {
            interval,
            _shutdown_tx: shutdown_tx,
        });
        if let Some(previous) = previous {
            debug!(previous = ?previous.interval, "Auto-sync timer replaced");
        }

        self.status
            .send_modify(|status| status.auto_sync_interval_secs = Some(interval.as_secs()));
        info!(?interval, "Auto-sync started");
        Ok(())
    }

    /// Stops the timer. A cycle already running is left to finish.
    pub fn stop_auto_sync(&self) {
        if lock(&self.auto_sync).take().is_some() {
            info!("Auto-sync stopped");
        }
        self.status
            .send_modify(|status| status.auto_sync_interval_secs = None);
    }

    pub fn auto_sync_interval(&self) -> Option<Duration> {
        lock(&self.auto_sync).as_ref().map(|a| a.interval)
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("remote", &self.remote)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl SyncTrigger for SyncOrchestrator {
    async fn catalog_sync(&self) {
        self.sync_catalog().await;
    }

    fn realtime_state_changed(&self, state: ConnectionState) {
        self.status.send_modify(|status| {
            status.realtime_state = state;
            match state {
                ConnectionState::Connected => status.is_online = true,
                ConnectionState::Reconnecting | ConnectionState::Error => {
                    status.is_online = false
                }
                ConnectionState::Disconnected | ConnectionState::Connecting => {}
            }
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
