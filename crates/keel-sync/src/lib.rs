//! # keel-sync: Reconciliation for Keel POS
//!
//! Keeps the terminal's ledger and outbox in step with the remote authority.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        keel-sync Components                             │
//! │                                                                         │
//! │   auto-sync timer      sync_now()        RealtimeChannel               │
//! │         │                  │            (events, debounce)             │
//! │         └──────────┬───────┘                    │ SyncTrigger          │
//! │                    ▼                            ▼                      │
//! │   ┌─────────────────────────────────────────────────────────────────┐  │
//! │   │                      SyncOrchestrator                           │  │
//! │   │  probe ► catalog pull ► outbox drain ► status (watch channel)   │  │
//! │   └───────┬───────────────────────┬─────────────────────┬───────────┘  │
//! │           │                       │                     │              │
//! │           ▼                       ▼                     ▼              │
//! │   Arc<dyn RemoteAuthority>   StockLedger         TransactionOutbox     │
//! │   (HttpRemoteAuthority)      (seed products)     (in-flight, confirm,  │
//! │                                                   retry via classify)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`orchestrator`] - `SyncOrchestrator`, cycle reports and `SyncStatus`
//! - [`realtime`] - `RealtimeChannel`, transport traits, WebSocket transport
//! - [`remote`] - `RemoteAuthority` trait and the reqwest adapter
//! - [`retry`] - `classify` and `RetryDecision`
//! - [`config`] - `TerminalConfig` (TOML + environment)
//! - [`error`] - `SyncError`

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod realtime;
pub mod remote;
pub mod retry;

pub use config::{
    DatabaseSettings, LedgerSettings, RealtimeSettings, SyncSettings, TerminalConfig,
    TerminalSettings,
};
pub use error::{SyncError, SyncResult};
pub use orchestrator::{
    CycleKind, CycleOutcome, CycleReport, SyncErrorRecord, SyncOrchestrator, SyncStatus,
};
pub use realtime::{
    ChannelStats, ConnectionState, Envelope, EventKind, RealtimeChannel, RealtimeConnection,
    RealtimeEvent, RealtimeTransport, ReconnectBackoff, Subscription, SyncTrigger, WsTransport,
};
pub use remote::{HttpRemoteAuthority, RemoteAuthority};
pub use retry::{classify, RetryDecision};
