//! # Keel Terminal
//!
//! Headless point-of-sale terminal: loads configuration, opens the local
//! store and runs the sync machinery until asked to stop.
//!
//! ## Module Organization
//! ```text
//! keel_terminal/
//! ├── lib.rs        ◄─── You are here (logging, run loop)
//! ├── terminal.rs   ◄─── Terminal composition root + UI operations
//! └── error.rs      ◄─── TerminalError and the UI-facing ApiError
//! ```
//!
//! ## Startup Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Terminal Startup                               │
//! │                                                                         │
//! │  1. Initialize Logging ───────────────────────────────────────────────► │
//! │     • tracing-subscriber with env filter                                │
//! │     • Default: info,keel=debug,sqlx=warn (override with RUST_LOG)       │
//! │                                                                         │
//! │  2. Load Configuration ───────────────────────────────────────────────► │
//! │     • terminal.toml, then KEEL_* environment overrides                  │
//! │                                                                         │
//! │  3. Open Terminal ────────────────────────────────────────────────────► │
//! │     • SQLite (WAL), migrations, ledger + outbox rebuilt from disk       │
//! │                                                                         │
//! │  4. Start ────────────────────────────────────────────────────────────► │
//! │     • realtime channel connects, auto-sync armed                        │
//! │                                                                         │
//! │  5. Ctrl-C ───────────────────────────────────────────────────────────► │
//! │     • auto-sync stopped, realtime channel closed                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod terminal;

use std::path::PathBuf;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use keel_sync::TerminalConfig;

pub use error::{ApiError, ErrorCode, TerminalError, TerminalResult};
pub use terminal::{Components, Terminal};

/// Runs the terminal until Ctrl-C.
pub async fn run(config_path: Option<PathBuf>) -> TerminalResult<()> {
    let config = TerminalConfig::load(config_path)?;
    info!(
        terminal_id = %config.terminal_id(),
        name = %config.terminal.name,
        "Starting Keel POS terminal"
    );

    let terminal = Terminal::open(config).await?;
    terminal.start().await?;

    let status = terminal.get_sync_status();
    info!(
        pending = status.pending_count,
        failed_permanent = status.failed_permanent_count,
        "Terminal ready"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C, shutting down");
    }

    terminal.shutdown().await;
    Ok(())
}

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=keel_sync=trace` - Show trace for the sync crate only
/// - Default: `info,keel=debug,sqlx=warn`
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,keel=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
