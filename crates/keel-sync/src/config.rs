//! # Terminal Configuration
//!
//! Configuration for the terminal, its database, the sync orchestrator and
//! the realtime channel.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     KEEL_TERMINAL_ID=till-3                                            │
//! │     KEEL_REMOTE_URL=https://pos.example.com/api                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/keel-pos/terminal.toml (Linux)                           │
//! │     ~/Library/Application Support/com.keel.pos/terminal.toml (macOS)   │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     auto-generated terminal id, sync every 30s, realtime off           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [terminal]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Till 1"
//!
//! [database]
//! path = "/var/lib/keel/keel.db"
//!
//! [sync]
//! remote_url = "https://pos.example.com/api"
//! auto_sync_interval_secs = 30
//! request_timeout_secs = 10
//! max_attempts = 5
//!
//! [realtime]
//! enabled = true
//! url = "wss://pos.example.com/realtime"
//! namespace = "store-001"
//!
//! [ledger]
//! default_reorder_level = 10
//! default_reorder_quantity = 20
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Terminal Identity
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalSettings {
    /// Unique terminal identifier, sent with every sale.
    /// Auto-generated on first run if not provided.
    pub id: String,

    /// Human-readable name (e.g., "Till 1").
    #[serde(default = "default_terminal_name")]
    pub name: String,
}

fn default_terminal_name() -> String {
    "POS Terminal".to_string()
}

impl Default for TerminalSettings {
    fn default() -> Self {
        TerminalSettings {
            id: Uuid::new_v4().to_string(),
            name: default_terminal_name(),
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to `keel.db` in the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
        }
    }
}

impl DatabaseSettings {
    /// The configured path, or the platform default.
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(|| {
            directories::ProjectDirs::from("com", "keel", "pos")
                .map(|dirs| dirs.data_dir().join("keel.db"))
        })
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Base URL of the remote authority's HTTP API.
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Interval between automatic cycles (seconds). 0 disables auto-sync.
    #[serde(default = "default_auto_sync_interval")]
    pub auto_sync_interval_secs: u64,

    /// Upper bound on any single remote call (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Pushes per entry before it is parked as failed-permanent.
    /// Set to 0 for infinite retries.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Maximum entries pushed per cycle.
    #[serde(default = "default_drain_batch_size")]
    pub drain_batch_size: usize,

    /// Length of the `recent_errors` list in the sync status.
    #[serde(default = "default_max_recent_errors")]
    pub max_recent_errors: usize,
}

fn default_auto_sync_interval() -> u64 {
    30
}
fn default_request_timeout() -> u64 {
    10
}
fn default_max_attempts() -> u32 {
    5
}
fn default_drain_batch_size() -> usize {
    100
}
fn default_max_recent_errors() -> usize {
    20
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            remote_url: None,
            auto_sync_interval_secs: default_auto_sync_interval(),
            request_timeout_secs: default_request_timeout(),
            max_attempts: default_max_attempts(),
            drain_batch_size: default_drain_batch_size(),
            max_recent_errors: default_max_recent_errors(),
        }
    }
}

impl SyncSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn auto_sync_interval(&self) -> Option<Duration> {
        (self.auto_sync_interval_secs > 0)
            .then(|| Duration::from_secs(self.auto_sync_interval_secs))
    }
}

// =============================================================================
// Realtime Settings
// =============================================================================

/// Realtime channel settings.
///
/// ## Reconnect Schedule
/// ```text
///   delay(n) = min(backoff_base_ms * 2^n, backoff_max_secs)
///
///   500ms, 1s, 2s, 4s, ... 30s, 30s   (until max_reconnect_attempts)
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeSettings {
    #[serde(default)]
    pub enabled: bool,

    /// WebSocket URL of the event stream.
    #[serde(default)]
    pub url: Option<String>,

    /// Namespace joined during the handshake (usually the store id).
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Time allowed for connect plus handshake (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Silence after a ping before the connection is declared lost (seconds).
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,

    /// Failed attempts in a row before the channel gives up.
    /// Set to 0 for infinite retries.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Number of recent events kept for inspection.
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Quiet period before a burst of events triggers a catalog sync.
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,

    #[serde(default = "default_true")]
    pub catalog_sync_on_events: bool,
}

fn default_namespace() -> String {
    "default".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_heartbeat_interval() -> u64 {
    25
}
fn default_heartbeat_timeout() -> u64 {
    10
}
fn default_backoff_base() -> u64 {
    500
}
fn default_backoff_max() -> u64 {
    30
}
fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_history_size() -> usize {
    100
}
fn default_debounce() -> u64 {
    750
}
fn default_true() -> bool {
    true
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        RealtimeSettings {
            enabled: false,
            url: None,
            namespace: default_namespace(),
            connect_timeout_secs: default_connect_timeout(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            history_size: default_history_size(),
            debounce_ms: default_debounce(),
            catalog_sync_on_events: true,
        }
    }
}

impl RealtimeSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

// =============================================================================
// Ledger Settings
// =============================================================================

/// Defaults used when the catalog brings in a product without a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    #[serde(default = "default_reorder_level")]
    pub default_reorder_level: i64,

    #[serde(default = "default_reorder_quantity")]
    pub default_reorder_quantity: i64,
}

fn default_reorder_level() -> i64 {
    keel_core::DEFAULT_REORDER_LEVEL
}
fn default_reorder_quantity() -> i64 {
    keel_core::DEFAULT_REORDER_QUANTITY
}

impl Default for LedgerSettings {
    fn default() -> Self {
        LedgerSettings {
            default_reorder_level: default_reorder_level(),
            default_reorder_quantity: default_reorder_quantity(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete terminal configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerminalConfig {
    #[serde(default)]
    pub terminal: TerminalSettings,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub realtime: RealtimeSettings,

    #[serde(default)]
    pub ledger: LedgerSettings,
}

impl TerminalConfig {
    /// Creates a new config with defaults and a generated terminal ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (terminal.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading terminal config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load terminal config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Terminal config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.terminal.id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("terminal.id must not be empty".into()));
        }

        if let Some(ref raw) = self.sync.remote_url {
            let url = url::Url::parse(raw)?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(SyncError::InvalidUrl(format!(
                    "Remote URL must start with http:// or https://, got: {}",
                    raw
                )));
            }
        }

        if self.sync.request_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.request_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.sync.drain_batch_size == 0 {
            return Err(SyncError::InvalidConfig(
                "sync.drain_batch_size must be greater than 0".into(),
            ));
        }

        if self.realtime.enabled {
            let raw = self.realtime.url.as_deref().ok_or_else(|| {
                SyncError::InvalidConfig("realtime.url is required when realtime is enabled".into())
            })?;
            let url = url::Url::parse(raw)?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(SyncError::InvalidUrl(format!(
                    "Realtime URL must start with ws:// or wss://, got: {}",
                    raw
                )));
            }
        }
        if self.realtime.heartbeat_interval_secs == 0 || self.realtime.history_size == 0 {
            return Err(SyncError::InvalidConfig(
                "realtime.heartbeat_interval_secs and realtime.history_size must be greater than 0"
                    .into(),
            ));
        }
        if self.realtime.backoff_base_ms == 0
            || self.realtime.backoff_base() > self.realtime.backoff_max()
        {
            return Err(SyncError::InvalidConfig(
                "realtime.backoff_base_ms must be positive and not exceed backoff_max_secs".into(),
            ));
        }

        if self.ledger.default_reorder_level <= 0 || self.ledger.default_reorder_quantity <= 0 {
            return Err(SyncError::InvalidConfig(
                "ledger reorder defaults must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("KEEL_TERMINAL_ID") {
            debug!(terminal_id = %id, "Overriding terminal ID from environment");
            self.terminal.id = id;
        }

        if let Ok(name) = std::env::var("KEEL_TERMINAL_NAME") {
            self.terminal.name = name;
        }

        if let Ok(path) = std::env::var("KEEL_DATABASE_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }

        if let Ok(url) = std::env::var("KEEL_REMOTE_URL") {
            debug!(url = %url, "Overriding remote URL from environment");
            self.sync.remote_url = Some(url);
        }

        if let Ok(secs) = std::env::var("KEEL_SYNC_INTERVAL_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.sync.auto_sync_interval_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid KEEL_SYNC_INTERVAL_SECS"),
            }
        }

        if let Ok(url) = std::env::var("KEEL_REALTIME_URL") {
            debug!(url = %url, "Overriding realtime URL from environment");
            self.realtime.url = Some(url);
            self.realtime.enabled = true;
        }

        if let Ok(ns) = std::env::var("KEEL_REALTIME_NAMESPACE") {
            self.realtime.namespace = ns;
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "keel", "pos")
            .map(|dirs| dirs.config_dir().join("terminal.toml"))
    }

    /// Returns the terminal ID.
    pub fn terminal_id(&self) -> &str {
        &self.terminal.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TerminalConfig::default();
        assert!(!config.terminal.id.is_empty());
        assert_eq!(config.sync.max_attempts, 5);
        assert_eq!(config.sync.auto_sync_interval(), Some(Duration::from_secs(30)));
        assert!(!config.realtime.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = TerminalConfig::default();

        config.sync.remote_url = Some("ftp://example.com".into());
        assert!(config.validate().is_err());
        config.sync.remote_url = Some("https://example.com/api".into());
        assert!(config.validate().is_ok());

        config.realtime.enabled = true;
        assert!(config.validate().is_err());
        config.realtime.url = Some("http://example.com".into());
        assert!(config.validate().is_err());
        config.realtime.url = Some("wss://example.com/rt".into());
        assert!(config.validate().is_ok());

        config.terminal.id = " ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: TerminalConfig = toml::from_str(
            r#"
            [terminal]
            id = "till-3"

            [sync]
            max_attempts = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.terminal.id, "till-3");
        assert_eq!(config.sync.max_attempts, 2);
        assert_eq!(config.sync.request_timeout_secs, 10);
        assert_eq!(config.realtime.backoff_base_ms, 500);
        assert_eq!(config.ledger.default_reorder_quantity, 20);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("terminal.toml");

        let mut config = TerminalConfig::default();
        config.terminal.name = "Till 9".into();
        config.save(Some(path.clone())).unwrap();

        let loaded = TerminalConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.terminal.name, "Till 9");
        assert_eq!(loaded.terminal.id, config.terminal.id);
    }

    #[test]
    fn test_zero_interval_disables_auto_sync() {
        let settings = SyncSettings {
            auto_sync_interval_secs: 0,
            ..SyncSettings::default()
        };
        assert!(settings.auto_sync_interval().is_none());
    }
}
