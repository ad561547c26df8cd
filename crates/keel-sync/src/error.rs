//! # Sync Error Types
//!
//! Error types for reconciliation, the remote authority and the realtime
//! channel.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │  Remote calls   │  │     Realtime            │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connectivity-  │  │  ConnectionFailed       │ │
//! │  │  InvalidUrl     │  │   Unavailable   │  │  HandshakeFailed        │ │
//! │  │  ConfigLoad/    │  │  RetryableNet-  │  │  HeartbeatTimeout       │ │
//! │  │   SaveFailed    │  │   work          │  │  Disconnected           │ │
//! │  │                 │  │  Timeout        │  │  WebSocketError         │ │
//! │  │                 │  │  RemoteRejected │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │  Local state    │  │    Protocol     │                              │
//! │  │                 │  │                 │                              │
//! │  │  Ledger         │  │  InvalidMessage │                              │
//! │  │  DatabaseError  │  │  Serialization- │                              │
//! │  │                 │  │   Failed        │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use thiserror::Error;

use keel_ledger::LedgerError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all possible sync failures.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Remote Authority Errors
    // =========================================================================
    /// The authority could not be reached at the start of a cycle.
    #[error("Connectivity unavailable: {0}")]
    ConnectivityUnavailable(String),

    /// A transient network failure; the same request may succeed later.
    #[error("Network error: {0}")]
    RetryableNetwork(String),

    /// A remote call did not finish in time.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The authority refused the request and will refuse it again.
    #[error("Rejected by remote ({code}): {message}")]
    RemoteRejected { code: String, message: String },

    // =========================================================================
    // Realtime Errors
    // =========================================================================
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("No heartbeat response within {0:?}")]
    HeartbeatTimeout(Duration),

    #[error("Disconnected from realtime server")]
    Disconnected,

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Local State Errors
    // =========================================================================
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<keel_db::DbError> for SyncError {
    fn from(err: keel_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed => SyncError::Disconnected,
            WsError::AlreadyClosed => SyncError::Disconnected,
            WsError::Protocol(p) => SyncError::WebSocketError(p.to_string()),
            WsError::Io(io) => SyncError::ConnectionFailed(io.to_string()),
            WsError::Tls(tls) => SyncError::TlsError(tls.to_string()),
            other => SyncError::WebSocketError(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return SyncError::Timeout {
                operation: "HTTP request",
                after: Duration::ZERO,
            };
        }
        if err.is_builder() {
            return SyncError::InvalidConfig(err.to_string());
        }
        // connect, body and decode failures
        SyncError::RetryableNetwork(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the failed operation can be tried again unchanged.
    ///
    /// ## Retryable Errors
    /// - Connectivity and network failures
    /// - Timeouts
    /// - Dropped realtime connections
    ///
    /// ## Non-Retryable Errors
    /// - Remote rejections
    /// - Configuration and protocol errors
    /// - Local ledger or database failures
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::ConnectivityUnavailable(_)
                | SyncError::RetryableNetwork(_)
                | SyncError::Timeout { .. }
                | SyncError::ConnectionFailed(_)
                | SyncError::HeartbeatTimeout(_)
                | SyncError::Disconnected
                | SyncError::WebSocketError(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Builds a timeout error for `operation`.
    pub fn timeout(operation: &'static str, after: Duration) -> Self {
        SyncError::Timeout { operation, after }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::RetryableNetwork("reset".into()).is_retryable());
        assert!(SyncError::timeout("push", Duration::from_secs(5)).is_retryable());
        assert!(SyncError::ConnectivityUnavailable("offline".into()).is_retryable());
        assert!(SyncError::Disconnected.is_retryable());

        assert!(!SyncError::RemoteRejected {
            code: "400".into(),
            message: "bad sku".into()
        }
        .is_retryable());
        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
        assert!(!SyncError::HandshakeFailed("unauthorized".into()).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::timeout("push_transaction", Duration::from_millis(1500));
        assert_eq!(err.to_string(), "push_transaction timed out after 1.5s");

        let err = SyncError::RemoteRejected {
            code: "422".into(),
            message: "unknown product".into(),
        };
        assert!(err.to_string().contains("422"));
        assert!(SyncError::InvalidUrl("x".into()).is_config_error());
    }
}
