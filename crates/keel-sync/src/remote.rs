//! # Remote Authority
//!
//! The central server this terminal reconciles with.
//!
//! ```text
//!   SyncOrchestrator ──► Arc<dyn RemoteAuthority>
//!                                │
//!                                ├──► HttpRemoteAuthority (reqwest)
//!                                │      GET  {base}/health
//!                                │      GET  {base}/catalog?updated_since=..
//!                                │      POST {base}/transactions
//!                                │           Idempotency-Key: <local_id>
//!                                │
//!                                └──► test fakes
//! ```
//!
//! ## Status Mapping
//! | Response                    | Error                          |
//! |-----------------------------|--------------------------------|
//! | timeout                     | `Timeout` (retryable)          |
//! | connect / transport failure | `RetryableNetwork`             |
//! | 408, 429, 5xx               | `RetryableNetwork`             |
//! | any other 4xx               | `RemoteRejected` (permanent)   |

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use keel_core::{CatalogProduct, RemoteReceipt, SalePayload};

use crate::error::{SyncError, SyncResult};

/// Operations the orchestrator needs from the server.
///
/// Pushes must be idempotent on `payload.local_id`: pushing the same sale
/// twice yields the same receipt.
#[async_trait]
pub trait RemoteAuthority: Send + Sync + Debug {
    /// Cheap reachability check.
    async fn probe(&self) -> SyncResult<()>;

    /// Catalog rows changed since `updated_since` (everything when `None`).
    async fn catalog(&self, updated_since: Option<DateTime<Utc>>) -> SyncResult<Vec<CatalogProduct>>;

    async fn push_transaction(&self, payload: &SalePayload) -> SyncResult<RemoteReceipt>;
}

// =============================================================================
// HTTP Adapter
// =============================================================================

#[derive(Debug, Deserialize)]
struct ReceiptResponse {
    id: String,
    code: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// [`RemoteAuthority`] over the server's JSON HTTP API.
#[derive(Debug, Clone)]
pub struct HttpRemoteAuthority {
    base: Url,
    client: Client,
}

impl HttpRemoteAuthority {
    /// Creates an adapter for `base_url`. `timeout` bounds every request.
    pub fn new(base_url: &str, timeout: Duration) -> SyncResult<Self> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { base, client })
    }

    fn endpoint(&self, path: &str) -> SyncResult<Url> {
        Ok(self.base.join(path)?)
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemoteAuthority {
    async fn probe(&self) -> SyncResult<()> {
        let url = self.endpoint("health")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SyncError::ConnectivityUnavailable(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(SyncError::ConnectivityUnavailable(format!(
                "health check returned {}",
                response.status()
            )))
        }
    }

    async fn catalog(&self, updated_since: Option<DateTime<Utc>>) -> SyncResult<Vec<CatalogProduct>> {
        let mut url = self.endpoint("catalog")?;
        if let Some(since) = updated_since {
            url.query_pairs_mut().append_pair(
                "updated_since",
                &since.to_rfc3339_opts(SecondsFormat::Millis, true),
            );
        }

        debug!(url = %url, "Fetching catalog");
        let response = self.client.get(url).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn push_transaction(&self, payload: &SalePayload) -> SyncResult<RemoteReceipt> {
        let url = self.endpoint("transactions")?;

        debug!(local_id = %payload.local_id, lines = payload.lines.len(), "Pushing sale");
        let response = self
            .client
            .post(url)
            .header("Idempotency-Key", &payload.local_id)
            .json(payload)
            .send()
            .await?;
        let response = check_status(response).await?;

        let receipt: ReceiptResponse = response.json().await?;
        Ok(RemoteReceipt {
            id: receipt.id,
            code: receipt.code,
        })
    }
}

/// Maps a non-success response to the matching error.
async fn check_status(response: reqwest::Response) -> SyncResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

fn status_error(status: StatusCode, body: &str) -> SyncError {
    if is_retryable_status(status) {
        return SyncError::RetryableNetwork(format!("HTTP {}: {}", status, body));
    }

    let parsed: Option<ErrorResponse> = serde_json::from_str(body).ok();
    let (code, message) = match parsed {
        Some(e) => (
            e.code.unwrap_or_else(|| status.as_u16().to_string()),
            e.message.unwrap_or_else(|| body.to_string()),
        ),
        None => (status.as_u16().to_string(), body.to_string()),
    };
    SyncError::RemoteRejected { code, message }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}
