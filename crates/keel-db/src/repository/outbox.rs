//! # Outbox Repository
//!
//! Persists queued sales for offline-first synchronization.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Outbox Pattern Implementation                        │
//! │                                                                         │
//! │  LOCAL OPERATION (add_sale)                                            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │                                                                 │   │
//! │  │  1. UPDATE stock_items         (one row per product sold)      │   │
//! │  │  2. INSERT INTO stock_movements (type = 'sale', txn = local_id)│   │
//! │  │  3. INSERT INTO outbox_entries  (payload = sale JSON)          │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← all succeed or all fail                                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SYNC ORCHESTRATOR (keel-sync)                                         │
//! │  pending → in_flight → confirmed | pending (attempts+1)                │
//! │                      | failed_permanent                                │
//! │                                                                         │
//! │  KEY GUARANTEES:                                                       │
//! │  • Sale is never lost (it's in the local DB)                           │
//! │  • Stock and queue never disagree (same transaction)                   │
//! │  • Offline? Entries queue up                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::error::{DbError, DbResult};
use keel_core::{OutboxCounts, OutboxEntry, OutboxState};

const SELECT_ENTRY: &str = r#"
    SELECT local_id, sequence, payload, created_at, attempt_count,
           last_attempt_at, last_error, state, remote_id, remote_code,
           confirmed_at
    FROM outbox_entries
"#;

/// Raw outbox row; the payload column holds the sale as JSON.
#[derive(Debug, sqlx::FromRow)]
struct OutboxRow {
    local_id: String,
    sequence: i64,
    payload: String,
    created_at: DateTime<Utc>,
    attempt_count: i64,
    last_attempt_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    state: OutboxState,
    remote_id: Option<String>,
    remote_code: Option<String>,
    confirmed_at: Option<DateTime<Utc>>,
}

impl TryFrom<OutboxRow> for OutboxEntry {
    type Error = DbError;

    fn try_from(row: OutboxRow) -> Result<Self, Self::Error> {
        Ok(OutboxEntry {
            payload: serde_json::from_str(&row.payload)?,
            local_id: row.local_id,
            sequence: row.sequence,
            created_at: row.created_at,
            attempt_count: row.attempt_count,
            last_attempt_at: row.last_attempt_at,
            last_error: row.last_error,
            state: row.state,
            remote_id: row.remote_id,
            remote_code: row.remote_code,
            confirmed_at: row.confirmed_at,
        })
    }
}

/// Repository for outbox rows.
#[derive(Debug, Clone)]
pub struct OutboxRepository {
    pool: SqlitePool,
}

impl OutboxRepository {
    pub fn new(pool: SqlitePool) -> Self {
        OutboxRepository { pool }
    }

    /// Every entry, oldest first.
    pub async fn list(&self) -> DbResult<Vec<OutboxEntry>> {
        let rows = sqlx::query_as::<_, OutboxRow>(&format!(
            "{SELECT_ENTRY} ORDER BY created_at, sequence"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(OutboxEntry::try_from).collect()
    }

    pub async fn get(&self, local_id: &str) -> DbResult<Option<OutboxEntry>> {
        let row = sqlx::query_as::<_, OutboxRow>(&format!("{SELECT_ENTRY} WHERE local_id = ?1"))
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(OutboxEntry::try_from).transpose()
    }

    /// Entry counts by state.
    pub async fn counts(&self) -> DbResult<OutboxCounts> {
        let rows: Vec<(OutboxState, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM outbox_entries GROUP BY state")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = OutboxCounts::default();
        for (state, n) in rows {
            match state {
                OutboxState::Pending => counts.pending = n,
                OutboxState::InFlight => counts.in_flight = n,
                OutboxState::Confirmed => counts.confirmed = n,
                OutboxState::FailedPermanent => counts.failed_permanent = n,
            }
        }
        Ok(counts)
    }

    /// Inserts a new entry or replaces the state of an existing one.
    pub async fn upsert(conn: &mut SqliteConnection, entry: &OutboxEntry) -> DbResult<()> {
        let payload = serde_json::to_string(&entry.payload)?;
        sqlx::query(
            r#"
            INSERT INTO outbox_entries (
                local_id, sequence, payload, created_at, attempt_count,
                last_attempt_at, last_error, state, remote_id, remote_code,
                confirmed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(local_id) DO UPDATE SET
                attempt_count = excluded.attempt_count,
                last_attempt_at = excluded.last_attempt_at,
                last_error = excluded.last_error,
                state = excluded.state,
                remote_id = excluded.remote_id,
                remote_code = excluded.remote_code,
                confirmed_at = excluded.confirmed_at
            "#,
        )
        .bind(&entry.local_id)
        .bind(entry.sequence)
        .bind(payload)
        .bind(entry.created_at)
        .bind(entry.attempt_count)
        .bind(entry.last_attempt_at)
        .bind(&entry.last_error)
        .bind(entry.state)
        .bind(&entry.remote_id)
        .bind(&entry.remote_code)
        .bind(entry.confirmed_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    pub async fn delete(conn: &mut SqliteConnection, local_id: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM outbox_entries WHERE local_id = ?1")
            .bind(local_id)
            .execute(conn)
            .await?;
        Ok(())
    }
}
