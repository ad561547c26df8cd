//! # Outbox Entries
//!
//! Lifecycle of a locally created sale on its way to the remote authority.
//!
//! ## State Machine
//! ```text
//!                 ┌──────────── mark_failed (attempts+1) ─────────────┐
//!                 ▼                                                   │
//!   enqueue ──► Pending ──mark_in_flight──► InFlight ──mark_confirmed──► Confirmed
//!                 ▲                            │                         │
//!                 │                            │ mark_failed_permanent   │ purge
//!                 │                            ▼                         ▼
//!                 └────────requeue──────── FailedPermanent            (deleted)
//!                          (attempts=0)        │
//!                                              └── discard (cancel_sale)
//! ```
//!
//! The `local_id` of an entry is its idempotency key and is never reused:
//! discarded or purged ids stay unique because every new entry gets a fresh
//! UUID v4.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::changes::ChangeSet;
use crate::error::{CoreError, CoreResult};
use crate::types::SalePayload;

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum OutboxState {
    /// Waiting for the next drain.
    Pending,
    /// A push is under way.
    InFlight,
    /// Accepted by the authority.
    Confirmed,
    /// Rejected or out of retries; needs an operator decision.
    FailedPermanent,
}

impl OutboxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxState::Pending => "pending",
            OutboxState::InFlight => "in_flight",
            OutboxState::Confirmed => "confirmed",
            OutboxState::FailedPermanent => "failed_permanent",
        }
    }
}

impl fmt::Display for OutboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for OutboxState {
    fn default() -> Self {
        OutboxState::Pending
    }
}

/// What the authority returned for an accepted sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RemoteReceipt {
    pub id: String,
    pub code: String,
}

// =============================================================================
// Entry
// =============================================================================

/// A queued sale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OutboxEntry {
    pub local_id: String,
    /// Tie-breaker for FIFO order when two entries share `created_at`.
    pub sequence: i64,
    pub payload: SalePayload,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    pub attempt_count: i64,
    #[ts(as = "Option<String>")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub state: OutboxState,
    pub remote_id: Option<String>,
    pub remote_code: Option<String>,
    #[ts(as = "Option<String>")]
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// A state change requested for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboxAction {
    MarkInFlight,
    MarkConfirmed(RemoteReceipt),
    /// Retryable failure: back to pending, one more attempt counted.
    MarkFailed(String),
    /// Non-retryable failure or retry budget exhausted.
    MarkFailedPermanent(String),
    /// Operator resolution: failed-permanent back to pending, attempts reset.
    Requeue,
}

impl OutboxAction {
    pub fn name(&self) -> &'static str {
        match self {
            OutboxAction::MarkInFlight => "mark in flight",
            OutboxAction::MarkConfirmed(_) => "confirm",
            OutboxAction::MarkFailed(_) => "mark failed",
            OutboxAction::MarkFailedPermanent(_) => "mark failed permanently",
            OutboxAction::Requeue => "requeue",
        }
    }
}

/// Entry counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct OutboxCounts {
    pub pending: i64,
    pub in_flight: i64,
    pub confirmed: i64,
    pub failed_permanent: i64,
}

// =============================================================================
// Book
// =============================================================================

/// All outbox entries, keyed by local id.
#[derive(Debug, Clone, Default)]
pub struct OutboxBook {
    entries: BTreeMap<String, OutboxEntry>,
    next_sequence: i64,
}

impl OutboxBook {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_sequence: 1,
        }
    }

    /// Rebuilds a book from persisted entries.
    pub fn from_entries(entries: Vec<OutboxEntry>) -> Self {
        let next_sequence = entries.iter().map(|e| e.sequence).max().unwrap_or(0) + 1;
        Self {
            entries: entries
                .into_iter()
                .map(|e| (e.local_id.clone(), e))
                .collect(),
            next_sequence,
        }
    }

    /// Builds a pending entry for `payload` without inserting it.
    ///
    /// The entry takes its `local_id` from the payload. Use [`insert`] to
    /// add it once it has been persisted.
    ///
    /// [`insert`]: OutboxBook::insert
    pub fn draft(&self, payload: SalePayload, now: DateTime<Utc>) -> CoreResult<OutboxEntry> {
        if self.entries.contains_key(&payload.local_id) {
            return Err(CoreError::DuplicateOutboxEntry(payload.local_id));
        }
        Ok(OutboxEntry {
            local_id: payload.local_id.clone(),
            sequence: self.next_sequence,
            payload,
            created_at: now,
            attempt_count: 0,
            last_attempt_at: None,
            last_error: None,
            state: OutboxState::Pending,
            remote_id: None,
            remote_code: None,
            confirmed_at: None,
        })
    }

    pub fn insert(&mut self, entry: OutboxEntry) -> CoreResult<()> {
        if self.entries.contains_key(&entry.local_id) {
            return Err(CoreError::DuplicateOutboxEntry(entry.local_id));
        }
        self.next_sequence = self.next_sequence.max(entry.sequence + 1);
        self.entries.insert(entry.local_id.clone(), entry);
        Ok(())
    }

    pub fn get(&self, local_id: &str) -> Option<&OutboxEntry> {
        self.entries.get(local_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies `action` to one entry and returns the change set to persist.
    pub fn transition(
        &mut self,
        local_id: &str,
        action: OutboxAction,
        now: DateTime<Utc>,
    ) -> CoreResult<ChangeSet> {
        let entry = self
            .entries
            .get_mut(local_id)
            .ok_or_else(|| CoreError::OutboxEntryNotFound(local_id.to_string()))?;

        let allowed = match (&action, entry.state) {
            (OutboxAction::MarkInFlight, OutboxState::Pending) => true,
            (OutboxAction::MarkConfirmed(_), OutboxState::Pending | OutboxState::InFlight) => true,
            (OutboxAction::MarkFailed(_), OutboxState::Pending | OutboxState::InFlight) => true,
            (
                OutboxAction::MarkFailedPermanent(_),
                OutboxState::Pending | OutboxState::InFlight,
            ) => true,
            (OutboxAction::Requeue, OutboxState::FailedPermanent) => true,
            _ => false,
        };
        if !allowed {
            return Err(CoreError::InvalidOutboxTransition {
                local_id: local_id.to_string(),
                state: entry.state,
                action: action.name(),
            });
        }

        match action {
            OutboxAction::MarkInFlight => {
                entry.state = OutboxState::InFlight;
                entry.last_attempt_at = Some(now);
            }
            OutboxAction::MarkConfirmed(receipt) => {
                entry.state = OutboxState::Confirmed;
                entry.remote_id = Some(receipt.id);
                entry.remote_code = Some(receipt.code);
                entry.confirmed_at = Some(now);
                entry.last_error = None;
            }
            OutboxAction::MarkFailed(error) => {
                entry.state = OutboxState::Pending;
                entry.attempt_count += 1;
                entry.last_attempt_at = Some(now);
                entry.last_error = Some(error);
            }
            OutboxAction::MarkFailedPermanent(error) => {
                entry.state = OutboxState::FailedPermanent;
                entry.attempt_count += 1;
                entry.last_attempt_at = Some(now);
                entry.last_error = Some(error);
            }
            OutboxAction::Requeue => {
                entry.state = OutboxState::Pending;
                entry.attempt_count = 0;
            }
        }

        Ok(ChangeSet {
            outbox_upserts: vec![entry.clone()],
            ..ChangeSet::default()
        })
    }

    /// Pending entries oldest first, by `(created_at, sequence)`.
    pub fn list_pending(&self, limit: Option<usize>, offset: Option<usize>) -> Vec<OutboxEntry> {
        let mut pending: Vec<&OutboxEntry> = self
            .entries
            .values()
            .filter(|e| e.state == OutboxState::Pending)
            .collect();
        pending.sort_by_key(|e| (e.created_at, e.sequence));
        pending
            .into_iter()
            .skip(offset.unwrap_or(0))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    /// Entries in a given state, oldest first.
    pub fn list_by_state(&self, state: OutboxState) -> Vec<OutboxEntry> {
        let mut out: Vec<OutboxEntry> = self
            .entries
            .values()
            .filter(|e| e.state == state)
            .cloned()
            .collect();
        out.sort_by_key(|e| (e.created_at, e.sequence));
        out
    }

    /// Puts every in-flight entry back to pending. Used after a restart,
    /// when the fate of an interrupted push is unknown.
    pub fn recover_in_flight(&mut self) -> ChangeSet {
        let mut changes = ChangeSet::default();
        for entry in self.entries.values_mut() {
            if entry.state == OutboxState::InFlight {
                entry.state = OutboxState::Pending;
                changes.outbox_upserts.push(entry.clone());
            }
        }
        changes
    }

    /// Removes a pending or failed-permanent entry (a cancelled sale).
    pub fn discard(&mut self, local_id: &str) -> CoreResult<(OutboxEntry, ChangeSet)> {
        let state = self
            .entries
            .get(local_id)
            .map(|e| e.state)
            .ok_or_else(|| CoreError::OutboxEntryNotFound(local_id.to_string()))?;

        if !matches!(state, OutboxState::Pending | OutboxState::FailedPermanent) {
            return Err(CoreError::InvalidOutboxTransition {
                local_id: local_id.to_string(),
                state,
                action: "cancel",
            });
        }

        let entry = self
            .entries
            .remove(local_id)
            .ok_or_else(|| CoreError::OutboxEntryNotFound(local_id.to_string()))?;
        let changes = ChangeSet {
            outbox_deletes: vec![local_id.to_string()],
            ..ChangeSet::default()
        };
        Ok((entry, changes))
    }

    /// Removes every confirmed entry.
    pub fn purge_confirmed(&mut self) -> ChangeSet {
        let ids: Vec<String> = self
            .entries
            .values()
            .filter(|e| e.state == OutboxState::Confirmed)
            .map(|e| e.local_id.clone())
            .collect();
        for id in &ids {
            self.entries.remove(id);
        }
        ChangeSet {
            outbox_deletes: ids,
            ..ChangeSet::default()
        }
    }

    pub fn counts(&self) -> OutboxCounts {
        let mut counts = OutboxCounts::default();
        for e in self.entries.values() {
            match e.state {
                OutboxState::Pending => counts.pending += 1,
                OutboxState::InFlight => counts.in_flight += 1,
                OutboxState::Confirmed => counts.confirmed += 1,
                OutboxState::FailedPermanent => counts.failed_permanent += 1,
            }
        }
        counts
    }
}
