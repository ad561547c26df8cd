//! # Retry Classification
//!
//! Decides what happens to an outbox entry after a failed push.
//!
//! ```text
//!   push failed ──► error retryable? ──no──► Reject  (failed-permanent)
//!                          │
//!                         yes
//!                          │
//!                          ▼
//!               attempts >= max_attempts? ──yes──► GiveUp (failed-permanent)
//!                          │
//!                          no
//!                          ▼
//!                        Retry   (back to pending, next cycle)
//! ```

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::SyncError;

/// Outcome of classifying a failed push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RetryDecision {
    /// Leave the entry pending for the next cycle.
    Retry,
    /// Retryable, but the entry has used up its attempts.
    GiveUp,
    /// The authority will never accept this payload.
    Reject,
}

impl RetryDecision {
    /// True when the entry should be parked as failed-permanent.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, RetryDecision::Retry)
    }
}

/// Classifies a push failure.
///
/// `attempts` counts every push of the entry so far, including the one that
/// just failed. A `max_attempts` of 0 never gives up.
pub fn classify(error: &SyncError, attempts: i64, max_attempts: u32) -> RetryDecision {
    if !error.is_retryable() {
        return RetryDecision::Reject;
    }
    if max_attempts > 0 && attempts >= i64::from(max_attempts) {
        return RetryDecision::GiveUp;
    }
    RetryDecision::Retry
}
