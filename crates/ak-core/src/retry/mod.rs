//! Per-operation retry records and the exponential backoff policy
//!
//! Pure math only; reading and writing persisted records is the store's
//! job, and deciding *when* to consult the policy is the orchestrator's.
//!
//! Delay growth is exponential with a cap, and every read applies fresh
//! uniform jitter so many client instances never retry in lockstep. A
//! record whose last failure is older than the quiet window is treated as
//! if it did not exist, which un-wedges clients that ran out of tracked
//! retries during a transient outage.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// The three remote operations tracked by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Register,
    Resolve,
    Associate,
}

impl OperationKind {
    pub const ALL: [OperationKind; 3] = [
        OperationKind::Register,
        OperationKind::Resolve,
        OperationKind::Associate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Register => "register",
            OperationKind::Resolve => "resolve",
            OperationKind::Associate => "associate",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure history for one operation. Created on first failure, cleared on
/// success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryRecord {
    pub consecutive_failures: u32,
    pub last_failure_at_ms: i64,
}

impl RetryRecord {
    pub fn first_failure(now_ms: i64) -> Self {
        Self {
            consecutive_failures: 1,
            last_failure_at_ms: now_ms,
        }
    }

    pub fn next_failure(&self, now_ms: i64) -> Self {
        Self {
            consecutive_failures: self.consecutive_failures.saturating_add(1),
            last_failure_at_ms: now_ms,
        }
    }
}

/// Persisted retry records for all tracked operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RetryRecords {
    pub register: Option<RetryRecord>,
    pub resolve: Option<RetryRecord>,
    pub associate: Option<RetryRecord>,
}

impl RetryRecords {
    pub fn get(&self, operation: OperationKind) -> Option<RetryRecord> {
        match operation {
            OperationKind::Register => self.register,
            OperationKind::Resolve => self.resolve,
            OperationKind::Associate => self.associate,
        }
    }

    pub fn set(&mut self, operation: OperationKind, record: RetryRecord) {
        *self.slot(operation) = Some(record);
    }

    /// Returns true if a record was present and removed.
    pub fn clear(&mut self, operation: OperationKind) -> bool {
        self.slot(operation).take().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.register.is_none() && self.resolve.is_none() && self.associate.is_none()
    }

    fn slot(&mut self, operation: OperationKind) -> &mut Option<RetryRecord> {
        match operation {
            OperationKind::Register => &mut self.register,
            OperationKind::Resolve => &mut self.resolve,
            OperationKind::Associate => &mut self.associate,
        }
    }
}

/// Exponential backoff tuning.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Consecutive failures tracked before only the quiet window can
    /// re-enable the operation.
    pub max_tracked_failures: u32,
    pub base_delay_ms: i64,
    pub multiplier: f64,
    pub max_delay_ms: i64,
    /// Uniform jitter band applied to every delay read.
    pub jitter_low: f64,
    pub jitter_high: f64,
    /// Failure records older than this are treated as empty.
    pub quiet_window_ms: i64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_tracked_failures: 3,
            base_delay_ms: 1_000,
            multiplier: 2.0,
            max_delay_ms: 300_000,
            jitter_low: 0.8,
            jitter_high: 1.2,
            quiet_window_ms: 24 * 60 * 60 * 1_000,
        }
    }
}

impl BackoffPolicy {
    /// Un-jittered delay for the given consecutive-failure count.
    pub fn raw_delay_ms(&self, consecutive_failures: u32) -> i64 {
        if consecutive_failures == 0 {
            return 0;
        }
        let exponent = consecutive_failures.saturating_sub(1).min(62) as i32;
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        raw.min(self.max_delay_ms as f64) as i64
    }

    /// Jittered delay. Jitter is drawn fresh on every call, so repeated
    /// reads return a stable-but-re-jittered estimate.
    pub fn delay_ms(&self, consecutive_failures: u32) -> i64 {
        let raw = self.raw_delay_ms(consecutive_failures);
        if raw == 0 {
            return 0;
        }
        let jitter = rand::rng().random_range(self.jitter_low..=self.jitter_high);
        (raw as f64 * jitter) as i64
    }

    /// Whether the record has outlived the quiet window and should be
    /// treated as if it did not exist.
    pub fn is_expired(&self, record: &RetryRecord, now_ms: i64) -> bool {
        now_ms - record.last_failure_at_ms > self.quiet_window_ms
    }

    /// Retry eligibility: no record, or an auto-expired one, or the backoff
    /// delay has elapsed. An operation at the tracked-failure ceiling waits
    /// for the quiet window alone.
    pub fn can_retry(&self, record: Option<&RetryRecord>, now_ms: i64) -> bool {
        let Some(record) = record else {
            return true;
        };
        if self.is_expired(record, now_ms) {
            return true;
        }
        if record.consecutive_failures >= self.max_tracked_failures {
            return false;
        }
        now_ms - record.last_failure_at_ms >= self.delay_ms(record.consecutive_failures)
    }

    /// Estimated wait until the next eligible retry, zero when eligible
    /// now. Re-jittered on every read.
    pub fn time_until_retry_ms(&self, record: Option<&RetryRecord>, now_ms: i64) -> i64 {
        let Some(record) = record else {
            return 0;
        };
        if self.is_expired(record, now_ms) {
            return 0;
        }
        let eligible_at = if record.consecutive_failures >= self.max_tracked_failures {
            record.last_failure_at_ms + self.quiet_window_ms
        } else {
            record.last_failure_at_ms + self.delay_ms(record.consecutive_failures)
        };
        (eligible_at - now_ms).max(0)
    }
}
