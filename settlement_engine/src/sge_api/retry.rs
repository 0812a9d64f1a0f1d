//! Retry scheduling for webhook deliveries.
//!
//! The schedule is a fixed delay with a bounded number of attempts. Only [`ErrorKind::Transient`] failures are ever
//! retried. The queue itself lives in the delivery ledger, so scheduled retries survive restarts.
use chrono::{DateTime, Duration, Utc};

use crate::db_types::ErrorKind;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::minutes(5);
pub const DEFAULT_MAX_ATTEMPTS: i64 = 5;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::seconds(30);
pub const DEFAULT_BATCH_SIZE: i64 = 50;
pub const DEFAULT_LEASE: Duration = Duration::minutes(2);
pub const DEFAULT_STALE_AFTER: Duration = Duration::minutes(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Time between a failed attempt and the next one.
    pub delay: Duration,
    /// Total attempts, including the first one made when the webhook arrived.
    pub max_attempts: i64,
    pub poll_interval: Duration,
    pub batch_size: i64,
    /// How long a claimed row stays hidden from other workers.
    pub lease: Duration,
    /// A `VERIFIED` row untouched for this long is assumed to have lost its worker.
    pub stale_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RETRY_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            lease: DEFAULT_LEASE,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAt(DateTime<Utc>),
    /// Transient, but out of attempts. Needs manual reconciliation.
    Exhausted,
    DoNotRetry,
}

impl RetryPolicy {
    /// `attempts` is the number of attempts made so far, including the one that just failed.
    pub fn decide(&self, kind: ErrorKind, attempts: i64, now: DateTime<Utc>) -> RetryDecision {
        match kind {
            ErrorKind::Transient if attempts < self.max_attempts => RetryDecision::RetryAt(now + self.delay),
            ErrorKind::Transient => RetryDecision::Exhausted,
            ErrorKind::Verification | ErrorKind::Payload | ErrorKind::PaymentNotFound | ErrorKind::Permanent => {
                RetryDecision::DoNotRetry
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transient_failures_retry_until_exhausted() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        assert_eq!(policy.decide(ErrorKind::Transient, 1, now), RetryDecision::RetryAt(now + Duration::minutes(5)));
        assert_eq!(policy.decide(ErrorKind::Transient, 4, now), RetryDecision::RetryAt(now + Duration::minutes(5)));
        assert_eq!(policy.decide(ErrorKind::Transient, 5, now), RetryDecision::Exhausted);
        assert_eq!(policy.decide(ErrorKind::Transient, 9, now), RetryDecision::Exhausted);
    }

    #[test]
    fn permanent_failures_never_retry() {
        let policy = RetryPolicy::default();
        let now = Utc::now();
        for kind in [ErrorKind::Verification, ErrorKind::Payload, ErrorKind::PaymentNotFound, ErrorKind::Permanent] {
            assert_eq!(policy.decide(kind, 1, now), RetryDecision::DoNotRetry);
        }
    }
}
