//! Notification outbox delivery.
//!
//! Claims due `pending` rows, hands them to a [`NotificationTransport`] and
//! records the result. Failed deliveries are retried on a fixed backoff
//! schedule until [`DEFAULT_MAX_ATTEMPTS`] is reached, then marked `failed`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use helpdesk_db::models::OutboxNotification;
use tracing::{debug, error, info, instrument, warn};

use super::JobError;
use crate::notification::NotificationTransport;
use crate::store::NotificationOutboxStore;

/// Default polling interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Default number of rows claimed per poll.
pub const DEFAULT_BATCH_SIZE: i64 = 100;

/// Default maximum delivery attempts.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 6;

/// How long a claimed row stays hidden from other workers.
pub const DEFAULT_LEASE_SECS: i64 = 300;

/// Retry delays after attempt 1, 2, ... (1m, 5m, 30m, 2h, 24h).
const BACKOFF_SCHEDULE_SECS: [i64; 5] = [60, 300, 1800, 7200, 86400];

/// When to retry after `attempt_number` failed attempts.
///
/// Returns `None` once all attempts are exhausted.
#[must_use]
pub fn calculate_next_attempt_at(
    attempt_number: i32,
    max_attempts: i32,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if attempt_number >= max_attempts {
        return None;
    }

    // attempt 1 -> index 0, attempt 2 -> index 1, ...
    let idx = usize::try_from(attempt_number - 1).unwrap_or(0);
    let delay_secs = BACKOFF_SCHEDULE_SECS
        .get(idx)
        .or(BACKOFF_SCHEDULE_SECS.last())
        .copied()
        .unwrap_or(86400);

    Some(now + Duration::seconds(delay_secs))
}

/// Statistics from one delivery run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboxStats {
    pub claimed: usize,
    pub delivered: usize,
    pub retried: usize,
    /// Gave up after the last attempt.
    pub exhausted: usize,
    /// Result could not be recorded.
    pub failed: usize,
}

impl OutboxStats {
    /// Merge stats from another instance.
    pub fn merge(&mut self, other: &OutboxStats) {
        self.claimed += other.claimed;
        self.delivered += other.delivered;
        self.retried += other.retried;
        self.exhausted += other.exhausted;
        self.failed += other.failed;
    }
}

/// Delivers outbox rows with retry and backoff.
pub struct NotificationOutboxWorker {
    outbox: Arc<dyn NotificationOutboxStore>,
    transport: Arc<dyn NotificationTransport>,
    batch_size: i64,
    max_attempts: i32,
    lease_secs: i64,
}

impl NotificationOutboxWorker {
    pub fn new(
        outbox: Arc<dyn NotificationOutboxStore>,
        transport: Arc<dyn NotificationTransport>,
    ) -> Self {
        Self {
            outbox,
            transport,
            batch_size: DEFAULT_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            lease_secs: DEFAULT_LEASE_SECS,
        }
    }

    /// Create with custom batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Create with custom maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Deliver due rows at the current time.
    pub async fn poll(&self) -> Result<OutboxStats, JobError> {
        self.run(Utc::now()).await
    }

    /// Deliver rows due at `now`.
    #[instrument(skip(self))]
    pub async fn run(&self, now: DateTime<Utc>) -> Result<OutboxStats, JobError> {
        let mut stats = OutboxStats::default();
        let lease_until = now + Duration::seconds(self.lease_secs);

        let claimed = self
            .outbox
            .claim_due(now, lease_until, self.batch_size)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to claim outbox notifications");
                JobError::Database(e.to_string())
            })?;

        if claimed.is_empty() {
            debug!("No notifications to deliver");
            return Ok(stats);
        }
        stats.claimed = claimed.len();

        for notification in &claimed {
            self.deliver_one(notification, now, &mut stats).await;
        }

        info!(
            claimed = stats.claimed,
            delivered = stats.delivered,
            retried = stats.retried,
            exhausted = stats.exhausted,
            failed = stats.failed,
            "Completed notification delivery pass"
        );
        Ok(stats)
    }

    async fn deliver_one(
        &self,
        notification: &OutboxNotification,
        now: DateTime<Utc>,
        stats: &mut OutboxStats,
    ) {
        let attempt = notification.attempts + 1;

        let recorded = match self.transport.deliver(notification).await {
            Ok(receipt) => {
                debug!(
                    notification_id = %notification.id,
                    latency_ms = receipt.latency_ms,
                    "Notification delivered"
                );
                stats.delivered += 1;
                self.outbox.mark_sent(notification.id, attempt, now).await
            }
            Err(e) => {
                let message = e.to_string();
                match calculate_next_attempt_at(attempt, self.max_attempts, now) {
                    Some(next_attempt_at) => {
                        warn!(
                            notification_id = %notification.id,
                            kind = %notification.kind,
                            attempt,
                            next_attempt_at = %next_attempt_at,
                            error = %message,
                            "Notification delivery failed; will retry"
                        );
                        stats.retried += 1;
                        self.outbox
                            .mark_retry(notification.id, attempt, next_attempt_at, &message)
                            .await
                    }
                    None => {
                        error!(
                            notification_id = %notification.id,
                            kind = %notification.kind,
                            attempt,
                            error = %message,
                            "Notification delivery failed; retries exhausted"
                        );
                        stats.exhausted += 1;
                        self.outbox
                            .mark_failed(notification.id, attempt, &message)
                            .await
                    }
                }
            }
        };

        if let Err(e) = recorded {
            error!(
                notification_id = %notification.id,
                error = %e,
                "Failed to record notification delivery result"
            );
            stats.failed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_calculate_next_attempt_at_follows_schedule() {
        let expected = [60, 300, 1800, 7200, 86400];
        for (attempt, secs) in (1..=5).zip(expected) {
            let next = calculate_next_attempt_at(attempt, 6, now()).unwrap();
            assert_eq!(next - now(), Duration::seconds(secs), "attempt {attempt}");
        }
    }

    #[test]
    fn test_calculate_next_attempt_at_exhausted() {
        assert!(calculate_next_attempt_at(6, 6, now()).is_none());
        assert!(calculate_next_attempt_at(10, 6, now()).is_none());
    }

    #[test]
    fn test_calculate_next_attempt_at_beyond_schedule_uses_last_delay() {
        let next = calculate_next_attempt_at(8, 10, now()).unwrap();
        assert_eq!(next - now(), Duration::seconds(86400));
    }

    #[test]
    fn test_outbox_stats_merge() {
        let mut a = OutboxStats {
            claimed: 2,
            delivered: 1,
            retried: 1,
            ..OutboxStats::default()
        };
        a.merge(&OutboxStats {
            claimed: 1,
            exhausted: 1,
            ..OutboxStats::default()
        });
        assert_eq!(a.claimed, 3);
        assert_eq!(a.exhausted, 1);
        assert_eq!(a.delivered, 1);
    }
}
