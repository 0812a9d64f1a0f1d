//! Background jobs. Do not await the returned JoinHandles, as the workers run indefinitely.
use chrono::{Duration, Utc};
use log::*;
use settlement_engine::{traits::IdempotencyLedger, SqliteDatabase, WebhookApi};
use tokio::task::JoinHandle;

pub const IDEMPOTENCY_PURGE_INTERVAL: Duration = Duration::hours(1);

/// Polls the delivery ledger for due retries and stale in-flight rows, and pushes them back through the pipeline.
///
/// Several gateway instances can share a database: claimed rows are leased, so each due row is taken by one worker.
pub fn start_retry_worker(api: WebhookApi<SqliteDatabase>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let poll = api.retry_policy().poll_interval.to_std().unwrap_or(std::time::Duration::from_secs(30));
        let mut timer = tokio::time::interval(poll);
        info!("🕰️ Webhook retry worker started. Polling every {}s", poll.as_secs());
        loop {
            timer.tick().await;
            trace!("🕰️ Checking for due webhook retries");
            match api.process_due_retries(Utc::now()).await {
                Ok(summary) if summary.claimed == 0 => {},
                Ok(summary) => info!(
                    "🕰️ Retried {} deliveries: {} delivered, {} rescheduled, {} failed",
                    summary.claimed, summary.delivered, summary.rescheduled, summary.failed
                ),
                Err(e) => error!("🕰️ Error running the webhook retry job: {e}"),
            }
        }
    })
}

/// Deletes idempotency keys whose retention period has passed, so that the ledger does not grow without bound.
pub fn start_idempotency_purge_worker(db: SqliteDatabase, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = every.to_std().unwrap_or(std::time::Duration::from_secs(3600));
        let mut timer = tokio::time::interval(period);
        info!("🕰️ Idempotency key purge worker started");
        loop {
            timer.tick().await;
            match db.purge_expired_idempotency_keys(Utc::now()).await {
                Ok(0) => trace!("🕰️ No expired idempotency keys"),
                Ok(n) => info!("🕰️ Purged {n} expired idempotency keys"),
                Err(e) => error!("🕰️ Error purging expired idempotency keys: {e}"),
            }
        }
    })
}
