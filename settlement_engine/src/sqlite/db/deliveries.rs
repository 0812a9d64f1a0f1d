use chrono::{DateTime, Utc};
use log::debug;
use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{DeliveryRecord, DeliveryStatus, ErrorKind, NewDelivery, Provider},
    traits::{DeliveryQueryFilter, OutcomeUpdate},
};

pub async fn insert_delivery(delivery: NewDelivery, conn: &mut SqliteConnection) -> Result<DeliveryRecord, sqlx::Error> {
    let record = sqlx::query_as(
        r#"
            INSERT INTO webhook_deliveries (
                provider,
                event_type,
                payload_digest,
                payload,
                status,
                attempt_count,
                created_at,
                updated_at
            ) VALUES ($1, $2, $3, $4, 'RECEIVED', 0, $5, $5)
            RETURNING *;
        "#,
    )
    .bind(delivery.provider)
    .bind(delivery.event_type)
    .bind(delivery.payload_digest)
    .bind(delivery.payload)
    .bind(delivery.received_at)
    .fetch_one(conn)
    .await?;
    Ok(record)
}

pub async fn fetch_delivery(id: i64, conn: &mut SqliteConnection) -> Result<Option<DeliveryRecord>, sqlx::Error> {
    let record =
        sqlx::query_as("SELECT * FROM webhook_deliveries WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(record)
}

pub async fn fetch_delivery_by_event(
    provider: Provider,
    provider_event_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<DeliveryRecord>, sqlx::Error> {
    let record = sqlx::query_as("SELECT * FROM webhook_deliveries WHERE provider = $1 AND provider_event_id = $2")
        .bind(provider)
        .bind(provider_event_id)
        .fetch_optional(conn)
        .await?;
    Ok(record)
}

pub async fn set_status(
    id: i64,
    status: DeliveryStatus,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<DeliveryRecord>, sqlx::Error> {
    let record = sqlx::query_as("UPDATE webhook_deliveries SET status = $2, updated_at = $3 WHERE id = $1 RETURNING *")
        .bind(id)
        .bind(status)
        .bind(now)
        .fetch_optional(conn)
        .await?;
    Ok(record)
}

/// Tags the delivery with its event identity. Fails with a unique violation if another row already owns the event.
pub async fn set_event(
    id: i64,
    provider_event_id: Option<&str>,
    event_type: &str,
    payment_reference: Option<&str>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<DeliveryRecord>, sqlx::Error> {
    let record = sqlx::query_as(
        r#"
            UPDATE webhook_deliveries
            SET provider_event_id = COALESCE($2, provider_event_id),
                event_type = $3,
                payment_reference = COALESCE($4, payment_reference),
                updated_at = $5
            WHERE id = $1
            RETURNING *;
        "#,
    )
    .bind(id)
    .bind(provider_event_id)
    .bind(event_type)
    .bind(payment_reference)
    .bind(now)
    .fetch_optional(conn)
    .await?;
    Ok(record)
}

/// Links a redelivery to the row that owns its event.
pub async fn mark_duplicate(
    id: i64,
    original_id: i64,
    event_type: &str,
    payment_reference: Option<&str>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<DeliveryRecord>, sqlx::Error> {
    let record = sqlx::query_as(
        r#"
            UPDATE webhook_deliveries
            SET duplicate_of = $2, event_type = $3, payment_reference = COALESCE($4, payment_reference), updated_at = $5
            WHERE id = $1
            RETURNING *;
        "#,
    )
    .bind(id)
    .bind(original_id)
    .bind(event_type)
    .bind(payment_reference)
    .bind(now)
    .fetch_optional(conn)
    .await?;
    debug!("🗃️ Delivery #{id} is a redelivery of #{original_id}");
    Ok(record)
}

pub async fn increment_attempts(
    id: i64,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<i64>, sqlx::Error> {
    let count = sqlx::query_scalar(
        "UPDATE webhook_deliveries SET attempt_count = attempt_count + 1, updated_at = $2 WHERE id = $1 RETURNING \
         attempt_count",
    )
    .bind(id)
    .bind(now)
    .fetch_optional(conn)
    .await?;
    Ok(count)
}

pub async fn update_outcome(
    id: i64,
    update: OutcomeUpdate,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<DeliveryRecord>, sqlx::Error> {
    let (status, result, kind, message, next_attempt_at): (
        DeliveryStatus,
        Option<String>,
        Option<ErrorKind>,
        Option<String>,
        Option<DateTime<Utc>>,
    ) = match update {
        OutcomeUpdate::Delivered { result } => (DeliveryStatus::Delivered, Some(result), None, None, None),
        OutcomeUpdate::Failed { kind, message } => (DeliveryStatus::Failed, None, Some(kind), Some(message), None),
        OutcomeUpdate::RetryScheduled { kind, message, next_attempt_at } => {
            (DeliveryStatus::Failed, None, Some(kind), Some(message), Some(next_attempt_at))
        },
    };
    let record = sqlx::query_as(
        r#"
            UPDATE webhook_deliveries
            SET status = $2, result = $3, error_kind = $4, error_message = $5, next_attempt_at = $6, updated_at = $7
            WHERE id = $1
            RETURNING *;
        "#,
    )
    .bind(id)
    .bind(status)
    .bind(result)
    .bind(kind)
    .bind(message)
    .bind(next_attempt_at)
    .bind(now)
    .fetch_optional(conn)
    .await?;
    Ok(record)
}

/// Claims due rows in a single statement, so two workers can never claim the same row.
pub async fn claim_due_deliveries(
    now: DateTime<Utc>,
    lease_until: DateTime<Utc>,
    stale_before: DateTime<Utc>,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<DeliveryRecord>, sqlx::Error> {
    let mut records: Vec<DeliveryRecord> = sqlx::query_as(
        r#"
            UPDATE webhook_deliveries
            SET next_attempt_at = $2, updated_at = $1
            WHERE id IN (
                SELECT id FROM webhook_deliveries
                WHERE (status = 'FAILED' AND next_attempt_at IS NOT NULL AND next_attempt_at <= $1)
                   OR (status = 'VERIFIED'
                       AND provider_event_id IS NOT NULL
                       AND updated_at <= $3
                       AND (next_attempt_at IS NULL OR next_attempt_at <= $1))
                ORDER BY id
                LIMIT $4
            )
            RETURNING *;
        "#,
    )
    .bind(now)
    .bind(lease_until)
    .bind(stale_before)
    .bind(limit)
    .fetch_all(conn)
    .await?;
    records.sort_by_key(|r| r.id);
    Ok(records)
}

/// Fetches deliveries matching the filter, most recent first.
pub async fn search_deliveries(
    filter: DeliveryQueryFilter,
    conn: &mut SqliteConnection,
) -> Result<Vec<DeliveryRecord>, sqlx::Error> {
    let limit = filter.effective_limit();
    let mut builder = QueryBuilder::new("SELECT * FROM webhook_deliveries ");
    if filter.status.is_some() || filter.provider.is_some() {
        builder.push("WHERE ");
    }
    let mut where_clause = builder.separated(" AND ");
    if let Some(status) = filter.status {
        where_clause.push("status = ");
        where_clause.push_bind_unseparated(status.to_string());
    }
    if let Some(provider) = filter.provider {
        where_clause.push("provider = ");
        where_clause.push_bind_unseparated(provider.to_string());
    }
    builder.push(" ORDER BY id DESC LIMIT ");
    builder.push_bind(limit);
    let records = builder.build_query_as::<DeliveryRecord>().fetch_all(conn).await?;
    Ok(records)
}
