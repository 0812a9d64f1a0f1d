use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::db_types::{IdempotencyRecord, NewIdempotencyRecord};

pub async fn fetch_record(key: &str, conn: &mut SqliteConnection) -> Result<Option<IdempotencyRecord>, sqlx::Error> {
    let record = sqlx::query_as("SELECT * FROM idempotency_keys WHERE key = $1").bind(key).fetch_optional(conn).await?;
    Ok(record)
}

/// Deletes the record for `key` if it has expired, or if it is a claim whose lease ran out before a response was stored.
pub async fn delete_if_expired(key: &str, now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
            DELETE FROM idempotency_keys
            WHERE key = $1 AND (expires_at <= $2 OR (response IS NULL AND claim_expires_at <= $2));
        "#,
    )
    .bind(key)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Inserts a claim with no response yet. Returns `None` if the key is already held.
pub async fn insert_claim(
    record: NewIdempotencyRecord,
    conn: &mut SqliteConnection,
) -> Result<Option<IdempotencyRecord>, sqlx::Error> {
    let record = sqlx::query_as(
        r#"
            INSERT INTO idempotency_keys
                (key, request_path, request_params, request_fingerprint, created_at, expires_at, claim_expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (key) DO NOTHING
            RETURNING *;
        "#,
    )
    .bind(record.key)
    .bind(record.request_path)
    .bind(record.request_params)
    .bind(record.request_fingerprint)
    .bind(record.created_at)
    .bind(record.expires_at)
    .bind(record.claim_expires_at)
    .fetch_optional(conn)
    .await?;
    Ok(record)
}

/// Fills in an open claim. A response that is already stored is never replaced.
pub async fn store_response(key: &str, response: &str, conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE idempotency_keys SET response = $2 WHERE key = $1 AND response IS NULL")
        .bind(key)
        .bind(response)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

/// Removes a claim that never received a response.
pub async fn release_claim(key: &str, conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM idempotency_keys WHERE key = $1 AND response IS NULL")
        .bind(key)
        .execute(conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn purge_expired(now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= $1").bind(now).execute(conn).await?;
    Ok(result.rows_affected())
}
