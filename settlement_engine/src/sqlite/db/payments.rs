use chrono::{DateTime, Utc};
use log::trace;
use sqlx::SqliteConnection;

use crate::db_types::{NewPayment, Payment, PaymentStatus};

/// Inserts a pending payment. Returns `None` if a payment with the same reference, or with the same provider payment
/// id, already exists, leaving the stored row untouched.
pub async fn insert_payment(
    payment: &NewPayment,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, sqlx::Error> {
    let payment = sqlx::query_as(
        r#"
            INSERT INTO payments (id, provider, provider_payment_id, amount, currency, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 'PENDING', $6, $6)
            ON CONFLICT DO NOTHING
            RETURNING *;
        "#,
    )
    .bind(&payment.reference)
    .bind(payment.provider)
    .bind(&payment.provider_payment_id)
    .bind(payment.amount)
    .bind(&payment.currency)
    .bind(now)
    .fetch_optional(conn)
    .await?;
    Ok(payment)
}

pub async fn fetch_payment(reference: &str, conn: &mut SqliteConnection) -> Result<Option<Payment>, sqlx::Error> {
    let payment = sqlx::query_as("SELECT * FROM payments WHERE id = $1").bind(reference).fetch_optional(conn).await?;
    Ok(payment)
}

/// Takes the database write lock and returns the payment as it is under the lock.
///
/// SQLite has no `SELECT ... FOR UPDATE`. A no-op `UPDATE` as the first statement of a transaction upgrades it to a
/// writer straight away, so no other transaction can change the row until this one ends.
pub async fn lock_payment(reference: &str, conn: &mut SqliteConnection) -> Result<Option<Payment>, sqlx::Error> {
    let payment = sqlx::query_as("UPDATE payments SET status = status WHERE id = $1 RETURNING *")
        .bind(reference)
        .fetch_optional(conn)
        .await?;
    trace!("🗃️ Write lock taken for payment {reference}");
    Ok(payment)
}

/// Moves a pending payment to `status`. Returns `None` if the payment is no longer pending.
pub async fn settle_pending_payment(
    reference: &str,
    status: PaymentStatus,
    verified_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, sqlx::Error> {
    let payment = sqlx::query_as(
        r#"
            UPDATE payments
            SET status = $2, verified_at = COALESCE($3, verified_at), updated_at = $4
            WHERE id = $1 AND status = 'PENDING'
            RETURNING *;
        "#,
    )
    .bind(reference)
    .bind(status)
    .bind(verified_at)
    .bind(now)
    .fetch_optional(conn)
    .await?;
    Ok(payment)
}

pub async fn stamp_last_verified(
    reference: &str,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, sqlx::Error> {
    let payment = sqlx::query_as("UPDATE payments SET last_verified_at = $2 WHERE id = $1 RETURNING *")
        .bind(reference)
        .bind(at)
        .fetch_optional(conn)
        .await?;
    Ok(payment)
}
