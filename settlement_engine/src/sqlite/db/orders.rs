use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::db_types::{NewPayment, Order, OrderPaymentStatus, OrderStatusType};

/// Inserts the pending order paid for by `payment`. Returns `None` if the order id is already taken.
pub async fn insert_order(
    payment: &NewPayment,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as(
        r#"
            INSERT INTO orders (order_id, payment_id, amount, currency, status, payment_status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 'pending', 'pending', $5, $5)
            ON CONFLICT (order_id) DO NOTHING
            RETURNING *;
        "#,
    )
    .bind(&payment.order_id)
    .bind(&payment.reference)
    .bind(payment.amount)
    .bind(&payment.currency)
    .bind(now)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

pub async fn fetch_order_by_order_id(order_id: &str, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order =
        sqlx::query_as("SELECT * FROM orders WHERE order_id = $1").bind(order_id).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn fetch_orders_for_payment(payment_id: &str, conn: &mut SqliteConnection) -> Result<Vec<Order>, sqlx::Error> {
    let orders = sqlx::query_as("SELECT * FROM orders WHERE payment_id = $1 ORDER BY id")
        .bind(payment_id)
        .fetch_all(conn)
        .await?;
    Ok(orders)
}

/// Rewrites the derived status columns of every order paid for by `payment_id`.
pub async fn update_orders_for_payment(
    payment_id: &str,
    status: OrderStatusType,
    payment_status: OrderPaymentStatus,
    now: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, sqlx::Error> {
    let mut orders: Vec<Order> = sqlx::query_as(
        r#"
            UPDATE orders SET status = $2, payment_status = $3, updated_at = $4
            WHERE payment_id = $1
            RETURNING *;
        "#,
    )
    .bind(payment_id)
    .bind(status)
    .bind(payment_status)
    .bind(now)
    .fetch_all(conn)
    .await?;
    // RETURNING makes no promise about row order
    orders.sort_by_key(|o| o.id);
    Ok(orders)
}
