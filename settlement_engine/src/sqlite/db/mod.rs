//! # SQLite Database methods
//!
//! This module contains "low-level" SQLite database interactions.
//!
//! All these interactions are simple functions (rather than stateful structs) that accept a `&mut SqliteConnection`
//! argument. Callers can obtain a connection from a pool, or open a transaction as the need arises, and call through
//! to the functions without any other changes.
//!
//! Timestamps are always bound from Rust rather than taken from SQLite's clock, so that every row uses the same
//! encoding and comparisons on stored timestamps stay consistent.
use std::{env, str::FromStr, time::Duration};

use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Error as SqlxError,
    SqlitePool,
};

pub mod deliveries;
pub mod idempotency;
pub mod orders;
pub mod payments;

const SQLITE_DB_URL: &str = "sqlite://data/settlement_gateway.db";
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn db_url() -> String {
    let result = env::var("SGW_DATABASE_URL").unwrap_or_else(|_| {
        info!("🗃️ SGW_DATABASE_URL is not set. Using the default.");
        SQLITE_DB_URL.to_string()
    });
    info!("🗃️ Using database URL: {result}");
    result
}

/// Opens a pool in WAL mode. Writers wait up to [`BUSY_TIMEOUT`] for the write lock before SQLite reports `BUSY`.
pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, SqlxError> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    Ok(pool)
}

pub(crate) fn is_unique_violation(e: &SqlxError) -> bool {
    match e {
        SqlxError::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}
