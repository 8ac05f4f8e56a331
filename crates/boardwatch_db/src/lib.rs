//! SQLite persistence for Boardwatch.
//!
//! One pool, four concerns: the per-tenant job store ([`store::JobStore`]),
//! the bounded-concurrency bulk writer ([`bulk::BulkWriter`]), the durable
//! dispatch queue ([`queue::DispatchQueue`]), and the append-only run
//! ledger ([`ledger::RunLedger`]). The database is the single source of
//! truth; nothing here caches across requests.

pub mod bulk;
pub mod error;
pub mod ledger;
pub mod models;
pub mod queue;
pub mod schema;
pub mod store;

pub use bulk::{BulkWriter, JobWrite, WriteFailure, WriteOutcome, WriteSummary};
pub use error::StoreError;
pub use ledger::RunLedger;
pub use models::{CompanyRecord, FeedRecord, JobRecord, NewJob, QueueStats, QueuedRun, RunRecord};
pub use queue::DispatchQueue;
pub use store::JobStore;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;

/// Open (creating if needed) a SQLite database and run schema init.
pub async fn open(path: &Path) -> Result<Pool<Sqlite>, StoreError> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
        .map_err(StoreError::from)?
        .create_if_missing(true)
        .busy_timeout(std::time::Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await?;
    schema::init_schema(&pool).await?;
    Ok(pool)
}

/// Open a fresh in-memory database with the schema applied.
pub async fn open_in_memory() -> Result<Pool<Sqlite>, StoreError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await?;
    schema::init_schema(&pool).await?;
    Ok(pool)
}
