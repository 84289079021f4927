//! SQLite persistence for the enrollment core: durable event streams,
//! snapshots, the read model, and the audit chain.

pub mod audit_store;
pub mod error;
pub mod event_store;
pub mod read_model;

pub use audit_store::SqliteAuditStore;
pub use error::{Result, StorageError};
pub use event_store::SqliteEventStore;
pub use read_model::SqliteReadModel;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

/// Open (creating if missing) the registry database and run migrations.
pub async fn init_registry_db(db_path: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(db_path)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePool::connect_with(options).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    tracing::info!(db_path, "registry DB initialized");
    Ok(pool)
}
