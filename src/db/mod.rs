//! Durable storage for consent records.
//!
//! The consent store only ever sees the `DurableStorage` port: a key/value slot
//! scoped to one visitor, the server-side counterpart of browser localStorage.

mod memory;
mod sqlite;

pub use memory::*;
pub use sqlite::*;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::errors::ConsentError;

/// A visitor-scoped key/value slot.
#[async_trait]
pub trait DurableStorage: Send + Sync + 'static {
    /// Read the raw value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, ConsentError>;

    /// Replace the value stored under `key`.
    async fn set(&self, key: &str, value: &str) -> Result<(), ConsentError>;
}

/// Hands out visitor-scoped storage handles.
#[derive(Clone)]
pub enum StorageProvider {
    Sqlite(SqlitePool),
    Memory(MemoryStorage),
}

impl StorageProvider {
    pub fn for_visitor(&self, visitor_id: &str) -> Arc<dyn DurableStorage> {
        match self {
            StorageProvider::Sqlite(pool) => Arc::new(SqliteStorage::new(pool.clone(), visitor_id)),
            StorageProvider::Memory(memory) => Arc::new(memory.scoped(visitor_id)),
        }
    }
}

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS consent_storage (
            scope TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (scope, key)
        );
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
