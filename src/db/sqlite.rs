//! SQLite-backed consent storage.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use super::DurableStorage;
use crate::errors::ConsentError;

/// One visitor's slice of the `consent_storage` table.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    scope: String,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool, scope: &str) -> Self {
        Self {
            pool,
            scope: scope.to_string(),
        }
    }
}

#[async_trait]
impl DurableStorage for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, ConsentError> {
        let row = sqlx::query("SELECT value FROM consent_storage WHERE scope = ? AND key = ?")
            .bind(&self.scope)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.get("value")))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ConsentError> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO consent_storage (scope, key, value, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(scope, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(&self.scope)
        .bind(key)
        .bind(value)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
