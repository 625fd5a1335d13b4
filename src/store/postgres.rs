//! PostgreSQL implementation of the key-value contract.
//!
//! Each logical table maps to a physical table of `(key TEXT PRIMARY KEY,
//! data JSONB)`. Only runtime-checked queries are used, so building does not
//! require a live database.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::PgPool;
use std::time::Instant;
use tracing::debug;

use super::{
    record_key, validate_table_name, KeyValueStore, Record, ScanFilter, StoreResult,
};

#[derive(Debug, Clone)]
pub struct PgKeyValueStore {
    pool: PgPool,
    key_field: String,
}

impl PgKeyValueStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_key_field(pool, "request_id")
    }

    pub fn with_key_field(pool: PgPool, key_field: impl Into<String>) -> Self {
        Self {
            pool,
            key_field: key_field.into(),
        }
    }

    /// Connect with a fresh pool
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    /// Create the backing table and its status index if missing
    pub async fn ensure_table(&self, table: &str) -> StoreResult<()> {
        validate_table_name(table)?;
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                key TEXT PRIMARY KEY,
                data JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"
        );
        sqlx::query(&create).execute(&self.pool).await?;

        let index = format!(
            "CREATE INDEX IF NOT EXISTS {table}_status_idx ON {table} ((data->>'status'))"
        );
        sqlx::query(&index).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// JSONB `->>` yields text; compare against the same rendering
fn filter_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl KeyValueStore for PgKeyValueStore {
    fn key_field(&self) -> &str {
        &self.key_field
    }

    async fn get(&self, table: &str, key: &str) -> StoreResult<Option<Record>> {
        validate_table_name(table)?;
        let query = format!("SELECT data FROM {table} WHERE key = $1");
        let row: Option<(Json<Record>,)> = sqlx::query_as(&query)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(Json(record),)| record))
    }

    async fn put(&self, table: &str, record: Record) -> StoreResult<bool> {
        validate_table_name(table)?;
        let key = record_key(&record, &self.key_field)?;
        let started = Instant::now();
        let query = format!(
            "INSERT INTO {table} (key, data, updated_at) VALUES ($1, $2, now())
             ON CONFLICT (key) DO UPDATE SET data = EXCLUDED.data, updated_at = now()"
        );
        let result = sqlx::query(&query)
            .bind(&key)
            .bind(Json(&record))
            .execute(&self.pool)
            .await?;
        debug!(
            table = table,
            key = %key,
            duration_ms = started.elapsed().as_millis() as u64,
            "Upserted record"
        );
        Ok(result.rows_affected() > 0)
    }

    async fn put_if(
        &self,
        table: &str,
        record: Record,
        field: &str,
        expected: &Value,
    ) -> StoreResult<bool> {
        validate_table_name(table)?;
        let key = record_key(&record, &self.key_field)?;
        let query = format!(
            "UPDATE {table} SET data = $2, updated_at = now()
             WHERE key = $1 AND data->>$3 = $4"
        );
        let result = sqlx::query(&query)
            .bind(&key)
            .bind(Json(&record))
            .bind(field)
            .bind(filter_text(expected))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, table: &str, key: &str) -> StoreResult<bool> {
        validate_table_name(table)?;
        let query = format!("DELETE FROM {table} WHERE key = $1");
        let result = sqlx::query(&query)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_if(
        &self,
        table: &str,
        key: &str,
        field: &str,
        expected: &Value,
    ) -> StoreResult<bool> {
        validate_table_name(table)?;
        let query = format!("DELETE FROM {table} WHERE key = $1 AND data->>$2 = $3");
        let result = sqlx::query(&query)
            .bind(key)
            .bind(field)
            .bind(filter_text(expected))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn scan(
        &self,
        table: &str,
        filters: &[ScanFilter],
        limit: Option<usize>,
    ) -> StoreResult<Vec<Record>> {
        validate_table_name(table)?;

        let mut query = format!("SELECT data FROM {table}");
        for (i, _) in filters.iter().enumerate() {
            let field_param = i * 2 + 1;
            let value_param = i * 2 + 2;
            query.push_str(if i == 0 { " WHERE " } else { " AND " });
            query.push_str(&format!("data->>${field_param} = ${value_param}"));
        }
        query.push_str(" ORDER BY key");
        if let Some(limit) = limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        let mut statement = sqlx::query_as::<_, (Json<Record>,)>(&query);
        for filter in filters {
            statement = statement
                .bind(filter.field.clone())
                .bind(filter_text(&filter.value));
        }

        let rows = statement.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(Json(record),)| record).collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
