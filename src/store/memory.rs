use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::BTreeMap;

use super::{
    record_key, validate_table_name, KeyValueStore, Record, ScanFilter, StoreResult,
};

/// Process-local store backed by a concurrent map of ordered tables.
///
/// Writes to one table serialize on that table's shard lock, which makes
/// `put_if` atomic with respect to other writers in the same process.
#[derive(Debug)]
pub struct InMemoryStore {
    key_field: String,
    tables: DashMap<String, BTreeMap<String, Record>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_key_field("request_id")
    }

    pub fn with_key_field(key_field: impl Into<String>) -> Self {
        Self {
            key_field: key_field.into(),
            tables: DashMap::new(),
        }
    }

    /// Number of records held in `table`
    pub fn len(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |t| t.len())
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    fn key_field(&self) -> &str {
        &self.key_field
    }

    async fn get(&self, table: &str, key: &str) -> StoreResult<Option<Record>> {
        validate_table_name(table)?;
        Ok(self
            .tables
            .get(table)
            .and_then(|rows| rows.get(key).cloned()))
    }

    async fn put(&self, table: &str, record: Record) -> StoreResult<bool> {
        validate_table_name(table)?;
        let key = record_key(&record, &self.key_field)?;
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(key, record);
        Ok(true)
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
        let Some(mut rows) = self.tables.get_mut(table) else {
            return Ok(false);
        };
        match rows.get_mut(&key) {
            Some(current) if current.get(field) == Some(expected) => {
                *current = record;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, table: &str, key: &str) -> StoreResult<bool> {
        validate_table_name(table)?;
        Ok(self
            .tables
            .get_mut(table)
            .is_some_and(|mut rows| rows.remove(key).is_some()))
    }

    async fn delete_if(
        &self,
        table: &str,
        key: &str,
        field: &str,
        expected: &Value,
    ) -> StoreResult<bool> {
        validate_table_name(table)?;
        let Some(mut rows) = self.tables.get_mut(table) else {
            return Ok(false);
        };
        if rows.get(key).is_some_and(|current| current.get(field) == Some(expected)) {
            rows.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn scan(
        &self,
        table: &str,
        filters: &[ScanFilter],
        limit: Option<usize>,
    ) -> StoreResult<Vec<Record>> {
        validate_table_name(table)?;
        let Some(rows) = self.tables.get(table) else {
            return Ok(Vec::new());
        };
        let records = rows
            .values()
            .filter(|record| filters.iter().all(|f| f.matches(record)))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(records)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
