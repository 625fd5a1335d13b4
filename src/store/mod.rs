//! # Storage Contracts
//!
//! The orchestrator only needs a narrow CRUD/scan contract from its backing
//! store, plus an optional blob store for large result payloads. Records are
//! plain JSON maps; the strategy owns (de)serialization of its shapes.

pub mod blob;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub use blob::{BlobStore, FileSystemBlobStore, InMemoryBlobStore};
pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgKeyValueStore;

/// One persisted row
pub type Record = Map<String, Value>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid table name: {0}")]
    InvalidTable(String),

    #[error("Record is missing key field '{field}'")]
    MissingKey { field: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Io(_))
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Equality predicate on a top-level record field
#[derive(Debug, Clone, PartialEq)]
pub struct ScanFilter {
    pub field: String,
    pub value: Value,
}

impl ScanFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        record.get(&self.field) == Some(&self.value)
    }
}

/// Key-value table store. Every record is keyed by the store's key field.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Name of the primary-key field inside each record
    fn key_field(&self) -> &str;

    async fn get(&self, table: &str, key: &str) -> StoreResult<Option<Record>>;

    /// Whole-record upsert
    async fn put(&self, table: &str, record: Record) -> StoreResult<bool>;

    /// Upsert only if the stored record's `field` currently equals `expected`.
    /// Returns `false` when the condition does not hold or the record is absent.
    async fn put_if(
        &self,
        table: &str,
        record: Record,
        field: &str,
        expected: &Value,
    ) -> StoreResult<bool>;

    async fn delete(&self, table: &str, key: &str) -> StoreResult<bool>;

    /// Delete only if the stored record's `field` currently equals `expected`.
    /// Returns `false` when the condition does not hold or the record is absent.
    async fn delete_if(
        &self,
        table: &str,
        key: &str,
        field: &str,
        expected: &Value,
    ) -> StoreResult<bool>;

    /// Records matching every filter, up to `limit` (unbounded when `None`)
    async fn scan(
        &self,
        table: &str,
        filters: &[ScanFilter],
        limit: Option<usize>,
    ) -> StoreResult<Vec<Record>>;

    /// Reachability probe
    async fn ping(&self) -> StoreResult<()>;
}

/// Extract the key of `record` as a string
pub(crate) fn record_key(record: &Record, key_field: &str) -> StoreResult<String> {
    match record.get(key_field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(StoreError::MissingKey {
            field: key_field.to_string(),
        }),
    }
}

/// Table names are interpolated into backend statements
pub(crate) fn validate_table_name(table: &str) -> StoreResult<()> {
    let valid = !table.is_empty()
        && table.len() <= 63
        && table
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidTable(table.to_string()))
    }
}
