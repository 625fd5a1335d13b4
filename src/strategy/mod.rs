//! # Processing Strategies
//!
//! A strategy is a pluggable backing implementation for persisting and
//! serving requests. Every operation is async and bounded by the latency of
//! the underlying store. Business outcomes (invalid transition, already
//! terminal) come back as `false`/`None`; only malformed submissions,
//! unknown ids and infrastructure failures are errors.

pub mod codec;
pub mod retry;
pub mod table;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::models::{
    IntelligenceRequest, ProgressCounters, RequestFilter, RequestSummary, Results, StrategyKind,
};
use crate::orchestration::health::ComponentHealth;
use crate::state_machine::{RequestStatus, StatusListener, StatusStatistics};
use crate::store::StoreError;

pub use table::{priority_score, TableStrategy};

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Request validation failed: {}", .errors.join("; "))]
    Validation { errors: Vec<String> },

    #[error("Request not found: {request_id}")]
    NotFound { request_id: String },

    #[error("Operation '{operation}' failed: {reason}")]
    Operation { operation: String, reason: String },

    #[error("Strategy initialization failed: {0}")]
    Initialization(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StrategyError {
    pub fn not_found(request_id: impl Into<String>) -> Self {
        Self::NotFound {
            request_id: request_id.into(),
        }
    }

    pub fn operation(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Operation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type StrategyResult<T> = Result<T, StrategyError>;

/// Windowed statistics reported by a strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStatistics {
    pub strategy: StrategyKind,
    pub window_hours: u64,
    pub generated_at: DateTime<Utc>,
    pub status: StatusStatistics,
    pub active_requests: usize,
    pub max_concurrent_requests: usize,
    pub polling_interval_ms: u64,
}

/// Contract every backing implementation satisfies
#[async_trait]
pub trait ProcessingStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Verify the backing store is reachable. Idempotent.
    async fn initialize(&self) -> StrategyResult<()>;

    async fn shutdown(&self) -> StrategyResult<()>;

    /// Validate and persist a new request as PENDING
    async fn submit(&self, request: IntelligenceRequest) -> StrategyResult<bool>;

    /// Active cache first, then the store. `None` when absent.
    async fn get_request_status(
        &self,
        request_id: &str,
    ) -> StrategyResult<Option<IntelligenceRequest>>;

    /// Results of a COMPLETED request, with offloaded payloads loaded back
    async fn get_results(&self, request_id: &str) -> StrategyResult<Option<Results>>;

    /// `false` when the request is already terminal
    async fn cancel(&self, request_id: &str) -> StrategyResult<bool>;

    async fn list_requests(&self, filter: &RequestFilter) -> StrategyResult<Vec<RequestSummary>>;

    /// `false` when the transition table refuses the change
    async fn update_status(
        &self,
        request_id: &str,
        status: RequestStatus,
        message: Option<&str>,
    ) -> StrategyResult<bool>;

    /// `false` when the request is already terminal
    async fn update_progress(
        &self,
        request_id: &str,
        stage: &str,
        percentage: Option<f64>,
        counters: ProgressCounters,
    ) -> StrategyResult<bool>;

    /// `false` when the request is already terminal
    async fn save_results(&self, request_id: &str, result: Value) -> StrategyResult<bool>;

    /// Return a FAILED request to PENDING. `false` when not permitted.
    async fn retry_request(&self, request_id: &str) -> StrategyResult<bool>;

    async fn get_processing_statistics(&self, hours: u64) -> StrategyResult<ProcessingStatistics>;

    /// Hard-delete terminal requests past their retention; returns the number deleted
    async fn cleanup_old_requests(
        &self,
        completed_age_hours: u64,
        failed_age_hours: u64,
    ) -> StrategyResult<usize>;

    /// Cancel active requests older than `max_age_hours` that no local worker holds
    async fn cancel_stale_requests(&self, max_age_hours: u64) -> StrategyResult<usize>;

    /// PENDING requests in scheduling order
    async fn get_pending_requests(&self, limit: usize)
        -> StrategyResult<Vec<IntelligenceRequest>>;

    fn can_process_more(&self) -> bool;

    /// Concurrency cap a worker must honour for its own running jobs
    fn max_concurrent_requests(&self) -> usize;

    fn add_active(&self, request: &IntelligenceRequest);

    fn remove_active(&self, request_id: &str);

    fn active_count(&self) -> usize;

    fn active_request_ids(&self) -> Vec<String>;

    fn polling_interval(&self) -> Duration;

    fn add_status_listener(&self, listener: Arc<dyn StatusListener>);

    async fn health_check(&self) -> ComponentHealth;

    /// Effective configuration, for operators
    fn configuration(&self) -> Value;
}
