//! Builders for requests, strategies, workers and configurations.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;

use request_orchestrator::config::{OrchestratorConfig, TableStrategyConfig, WorkerConfig};
use request_orchestrator::models::{IntelligenceRequest, Priority, RequestConfig, SourceConfig};
use request_orchestrator::orchestration::{JobExecutor, TableProcessor};
use request_orchestrator::state_machine::RequestStatus;
use request_orchestrator::store::KeyValueStore;
use request_orchestrator::strategy::codec::request_to_record;
use request_orchestrator::strategy::{ProcessingStrategy, TableStrategy};

pub const TABLE: &str = "intelligence_requests";

/// Valid request for `project-1`/`user-1` with one keyword and one source
pub fn sample_request() -> IntelligenceRequest {
    IntelligenceRequest::new(
        "project-1",
        "user-1",
        RequestConfig::new(["rust"], [SourceConfig::named("web")]),
    )
}

pub fn request_with_id(request_id: &str) -> IntelligenceRequest {
    sample_request().with_request_id(request_id)
}

/// Request of `priority` created `hours` ago
pub fn aged_request(priority: Priority, hours: i64) -> IntelligenceRequest {
    sample_request()
        .with_priority(priority)
        .with_created_at(Utc::now() - ChronoDuration::hours(hours))
}

/// Terminal request whose completion happened `hours` ago
pub fn finished_request(status: RequestStatus, hours: i64) -> IntelligenceRequest {
    let finished_at = Utc::now() - ChronoDuration::hours(hours);
    let mut request = sample_request().with_created_at(finished_at - ChronoDuration::hours(1));
    request.status = status;
    request.started_at = Some(finished_at - ChronoDuration::minutes(30));
    request.completed_at = Some(finished_at);
    request.updated_at = finished_at;
    request
}

/// Write `request` straight to the store, bypassing submission checks
pub async fn seed(store: &dyn KeyValueStore, request: &IntelligenceRequest) {
    let record = request_to_record(request).expect("request encodes");
    store.put(TABLE, record).await.expect("seed write");
}

pub fn table_config(max_concurrent_requests: usize) -> TableStrategyConfig {
    TableStrategyConfig {
        max_concurrent_requests,
        polling_interval_ms: 20,
        ..TableStrategyConfig::default()
    }
}

pub fn table_strategy(
    store: Arc<dyn KeyValueStore>,
    max_concurrent_requests: usize,
) -> Arc<dyn ProcessingStrategy> {
    Arc::new(TableStrategy::new(store, table_config(max_concurrent_requests)))
}

pub fn worker_config(max_processing_time_seconds: u64) -> WorkerConfig {
    WorkerConfig {
        max_processing_time_seconds,
        shutdown_grace_period_seconds: 1,
        ..WorkerConfig::default()
    }
}

pub fn processor(
    strategy: Arc<dyn ProcessingStrategy>,
    executor: Arc<dyn JobExecutor>,
    config: WorkerConfig,
) -> Arc<TableProcessor> {
    Arc::new(TableProcessor::new(strategy, executor, config))
}

/// Service configuration with a fast polling loop and a short grace period
pub fn service_config(worker_enabled: bool) -> OrchestratorConfig {
    OrchestratorConfig {
        environment: "test".to_string(),
        table: table_config(1),
        worker: WorkerConfig {
            enabled: worker_enabled,
            ..worker_config(30)
        },
        ..OrchestratorConfig::default()
    }
}
