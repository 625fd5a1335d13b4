//! Test doubles: a store whose availability can be toggled, scripted job
//! executors and a listener that records every transition.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use request_orchestrator::models::{
    IntelligenceRequest, ProgressCounters, RequestFilter, RequestSummary, Results, StrategyKind,
};
use request_orchestrator::orchestration::{ComponentHealth, FnJobExecutor, JobContext, JobExecutor};
use request_orchestrator::state_machine::{RequestStatus, StatusChangeEvent, StatusListener};
use request_orchestrator::store::{
    InMemoryStore, KeyValueStore, Record, ScanFilter, StoreError, StoreResult,
};
use request_orchestrator::strategy::{
    ProcessingStatistics, ProcessingStrategy, StrategyResult, TableStrategy,
};

/// In-memory store that fails every call while `set_failing(true)` is in effect
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> StoreResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    fn key_field(&self) -> &str {
        self.inner.key_field()
    }

    async fn get(&self, table: &str, key: &str) -> StoreResult<Option<Record>> {
        self.check()?;
        self.inner.get(table, key).await
    }

    async fn put(&self, table: &str, record: Record) -> StoreResult<bool> {
        self.check()?;
        self.inner.put(table, record).await
    }

    async fn put_if(
        &self,
        table: &str,
        record: Record,
        field: &str,
        expected: &Value,
    ) -> StoreResult<bool> {
        self.check()?;
        self.inner.put_if(table, record, field, expected).await
    }

    async fn delete(&self, table: &str, key: &str) -> StoreResult<bool> {
        self.check()?;
        self.inner.delete(table, key).await
    }

    async fn delete_if(
        &self,
        table: &str,
        key: &str,
        field: &str,
        expected: &Value,
    ) -> StoreResult<bool> {
        self.check()?;
        self.inner.delete_if(table, key, field, expected).await
    }

    async fn scan(
        &self,
        table: &str,
        filters: &[ScanFilter],
        limit: Option<usize>,
    ) -> StoreResult<Vec<Record>> {
        self.check()?;
        self.inner.scan(table, filters, limit).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check()?;
        self.inner.ping().await
    }
}

/// In-memory store where every FAILED row returned by a scan is moved back
/// to PENDING right after the scan, as a retry landing between a scan and
/// the writes that follow it would
#[derive(Debug, Default)]
pub struct RetryAfterScanStore {
    inner: InMemoryStore,
}

impl RetryAfterScanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for RetryAfterScanStore {
    fn key_field(&self) -> &str {
        self.inner.key_field()
    }

    async fn get(&self, table: &str, key: &str) -> StoreResult<Option<Record>> {
        self.inner.get(table, key).await
    }

    async fn put(&self, table: &str, record: Record) -> StoreResult<bool> {
        self.inner.put(table, record).await
    }

    async fn put_if(
        &self,
        table: &str,
        record: Record,
        field: &str,
        expected: &Value,
    ) -> StoreResult<bool> {
        self.inner.put_if(table, record, field, expected).await
    }

    async fn delete(&self, table: &str, key: &str) -> StoreResult<bool> {
        self.inner.delete(table, key).await
    }

    async fn delete_if(
        &self,
        table: &str,
        key: &str,
        field: &str,
        expected: &Value,
    ) -> StoreResult<bool> {
        self.inner.delete_if(table, key, field, expected).await
    }

    async fn scan(
        &self,
        table: &str,
        filters: &[ScanFilter],
        limit: Option<usize>,
    ) -> StoreResult<Vec<Record>> {
        let records = self.inner.scan(table, filters, limit).await?;
        for record in &records {
            if record.get("status") == Some(&json!("failed")) {
                let mut retried = record.clone();
                retried.insert("status".to_string(), json!("pending"));
                self.inner.put(table, retried).await?;
            }
        }
        Ok(records)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}

/// Sleeps for `delay`, then returns `value`
pub fn succeed_after(delay: Duration, value: Value) -> Arc<dyn JobExecutor> {
    Arc::new(FnJobExecutor::new("succeed_after", move |_ctx: JobContext| {
        let value = value.clone();
        async move {
            tokio::time::sleep(delay).await;
            Ok::<_, anyhow::Error>(value)
        }
    }))
}

pub fn fail_with(message: &'static str) -> Arc<dyn JobExecutor> {
    Arc::new(FnJobExecutor::new("fail_with", move |_ctx: JobContext| async move {
        Err::<Value, _>(anyhow::anyhow!(message))
    }))
}

pub fn panic_with(message: &'static str) -> Arc<dyn JobExecutor> {
    Arc::new(FnJobExecutor::new("panic_with", move |_ctx: JobContext| async move {
        if !message.is_empty() {
            panic!("{}", message);
        }
        Ok::<_, anyhow::Error>(Value::Null)
    }))
}

/// Never finishes on its own
pub fn hang() -> Arc<dyn JobExecutor> {
    Arc::new(FnJobExecutor::new("hang", |_ctx: JobContext| async {
        tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        Ok::<_, anyhow::Error>(Value::Null)
    }))
}

/// Walks the pipeline stages, reporting progress, then returns a summary
pub fn staged() -> Arc<dyn JobExecutor> {
    Arc::new(FnJobExecutor::new("staged", |ctx: JobContext| async move {
        ctx.progress
            .report("url_discovery", None, ProgressCounters::default())
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        ctx.progress.mark_executing("Extracting content").await;
        ctx.progress
            .report(
                "content_extraction",
                Some(60.0),
                ProgressCounters {
                    urls_found: Some(4),
                    content_extracted: Some(3),
                    processing_errors: Some(1),
                },
            )
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok::<_, anyhow::Error>(json!({
            "summary": "staged",
            "urls": ["a", "b", "c", "d"],
        }))
    }))
}

/// Records every status change it is told about
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<StatusChangeEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<StatusChangeEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn transitions_for(&self, request_id: &str) -> Vec<(RequestStatus, RequestStatus)> {
        self.events()
            .into_iter()
            .filter(|e| e.request_id == request_id)
            .map(|e| (e.old_status, e.new_status))
            .collect()
    }
}

impl StatusListener for RecordingListener {
    fn on_status_change(&self, event: &StatusChangeEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Table-backed strategy registered under the queue kind, standing in for a
/// second backend in multi-strategy tests
pub struct SecondaryStrategy {
    inner: TableStrategy,
}

impl SecondaryStrategy {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            inner: TableStrategy::new(store, super::table_config(1)),
        }
    }
}

#[async_trait]
impl ProcessingStrategy for SecondaryStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Queue
    }

    async fn initialize(&self) -> StrategyResult<()> {
        self.inner.initialize().await
    }

    async fn shutdown(&self) -> StrategyResult<()> {
        self.inner.shutdown().await
    }

    async fn submit(&self, request: IntelligenceRequest) -> StrategyResult<bool> {
        self.inner.submit(request).await
    }

    async fn get_request_status(
        &self,
        request_id: &str,
    ) -> StrategyResult<Option<IntelligenceRequest>> {
        self.inner.get_request_status(request_id).await
    }

    async fn get_results(&self, request_id: &str) -> StrategyResult<Option<Results>> {
        self.inner.get_results(request_id).await
    }

    async fn cancel(&self, request_id: &str) -> StrategyResult<bool> {
        self.inner.cancel(request_id).await
    }

    async fn list_requests(&self, filter: &RequestFilter) -> StrategyResult<Vec<RequestSummary>> {
        self.inner.list_requests(filter).await
    }

    async fn update_status(
        &self,
        request_id: &str,
        status: RequestStatus,
        message: Option<&str>,
    ) -> StrategyResult<bool> {
        self.inner.update_status(request_id, status, message).await
    }

    async fn update_progress(
        &self,
        request_id: &str,
        stage: &str,
        percentage: Option<f64>,
        counters: ProgressCounters,
    ) -> StrategyResult<bool> {
        self.inner
            .update_progress(request_id, stage, percentage, counters)
            .await
    }

    async fn save_results(&self, request_id: &str, result: Value) -> StrategyResult<bool> {
        self.inner.save_results(request_id, result).await
    }

    async fn retry_request(&self, request_id: &str) -> StrategyResult<bool> {
        self.inner.retry_request(request_id).await
    }

    async fn get_processing_statistics(&self, hours: u64) -> StrategyResult<ProcessingStatistics> {
        let mut stats = self.inner.get_processing_statistics(hours).await?;
        stats.strategy = StrategyKind::Queue;
        Ok(stats)
    }

    async fn cleanup_old_requests(
        &self,
        completed_age_hours: u64,
        failed_age_hours: u64,
    ) -> StrategyResult<usize> {
        self.inner
            .cleanup_old_requests(completed_age_hours, failed_age_hours)
            .await
    }

    async fn cancel_stale_requests(&self, max_age_hours: u64) -> StrategyResult<usize> {
        self.inner.cancel_stale_requests(max_age_hours).await
    }

    async fn get_pending_requests(
        &self,
        limit: usize,
    ) -> StrategyResult<Vec<IntelligenceRequest>> {
        self.inner.get_pending_requests(limit).await
    }

    fn can_process_more(&self) -> bool {
        self.inner.can_process_more()
    }

    fn max_concurrent_requests(&self) -> usize {
        self.inner.max_concurrent_requests()
    }

    fn add_active(&self, request: &IntelligenceRequest) {
        self.inner.add_active(request)
    }

    fn remove_active(&self, request_id: &str) {
        self.inner.remove_active(request_id)
    }

    fn active_count(&self) -> usize {
        self.inner.active_count()
    }

    fn active_request_ids(&self) -> Vec<String> {
        self.inner.active_request_ids()
    }

    fn polling_interval(&self) -> Duration {
        self.inner.polling_interval()
    }

    fn add_status_listener(&self, listener: Arc<dyn StatusListener>) {
        self.inner.add_status_listener(listener)
    }

    async fn health_check(&self) -> ComponentHealth {
        let mut health = self.inner.health_check().await;
        health.name = "secondary".to_string();
        health
    }

    fn configuration(&self) -> Value {
        json!({ "strategy": "queue", "inner": self.inner.configuration() })
    }
}
