//! # Table Strategy
//!
//! Backs requests with a single key-value table that is scanned for pending
//! work and ordered in-process by a time-weighted priority score.
//!
//! ## Write model
//!
//! Every mutation is load, mutate through the [`StatusTracker`], then a
//! conditional write that only lands if the stored `status` still equals the
//! status the change was computed from. A lost race reloads and recomputes,
//! so a worker claiming PENDING -> PROCESSING cannot overwrite a concurrent
//! cancellation.
//!
//! ## Priority fairness
//!
//! Pending requests are ordered by `weight * 10 + min(age_hours, 10)`:
//! priority dominates, age breaks ties up to a 10 point cap so a long-waiting
//! request is never starved by newer ones of the same priority.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde_json::{json, Value};
use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use super::codec::{record_to_request, request_to_record};
use super::retry::with_store_retry;
use super::{ProcessingStatistics, ProcessingStrategy, StrategyError, StrategyResult};
use crate::config::{ResultsConfig, TableStrategyConfig};
use crate::logging::{log_request_operation, log_store_operation};
use crate::models::{
    IntelligenceRequest, ProgressCounters, RequestFilter, RequestSummary, Results, StrategyKind,
};
use crate::orchestration::health::ComponentHealth;
use crate::state_machine::{RequestStatus, StatusListener, StatusTracker, TransitionOutcome};
use crate::store::{BlobStore, KeyValueStore, Record, ScanFilter};

/// Field the conditional write is checked against
const STATUS_FIELD: &str = "status";

/// Reload-and-recompute attempts before a conflicting write is reported
const MAX_WRITE_CONFLICTS: u32 = 3;

/// Maximum age contribution to the priority score, in hours
const AGE_BOOST_CAP_HOURS: f64 = 10.0;

/// Scheduling score: higher runs first
pub fn priority_score(request: &IntelligenceRequest, now: DateTime<Utc>) -> f64 {
    f64::from(request.priority.weight()) * 10.0 + request.age_hours(now).min(AGE_BOOST_CAP_HOURS)
}

/// What a mutation decided to do with the loaded record
enum Mutation {
    Write,
    Unchanged,
    Refused,
}

pub struct TableStrategy {
    store: Arc<dyn KeyValueStore>,
    blob_store: Option<Arc<dyn BlobStore>>,
    config: TableStrategyConfig,
    results_config: ResultsConfig,
    tracker: StatusTracker,
    active: DashMap<String, IntelligenceRequest>,
    initialized: AtomicBool,
}

impl std::fmt::Debug for TableStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableStrategy")
            .field("table_name", &self.config.table_name)
            .field("active", &self.active.len())
            .field("blob_store", &self.blob_store.is_some())
            .finish()
    }
}

impl TableStrategy {
    pub fn new(store: Arc<dyn KeyValueStore>, config: TableStrategyConfig) -> Self {
        Self {
            store,
            blob_store: None,
            config,
            results_config: ResultsConfig::default(),
            tracker: StatusTracker::new(),
            active: DashMap::new(),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn with_blob_store(mut self, blob_store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(blob_store);
        self
    }

    pub fn with_results_config(mut self, results_config: ResultsConfig) -> Self {
        self.results_config = results_config;
        self
    }

    pub fn config(&self) -> &TableStrategyConfig {
        &self.config
    }

    pub fn tracker(&self) -> &StatusTracker {
        &self.tracker
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn table(&self) -> &str {
        &self.config.table_name
    }

    async fn load(&self, request_id: &str) -> StrategyResult<Option<IntelligenceRequest>> {
        let store = &self.store;
        let table = self.table();
        let record = with_store_retry(&self.config.store_retry, "get", move || {
            store.get(table, request_id)
        })
        .await?;
        record.map(record_to_request).transpose()
    }

    async fn scan_requests(
        &self,
        filters: &[ScanFilter],
        limit: Option<usize>,
    ) -> StrategyResult<Vec<IntelligenceRequest>> {
        let store = &self.store;
        let table = self.table();
        let started = Instant::now();
        let records = with_store_retry(&self.config.store_retry, "scan", move || {
            store.scan(table, filters, limit)
        })
        .await?;
        log_store_operation(
            "scan",
            table,
            Some(records.len()),
            "ok",
            Some(started.elapsed().as_millis() as u64),
        );
        Ok(self.decode_all(records))
    }

    /// Malformed rows are skipped so one bad record cannot wedge a scan
    fn decode_all(&self, records: Vec<Record>) -> Vec<IntelligenceRequest> {
        records
            .into_iter()
            .filter_map(|record| match record_to_request(record) {
                Ok(request) => Some(request),
                Err(e) => {
                    warn!(table = %self.table(), error = %e, "Skipping malformed request record");
                    None
                }
            })
            .collect()
    }

    /// Delete only while the stored status still equals `status`
    async fn delete_if_status(
        &self,
        request_id: &str,
        status: RequestStatus,
    ) -> StrategyResult<bool> {
        let store = &self.store;
        let table = self.table();
        let expected = Value::from(status.as_str());
        let expected = &expected;
        Ok(with_store_retry(&self.config.store_retry, "delete", move || {
            store.delete_if(table, request_id, STATUS_FIELD, expected)
        })
        .await?)
    }

    /// Load, mutate and conditionally write one request.
    ///
    /// Returns `false` when the mutation refused the change. Unknown ids are
    /// `NotFound`; persistent write conflicts are `Operation` errors.
    async fn apply_change<F>(
        &self,
        request_id: &str,
        operation: &str,
        mut mutate: F,
    ) -> StrategyResult<bool>
    where
        F: FnMut(&mut IntelligenceRequest) -> Mutation + Send,
    {
        for attempt in 1..=MAX_WRITE_CONFLICTS {
            let mut request = self
                .load(request_id)
                .await?
                .ok_or_else(|| StrategyError::not_found(request_id))?;
            let expected = Value::from(request.status.as_str());

            match mutate(&mut request) {
                Mutation::Refused => return Ok(false),
                Mutation::Unchanged => return Ok(true),
                Mutation::Write => {}
            }

            let record = request_to_record(&request)?;
            let store = &self.store;
            let table = self.table();
            let expected = &expected;
            let written = with_store_retry(&self.config.store_retry, operation, move || {
                store.put_if(table, record.clone(), STATUS_FIELD, expected)
            })
            .await?;

            if written {
                if let Some(mut cached) = self.active.get_mut(request_id) {
                    *cached = request;
                }
                return Ok(true);
            }

            debug!(
                request_id = %request_id,
                operation = %operation,
                attempt = attempt,
                "Conditional write lost a race, reloading"
            );
        }

        Err(StrategyError::operation(
            operation,
            format!("request {request_id} kept changing underneath {MAX_WRITE_CONFLICTS} attempts"),
        ))
    }

    /// Apply a status change and record the message in errors or warnings
    fn transition(
        tracker: &StatusTracker,
        request: &mut IntelligenceRequest,
        status: RequestStatus,
        message: Option<&str>,
    ) -> Mutation {
        match tracker.try_update_status(request, status, message) {
            Ok(TransitionOutcome::Unchanged) => Mutation::Unchanged,
            Ok(TransitionOutcome::Applied) => {
                match status {
                    RequestStatus::Failed => {
                        request.add_error(message.unwrap_or("Request failed"));
                    }
                    RequestStatus::Cancelled => {
                        request.add_warning(message.unwrap_or("Request cancelled"));
                    }
                    _ => {}
                }
                Mutation::Write
            }
            Err(e) => {
                warn!(request_id = %request.request_id, error = %e, "Rejected status change");
                Mutation::Refused
            }
        }
    }

    /// Move a large payload to the blob store, returning the stored data and path
    async fn offload_payload(
        &self,
        request_id: &str,
        result: Value,
    ) -> StrategyResult<(Value, Option<String>)> {
        let Some(blob_store) = &self.blob_store else {
            return Ok((result, None));
        };

        let bytes = serde_json::to_vec(&result)?;
        if bytes.len() <= self.results_config.offload_threshold_bytes {
            return Ok((result, None));
        }

        let key = self.results_config.blob_key(request_id);
        let size = bytes.len();
        if !blob_store.save(&key, bytes).await? {
            return Err(StrategyError::operation(
                "save_results",
                format!("blob store refused payload for {request_id}"),
            ));
        }
        info!(request_id = %request_id, key = %key, bytes = size, "Offloaded result payload");
        Ok((Value::Null, Some(key)))
    }

    async fn load_payload(&self, path: &str) -> StrategyResult<Value> {
        let blob_store = self.blob_store.as_ref().ok_or_else(|| {
            StrategyError::operation(
                "get_results",
                format!("result stored at {path} but no blob store is configured"),
            )
        })?;
        let bytes = blob_store.load(path).await?.ok_or_else(|| {
            StrategyError::operation("get_results", format!("result payload missing at {path}"))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl ProcessingStrategy for TableStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Table
    }

    async fn initialize(&self) -> StrategyResult<()> {
        if self.is_initialized() {
            debug!(table = %self.table(), "Table strategy already initialized");
            return Ok(());
        }

        let store = &self.store;
        with_store_retry(&self.config.store_retry, "ping", move || store.ping())
            .await
            .map_err(|e| {
                StrategyError::Initialization(format!(
                    "store for table {} unreachable: {e}",
                    self.table()
                ))
            })?;

        self.initialized.store(true, Ordering::Release);
        info!(
            table = %self.table(),
            max_concurrent_requests = self.config.max_concurrent_requests,
            polling_interval_ms = self.config.polling_interval_ms,
            "Table strategy initialized"
        );
        Ok(())
    }

    async fn shutdown(&self) -> StrategyResult<()> {
        let held = self.active.len();
        self.active.clear();
        self.initialized.store(false, Ordering::Release);
        info!(table = %self.table(), released_active = held, "Table strategy shut down");
        Ok(())
    }

    #[instrument(skip(self, request), fields(request_id = %request.request_id))]
    async fn submit(&self, mut request: IntelligenceRequest) -> StrategyResult<bool> {
        let errors = request.validation_errors();
        if !errors.is_empty() {
            warn!(errors = ?errors, "Rejected invalid request");
            return Err(StrategyError::Validation { errors });
        }

        if self.load(&request.request_id).await?.is_some() {
            return Err(StrategyError::Validation {
                errors: vec![format!("Request ID {} already exists", request.request_id)],
            });
        }

        request.status = RequestStatus::Pending;
        request.processing_strategy = StrategyKind::Table;
        request.status_message = Some("Request submitted".to_string());

        let record = request_to_record(&request)?;
        let store = &self.store;
        let table = self.table();
        let stored = with_store_retry(&self.config.store_retry, "put", move || {
            store.put(table, record.clone())
        })
        .await?;

        log_request_operation(
            "submit",
            Some(&request.request_id),
            Some(StrategyKind::Table.as_str()),
            if stored { "pending" } else { "rejected" },
            None,
        );
        Ok(stored)
    }

    async fn get_request_status(
        &self,
        request_id: &str,
    ) -> StrategyResult<Option<IntelligenceRequest>> {
        let cached = self.active.get(request_id).map(|entry| entry.value().clone());
        if let Some(request) = cached {
            return Ok(Some(request));
        }
        self.load(request_id).await
    }

    async fn get_results(&self, request_id: &str) -> StrategyResult<Option<Results>> {
        let Some(request) = self.get_request_status(request_id).await? else {
            return Ok(None);
        };
        if request.status != RequestStatus::Completed {
            return Ok(None);
        }
        let Some(mut results) = request.results else {
            return Ok(None);
        };

        if results.data.is_null() {
            if let Some(path) = results.result_path.clone() {
                results.data = self.load_payload(&path).await?;
            }
        }
        Ok(Some(results))
    }

    #[instrument(skip(self))]
    async fn cancel(&self, request_id: &str) -> StrategyResult<bool> {
        let tracker = &self.tracker;
        let cancelled = self
            .apply_change(request_id, "cancel", |request| {
                if request.status.is_terminal() {
                    return Mutation::Refused;
                }
                match tracker.try_update_status(
                    request,
                    RequestStatus::Cancelled,
                    Some("Cancelled by user"),
                ) {
                    Ok(_) => {
                        request.add_warning("Request cancelled by user");
                        Mutation::Write
                    }
                    Err(_) => Mutation::Refused,
                }
            })
            .await?;

        if cancelled {
            self.active.remove(request_id);
        }
        log_request_operation(
            "cancel",
            Some(request_id),
            Some(StrategyKind::Table.as_str()),
            if cancelled { "cancelled" } else { "refused" },
            None,
        );
        Ok(cancelled)
    }

    async fn list_requests(&self, filter: &RequestFilter) -> StrategyResult<Vec<RequestSummary>> {
        let mut filters = Vec::new();
        if let Some(status) = filter.status {
            filters.push(ScanFilter::eq(STATUS_FIELD, status.as_str()));
        }
        if let Some(user_id) = &filter.user_id {
            filters.push(ScanFilter::eq("user_id", user_id.as_str()));
        }
        if let Some(project_id) = &filter.project_id {
            filters.push(ScanFilter::eq("project_id", project_id.as_str()));
        }

        let mut requests = self.scan_requests(&filters, None).await?;
        requests.retain(|r| filter.matches(r));
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(requests
            .iter()
            .skip(filter.offset)
            .take(filter.effective_limit())
            .map(RequestSummary::from)
            .collect())
    }

    async fn update_status(
        &self,
        request_id: &str,
        status: RequestStatus,
        message: Option<&str>,
    ) -> StrategyResult<bool> {
        let tracker = &self.tracker;
        self.apply_change(request_id, "update_status", |request| {
            Self::transition(tracker, request, status, message)
        })
        .await
    }

    async fn update_progress(
        &self,
        request_id: &str,
        stage: &str,
        percentage: Option<f64>,
        counters: ProgressCounters,
    ) -> StrategyResult<bool> {
        let tracker = &self.tracker;
        self.apply_change(request_id, "update_progress", |request| {
            if request.status.is_terminal() {
                return Mutation::Refused;
            }
            tracker.update_progress(request, stage, percentage, counters);
            Mutation::Write
        })
        .await
    }

    #[instrument(skip(self, result))]
    async fn save_results(&self, request_id: &str, result: Value) -> StrategyResult<bool> {
        let (data, result_path) = self.offload_payload(request_id, result).await?;

        self.apply_change(request_id, "save_results", |request| {
            if request.status.is_terminal() {
                return Mutation::Refused;
            }
            let now = Utc::now();
            let mut results = Results::from_payload(data.clone(), &request.progress, now);
            results.result_path = result_path.clone();
            request.results = Some(results);
            request.updated_at = now;
            Mutation::Write
        })
        .await
    }

    #[instrument(skip(self))]
    async fn retry_request(&self, request_id: &str) -> StrategyResult<bool> {
        let tracker = &self.tracker;
        let retried = self
            .apply_change(request_id, "retry_request", |request| {
                match tracker.reset_for_retry(request) {
                    Ok(()) => Mutation::Write,
                    Err(e) => {
                        warn!(request_id = %request.request_id, error = %e, "Retry refused");
                        Mutation::Refused
                    }
                }
            })
            .await?;

        if retried {
            log_request_operation(
                "retry",
                Some(request_id),
                Some(StrategyKind::Table.as_str()),
                "pending",
                None,
            );
        }
        Ok(retried)
    }

    async fn get_processing_statistics(&self, hours: u64) -> StrategyResult<ProcessingStatistics> {
        let now = Utc::now();
        let since = now - ChronoDuration::hours(hours as i64);
        let requests = self.scan_requests(&[], None).await?;
        let status = self
            .tracker
            .get_status_statistics(requests.iter().filter(|r| r.created_at >= since));

        Ok(ProcessingStatistics {
            strategy: StrategyKind::Table,
            window_hours: hours,
            generated_at: now,
            status,
            active_requests: self.active.len(),
            max_concurrent_requests: self.config.max_concurrent_requests,
            polling_interval_ms: self.config.polling_interval_ms,
        })
    }

    async fn cleanup_old_requests(
        &self,
        completed_age_hours: u64,
        failed_age_hours: u64,
    ) -> StrategyResult<usize> {
        let now = Utc::now();
        let requests = self.scan_requests(&[], None).await?;
        let mut deleted = 0;

        for request in requests {
            if !request.status.is_terminal() || self.active.contains_key(&request.request_id) {
                continue;
            }
            let threshold_hours = match request.status {
                RequestStatus::Completed => completed_age_hours,
                _ => failed_age_hours,
            };
            let finished_at = request.completed_at.unwrap_or(request.updated_at);
            if now - finished_at <= ChronoDuration::hours(threshold_hours as i64) {
                continue;
            }
            // A retry between the scan and here moves the row out of its terminal status
            if self
                .delete_if_status(&request.request_id, request.status)
                .await?
            {
                debug!(
                    request_id = %request.request_id,
                    status = %request.status,
                    "Deleted expired request"
                );
                deleted += 1;
            }
        }

        if deleted > 0 {
            info!(
                deleted = deleted,
                completed_age_hours = completed_age_hours,
                failed_age_hours = failed_age_hours,
                "Cleaned up old requests"
            );
        }
        Ok(deleted)
    }

    async fn cancel_stale_requests(&self, max_age_hours: u64) -> StrategyResult<usize> {
        let now = Utc::now();
        let message = format!("Cancelled: stale for more than {max_age_hours} hours");
        let requests = self.scan_requests(&[], None).await?;
        let mut cancelled = 0;

        for request in requests {
            if self.active.contains_key(&request.request_id)
                || !self.tracker.is_stale_at(&request, max_age_hours, now)
            {
                continue;
            }

            let tracker = &self.tracker;
            let message = message.as_str();
            let outcome = self
                .apply_change(&request.request_id, "cancel_stale", |request| {
                    if !tracker.is_stale_at(request, max_age_hours, now) {
                        return Mutation::Refused;
                    }
                    Self::transition(tracker, request, RequestStatus::Cancelled, Some(message))
                })
                .await;

            match outcome {
                Ok(true) => cancelled += 1,
                Ok(false) => {}
                // Deleted between the scan and the write
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }

        if cancelled > 0 {
            warn!(cancelled = cancelled, max_age_hours = max_age_hours, "Cancelled stale requests");
        }
        Ok(cancelled)
    }

    async fn get_pending_requests(
        &self,
        limit: usize,
    ) -> StrategyResult<Vec<IntelligenceRequest>> {
        let filters = [ScanFilter::eq(STATUS_FIELD, RequestStatus::Pending.as_str())];
        // Every pending row is scored; a key-ordered cap would starve late ids
        let mut pending = self.scan_requests(&filters, None).await?;
        pending.retain(|r| !self.active.contains_key(&r.request_id));

        let now = Utc::now();
        pending.sort_by(|a, b| {
            priority_score(b, now)
                .partial_cmp(&priority_score(a, now))
                .unwrap_or(CmpOrdering::Equal)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        pending.truncate(limit);
        Ok(pending)
    }

    fn can_process_more(&self) -> bool {
        self.active.len() < self.config.max_concurrent_requests
    }

    fn max_concurrent_requests(&self) -> usize {
        self.config.max_concurrent_requests
    }

    fn add_active(&self, request: &IntelligenceRequest) {
        self.active
            .insert(request.request_id.clone(), request.clone());
    }

    fn remove_active(&self, request_id: &str) {
        self.active.remove(request_id);
    }

    fn active_count(&self) -> usize {
        self.active.len()
    }

    fn active_request_ids(&self) -> Vec<String> {
        self.active.iter().map(|entry| entry.key().clone()).collect()
    }

    fn polling_interval(&self) -> Duration {
        self.config.polling_interval()
    }

    fn add_status_listener(&self, listener: Arc<dyn StatusListener>) {
        self.tracker.add_listener(listener);
    }

    async fn health_check(&self) -> ComponentHealth {
        let started = Instant::now();
        let name = format!("table:{}", self.table());
        match self.store.ping().await {
            Ok(()) => {
                ComponentHealth::healthy(name).with_latency(started.elapsed().as_millis() as u64)
            }
            Err(e) => {
                warn!(table = %self.table(), error = %e, "Store health probe failed");
                ComponentHealth::unhealthy(name, e.to_string())
            }
        }
    }

    fn configuration(&self) -> Value {
        json!({
            "strategy": StrategyKind::Table.as_str(),
            "table_name": self.config.table_name,
            "max_concurrent_requests": self.config.max_concurrent_requests,
            "polling_interval_ms": self.config.polling_interval_ms,
            "store_retry": self.config.store_retry,
            "results": self.results_config,
            "blob_store_configured": self.blob_store.is_some(),
            "initialized": self.is_initialized(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Priority, RequestConfig, SourceConfig};
    use crate::store::{InMemoryBlobStore, InMemoryStore};

    fn request() -> IntelligenceRequest {
        IntelligenceRequest::new(
            "p1",
            "u1",
            RequestConfig::new(["a"], [SourceConfig::named("X")]),
        )
    }

    fn setup() -> (Arc<InMemoryStore>, TableStrategy) {
        let store = Arc::new(InMemoryStore::new());
        let strategy = TableStrategy::new(store.clone(), TableStrategyConfig::default());
        (store, strategy)
    }

    async fn seed(store: &InMemoryStore, request: &IntelligenceRequest) {
        store
            .put("intelligence_requests", request_to_record(request).unwrap())
            .await
            .unwrap();
    }

    #[test]
    fn test_priority_score() {
        let now = Utc::now();
        let a = request()
            .with_priority(Priority::High)
            .with_created_at(now - ChronoDuration::hours(1));
        let b = request()
            .with_priority(Priority::Medium)
            .with_created_at(now - ChronoDuration::hours(20));
        let c = request()
            .with_priority(Priority::Low)
            .with_created_at(now - ChronoDuration::hours(1));

        assert!((priority_score(&a, now) - 31.0).abs() < 1e-6);
        assert!((priority_score(&b, now) - 30.0).abs() < 1e-6);
        assert!((priority_score(&c, now) - 11.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_submit_forces_pending() {
        let (_, strategy) = setup();
        let mut req = request();
        req.status = RequestStatus::Completed;
        let id = req.request_id.clone();

        assert!(strategy.submit(req).await.unwrap());
        let stored = strategy.get_request_status(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
        assert_eq!(stored.processing_strategy, StrategyKind::Table);
    }

    #[tokio::test]
    async fn test_submit_rejects_duplicates() {
        let (_, strategy) = setup();
        let req = request();
        strategy.submit(req.clone()).await.unwrap();
        assert!(matches!(
            strategy.submit(req).await,
            Err(StrategyError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_submission_is_not_persisted() {
        let (store, strategy) = setup();
        let mut req = request();
        req.config.keywords.clear();
        let id = req.request_id.clone();

        match strategy.submit(req).await {
            Err(StrategyError::Validation { errors }) => {
                assert_eq!(errors, vec!["Keywords are required in configuration"]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(strategy.get_request_status(&id).await.unwrap().is_none());
        assert!(store.is_empty("intelligence_requests"));
    }

    #[tokio::test]
    async fn test_unknown_request_is_not_found() {
        let (_, strategy) = setup();
        assert!(strategy.get_request_status("missing").await.unwrap().is_none());
        let err = strategy
            .update_status("missing", RequestStatus::Processing, None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(strategy.cancel("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_status_follows_transition_table() {
        let (_, strategy) = setup();
        let req = request();
        let id = req.request_id.clone();
        strategy.submit(req).await.unwrap();

        assert!(!strategy
            .update_status(&id, RequestStatus::Completed, None)
            .await
            .unwrap());
        assert!(strategy
            .update_status(&id, RequestStatus::Processing, Some("claimed"))
            .await
            .unwrap());
        assert!(strategy
            .update_status(&id, RequestStatus::Failed, Some("boom"))
            .await
            .unwrap());

        let stored = strategy.get_request_status(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Failed);
        assert_eq!(stored.errors.len(), 1);
        assert_eq!(stored.errors[0].message, "boom");
        assert!(stored.started_at.is_some());
        assert!(stored.completed_at.is_some());
        assert_eq!(stored.status_history.len(), 2);
    }

    #[tokio::test]
    async fn test_cancel_records_warning_and_is_not_repeatable() {
        let (_, strategy) = setup();
        let req = request();
        let id = req.request_id.clone();
        strategy.submit(req).await.unwrap();

        assert!(strategy.cancel(&id).await.unwrap());
        assert!(!strategy.cancel(&id).await.unwrap());

        let stored = strategy.get_request_status(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Cancelled);
        assert!(stored.errors.is_empty());
        assert_eq!(stored.warnings[0].message, "Request cancelled by user");
        assert_eq!(
            stored.status_history.last().unwrap().message.as_deref(),
            Some("Cancelled by user")
        );
    }

    #[tokio::test]
    async fn test_cancel_evicts_active_request() {
        let (_, strategy) = setup();
        let req = request();
        let id = req.request_id.clone();
        strategy.submit(req.clone()).await.unwrap();
        strategy.add_active(&req);
        assert!(!strategy.can_process_more());

        assert!(strategy.cancel(&id).await.unwrap());
        assert_eq!(strategy.active_count(), 0);
        assert!(strategy.can_process_more());
    }

    #[tokio::test]
    async fn test_active_cache_tracks_writes() {
        let (_, strategy) = setup();
        let req = request();
        let id = req.request_id.clone();
        strategy.submit(req.clone()).await.unwrap();
        strategy.add_active(&req);

        strategy
            .update_status(&id, RequestStatus::Processing, None)
            .await
            .unwrap();
        strategy
            .update_progress(&id, "url_discovery", None, ProgressCounters::default())
            .await
            .unwrap();

        let cached = strategy.get_request_status(&id).await.unwrap().unwrap();
        assert_eq!(cached.status, RequestStatus::Processing);
        assert_eq!(cached.progress.current_stage, "url_discovery");
        assert_eq!(cached.progress.percentage, 10.0);
    }

    #[tokio::test]
    async fn test_pending_requests_in_priority_order() {
        let (store, strategy) = setup();
        let now = Utc::now();
        let a = request()
            .with_request_id("A")
            .with_priority(Priority::High)
            .with_created_at(now - ChronoDuration::hours(1));
        let b = request()
            .with_request_id("B")
            .with_priority(Priority::Medium)
            .with_created_at(now - ChronoDuration::hours(20));
        let c = request()
            .with_request_id("C")
            .with_priority(Priority::Low)
            .with_created_at(now - ChronoDuration::hours(1));
        for r in [&c, &b, &a] {
            seed(&store, r).await;
        }

        let ids: Vec<_> = strategy
            .get_pending_requests(10)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.request_id)
            .collect();
        assert_eq!(ids, vec!["A", "B", "C"]);

        strategy.add_active(&a);
        let next = strategy.get_pending_requests(1).await.unwrap();
        assert_eq!(next[0].request_id, "B");
    }

    #[tokio::test]
    async fn test_cleanup_respects_retention_boundaries() {
        let (store, strategy) = setup();
        let now = Utc::now();

        let mut old = request().with_request_id("old");
        old.status = RequestStatus::Completed;
        old.completed_at = Some(now - ChronoDuration::hours(25));
        let mut recent = request().with_request_id("recent");
        recent.status = RequestStatus::Completed;
        recent.completed_at = Some(now - ChronoDuration::hours(23));
        let mut failed = request().with_request_id("failed");
        failed.status = RequestStatus::Failed;
        failed.completed_at = Some(now - ChronoDuration::hours(25));
        let pending = request()
            .with_request_id("pending")
            .with_created_at(now - ChronoDuration::hours(100));
        for r in [&old, &recent, &failed, &pending] {
            seed(&store, r).await;
        }

        assert_eq!(strategy.cleanup_old_requests(24, 72).await.unwrap(), 1);
        assert!(strategy.get_request_status("old").await.unwrap().is_none());
        assert!(strategy.get_request_status("recent").await.unwrap().is_some());
        assert!(strategy.get_request_status("failed").await.unwrap().is_some());
        assert!(strategy.get_request_status("pending").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cancel_stale_requests_skips_held_and_fresh() {
        let (store, strategy) = setup();
        let now = Utc::now();
        let stale = request()
            .with_request_id("stale")
            .with_created_at(now - ChronoDuration::hours(25));
        let held = request()
            .with_request_id("held")
            .with_created_at(now - ChronoDuration::hours(25));
        let fresh = request().with_request_id("fresh");
        for r in [&stale, &held, &fresh] {
            seed(&store, r).await;
        }
        strategy.add_active(&held);

        assert_eq!(strategy.cancel_stale_requests(24).await.unwrap(), 1);
        let cancelled = strategy.get_request_status("stale").await.unwrap().unwrap();
        assert_eq!(cancelled.status, RequestStatus::Cancelled);
        assert_eq!(
            cancelled.status_message.as_deref(),
            Some("Cancelled: stale for more than 24 hours")
        );
        let fresh = strategy.get_request_status("fresh").await.unwrap().unwrap();
        assert_eq!(fresh.status, RequestStatus::Pending);
    }

    #[tokio::test]
    async fn test_results_only_visible_once_completed() {
        let (_, strategy) = setup();
        let req = request();
        let id = req.request_id.clone();
        strategy.submit(req).await.unwrap();
        strategy
            .update_status(&id, RequestStatus::Processing, None)
            .await
            .unwrap();
        assert!(strategy
            .save_results(&id, json!({"summary": "ok", "urls": [1, 2]}))
            .await
            .unwrap());
        assert!(strategy.get_results(&id).await.unwrap().is_none());

        strategy
            .update_status(&id, RequestStatus::Executing, None)
            .await
            .unwrap();
        strategy
            .update_status(&id, RequestStatus::Completed, None)
            .await
            .unwrap();
        let results = strategy.get_results(&id).await.unwrap().unwrap();
        assert_eq!(results.data["summary"], json!("ok"));
        assert_eq!(results.counts.get("urls"), Some(&2));
        assert!(!strategy.save_results(&id, json!({})).await.unwrap());
    }

    #[tokio::test]
    async fn test_large_results_are_offloaded() {
        let store = Arc::new(InMemoryStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let strategy = TableStrategy::new(store.clone(), TableStrategyConfig::default())
            .with_blob_store(blobs.clone())
            .with_results_config(ResultsConfig {
                offload_threshold_bytes: 16,
                ..ResultsConfig::default()
            });
        let req = request();
        let id = req.request_id.clone();
        strategy.submit(req).await.unwrap();
        for status in [RequestStatus::Processing, RequestStatus::Executing] {
            strategy.update_status(&id, status, None).await.unwrap();
        }

        let payload = json!({"summary": "a report longer than sixteen bytes"});
        strategy.save_results(&id, payload.clone()).await.unwrap();
        strategy
            .update_status(&id, RequestStatus::Completed, None)
            .await
            .unwrap();

        let key = format!("results/{id}.json");
        assert!(blobs.contains(&key));
        let raw = store.get("intelligence_requests", &id).await.unwrap().unwrap();
        assert!(raw["results"]["data"].is_null());
        assert_eq!(raw["results"]["result_path"], json!(key));

        let results = strategy.get_results(&id).await.unwrap().unwrap();
        assert_eq!(results.data, payload);
    }

    #[tokio::test]
    async fn test_retry_request_returns_failed_to_pending() {
        let (_, strategy) = setup();
        let req = request();
        let id = req.request_id.clone();
        strategy.submit(req).await.unwrap();

        assert!(!strategy.retry_request(&id).await.unwrap());
        strategy
            .update_status(&id, RequestStatus::Processing, None)
            .await
            .unwrap();
        strategy
            .update_status(&id, RequestStatus::Failed, Some("timeout"))
            .await
            .unwrap();

        assert!(strategy.retry_request(&id).await.unwrap());
        let retried = strategy.get_request_status(&id).await.unwrap().unwrap();
        assert_eq!(retried.status, RequestStatus::Pending);
        assert_eq!(retried.retry_attempts, 1);
        assert!(retried.errors.is_empty());
        assert_eq!(retried.progress.percentage, 0.0);
    }

    #[tokio::test]
    async fn test_list_requests_filters_and_paginates() {
        let (store, strategy) = setup();
        let now = Utc::now();
        for i in 0..5 {
            let mut r = request()
                .with_request_id(format!("r{i}"))
                .with_created_at(now - ChronoDuration::minutes(i));
            if i == 4 {
                r.user_id = "someone-else".to_string();
            }
            seed(&store, &r).await;
        }

        let filter = RequestFilter::default().with_user("u1").with_limit(2);
        let page: Vec<_> = strategy
            .list_requests(&filter)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.request_id)
            .collect();
        assert_eq!(page, vec!["r0", "r1"]);

        let next: Vec<_> = strategy
            .list_requests(&filter.with_offset(2))
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.request_id)
            .collect();
        assert_eq!(next, vec!["r2", "r3"]);
    }

    #[tokio::test]
    async fn test_statistics_are_windowed() {
        let (store, strategy) = setup();
        let now = Utc::now();
        let recent = request();
        let old = request().with_created_at(now - ChronoDuration::hours(48));
        seed(&store, &recent).await;
        seed(&store, &old).await;

        let stats = strategy.get_processing_statistics(24).await.unwrap();
        assert_eq!(stats.status.total_requests, 1);
        assert_eq!(stats.status.count(RequestStatus::Pending), 1);
        assert_eq!(stats.max_concurrent_requests, 1);
        assert_eq!(stats.strategy, StrategyKind::Table);
    }

    #[tokio::test]
    async fn test_initialize_and_health() {
        let (_, strategy) = setup();
        strategy.initialize().await.unwrap();
        strategy.initialize().await.unwrap();
        assert!(strategy.is_initialized());

        let health = strategy.health_check().await;
        assert!(health.status.is_operational());
        assert_eq!(strategy.configuration()["table_name"], json!("intelligence_requests"));

        strategy.shutdown().await.unwrap();
        assert!(!strategy.is_initialized());
    }
}
