//! # Table Processor
//!
//! Background worker that polls a strategy for pending requests and runs the
//! job callable for each one under a hard deadline.
//!
//! ## Loop
//!
//! Each tick claims at most one request. When the concurrency cap still has
//! room after a dispatch, the next tick runs immediately; otherwise the loop
//! sleeps for the polling interval, waking early when a job finishes or a
//! shutdown is requested. Maintenance (retention cleanup, stale-request
//! cancellation, store health probes) runs between ticks on its own
//! intervals.
//!
//! ## Failure isolation
//!
//! A job that errors, panics or exceeds `max_processing_time` turns into a
//! FAILED transition. Nothing a job does can stop the loop.

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::health::{ComponentHealth, HealthStatus};
use super::job::{JobContext, JobExecutor, JobFailure};
use crate::config::WorkerConfig;
use crate::logging::{log_error, log_worker_operation};
use crate::models::{IntelligenceRequest, ProgressCounters};
use crate::state_machine::RequestStatus;
use crate::strategy::{ProcessingStrategy, StrategyError};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker {0} is already running")]
    AlreadyRunning(String),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),
}

pub type WorkerResult<T> = Result<T, WorkerError>;

/// What one poll tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The concurrency cap is reached
    AtCapacity,
    /// No pending requests
    Idle,
    /// A request was claimed and its job started
    Dispatched(String),
    /// The claim was refused, usually because another writer moved the request first
    Skipped(String),
}

/// Snapshot of worker counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatistics {
    pub worker_id: String,
    pub running: bool,
    pub requests_processed: u64,
    pub requests_completed: u64,
    pub requests_failed: u64,
    pub total_processing_time_ms: u64,
    pub average_processing_time_ms: Option<f64>,
    pub uptime_seconds: u64,
    pub current_request_ids: Vec<String>,
    pub last_health_check: Option<ComponentHealth>,
}

#[derive(Debug, Default)]
struct Counters {
    processed: u64,
    completed: u64,
    failed: u64,
    total_processing_time_ms: u64,
    in_flight: Vec<String>,
}

#[derive(Debug, Default)]
struct MaintenanceClock {
    last_cleanup: Option<Instant>,
    last_health_check: Option<Instant>,
}

fn is_due(last: Option<Instant>, interval: Duration) -> bool {
    last.map_or(true, |at| at.elapsed() >= interval)
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

pub struct TableProcessor {
    worker_id: String,
    strategy: Arc<dyn ProcessingStrategy>,
    executor: Arc<dyn JobExecutor>,
    config: WorkerConfig,
    running: AtomicBool,
    shutdown_notify: Notify,
    /// Woken when a job finishes so a waiting loop can claim the next request
    job_finished: Notify,
    jobs: AsyncMutex<JoinSet<()>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    counters: Mutex<Counters>,
    maintenance: Mutex<MaintenanceClock>,
    last_health: Mutex<Option<ComponentHealth>>,
    started_at: Mutex<Option<Instant>>,
}

impl std::fmt::Debug for TableProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableProcessor")
            .field("worker_id", &self.worker_id)
            .field("strategy", &self.strategy.kind())
            .field("executor", &self.executor.name())
            .field("running", &self.is_running())
            .finish()
    }
}

impl TableProcessor {
    pub fn new(
        strategy: Arc<dyn ProcessingStrategy>,
        executor: Arc<dyn JobExecutor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            strategy,
            executor,
            config,
            running: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            job_finished: Notify::new(),
            jobs: AsyncMutex::new(JoinSet::new()),
            loop_handle: Mutex::new(None),
            counters: Mutex::new(Counters::default()),
            maintenance: Mutex::new(MaintenanceClock::default()),
            last_health: Mutex::new(None),
            started_at: Mutex::new(None),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Spawn the processing loop
    pub fn start(self: &Arc<Self>) -> WorkerResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(WorkerError::AlreadyRunning(self.worker_id.clone()));
        }

        *self.started_at.lock() = Some(Instant::now());
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run().await });
        *self.loop_handle.lock() = Some(handle);

        info!(
            worker_id = %self.worker_id,
            strategy = %self.strategy.kind(),
            executor = self.executor.name(),
            polling_interval_ms = self.strategy.polling_interval().as_millis() as u64,
            "Table processor started"
        );
        Ok(())
    }

    async fn run(self: Arc<Self>) {
        debug!(worker_id = %self.worker_id, "Processing loop running");

        while self.is_running() {
            self.reap_finished().await;

            let wait = match self.tick().await {
                Ok(TickOutcome::Dispatched(_)) if self.has_capacity() => None,
                Ok(_) => Some(self.strategy.polling_interval()),
                Err(e) => {
                    log_error("table_processor", "tick", &e.to_string(), Some(&self.worker_id));
                    Some(self.strategy.polling_interval())
                }
            };

            self.run_maintenance().await;

            if let Some(wait) = wait {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {},
                    _ = self.job_finished.notified() => {
                        debug!(worker_id = %self.worker_id, "Job finished, polling early");
                    }
                    // The loop condition decides; a stale permit only costs one extra poll
                    _ = self.shutdown_notify.notified() => {
                        debug!(worker_id = %self.worker_id, "Shutdown notification received");
                    }
                }
            }
        }

        info!(worker_id = %self.worker_id, "Processing loop ended");
    }

    /// Cancellation evicts a request from the strategy's active set while its
    /// job may still be running, so the worker also counts its own jobs.
    fn has_capacity(&self) -> bool {
        self.strategy.can_process_more()
            && self.counters.lock().in_flight.len() < self.strategy.max_concurrent_requests()
    }

    /// One poll: claim at most one pending request and start its job
    #[instrument(skip(self), fields(worker_id = %self.worker_id))]
    pub async fn tick(self: &Arc<Self>) -> WorkerResult<TickOutcome> {
        if !self.has_capacity() {
            return Ok(TickOutcome::AtCapacity);
        }

        let Some(request) = self.strategy.get_pending_requests(1).await?.into_iter().next() else {
            return Ok(TickOutcome::Idle);
        };
        let request_id = request.request_id.clone();

        self.strategy.add_active(&request);
        let claim_message = format!("Claimed by {}", self.worker_id);
        match self
            .strategy
            .update_status(&request_id, RequestStatus::Processing, Some(&claim_message))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                self.strategy.remove_active(&request_id);
                debug!(request_id = %request_id, "Claim refused, skipping request");
                return Ok(TickOutcome::Skipped(request_id));
            }
            Err(e) => {
                self.strategy.remove_active(&request_id);
                return Err(e.into());
            }
        }

        if let Err(e) = self
            .strategy
            .update_progress(
                &request_id,
                "initialization",
                Some(5.0),
                ProgressCounters::default(),
            )
            .await
        {
            warn!(request_id = %request_id, error = %e, "Failed to record initialization progress");
        }

        let snapshot = match self.strategy.get_request_status(&request_id).await {
            Ok(Some(current)) => current,
            _ => request,
        };

        self.counters.lock().in_flight.push(request_id.clone());
        let this = Arc::clone(self);
        self.jobs.lock().await.spawn(this.run_job(snapshot));

        log_worker_operation("claim", &self.worker_id, Some(&request_id), "processing", None);
        Ok(TickOutcome::Dispatched(request_id))
    }

    /// Execute one job and drive the request to a terminal state
    async fn run_job(self: Arc<Self>, request: IntelligenceRequest) {
        let request_id = request.request_id.clone();
        let started = Instant::now();
        let max_time = self.config.max_processing_time();
        let context = JobContext::new(request, Arc::clone(&self.strategy));

        let outcome = match tokio::time::timeout(
            max_time,
            AssertUnwindSafe(self.executor.execute(context)).catch_unwind(),
        )
        .await
        {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(JobFailure::Failed(format!("{e:#}"))),
            Ok(Err(payload)) => Err(JobFailure::Panicked(panic_message(payload.as_ref()))),
            Err(_) => Err(JobFailure::TimedOut {
                seconds: max_time.as_secs(),
            }),
        };

        let completed = match outcome {
            Ok(value) => self.complete(&request_id, value).await,
            Err(failure) => {
                self.fail(&request_id, &failure).await;
                false
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.strategy.remove_active(&request_id);
        {
            let mut counters = self.counters.lock();
            counters.processed += 1;
            counters.total_processing_time_ms += elapsed_ms;
            if completed {
                counters.completed += 1;
            } else {
                counters.failed += 1;
            }
            counters.in_flight.retain(|id| id != &request_id);
        }

        log_worker_operation(
            "finish",
            &self.worker_id,
            Some(&request_id),
            if completed { "completed" } else { "failed" },
            Some(elapsed_ms),
        );
        self.job_finished.notify_one();
    }

    /// Persist results and walk the request to COMPLETED
    async fn complete(&self, request_id: &str, value: Value) -> bool {
        match self.persist_completion(request_id, value).await {
            Ok(completed) => completed,
            Err(e) => {
                log_error(
                    "table_processor",
                    "complete",
                    &e.to_string(),
                    Some(request_id),
                );
                let failure = JobFailure::Failed(format!("Failed to persist results: {e}"));
                self.fail(request_id, &failure).await;
                false
            }
        }
    }

    async fn persist_completion(&self, request_id: &str, value: Value) -> Result<bool, StrategyError> {
        let status = self
            .strategy
            .get_request_status(request_id)
            .await?
            .map(|r| r.status);
        match status {
            Some(status) if status.is_active() => {}
            other => {
                warn!(
                    request_id = %request_id,
                    status = ?other,
                    "Job finished after the request left its active states; discarding result"
                );
                return Ok(false);
            }
        }

        if !self.strategy.save_results(request_id, value).await? {
            return Ok(false);
        }
        if status == Some(RequestStatus::Processing) {
            self.strategy
                .update_status(
                    request_id,
                    RequestStatus::Executing,
                    Some("Finalizing results"),
                )
                .await?;
        }
        self.strategy
            .update_progress(request_id, "completed", Some(100.0), ProgressCounters::default())
            .await?;
        self.strategy
            .update_status(
                request_id,
                RequestStatus::Completed,
                Some("Processing completed"),
            )
            .await
    }

    async fn fail(&self, request_id: &str, failure: &JobFailure) {
        error!(
            worker_id = %self.worker_id,
            request_id = %request_id,
            kind = failure.kind(),
            error = %failure,
            "Request processing failed"
        );
        match self
            .strategy
            .update_status(request_id, RequestStatus::Failed, Some(&failure.to_string()))
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(request_id = %request_id, "Request already terminal, failure not recorded"),
            Err(e) => log_error("table_processor", "fail", &e.to_string(), Some(request_id)),
        }
    }

    async fn reap_finished(&self) {
        let mut jobs = self.jobs.lock().await;
        while let Some(Some(result)) = jobs.join_next().now_or_never() {
            self.log_join(result);
        }
    }

    fn log_join(&self, result: Result<(), JoinError>) {
        if let Err(e) = result {
            if !e.is_cancelled() {
                error!(worker_id = %self.worker_id, error = %e, "Job task ended abnormally");
            }
        }
    }

    /// Retention cleanup, stale cancellation and store health probes, each on its own interval
    pub async fn run_maintenance(&self) {
        let (cleanup_due, health_due) = {
            let clock = self.maintenance.lock();
            (
                is_due(clock.last_cleanup, self.config.cleanup_interval()),
                is_due(clock.last_health_check, self.config.health_check_interval()),
            )
        };

        if cleanup_due {
            self.maintenance.lock().last_cleanup = Some(Instant::now());
            match self
                .strategy
                .cleanup_old_requests(
                    self.config.completed_retention_hours,
                    self.config.failed_retention_hours,
                )
                .await
            {
                Ok(deleted) => debug!(deleted = deleted, "Retention cleanup finished"),
                Err(e) => log_error("table_processor", "cleanup", &e.to_string(), None),
            }
            match self
                .strategy
                .cancel_stale_requests(self.config.stale_request_hours)
                .await
            {
                Ok(cancelled) => debug!(cancelled = cancelled, "Stale request sweep finished"),
                Err(e) => log_error("table_processor", "cancel_stale", &e.to_string(), None),
            }
        }

        if health_due {
            self.maintenance.lock().last_health_check = Some(Instant::now());
            let health = self.strategy.health_check().await;
            if health.status != HealthStatus::Healthy {
                warn!(
                    worker_id = %self.worker_id,
                    component = %health.name,
                    status = %health.status,
                    message = health.message.as_deref(),
                    "Store health check failed"
                );
            }
            *self.last_health.lock() = Some(health);
        }
    }

    /// Stop polling and wait up to `grace` for in-flight jobs.
    ///
    /// Jobs still running after the grace period are aborted and their
    /// requests marked FAILED. Returns the number of interrupted requests.
    pub async fn stop(&self, grace: Duration) -> usize {
        let was_running = self.running.swap(false, Ordering::AcqRel);
        self.shutdown_notify.notify_one();

        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(worker_id = %self.worker_id, error = %e, "Processing loop ended abnormally");
            }
        }

        let mut jobs = self.jobs.lock().await;
        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = jobs.join_next().await {
                self.log_join(result);
            }
        })
        .await;

        let mut interrupted = 0;
        if drained.is_err() {
            let in_flight = std::mem::take(&mut self.counters.lock().in_flight);
            warn!(
                worker_id = %self.worker_id,
                in_flight = in_flight.len(),
                grace_seconds = grace.as_secs(),
                "Grace period elapsed, aborting in-flight jobs"
            );
            jobs.abort_all();
            while jobs.join_next().await.is_some() {}

            for request_id in in_flight {
                self.fail(&request_id, &JobFailure::Interrupted).await;
                self.strategy.remove_active(&request_id);
                {
                    let mut counters = self.counters.lock();
                    counters.processed += 1;
                    counters.failed += 1;
                }
                interrupted += 1;
            }
        }
        drop(jobs);

        if was_running {
            info!(
                worker_id = %self.worker_id,
                interrupted = interrupted,
                "Table processor stopped"
            );
        }
        interrupted
    }

    pub fn statistics(&self) -> WorkerStatistics {
        let counters = self.counters.lock();
        let uptime_seconds = self
            .started_at
            .lock()
            .map(|at| at.elapsed().as_secs())
            .unwrap_or(0);
        WorkerStatistics {
            worker_id: self.worker_id.clone(),
            running: self.is_running(),
            requests_processed: counters.processed,
            requests_completed: counters.completed,
            requests_failed: counters.failed,
            total_processing_time_ms: counters.total_processing_time_ms,
            average_processing_time_ms: (counters.processed > 0)
                .then(|| counters.total_processing_time_ms as f64 / counters.processed as f64),
            uptime_seconds,
            current_request_ids: counters.in_flight.clone(),
            last_health_check: self.last_health.lock().clone(),
        }
    }

    /// Worker liveness combined with the most recent store probe
    pub fn health(&self) -> ComponentHealth {
        let name = format!("worker:{}", self.worker_id);
        if !self.is_running() {
            return ComponentHealth::unhealthy(name, "worker is not running");
        }
        match self.last_health.lock().as_ref() {
            Some(probe) if probe.status != HealthStatus::Healthy => ComponentHealth::degraded(
                name,
                format!(
                    "last store probe {}: {}",
                    probe.status,
                    probe.message.as_deref().unwrap_or("no detail")
                ),
            ),
            _ => ComponentHealth::healthy(name),
        }
    }
}
