//! # Orchestrator Service
//!
//! Composition root for request processing. Owns the registered strategies,
//! the "current" strategy selection and the background worker that runs
//! against it, and aggregates health, statistics and configuration.
//!
//! Lookups by request id try the current strategy first and then every other
//! registered strategy, so requests submitted before a `switch_strategy`
//! stay reachable.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, instrument, warn};

use super::health::{ComponentHealth, HealthReport, HealthStatus};
use super::job::JobExecutor;
use super::shutdown::shutdown_signal;
use super::table_processor::{TableProcessor, WorkerStatistics};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::models::{IntelligenceRequest, RequestFilter, RequestSummary, Results, StrategyKind};
use crate::state_machine::StatusListener;
use crate::store::{BlobStore, KeyValueStore};
use crate::strategy::{ProcessingStatistics, ProcessingStrategy, StrategyError, TableStrategy};

/// Statistics returned by [`OrchestratorService::get_processing_statistics`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStatistics {
    pub current_strategy: StrategyKind,
    pub available_strategies: Vec<StrategyKind>,
    pub uptime_seconds: u64,
    pub strategy: ProcessingStatistics,
    pub worker: Option<WorkerStatistics>,
}

pub struct OrchestratorService {
    config: OrchestratorConfig,
    strategies: HashMap<StrategyKind, Arc<dyn ProcessingStrategy>>,
    current: parking_lot::RwLock<StrategyKind>,
    executor: Arc<dyn JobExecutor>,
    worker: AsyncMutex<Option<Arc<TableProcessor>>>,
    initialized: AtomicBool,
    started_at: Instant,
}

impl std::fmt::Debug for OrchestratorService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorService")
            .field("current", &*self.current.read())
            .field("strategies", &self.available_strategies())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl OrchestratorService {
    /// Create a service with no strategies registered
    pub fn new(config: OrchestratorConfig, executor: Arc<dyn JobExecutor>) -> Self {
        let current = config.default_strategy;
        Self {
            config,
            strategies: HashMap::new(),
            current: parking_lot::RwLock::new(current),
            executor,
            worker: AsyncMutex::new(None),
            initialized: AtomicBool::new(false),
            started_at: Instant::now(),
        }
    }

    /// Create a service with a table strategy over `store`
    pub fn with_table_store(
        config: OrchestratorConfig,
        store: Arc<dyn KeyValueStore>,
        blob_store: Option<Arc<dyn BlobStore>>,
        executor: Arc<dyn JobExecutor>,
    ) -> Self {
        let mut table = TableStrategy::new(store, config.table.clone())
            .with_results_config(config.results.clone());
        if let Some(blob_store) = blob_store {
            table = table.with_blob_store(blob_store);
        }
        Self::new(config, executor).with_strategy(Arc::new(table))
    }

    /// Register a strategy under its kind, replacing any previous one
    pub fn with_strategy(mut self, strategy: Arc<dyn ProcessingStrategy>) -> Self {
        self.strategies.insert(strategy.kind(), strategy);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn current_strategy(&self) -> StrategyKind {
        *self.current.read()
    }

    pub fn available_strategies(&self) -> Vec<StrategyKind> {
        let mut kinds: Vec<_> = self.strategies.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn strategy(&self, kind: StrategyKind) -> Option<Arc<dyn ProcessingStrategy>> {
        self.strategies.get(&kind).cloned()
    }

    /// The running worker, if any
    pub async fn worker(&self) -> Option<Arc<TableProcessor>> {
        self.worker.lock().await.clone()
    }

    /// Initialize every registered strategy and start the worker on the default one
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        let mut worker_slot = self.worker.lock().await;
        if self.is_initialized() {
            warn!("Orchestrator already initialized; ignoring repeated initialize()");
            return Ok(());
        }

        self.config.validate()?;

        let default = self.config.default_strategy;
        if !self.strategies.contains_key(&default) {
            return Err(OrchestratorError::Strategy {
                strategy: default,
                reason: "default strategy is not registered".to_string(),
            });
        }

        for kind in self.available_strategies() {
            if let Some(strategy) = self.strategies.get(&kind) {
                strategy
                    .initialize()
                    .await
                    .map_err(|e| OrchestratorError::from_strategy(e, kind, "initialize", None))?;
            }
        }

        *self.current.write() = default;
        if self.config.worker.enabled {
            *worker_slot = Some(self.start_worker(default)?);
        }

        self.initialized.store(true, Ordering::Release);
        info!(
            current_strategy = %default,
            strategies = ?self.available_strategies(),
            worker_enabled = self.config.worker.enabled,
            "Orchestrator initialized"
        );
        Ok(())
    }

    fn start_worker(&self, kind: StrategyKind) -> Result<Arc<TableProcessor>> {
        let strategy = self.resolve(kind)?;
        let worker = Arc::new(TableProcessor::new(
            strategy,
            Arc::clone(&self.executor),
            self.config.worker.clone(),
        ));
        worker.start().map_err(|e| OrchestratorError::Strategy {
            strategy: kind,
            reason: e.to_string(),
        })?;
        Ok(worker)
    }

    fn resolve(&self, kind: StrategyKind) -> Result<Arc<dyn ProcessingStrategy>> {
        self.strategy(kind).ok_or_else(|| OrchestratorError::Strategy {
            strategy: kind,
            reason: "strategy is not registered".to_string(),
        })
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(OrchestratorError::NotInitialized)
        }
    }

    /// Current strategy first, then the rest in a stable order
    fn lookup_order(&self) -> Vec<(StrategyKind, Arc<dyn ProcessingStrategy>)> {
        let current = self.current_strategy();
        let mut ordered = Vec::with_capacity(self.strategies.len());
        if let Some(strategy) = self.strategies.get(&current) {
            ordered.push((current, Arc::clone(strategy)));
        }
        for kind in self.available_strategies() {
            if kind != current {
                if let Some(strategy) = self.strategies.get(&kind) {
                    ordered.push((kind, Arc::clone(strategy)));
                }
            }
        }
        ordered
    }

    /// Route a new request to its declared strategy, or to the current one
    #[instrument(skip(self, request), fields(request_id = %request.request_id))]
    pub async fn submit(&self, request: IntelligenceRequest) -> Result<bool> {
        self.ensure_initialized()?;

        let declared = request.processing_strategy;
        let kind = if self.strategies.contains_key(&declared) {
            declared
        } else {
            let current = self.current_strategy();
            warn!(
                declared = %declared,
                fallback = %current,
                "Declared strategy not registered, falling back to current"
            );
            current
        };

        let request_id = request.request_id.clone();
        let strategy = self.resolve(kind)?;
        strategy
            .submit(request)
            .await
            .map_err(|e| OrchestratorError::from_strategy(e, kind, "submit", Some(&request_id)))
    }

    /// `None` when no registered strategy knows the request
    pub async fn get_status(&self, request_id: &str) -> Result<Option<IntelligenceRequest>> {
        self.ensure_initialized()?;

        let mut first_error = None;
        for (kind, strategy) in self.lookup_order() {
            match strategy.get_request_status(request_id).await {
                Ok(Some(request)) => return Ok(Some(request)),
                Ok(None) => {}
                Err(e) => {
                    error!(strategy = %kind, request_id = %request_id, error = %e, "Status lookup failed");
                    first_error.get_or_insert_with(|| {
                        OrchestratorError::from_strategy(e, kind, "get_status", Some(request_id))
                    });
                }
            }
        }
        first_error.map_or(Ok(None), Err)
    }

    /// Results of a COMPLETED request
    pub async fn get_results(&self, request_id: &str) -> Result<Option<Results>> {
        self.ensure_initialized()?;

        let mut first_error = None;
        for (kind, strategy) in self.lookup_order() {
            match strategy.get_results(request_id).await {
                Ok(Some(results)) => return Ok(Some(results)),
                Ok(None) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    error!(strategy = %kind, request_id = %request_id, error = %e, "Results lookup failed");
                    first_error.get_or_insert_with(|| {
                        OrchestratorError::from_strategy(e, kind, "get_results", Some(request_id))
                    });
                }
            }
        }
        first_error.map_or(Ok(None), Err)
    }

    /// `false` when the request is already terminal; `NotFound` when no strategy knows it
    pub async fn cancel(&self, request_id: &str) -> Result<bool> {
        self.ensure_initialized()?;
        self.first_owner(request_id, "cancel", |strategy, id| {
            async move { strategy.cancel(&id).await }.boxed()
        })
        .await
    }

    /// Return a FAILED request to PENDING for another attempt
    pub async fn retry(&self, request_id: &str) -> Result<bool> {
        self.ensure_initialized()?;
        self.first_owner(request_id, "retry", |strategy, id| {
            async move { strategy.retry_request(&id).await }.boxed()
        })
        .await
    }

    /// Run `operation` on the first strategy that does not report the id as unknown
    async fn first_owner<F>(&self, request_id: &str, operation: &str, op: F) -> Result<bool>
    where
        F: Fn(
            Arc<dyn ProcessingStrategy>,
            String,
        ) -> BoxFuture<'static, std::result::Result<bool, StrategyError>>,
    {
        for (kind, strategy) in self.lookup_order() {
            match op(strategy, request_id.to_string()).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_not_found() => {
                    debug!(strategy = %kind, request_id = %request_id, "Request not owned by strategy");
                }
                Err(e) => {
                    return Err(OrchestratorError::from_strategy(
                        e,
                        kind,
                        operation,
                        Some(request_id),
                    ))
                }
            }
        }
        Err(OrchestratorError::NotFound {
            request_id: request_id.to_string(),
        })
    }

    /// Summaries across every registered strategy, newest first
    pub async fn list_requests(&self, filter: &RequestFilter) -> Result<Vec<RequestSummary>> {
        self.ensure_initialized()?;

        let window = filter
            .clone()
            .with_offset(0)
            .with_limit(filter.offset.saturating_add(filter.effective_limit()));
        let mut summaries = Vec::new();
        for (kind, strategy) in self.lookup_order() {
            let mut found = strategy.list_requests(&window).await.map_err(|e| {
                OrchestratorError::from_strategy(e, kind, "list_requests", None)
            })?;
            summaries.append(&mut found);
        }

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries
            .into_iter()
            .skip(filter.offset)
            .take(filter.effective_limit())
            .collect())
    }

    pub async fn get_processing_statistics(&self, hours: u64) -> Result<OrchestratorStatistics> {
        self.ensure_initialized()?;

        let kind = self.current_strategy();
        let strategy = self.resolve(kind)?;
        let stats = strategy
            .get_processing_statistics(hours)
            .await
            .map_err(|e| OrchestratorError::from_strategy(e, kind, "get_statistics", None))?;
        let worker = self.worker().await.map(|w| w.statistics());

        Ok(OrchestratorStatistics {
            current_strategy: kind,
            available_strategies: self.available_strategies(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            strategy: stats,
            worker,
        })
    }

    /// Never fails: unreachable components show up as degraded or unhealthy
    pub async fn get_health(&self) -> HealthReport {
        let kind = self.current_strategy();
        let worker = self.worker().await;

        let (components, active_requests) = if !self.is_initialized() {
            (
                vec![ComponentHealth::unhealthy(
                    "orchestrator",
                    "orchestrator is not initialized",
                )],
                0,
            )
        } else {
            let mut components = Vec::new();
            let mut active = 0;
            if let Some(strategy) = self.strategy(kind) {
                components.push(strategy.health_check().await);
                active = strategy.active_count();
            }
            if let Some(worker) = &worker {
                components.push(worker.health());
            }
            (components, active)
        };

        let status = if self.is_initialized() {
            HealthReport::overall_status(&components)
        } else {
            HealthStatus::Unhealthy
        };

        HealthReport {
            status,
            components,
            uptime_seconds: self.started_at.elapsed().as_secs(),
            active_requests,
            current_strategy: kind.to_string(),
            worker_running: worker.map_or(false, |w| w.is_running()),
            checked_at: chrono::Utc::now(),
        }
    }

    pub async fn get_configuration(&self) -> Value {
        let kind = self.current_strategy();
        let strategy_config = self
            .strategy(kind)
            .map(|s| s.configuration())
            .unwrap_or(Value::Null);
        let worker_running = self
            .worker()
            .await
            .map_or(false, |w| w.is_running());

        json!({
            "environment": self.config.environment,
            "current_strategy": kind,
            "available_strategies": self.available_strategies(),
            "initialized": self.is_initialized(),
            "worker": self.config.worker,
            "worker_running": worker_running,
            "strategy": strategy_config,
        })
    }

    /// Stop the worker, swap the current strategy and restart the worker against it
    #[instrument(skip(self))]
    pub async fn switch_strategy(&self, kind: StrategyKind) -> Result<()> {
        self.ensure_initialized()?;
        let target = self.resolve(kind)?;

        let mut worker_slot = self.worker.lock().await;
        let previous = self.current_strategy();
        if previous == kind {
            debug!(strategy = %kind, "Strategy already current");
            return Ok(());
        }

        target
            .initialize()
            .await
            .map_err(|e| OrchestratorError::from_strategy(e, kind, "initialize", None))?;

        if let Some(worker) = worker_slot.take() {
            worker.stop(self.config.worker.shutdown_grace_period()).await;
        }
        *self.current.write() = kind;
        if self.config.worker.enabled {
            *worker_slot = Some(self.start_worker(kind)?);
        }

        info!(from = %previous, to = %kind, "Switched processing strategy");
        Ok(())
    }

    /// Register a listener on every strategy's status tracker
    pub fn add_status_listener(&self, listener: Arc<dyn StatusListener>) {
        for strategy in self.strategies.values() {
            strategy.add_status_listener(Arc::clone(&listener));
        }
    }

    /// Stop the worker (bounded by the grace period) and shut down every strategy.
    /// Safe to call when not initialized.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        let mut worker_slot = self.worker.lock().await;
        if !self.is_initialized() {
            debug!("Shutdown requested before initialization; nothing to do");
            return Ok(());
        }

        if let Some(worker) = worker_slot.take() {
            let interrupted = worker
                .stop(self.config.worker.shutdown_grace_period())
                .await;
            if interrupted > 0 {
                warn!(interrupted = interrupted, "Requests interrupted by shutdown");
            }
        }

        for (kind, strategy) in self.lookup_order() {
            if let Err(e) = strategy.shutdown().await {
                error!(strategy = %kind, error = %e, "Strategy shutdown failed");
            }
        }

        self.initialized.store(false, Ordering::Release);
        info!(
            uptime_seconds = self.started_at.elapsed().as_secs(),
            "Orchestrator shut down"
        );
        Ok(())
    }

    /// Block until SIGINT/SIGTERM, then shut down gracefully
    pub async fn run_until_signal(&self) -> Result<()> {
        shutdown_signal().await;
        self.shutdown().await
    }
}
