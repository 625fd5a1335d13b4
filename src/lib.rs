#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Request Orchestrator
//!
//! Lifecycle management for long-running intelligence requests: submission,
//! a validated status state machine, pluggable processing strategies, and a
//! concurrency-capped background worker with deadline, retention and
//! graceful-shutdown semantics.
//!
//! ## Overview
//!
//! Callers submit requests through [`orchestration::OrchestratorService`],
//! which persists them as PENDING through the selected strategy. The
//! [`orchestration::TableProcessor`] worker claims pending requests in
//! priority order, runs the job callable under a deadline and drives the
//! request to COMPLETED or FAILED. Callers poll status and results.
//!
//! ## Module Organization
//!
//! - [`models`] - Request, progress, results and listing projections
//! - [`state_machine`] - Transition table, status tracker, progress and statistics
//! - [`strategy`] - Processing strategy contract and the table-backed implementation
//! - [`store`] - Key-value and blob store contracts with in-memory, file and Postgres backends
//! - [`orchestration`] - Job contract, background worker, health and the service facade
//! - [`config`] - Typed configuration and layered loading
//! - [`error`] - Facade error type
//! - [`logging`] - Structured logging initialization
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use request_orchestrator::config::OrchestratorConfig;
//! use request_orchestrator::models::{IntelligenceRequest, RequestConfig, SourceConfig};
//! use request_orchestrator::orchestration::{FnJobExecutor, JobContext, OrchestratorService};
//! use request_orchestrator::store::InMemoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = Arc::new(FnJobExecutor::new("report", |ctx: JobContext| async move {
//!     ctx.progress.report("url_discovery", None, Default::default()).await;
//!     Ok::<_, anyhow::Error>(serde_json::json!({ "summary": "ok" }))
//! }));
//! let service = OrchestratorService::with_table_store(
//!     OrchestratorConfig::default(),
//!     Arc::new(InMemoryStore::new()),
//!     None,
//!     executor,
//! );
//! service.initialize().await?;
//!
//! let request = IntelligenceRequest::new(
//!     "project-1",
//!     "user-1",
//!     RequestConfig::new(["rust"], [SourceConfig::named("web")]),
//! );
//! let id = request.request_id.clone();
//! service.submit(request).await?;
//! let status = service.get_status(&id).await?;
//! # let _ = status;
//! service.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod store;
pub mod strategy;

pub use config::{ConfigManager, OrchestratorConfig};
pub use error::{OrchestratorError, Result};
pub use models::{
    IntelligenceRequest, Priority, ProgressCounters, RequestConfig, RequestFilter,
    RequestSummary, Results, SourceConfig, StrategyKind,
};
pub use orchestration::{
    FnJobExecutor, HealthReport, HealthStatus, JobContext, JobExecutor, OrchestratorService,
    TableProcessor,
};
pub use state_machine::{RequestStatus, StatusListener, StatusTracker};
pub use strategy::{ProcessingStrategy, TableStrategy};
