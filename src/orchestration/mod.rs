//! # Orchestration
//!
//! Runtime side of request processing: the job contract, the background
//! worker that executes jobs against a strategy, health reporting and the
//! service facade that ties them together.
//!
//! ## Components
//!
//! - **OrchestratorService**: composition root; strategy selection, fallback
//!   and fan-out lookups, worker lifecycle
//! - **TableProcessor**: polling worker with a concurrency cap, job deadline
//!   and graceful shutdown
//! - **JobExecutor**: the opaque job callable, with progress reporting through
//!   its [`JobContext`]
//! - **HealthReport**: component health rolled up for callers

pub mod health;
pub mod job;
pub mod service;
pub mod shutdown;
pub mod table_processor;

pub use health::{ComponentHealth, HealthReport, HealthStatus};
pub use job::{FnJobExecutor, JobContext, JobExecutor, JobFailure, ProgressReporter};
pub use service::{OrchestratorService, OrchestratorStatistics};
pub use shutdown::shutdown_signal;
pub use table_processor::{TableProcessor, TickOutcome, WorkerError, WorkerResult, WorkerStatistics};
