//! # Job Execution Contract
//!
//! The job body (URL discovery, content extraction, report generation) is
//! an opaque async callable. The worker hands it a [`JobContext`] and awaits
//! the returned payload under a deadline; it never retries a job itself.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::models::{IntelligenceRequest, ProgressCounters};
use crate::state_machine::RequestStatus;
use crate::strategy::ProcessingStrategy;

/// The external job callable
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, context: JobContext) -> anyhow::Result<Value>;

    /// Name used in logs
    fn name(&self) -> &str {
        "job_executor"
    }
}

/// Adapts an async closure into a [`JobExecutor`]
pub struct FnJobExecutor<F> {
    name: String,
    func: F,
}

impl<F> FnJobExecutor<F> {
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> fmt::Debug for FnJobExecutor<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnJobExecutor")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<F, Fut> JobExecutor for FnJobExecutor<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn execute(&self, context: JobContext) -> anyhow::Result<Value> {
        (self.func)(context).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Why a job did not produce a result
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobFailure {
    #[error("Processing timed out after {seconds} seconds")]
    TimedOut { seconds: u64 },

    #[error("{0}")]
    Failed(String),

    #[error("Job panicked: {0}")]
    Panicked(String),

    #[error("Processing interrupted by worker shutdown")]
    Interrupted,
}

impl JobFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TimedOut { .. } => "timeout",
            Self::Failed(_) => "error",
            Self::Panicked(_) => "panic",
            Self::Interrupted => "interrupted",
        }
    }
}

/// Everything a job receives for one request
#[derive(Clone)]
pub struct JobContext {
    pub request_id: String,
    /// Snapshot taken when the request was claimed
    pub request: IntelligenceRequest,
    pub progress: ProgressReporter,
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("request_id", &self.request_id)
            .finish()
    }
}

impl JobContext {
    pub fn new(request: IntelligenceRequest, strategy: Arc<dyn ProcessingStrategy>) -> Self {
        let request_id = request.request_id.clone();
        Self {
            progress: ProgressReporter::new(request_id.clone(), strategy),
            request_id,
            request,
        }
    }
}

/// Routes progress and sub-state reports from a running job through the strategy.
///
/// Reporting never fails the job: store errors are logged and reported as `false`.
#[derive(Clone)]
pub struct ProgressReporter {
    request_id: String,
    strategy: Arc<dyn ProcessingStrategy>,
}

impl ProgressReporter {
    pub fn new(request_id: impl Into<String>, strategy: Arc<dyn ProcessingStrategy>) -> Self {
        Self {
            request_id: request_id.into(),
            strategy,
        }
    }

    pub async fn report(
        &self,
        stage: &str,
        percentage: Option<f64>,
        counters: ProgressCounters,
    ) -> bool {
        match self
            .strategy
            .update_progress(&self.request_id, stage, percentage, counters)
            .await
        {
            Ok(applied) => applied,
            Err(e) => {
                warn!(request_id = %self.request_id, stage = %stage, error = %e, "Progress report failed");
                false
            }
        }
    }

    /// Record PROCESSING -> EXECUTING
    pub async fn mark_executing(&self, message: &str) -> bool {
        match self
            .strategy
            .update_status(&self.request_id, RequestStatus::Executing, Some(message))
            .await
        {
            Ok(applied) => applied,
            Err(e) => {
                warn!(request_id = %self.request_id, error = %e, "Failed to mark request executing");
                false
            }
        }
    }

    /// Cooperative cancellation check for long-running jobs
    pub async fn is_cancelled(&self) -> bool {
        matches!(
            self.strategy.get_request_status(&self.request_id).await,
            Ok(Some(request)) if request.status == RequestStatus::Cancelled
        )
    }
}
