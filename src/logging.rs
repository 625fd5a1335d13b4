//! # Structured Logging Module
//!
//! Environment-aware structured logging for the orchestrator and its
//! background worker, plus helpers that give every operation log line the
//! same shape.

use chrono::Utc;
use std::process;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process
pub fn init_structured_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let log_level = config
            .level
            .clone()
            .unwrap_or_else(|| get_log_level(&environment).to_string());
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

        let console = if config.json {
            fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(filter)
                .boxed()
        };

        // A global subscriber may already be installed by an embedding application
        if tracing_subscriber::registry().with(console).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing");
        }

        tracing::info!(
            pid = process::id(),
            environment = %environment,
            level = %log_level,
            json = config.json,
            "Structured logging initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("ORCHESTRATOR_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for request operations
pub fn log_request_operation(
    operation: &str,
    request_id: Option<&str>,
    strategy: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        request_id = request_id,
        strategy = strategy,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "REQUEST_OPERATION"
    );
}

/// Log structured data for worker operations
pub fn log_worker_operation(
    operation: &str,
    worker_id: &str,
    request_id: Option<&str>,
    status: &str,
    duration_ms: Option<u64>,
) {
    tracing::info!(
        operation = %operation,
        worker_id = %worker_id,
        request_id = request_id,
        status = %status,
        duration_ms = duration_ms,
        timestamp = %Utc::now().to_rfc3339(),
        "WORKER_OPERATION"
    );
}

/// Log structured data for store operations
pub fn log_store_operation(
    operation: &str,
    table: &str,
    record_count: Option<usize>,
    status: &str,
    duration_ms: Option<u64>,
) {
    tracing::debug!(
        operation = %operation,
        table = %table,
        record_count = record_count,
        status = %status,
        duration_ms = duration_ms,
        timestamp = %Utc::now().to_rfc3339(),
        "STORE_OPERATION"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}
