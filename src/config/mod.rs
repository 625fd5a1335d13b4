//! # Orchestrator Configuration
//!
//! Typed configuration with defaults and validated ranges. Every knob the
//! strategy and worker read lives here; nothing is looked up by string key
//! at runtime.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use request_orchestrator::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let poll = manager.config().table.polling_interval();
//! let deadline = manager.config().worker.max_processing_time();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::StrategyKind;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Deployment environment name (development, test, production)
    pub environment: String,

    /// Strategy selected as "current" at initialization
    pub default_strategy: StrategyKind,

    /// Table strategy settings
    pub table: TableStrategyConfig,

    /// Background worker settings
    pub worker: WorkerConfig,

    /// Result persistence settings
    pub results: ResultsConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            default_strategy: StrategyKind::Table,
            table: TableStrategyConfig::default(),
            worker: WorkerConfig::default(),
            results: ResultsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Validate every section, collecting all problems
    pub fn validate(&self) -> ConfigResult<()> {
        let mut problems = Vec::new();
        self.table.collect_problems(&mut problems);
        self.worker.collect_problems(&mut problems);
        self.results.collect_problems(&mut problems);

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::Invalid(problems))
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Table strategy configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TableStrategyConfig {
    pub table_name: String,
    /// Requests one worker may hold active at once
    pub max_concurrent_requests: usize,
    pub polling_interval_ms: u64,
    pub store_retry: RetryConfig,
}

impl Default for TableStrategyConfig {
    fn default() -> Self {
        Self {
            table_name: "intelligence_requests".to_string(),
            max_concurrent_requests: 1,
            polling_interval_ms: 5_000,
            store_retry: RetryConfig::default(),
        }
    }
}

impl TableStrategyConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    fn collect_problems(&self, problems: &mut Vec<String>) {
        if self.table_name.trim().is_empty() {
            problems.push("table.table_name must not be empty".to_string());
        }
        if !(1..=64).contains(&self.max_concurrent_requests) {
            problems.push(format!(
                "table.max_concurrent_requests must be between 1 and 64 (got {})",
                self.max_concurrent_requests
            ));
        }
        if self.polling_interval_ms < 10 {
            problems.push(format!(
                "table.polling_interval_ms must be at least 10 (got {})",
                self.polling_interval_ms
            ));
        }
        self.store_retry.collect_problems(problems);
    }
}

/// Retry policy for store operations. Job execution is never retried.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let delay = self.base_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(delay.min(self.max_delay_ms as f64) as u64)
    }

    fn collect_problems(&self, problems: &mut Vec<String>) {
        if self.max_attempts == 0 {
            problems.push("table.store_retry.max_attempts must be at least 1".to_string());
        }
        if self.backoff_multiplier < 1.0 {
            problems.push(format!(
                "table.store_retry.backoff_multiplier must be >= 1.0 (got {})",
                self.backoff_multiplier
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            problems.push(
                "table.store_retry.max_delay_ms must not be below base_delay_ms".to_string(),
            );
        }
    }
}

/// Background worker configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Start a worker for the current strategy at initialization
    pub enabled: bool,
    /// Hard deadline for one job
    pub max_processing_time_seconds: u64,
    pub cleanup_interval_seconds: u64,
    pub health_check_interval_seconds: u64,
    /// How long shutdown waits for in-flight jobs before cancelling them
    pub shutdown_grace_period_seconds: u64,
    pub completed_retention_hours: u64,
    pub failed_retention_hours: u64,
    pub stale_request_hours: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_processing_time_seconds: 1_800,
            cleanup_interval_seconds: 3_600,
            health_check_interval_seconds: 300,
            shutdown_grace_period_seconds: 30,
            completed_retention_hours: 24,
            failed_retention_hours: 72,
            stale_request_hours: 24,
        }
    }
}

impl WorkerConfig {
    pub fn max_processing_time(&self) -> Duration {
        Duration::from_secs(self.max_processing_time_seconds)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_seconds)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_seconds)
    }

    fn collect_problems(&self, problems: &mut Vec<String>) {
        if self.max_processing_time_seconds == 0 {
            problems.push("worker.max_processing_time_seconds must be positive".to_string());
        }
        if self.cleanup_interval_seconds == 0 {
            problems.push("worker.cleanup_interval_seconds must be positive".to_string());
        }
        if self.health_check_interval_seconds == 0 {
            problems.push("worker.health_check_interval_seconds must be positive".to_string());
        }
        if self.stale_request_hours == 0 {
            problems.push("worker.stale_request_hours must be positive".to_string());
        }
    }
}

/// Result persistence configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResultsConfig {
    /// Serialized payloads larger than this go to the blob store, when one is configured
    pub offload_threshold_bytes: usize,
    pub key_prefix: String,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            offload_threshold_bytes: 256 * 1024,
            key_prefix: "results".to_string(),
        }
    }
}

impl ResultsConfig {
    pub fn blob_key(&self, request_id: &str) -> String {
        format!("{}/{request_id}.json", self.key_prefix.trim_end_matches('/'))
    }

    fn collect_problems(&self, problems: &mut Vec<String>) {
        if self.key_prefix.trim().is_empty() {
            problems.push("results.key_prefix must not be empty".to_string());
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive; environment default when unset
    pub level: Option<String>,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}
