//! Error types surfaced by the orchestrator facade.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::models::StrategyKind;
use crate::strategy::StrategyError;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Validation failed for request {request_id} on {strategy} strategy: {}", .errors.join("; "))]
    Validation {
        strategy: StrategyKind,
        request_id: String,
        errors: Vec<String>,
    },

    #[error("Request not found: {request_id}")]
    NotFound { request_id: String },

    #[error("Operation '{operation}' failed on {strategy} strategy (request {request_id:?}): {reason}")]
    Operation {
        strategy: StrategyKind,
        operation: String,
        request_id: Option<String>,
        reason: String,
    },

    #[error("Strategy {strategy} error: {reason}")]
    Strategy {
        strategy: StrategyKind,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Orchestrator is not initialized")]
    NotInitialized,
}

impl OrchestratorError {
    /// Attach strategy and request context to a strategy-level failure
    pub fn from_strategy(
        err: StrategyError,
        strategy: StrategyKind,
        operation: &str,
        request_id: Option<&str>,
    ) -> Self {
        match err {
            StrategyError::Validation { errors } => Self::Validation {
                strategy,
                request_id: request_id.unwrap_or_default().to_string(),
                errors,
            },
            StrategyError::NotFound { request_id } => Self::NotFound { request_id },
            StrategyError::Initialization(reason) => Self::Strategy { strategy, reason },
            other => Self::Operation {
                strategy,
                operation: operation.to_string(),
                request_id: request_id.map(str::to_string),
                reason: other.to_string(),
            },
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
