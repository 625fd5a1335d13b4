//! # Health Reporting
//!
//! Component-level health for strategies and the background worker, rolled
//! up into a single report by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall or per-component health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Functioning normally
    Healthy,
    /// Operational, but something needs attention
    Degraded,
    /// Not able to serve requests
    Unhealthy,
}

impl HealthStatus {
    /// Check if the component can still serve requests
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of probing one component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub latency_ms: Option<u64>,
    pub checked_at: DateTime<Utc>,
}

impl ComponentHealth {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self::new(name, HealthStatus::Healthy, None)
    }

    pub fn degraded(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, HealthStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, HealthStatus::Unhealthy, Some(message.into()))
    }

    fn new(name: impl Into<String>, status: HealthStatus, message: Option<String>) -> Self {
        Self {
            name: name.into(),
            status,
            message,
            latency_ms: None,
            checked_at: Utc::now(),
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }
}

/// Aggregated health returned by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub uptime_seconds: u64,
    pub active_requests: usize,
    pub current_strategy: String,
    pub worker_running: bool,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Roll component statuses up into an overall status.
    ///
    /// Any unhealthy component degrades the whole service rather than
    /// failing it outright, so callers keep getting status reads.
    pub fn overall_status(components: &[ComponentHealth]) -> HealthStatus {
        if components.is_empty() {
            return HealthStatus::Unhealthy;
        }
        if components
            .iter()
            .all(|c| c.status == HealthStatus::Healthy)
        {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
