use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::states::RequestStatus;
use crate::models::IntelligenceRequest;

/// Published to listeners for every applied status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChangeEvent {
    pub request_id: String,
    pub project_id: String,
    pub user_id: String,
    pub old_status: RequestStatus,
    pub new_status: RequestStatus,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StatusChangeEvent {
    pub(crate) fn for_request(
        request: &IntelligenceRequest,
        old_status: RequestStatus,
        message: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            request_id: request.request_id.clone(),
            project_id: request.project_id.clone(),
            user_id: request.user_id.clone(),
            old_status,
            new_status: request.status,
            message,
            timestamp,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.new_status.is_terminal()
    }
}

/// Hook for metrics and alerting. Never required for correctness.
pub trait StatusListener: Send + Sync {
    fn on_status_change(&self, event: &StatusChangeEvent);

    /// Name used in logs
    fn name(&self) -> &str {
        "status_listener"
    }
}

/// Emits one structured log line per transition
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusListener;

impl StatusListener for TracingStatusListener {
    fn on_status_change(&self, event: &StatusChangeEvent) {
        info!(
            request_id = %event.request_id,
            project_id = %event.project_id,
            from = %event.old_status,
            to = %event.new_status,
            message = event.message.as_deref(),
            "Request status changed"
        );
    }

    fn name(&self) -> &str {
        "tracing"
    }
}
