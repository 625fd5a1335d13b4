use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::{IntelligenceRequest, Priority, RequestType};
use crate::state_machine::RequestStatus;

/// Lightweight projection of a request for listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub request_id: String,
    pub project_id: String,
    pub user_id: String,
    pub request_type: RequestType,
    pub priority: Priority,
    pub status: RequestStatus,
    pub status_message: Option<String>,
    pub current_stage: String,
    pub percentage: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&IntelligenceRequest> for RequestSummary {
    fn from(request: &IntelligenceRequest) -> Self {
        Self {
            request_id: request.request_id.clone(),
            project_id: request.project_id.clone(),
            user_id: request.user_id.clone(),
            request_type: request.request_type,
            priority: request.priority,
            status: request.status,
            status_message: request.status_message.clone(),
            current_stage: request.progress.current_stage.clone(),
            percentage: request.progress.percentage,
            created_at: request.created_at,
            updated_at: request.updated_at,
            completed_at: request.completed_at,
        }
    }
}

/// Listing filter. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestFilter {
    pub status: Option<RequestStatus>,
    pub request_type: Option<RequestType>,
    pub priority: Option<Priority>,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl RequestFilter {
    pub const DEFAULT_LIMIT: usize = 50;

    pub fn with_status(mut self, status: RequestStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }

    /// Full in-memory match, including the date range
    pub fn matches(&self, request: &IntelligenceRequest) -> bool {
        self.status.map_or(true, |s| request.status == s)
            && self.request_type.map_or(true, |t| request.request_type == t)
            && self.priority.map_or(true, |p| request.priority == p)
            && self
                .user_id
                .as_deref()
                .map_or(true, |u| request.user_id == u)
            && self
                .project_id
                .as_deref()
                .map_or(true, |p| request.project_id == p)
            && self.created_after.map_or(true, |t| request.created_at >= t)
            && self.created_before.map_or(true, |t| request.created_at <= t)
    }
}
