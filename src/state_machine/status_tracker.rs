//! # Status Tracker
//!
//! Single source of truth for which status changes are legal and how
//! progress, completion estimates and staleness are derived. Pure logic:
//! the tracker mutates the request it is handed and never touches storage.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

use super::errors::{StateMachineError, StateMachineResult};
use super::events::{StatusChangeEvent, StatusListener};
use super::progress::{baseline_percentage, clamp_percentage, estimate_completion_at};
use super::statistics::StatusStatistics;
use super::states::RequestStatus;
use crate::models::{IntelligenceRequest, Progress, ProgressCounters, StatusHistoryEntry};

/// Result of a validated status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Status changed and a history record was appended
    Applied,
    /// Requested status equals the current one; nothing changed
    Unchanged,
}

#[derive(Default)]
pub struct StatusTracker {
    listeners: RwLock<Vec<Arc<dyn StatusListener>>>,
}

impl std::fmt::Debug for StatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusTracker")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn StatusListener>) {
        debug!(listener = listener.name(), "Registering status listener");
        self.listeners.write().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Check the transition table. Same-status changes are always valid.
    pub fn is_valid_transition(&self, from: RequestStatus, to: RequestStatus) -> bool {
        from == to || from.can_transition_to(to)
    }

    /// Apply a status change, returning `false` (and logging) when the table refuses it
    pub fn update_status(
        &self,
        request: &mut IntelligenceRequest,
        new_status: RequestStatus,
        message: Option<&str>,
    ) -> bool {
        match self.try_update_status(request, new_status, message) {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    request_id = %request.request_id,
                    error = %e,
                    "Rejected status change"
                );
                false
            }
        }
    }

    /// Apply a status change, reporting why a refused change was refused
    pub fn try_update_status(
        &self,
        request: &mut IntelligenceRequest,
        new_status: RequestStatus,
        message: Option<&str>,
    ) -> StateMachineResult<TransitionOutcome> {
        let old_status = request.status;
        if old_status == new_status {
            return Ok(TransitionOutcome::Unchanged);
        }

        if old_status.is_terminal() {
            return Err(StateMachineError::TerminalState {
                request_id: request.request_id.clone(),
                status: old_status,
            });
        }
        if !old_status.can_transition_to(new_status) {
            return Err(StateMachineError::InvalidTransition {
                from: old_status,
                to: new_status,
            });
        }

        let now = Utc::now();
        request.status = new_status;
        request.updated_at = now;
        request.status_message = message.map(str::to_string);

        if new_status == RequestStatus::Processing && request.started_at.is_none() {
            request.started_at = Some(now);
        }
        if new_status.is_terminal() {
            request.completed_at = Some(now);
            request.progress.estimated_completion = None;
        }

        request.status_history.push(StatusHistoryEntry {
            timestamp: now,
            old_status: Some(old_status),
            new_status,
            message: message.map(str::to_string),
        });

        debug!(
            request_id = %request.request_id,
            from = %old_status,
            to = %new_status,
            "Status transition applied"
        );

        let event = StatusChangeEvent::for_request(
            request,
            old_status,
            message.map(str::to_string),
            now,
        );
        self.notify(&event);

        Ok(TransitionOutcome::Applied)
    }

    /// Update stage, percentage and counters. Percentage is clamped to [0,100];
    /// when absent the stage's baseline is used. Counters never decrease.
    pub fn update_progress(
        &self,
        request: &mut IntelligenceRequest,
        stage: &str,
        percentage: Option<f64>,
        counters: ProgressCounters,
    ) {
        let now = Utc::now();
        let percentage = percentage
            .map(clamp_percentage)
            .unwrap_or_else(|| baseline_percentage(stage));

        let progress = &mut request.progress;
        progress.current_stage = stage.to_string();
        progress.percentage = percentage;
        if let Some(urls) = counters.urls_found {
            progress.urls_found = progress.urls_found.max(urls);
        }
        if let Some(extracted) = counters.content_extracted {
            progress.content_extracted = progress.content_extracted.max(extracted);
        }
        if let Some(errors) = counters.processing_errors {
            progress.processing_errors = progress.processing_errors.max(errors);
        }
        progress.last_updated = now;
        request.updated_at = now;

        request.progress.estimated_completion = if request.status.is_terminal() {
            None
        } else {
            estimate_completion_at(request, now)
        };
    }

    /// Linear extrapolation with a 1.2x margin; `None` before start or at 0%
    pub fn estimate_completion(&self, request: &IntelligenceRequest) -> Option<DateTime<Utc>> {
        estimate_completion_at(request, Utc::now())
    }

    pub fn is_stale(&self, request: &IntelligenceRequest, max_age_hours: u64) -> bool {
        self.is_stale_at(request, max_age_hours, Utc::now())
    }

    /// Active and older than `max_age_hours`
    pub fn is_stale_at(
        &self,
        request: &IntelligenceRequest,
        max_age_hours: u64,
        now: DateTime<Utc>,
    ) -> bool {
        request.status.is_active()
            && now - request.created_at > Duration::hours(max_age_hours as i64)
    }

    pub fn get_status_statistics<'a, I>(&self, requests: I) -> StatusStatistics
    where
        I: IntoIterator<Item = &'a IntelligenceRequest>,
    {
        StatusStatistics::from_requests(requests)
    }

    /// Return a FAILED request to PENDING for another attempt. Prior errors are
    /// folded into the status history and progress starts over.
    pub fn reset_for_retry(&self, request: &mut IntelligenceRequest) -> StateMachineResult<()> {
        if request.status != RequestStatus::Failed {
            return Err(StateMachineError::RetryNotPermitted {
                request_id: request.request_id.clone(),
                reason: format!("status is {}, only failed requests can be retried", request.status),
            });
        }
        if request.retry_attempts >= request.config.retry_count {
            return Err(StateMachineError::RetryNotPermitted {
                request_id: request.request_id.clone(),
                reason: format!(
                    "retry limit of {} reached",
                    request.config.retry_count
                ),
            });
        }

        let now = Utc::now();
        let attempt = request.retry_attempts + 1;
        let previous_errors = request
            .errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        let message = if previous_errors.is_empty() {
            format!("Retry attempt {attempt}")
        } else {
            format!("Retry attempt {attempt}; previous errors: {previous_errors}")
        };

        request.status_history.push(StatusHistoryEntry {
            timestamp: now,
            old_status: Some(RequestStatus::Failed),
            new_status: RequestStatus::Pending,
            message: Some(message.clone()),
        });
        request.errors.clear();
        request.progress = Progress::new(now);
        request.results = None;
        request.started_at = None;
        request.completed_at = None;
        request.retry_attempts = attempt;
        request.status = RequestStatus::Pending;
        request.status_message = Some("Queued for retry".to_string());
        request.updated_at = now;

        let event =
            StatusChangeEvent::for_request(request, RequestStatus::Failed, Some(message), now);
        self.notify(&event);

        Ok(())
    }

    fn notify(&self, event: &StatusChangeEvent) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_status_change(event)));
            if outcome.is_err() {
                warn!(
                    listener = listener.name(),
                    request_id = %event.request_id,
                    "Status listener panicked; continuing"
                );
            }
        }
    }
}
