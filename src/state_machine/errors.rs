use thiserror::Error;

use super::states::RequestStatus;

/// Reasons the status tracker refuses a change
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("Request {request_id} is in terminal state {status}")]
    TerminalState {
        request_id: String,
        status: RequestStatus,
    },

    #[error("Retry not permitted for request {request_id}: {reason}")]
    RetryNotPermitted { request_id: String, reason: String },
}

/// Result type alias for state machine operations
pub type StateMachineResult<T> = Result<T, StateMachineError>;
