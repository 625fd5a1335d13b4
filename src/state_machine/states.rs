use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of an intelligence request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Submitted and waiting for a worker
    Pending,
    /// Claimed by a worker
    Processing,
    /// Job body is running (reported by the job or recorded before completion)
    Executing,
    /// Finished successfully, results attached
    Completed,
    /// Finished with an error or timeout
    Failed,
    /// Cancelled by a user or by stale-request cleanup
    Cancelled,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 6] = [
        Self::Pending,
        Self::Processing,
        Self::Executing,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if this is an active state (request still owned by the pipeline)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing | Self::Executing)
    }

    /// Transition table. Same-status transitions are handled by the tracker as no-ops.
    pub fn can_transition_to(&self, target: RequestStatus) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Cancelled)
                | (Self::Processing, Self::Executing)
                | (Self::Processing, Self::Failed)
                | (Self::Processing, Self::Cancelled)
                | (Self::Executing, Self::Completed)
                | (Self::Executing, Self::Failed)
                | (Self::Executing, Self::Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "executing" => Ok(Self::Executing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid request status: {s}")),
        }
    }
}

impl Default for RequestStatus {
    fn default() -> Self {
        Self::Pending
    }
}
