// Request lifecycle state machine
//
// Transition table, progress derivation and aggregate statistics. No I/O:
// strategies load a record, hand it to the tracker, then persist it.

pub mod errors;
pub mod events;
pub mod progress;
pub mod statistics;
pub mod states;
pub mod status_tracker;

// Re-export main types for convenient access
pub use errors::{StateMachineError, StateMachineResult};
pub use events::{StatusChangeEvent, StatusListener, TracingStatusListener};
pub use statistics::StatusStatistics;
pub use states::RequestStatus;
pub use status_tracker::{StatusTracker, TransitionOutcome};
