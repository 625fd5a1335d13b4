pub mod request;
pub mod summary;

// Re-export core models for easy access
pub use request::{
    IntelligenceRequest, LogEntry, Priority, Progress, ProgressCounters, RequestConfig,
    RequestType, Results, SourceConfig, StatusHistoryEntry, StrategyKind,
};
pub use summary::{RequestFilter, RequestSummary};
