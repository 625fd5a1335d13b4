//! # Intelligence Request
//!
//! The unit of work tracked by the orchestrator: identity, classification,
//! lifecycle bookkeeping, the opaque job configuration, and the embedded
//! progress and results documents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::state_machine::RequestStatus;

/// Kind of work a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    IntelligenceGathering,
}

impl Default for RequestType {
    fn default() -> Self {
        Self::IntelligenceGathering
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IntelligenceGathering => write!(f, "intelligence_gathering"),
        }
    }
}

/// Scheduling priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Weight used by the pending-request score (HIGH=3, MEDIUM=2, LOW=1)
    pub fn weight(&self) -> u32 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Backing strategy a request is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Scanned key-value table with in-process priority ordering
    Table,
    /// Reserved for a message-queue backed strategy
    Queue,
}

impl Default for StrategyKind {
    fn default() -> Self {
        Self::Table
    }
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Queue => "queue",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "table" => Ok(Self::Table),
            "queue" => Ok(Self::Queue),
            _ => Err(format!("Invalid processing strategy: {s}")),
        }
    }
}

/// A data source the job should consult
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl SourceConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: Map::new(),
        }
    }
}

/// Job payload, forwarded untouched to the job callable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestConfig {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_quality_threshold() -> f64 {
    0.7
}

fn default_retry_count() -> u32 {
    3
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            sources: Vec::new(),
            quality_threshold: default_quality_threshold(),
            retry_count: default_retry_count(),
            extra: Map::new(),
        }
    }
}

impl RequestConfig {
    pub fn new<K, S>(keywords: K, sources: S) -> Self
    where
        K: IntoIterator,
        K::Item: Into<String>,
        S: IntoIterator<Item = SourceConfig>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
            sources: sources.into_iter().collect(),
            ..Self::default()
        }
    }
}

/// Embedded progress document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub current_stage: String,
    pub percentage: f64,
    #[serde(default)]
    pub urls_found: u64,
    #[serde(default)]
    pub content_extracted: u64,
    #[serde(default)]
    pub processing_errors: u64,
    #[serde(default)]
    pub estimated_completion: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl Progress {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            current_stage: "pending".to_string(),
            percentage: 0.0,
            urls_found: 0,
            content_extracted: 0,
            processing_errors: 0,
            estimated_completion: None,
            last_updated: now,
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

/// Counter updates carried by a progress report. `None` leaves a counter untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressCounters {
    pub urls_found: Option<u64>,
    pub content_extracted: Option<u64>,
    pub processing_errors: Option<u64>,
}

impl ProgressCounters {
    pub fn is_empty(&self) -> bool {
        self.urls_found.is_none()
            && self.content_extracted.is_none()
            && self.processing_errors.is_none()
    }
}

/// Embedded results document, present once the request has completed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Results {
    /// Result payload; `Null` when offloaded to the blob store
    pub data: Value,
    /// Blob key of an offloaded payload
    #[serde(default)]
    pub result_path: Option<String>,
    pub success_rate: f64,
    /// Number of entries of every top-level array in the payload
    #[serde(default)]
    pub counts: BTreeMap<String, u64>,
    pub generated_at: DateTime<Utc>,
}

impl Results {
    /// Build a results document, deriving reporting metrics from the payload and progress
    pub fn from_payload(data: Value, progress: &Progress, now: DateTime<Utc>) -> Self {
        let counts = match &data {
            Value::Object(map) => map
                .iter()
                .filter_map(|(key, value)| {
                    value.as_array().map(|items| (key.clone(), items.len() as u64))
                })
                .collect(),
            _ => BTreeMap::new(),
        };

        let success_rate = if progress.urls_found == 0 {
            1.0
        } else {
            let succeeded = progress.urls_found.saturating_sub(progress.processing_errors);
            succeeded as f64 / progress.urls_found as f64
        };

        Self {
            data,
            result_path: None,
            success_rate,
            counts,
            generated_at: now,
        }
    }
}

/// One applied status change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub old_status: Option<RequestStatus>,
    pub new_status: RequestStatus,
    #[serde(default)]
    pub message: Option<String>,
}

/// Timestamped error or warning line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// A long-running intelligence request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntelligenceRequest {
    pub request_id: String,
    pub project_id: String,
    pub user_id: String,
    #[serde(default)]
    pub request_type: RequestType,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub processing_strategy: StrategyKind,
    #[serde(default)]
    pub status: RequestStatus,
    #[serde(default)]
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status_history: Vec<StatusHistoryEntry>,
    pub config: RequestConfig,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default)]
    pub results: Option<Results>,
    #[serde(default)]
    pub errors: Vec<LogEntry>,
    #[serde(default)]
    pub warnings: Vec<LogEntry>,
    #[serde(default)]
    pub retry_attempts: u32,
}

impl IntelligenceRequest {
    /// Create a pending request with a freshly generated id
    pub fn new(
        project_id: impl Into<String>,
        user_id: impl Into<String>,
        config: RequestConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            request_id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            user_id: user_id.into(),
            request_type: RequestType::default(),
            priority: Priority::default(),
            processing_strategy: StrategyKind::default(),
            status: RequestStatus::Pending,
            status_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            status_history: Vec::new(),
            config,
            progress: Progress::new(now),
            results: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            retry_attempts: 0,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.processing_strategy = strategy;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.updated_at = created_at;
        self.progress.last_updated = created_at;
        self
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(LogEntry {
            timestamp: Utc::now(),
            message: message.into(),
        });
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(LogEntry {
            timestamp: Utc::now(),
            message: message.into(),
        });
    }

    /// Hours elapsed since creation (never negative)
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        let seconds = (now - self.created_at).num_milliseconds().max(0) as f64 / 1000.0;
        seconds / 3600.0
    }

    /// Wall-clock processing duration of a finished request
    pub fn duration_seconds(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => {
                Some((completed - started).num_milliseconds().max(0) as f64 / 1000.0)
            }
            _ => None,
        }
    }

    /// Validate the fields a submission must carry, listing every problem found
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.request_id.trim().is_empty() {
            errors.push("Request ID is required".to_string());
        }
        if self.project_id.trim().is_empty() {
            errors.push("Project ID is required".to_string());
        }
        if self.user_id.trim().is_empty() {
            errors.push("User ID is required".to_string());
        }
        if self.config.keywords.iter().all(|k| k.trim().is_empty()) {
            errors.push("Keywords are required in configuration".to_string());
        }
        if self.config.sources.is_empty() {
            errors.push("Sources are required in configuration".to_string());
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_request() -> IntelligenceRequest {
        IntelligenceRequest::new(
            "project-1",
            "user-1",
            RequestConfig::new(["rust"], [SourceConfig::named("X")]),
        )
    }

    #[test]
    fn test_new_request_defaults() {
        let request = sample_request();
        assert!(!request.request_id.is_empty());
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.priority, Priority::Medium);
        assert_eq!(request.processing_strategy, StrategyKind::Table);
        assert_eq!(request.progress.percentage, 0.0);
        assert!(request.validation_errors().is_empty());
    }

    #[test]
    fn test_validation_lists_missing_keywords() {
        let mut request = sample_request();
        request.config.keywords.clear();
        assert_eq!(
            request.validation_errors(),
            vec!["Keywords are required in configuration".to_string()]
        );
    }

    #[test]
    fn test_validation_lists_every_missing_field() {
        let request = IntelligenceRequest::new("", "", RequestConfig::default()).with_request_id("");
        assert_eq!(request.validation_errors().len(), 5);
    }

    #[test]
    fn test_results_metrics() {
        let mut progress = Progress::default();
        progress.urls_found = 10;
        progress.processing_errors = 2;

        let results = Results::from_payload(
            json!({"summary": "ok", "articles": [1, 2, 3], "entities": []}),
            &progress,
            Utc::now(),
        );

        assert!((results.success_rate - 0.8).abs() < f64::EPSILON);
        assert_eq!(results.counts.get("articles"), Some(&3));
        assert_eq!(results.counts.get("entities"), Some(&0));
        assert!(!results.counts.contains_key("summary"));
    }

    #[test]
    fn test_source_config_keeps_extra_settings() {
        let source: SourceConfig =
            serde_json::from_value(json!({"name": "news", "max_results": 20})).unwrap();
        assert_eq!(source.name, "news");
        assert_eq!(source.settings.get("max_results"), Some(&json!(20)));
    }

    #[test]
    fn test_priority_weights() {
        assert_eq!(Priority::High.weight(), 3);
        assert_eq!(Priority::Medium.weight(), 2);
        assert_eq!(Priority::Low.weight(), 1);
    }
}
