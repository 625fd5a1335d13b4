//! Proptest generators for request-level properties.

use proptest::prelude::*;

use request_orchestrator::models::Priority;
use request_orchestrator::state_machine::RequestStatus;

pub fn status_strategy() -> impl Strategy<Value = RequestStatus> {
    prop::sample::select(RequestStatus::ALL.to_vec())
}

pub fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop_oneof![Just(Priority::High), Just(Priority::Medium), Just(Priority::Low)]
}

/// Percentages well outside the valid range, including negatives
pub fn raw_percentage_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![
        -1_000.0f64..1_000.0,
        Just(-5.0),
        Just(0.0),
        Just(100.0),
        Just(150.0),
    ]
}

/// Request age in hours, up to four days
pub fn age_hours_strategy() -> impl Strategy<Value = i64> {
    0i64..96
}

/// Valid stage names, plus one the pipeline does not know
pub fn stage_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(vec![
        "initialization",
        "url_discovery",
        "content_extraction",
        "aggregation",
        "completed",
        "custom_stage",
    ])
}
