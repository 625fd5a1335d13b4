//! Property-based tests for the status table, progress arithmetic and
//! scheduling order.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::strategies::*;
use common::sample_request;
use proptest::prelude::*;

use request_orchestrator::models::ProgressCounters;
use request_orchestrator::state_machine::progress::{baseline_percentage, clamp_percentage};
use request_orchestrator::state_machine::{RequestStatus, StatusTracker};
use request_orchestrator::strategy::priority_score;

proptest! {
    #[test]
    fn refused_transitions_leave_the_request_untouched(
        from in status_strategy(),
        to in status_strategy(),
    ) {
        let tracker = StatusTracker::new();
        let mut request = sample_request();
        request.status = from;
        let before = request.clone();

        let applied = tracker.update_status(&mut request, to, Some("probe"));

        if from == to {
            prop_assert!(applied);
            prop_assert_eq!(&request, &before);
        } else if from.can_transition_to(to) {
            prop_assert!(applied);
            prop_assert_eq!(request.status, to);
            prop_assert_eq!(request.status_history.len(), 1);
            prop_assert_eq!(request.completed_at.is_some(), to.is_terminal());
        } else {
            prop_assert!(!applied);
            prop_assert_eq!(&request, &before);
        }
    }

    #[test]
    fn terminal_states_accept_no_change(
        from in status_strategy().prop_filter("terminal", |s| s.is_terminal()),
        to in status_strategy(),
    ) {
        prop_assert!(from == to || !StatusTracker::new().is_valid_transition(from, to));
    }

    #[test]
    fn percentage_is_always_clamped(raw in raw_percentage_strategy(), stage in stage_strategy()) {
        let tracker = StatusTracker::new();
        let mut request = sample_request();

        tracker.update_progress(&mut request, stage, Some(raw), ProgressCounters::default());
        prop_assert!((0.0..=100.0).contains(&request.progress.percentage));
        prop_assert_eq!(request.progress.percentage, clamp_percentage(raw));

        tracker.update_progress(&mut request, stage, None, ProgressCounters::default());
        prop_assert_eq!(request.progress.percentage, baseline_percentage(stage));
    }

    #[test]
    fn counters_never_decrease(first in 0u64..1_000, second in 0u64..1_000) {
        let tracker = StatusTracker::new();
        let mut request = sample_request();
        let counters = |n| ProgressCounters {
            urls_found: Some(n),
            content_extracted: Some(n),
            processing_errors: Some(n),
        };

        tracker.update_progress(&mut request, "url_discovery", None, counters(first));
        tracker.update_progress(&mut request, "url_discovery", None, counters(second));
        prop_assert_eq!(request.progress.urls_found, first.max(second));
        prop_assert_eq!(request.progress.content_extracted, first.max(second));
        prop_assert_eq!(request.progress.processing_errors, first.max(second));
    }

    #[test]
    fn priority_outranks_age_within_the_boost_cap(
        higher in priority_strategy(),
        lower in priority_strategy(),
        higher_age in age_hours_strategy(),
        lower_age in age_hours_strategy(),
    ) {
        prop_assume!(higher.weight() > lower.weight());
        let now = Utc::now();
        let a = sample_request()
            .with_priority(higher)
            .with_created_at(now - ChronoDuration::hours(higher_age));
        let b = sample_request()
            .with_priority(lower)
            .with_created_at(now - ChronoDuration::hours(lower_age));

        let (score_a, score_b) = (priority_score(&a, now), priority_score(&b, now));
        // The age boost is capped at 10, one weight step
        prop_assert!(score_a >= score_b);
        if higher_age >= lower_age {
            prop_assert!(score_a > score_b);
        }
    }

    #[test]
    fn score_grows_with_age_until_the_cap(priority in priority_strategy(), age in age_hours_strategy()) {
        let now = Utc::now();
        let request = sample_request()
            .with_priority(priority)
            .with_created_at(now - ChronoDuration::hours(age));
        let expected = f64::from(priority.weight()) * 10.0 + (age as f64).min(10.0);
        prop_assert!((priority_score(&request, now) - expected).abs() < 1e-6);
    }
}

#[test]
fn status_strings_round_trip_through_from_str() {
    for status in RequestStatus::ALL {
        assert_eq!(status.as_str().parse::<RequestStatus>(), Ok(status));
    }
    assert!("unknown".parse::<RequestStatus>().is_err());
}
