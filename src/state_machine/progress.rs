//! Stage-to-percentage mapping and completion estimates.

use chrono::{DateTime, Duration, Utc};

use crate::models::IntelligenceRequest;

/// Safety margin applied to linear completion estimates
pub const ESTIMATE_SAFETY_MARGIN: f64 = 1.2;

/// Stages the pipeline reports by name, with their baseline percentage
pub const KNOWN_STAGES: &[(&str, f64)] = &[
    ("pending", 0.0),
    ("initialization", 5.0),
    ("url_discovery", 10.0),
    ("content_extraction", 30.0),
    ("aggregation", 85.0),
    ("report_generation", 95.0),
    ("completed", 100.0),
];

/// Coarse percentage band a stage belongs to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageBand {
    pub start: f64,
    pub end: f64,
}

/// Substring heuristic for stage names outside [`KNOWN_STAGES`]
pub fn stage_band(stage: &str) -> Option<StageBand> {
    let stage = stage.to_ascii_lowercase();
    if stage.contains("search") || stage.contains("serp") {
        Some(StageBand {
            start: 5.0,
            end: 25.0,
        })
    } else if stage.contains("extract") || stage.contains("content") {
        Some(StageBand {
            start: 25.0,
            end: 80.0,
        })
    } else if stage.contains("aggregat") || stage.contains("combin") {
        Some(StageBand {
            start: 80.0,
            end: 95.0,
        })
    } else {
        None
    }
}

/// Percentage implied by a stage name alone
pub fn baseline_percentage(stage: &str) -> f64 {
    KNOWN_STAGES
        .iter()
        .find(|(name, _)| *name == stage)
        .map(|(_, pct)| *pct)
        .or_else(|| stage_band(stage).map(|band| band.start))
        .unwrap_or(0.0)
}

pub fn clamp_percentage(percentage: f64) -> f64 {
    if percentage.is_nan() {
        0.0
    } else {
        percentage.clamp(0.0, 100.0)
    }
}

/// Linear extrapolation of the finish time from elapsed time and percentage
pub fn estimate_completion_at(
    request: &IntelligenceRequest,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let started_at = request.started_at?;
    let pct = request.progress.percentage;
    if pct <= 0.0 {
        return None;
    }

    let elapsed = (now - started_at).num_milliseconds().max(0) as f64 / 1000.0;
    let total = elapsed / (pct.min(100.0) / 100.0);
    let remaining = (total - elapsed).max(0.0) * ESTIMATE_SAFETY_MARGIN;

    Some(now + Duration::milliseconds((remaining * 1000.0) as i64))
}
