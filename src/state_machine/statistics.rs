use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::states::RequestStatus;
use crate::models::IntelligenceRequest;

/// Aggregate view over a set of requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusStatistics {
    pub total_requests: usize,
    pub by_status: BTreeMap<RequestStatus, usize>,
    pub active_requests: usize,
    /// Mean of `completed_at - started_at` over completed and failed requests
    pub average_duration_seconds: Option<f64>,
    /// completed / total
    pub success_rate: f64,
}

impl StatusStatistics {
    pub fn from_requests<'a, I>(requests: I) -> Self
    where
        I: IntoIterator<Item = &'a IntelligenceRequest>,
    {
        let mut by_status: BTreeMap<RequestStatus, usize> =
            RequestStatus::ALL.iter().map(|s| (*s, 0)).collect();
        let mut total = 0usize;
        let mut duration_sum = 0.0;
        let mut duration_count = 0usize;

        for request in requests {
            total += 1;
            *by_status.entry(request.status).or_insert(0) += 1;

            if matches!(
                request.status,
                RequestStatus::Completed | RequestStatus::Failed
            ) {
                if let Some(duration) = request.duration_seconds() {
                    duration_sum += duration;
                    duration_count += 1;
                }
            }
        }

        let count = |status: RequestStatus| by_status.get(&status).copied().unwrap_or(0);
        let active_requests = RequestStatus::ALL
            .iter()
            .filter(|s| s.is_active())
            .map(|s| count(*s))
            .sum();
        let success_rate = if total == 0 {
            0.0
        } else {
            count(RequestStatus::Completed) as f64 / total as f64
        };

        Self {
            total_requests: total,
            active_requests,
            average_duration_seconds: (duration_count > 0)
                .then(|| duration_sum / duration_count as f64),
            success_rate,
            by_status,
        }
    }

    pub fn count(&self, status: RequestStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

impl Default for StatusStatistics {
    fn default() -> Self {
        Self::from_requests(std::iter::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RequestConfig, SourceConfig};
    use chrono::{Duration, Utc};

    fn request(status: RequestStatus, duration_secs: Option<i64>) -> IntelligenceRequest {
        let mut request = IntelligenceRequest::new(
            "project-1",
            "user-1",
            RequestConfig::new(["rust"], [SourceConfig::named("web")]),
        );
        request.status = status;
        if let Some(secs) = duration_secs {
            let started = Utc::now() - Duration::seconds(secs);
            request.started_at = Some(started);
            request.completed_at = Some(started + Duration::seconds(secs));
        }
        request
    }

    #[test]
    fn test_empty_set() {
        let stats = StatusStatistics::default();
        assert_eq!(stats.total_requests, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert!(stats.average_duration_seconds.is_none());
        assert_eq!(stats.by_status.len(), RequestStatus::ALL.len());
    }

    #[test]
    fn test_counts_rate_and_duration() {
        let requests = vec![
            request(RequestStatus::Completed, Some(10)),
            request(RequestStatus::Failed, Some(30)),
            request(RequestStatus::Processing, None),
            request(RequestStatus::Pending, None),
        ];
        let stats = StatusStatistics::from_requests(&requests);

        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.count(RequestStatus::Completed), 1);
        assert_eq!(stats.count(RequestStatus::Cancelled), 0);
        assert_eq!(stats.active_requests, 2);
        assert!((stats.success_rate - 0.25).abs() < f64::EPSILON);
        assert_eq!(stats.average_duration_seconds, Some(20.0));
    }
}
