//! Shared fixtures for the integration suites.

#![allow(dead_code)] // Each suite uses a different subset

pub mod builders;
pub mod mocks;
pub mod strategies;

pub use builders::*;
pub use mocks::*;

use std::time::Duration;

use request_orchestrator::state_machine::RequestStatus;
use request_orchestrator::strategy::ProcessingStrategy;

/// Poll `strategy` until the request reaches `status` or `within` elapses.
///
/// Intended for paused-clock tests, where the sleeps auto-advance.
pub async fn wait_for_status(
    strategy: &dyn ProcessingStrategy,
    request_id: &str,
    status: RequestStatus,
    within: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if let Ok(Some(request)) = strategy.get_request_status(request_id).await {
            if request.status == status {
                return true;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
