//! Request Orchestrator Binary
//!
//! Runs the orchestrator over the in-memory store with a simulated job body.
//! Set `ORCHESTRATOR_DEMO_REQUESTS=<n>` to submit `n` demo requests at
//! startup. Stops gracefully on SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use request_orchestrator::config::ConfigManager;
use request_orchestrator::logging::init_structured_logging;
use request_orchestrator::models::{
    IntelligenceRequest, Priority, ProgressCounters, RequestConfig, SourceConfig,
};
use request_orchestrator::orchestration::{FnJobExecutor, JobContext, OrchestratorService};
use request_orchestrator::state_machine::TracingStatusListener;
use request_orchestrator::store::{InMemoryBlobStore, InMemoryStore};

/// Walks the known stages with short pauses, reporting progress as it goes
async fn simulated_job(ctx: JobContext) -> anyhow::Result<serde_json::Value> {
    let keywords = ctx.request.config.keywords.clone();

    ctx.progress
        .report("url_discovery", None, ProgressCounters::default())
        .await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let urls: Vec<String> = keywords
        .iter()
        .map(|k| format!("https://example.com/search?q={k}"))
        .collect();
    ctx.progress.mark_executing("Extracting content").await;
    ctx.progress
        .report(
            "content_extraction",
            None,
            ProgressCounters {
                urls_found: Some(urls.len() as u64),
                ..Default::default()
            },
        )
        .await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    if ctx.progress.is_cancelled().await {
        anyhow::bail!("request cancelled during content extraction");
    }

    ctx.progress
        .report(
            "aggregation",
            None,
            ProgressCounters {
                content_extracted: Some(urls.len() as u64),
                ..Default::default()
            },
        )
        .await;

    Ok(serde_json::json!({
        "summary": format!("Report for {}", keywords.join(", ")),
        "urls": urls,
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let manager = ConfigManager::load()?;
    let config = manager.config().clone();
    init_structured_logging(&config.logging);

    info!(
        environment = %manager.environment(),
        config_directory = %manager.config_directory().display(),
        "Starting request orchestrator"
    );

    let executor = Arc::new(FnJobExecutor::new("simulated_report", simulated_job));
    let service = OrchestratorService::with_table_store(
        config,
        Arc::new(InMemoryStore::new()),
        Some(Arc::new(InMemoryBlobStore::new())),
        executor,
    );
    service.add_status_listener(Arc::new(TracingStatusListener));
    service.initialize().await?;

    let demo_requests = match std::env::var("ORCHESTRATOR_DEMO_REQUESTS") {
        Ok(raw) => raw.parse::<usize>().unwrap_or_else(|_| {
            warn!(value = %raw, "Ignoring non-numeric ORCHESTRATOR_DEMO_REQUESTS");
            0
        }),
        Err(_) => 0,
    };
    for i in 0..demo_requests {
        let priority = match i % 3 {
            0 => Priority::High,
            1 => Priority::Medium,
            _ => Priority::Low,
        };
        let request = IntelligenceRequest::new(
            "demo-project",
            "demo-user",
            RequestConfig::new([format!("topic-{i}")], [SourceConfig::named("web")]),
        )
        .with_priority(priority);
        let request_id = request.request_id.clone();
        service.submit(request).await?;
        info!(request_id = %request_id, priority = ?priority, "Submitted demo request");
    }

    info!("Orchestrator running; press Ctrl-C to stop");
    service.run_until_signal().await?;

    let health = service.get_health().await;
    info!(status = %health.status, "Request orchestrator stopped");
    Ok(())
}
