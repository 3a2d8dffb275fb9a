use bank_intake::config::IngestConfig;
use bank_intake::error::AppError;
use bank_intake::ingest::{
    configured_drop, IngestMonitor, IngestParts, IngestionLoop, LoggingDownstream,
};
use bank_intake::jobs::{ActivityFeed, InMemoryJobRepository, IntakeService, JobLifecycle};
use bank_intake::routing::RoutingCatalog;
use bank_intake::statements::DecoderRegistry;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Everything the HTTP handlers read from or write to.
#[derive(Clone)]
pub(crate) struct ApiState {
    pub(crate) intake: IntakeService,
    pub(crate) activity: Arc<ActivityFeed>,
    pub(crate) monitor: Arc<IngestMonitor>,
    pub(crate) registry: Arc<DecoderRegistry>,
}

/// Wires the in-memory job store, the configured drop, and the logging downstream into
/// one intake service and one ingestion loop that share the same jobs.
pub(crate) fn assemble(config: &IngestConfig) -> Result<(ApiState, IngestionLoop), AppError> {
    let activity = Arc::new(ActivityFeed::new());
    let monitor = Arc::new(IngestMonitor::new());
    let registry = Arc::new(DecoderRegistry::standard());
    let drop = configured_drop(config);

    let lifecycle = JobLifecycle::new(
        Arc::new(InMemoryJobRepository::new()),
        Arc::new(RoutingCatalog::standard()),
        activity.clone(),
    );

    let ingestion = IngestionLoop::new(
        IngestParts {
            drop: drop.clone(),
            registry: registry.clone(),
            lifecycle: lifecycle.clone(),
            downstream: Arc::new(LoggingDownstream),
            monitor: monitor.clone(),
            activity: activity.clone(),
        },
        config,
    )?;

    let state = ApiState {
        intake: IntakeService::new(lifecycle, drop, registry.clone()),
        activity,
        monitor,
        registry,
    };
    Ok((state, ingestion))
}
