use crate::cli::ServeArgs;
use crate::infra::{assemble, AppState};
use crate::routes::intake_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use bank_intake::config::AppConfig;
use bank_intake::error::AppError;
use bank_intake::telemetry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (api_state, ingestion) = assemble(&config.ingest)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let app = intake_routes(api_state)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let drop_location = ingestion.drop_location();
    let stop = Arc::new(AtomicBool::new(false));
    let loop_stop = stop.clone();
    let ingest_task = tokio::task::spawn_blocking(move || ingestion.run(&loop_stop));

    readiness_flag.store(true, Ordering::Release);
    info!(
        ?config.environment,
        %addr,
        drop = %drop_location,
        "bank intake ready"
    );

    let served = axum::serve(listener, app).await;

    stop.store(true, Ordering::Release);
    if let Err(err) = ingest_task.await {
        error!(error = %err, "ingestion loop ended abnormally");
    }
    served?;
    Ok(())
}
