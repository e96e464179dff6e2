use crate::cli::ServeArgs;
use crate::infra::{build_tracker, AppState};
use crate::routes::with_tracker_routes;
use crate::scheduler;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use case_tracker::config::AppConfig;
use case_tracker::error::AppError;
use case_tracker::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let tracker = Arc::new(build_tracker(&config.tracker)?);

    let app = with_tracker_routes(tracker.clone())
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let refresher = scheduler::spawn(tracker, config.tracker.refresh_interval);
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "case tracker ready");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    refresher.abort();
    served?;
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(err) => {
            warn!(error = %err, "shutdown signal unavailable; serving until killed");
            std::future::pending::<()>().await;
        }
    }
}
