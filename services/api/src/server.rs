use crate::cli::ServeArgs;
use crate::infra::{
    load_worker_seed, AppState, LoggingNotifier, LoggingSuspensionSink, SimulatedPaymentProvider,
};
use crate::routes::with_marketplace_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use shiftfill::config::AppConfig;
use shiftfill::error::AppError;
use shiftfill::telemetry;
use shiftfill::workflows::staffing::{Collaborators, InMemoryWorkerDirectory, MarketplaceService};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

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

    let profiles = match &config.marketplace.worker_seed_path {
        Some(path) => load_worker_seed(path)?,
        None => Vec::new(),
    };
    let collaborators = Collaborators::in_memory(
        Arc::new(InMemoryWorkerDirectory::with_profiles(profiles)),
        Arc::new(LoggingNotifier::default()),
        Arc::new(SimulatedPaymentProvider::default()),
        Arc::new(LoggingSuspensionSink),
    );
    let service = Arc::new(MarketplaceService::new(
        collaborators,
        config.marketplace.settings(),
    )?);

    spawn_sweeper(
        service.clone(),
        Duration::from_secs(config.marketplace.sweep_interval_secs),
    );

    let app = with_marketplace_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "shift fill marketplace ready");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Drives time-based transitions: invitation expiry, no-shows and scheduled escrow releases.
fn spawn_sweeper(service: Arc<MarketplaceService>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let service = service.clone();
            match tokio::task::spawn_blocking(move || service.sweep(Utc::now())).await {
                Ok(Ok(report)) if report.errors > 0 => {
                    warn!(?report, "sweep finished with errors")
                }
                Ok(Ok(report)) => debug!(?report, "sweep finished"),
                Ok(Err(error)) => warn!(%error, "sweep aborted"),
                Err(error) => warn!(%error, "sweep task panicked"),
            }
        }
    });
}
