mod dashboard;
mod problem;
mod router;
mod sse;
mod telemetry;
#[cfg(test)]
mod testing;
mod webhook;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tracing::{info, warn};

use hookboard_storage::{Database, MessageStore};
use hookboard_util::{load_env_file, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_file = load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;
    if let Some(path) = env_file {
        info!(stage = "app", path = %path.display(), "loaded environment file");
    }

    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;
    info!(stage = "storage", url = %config.database_url, "database ready");

    let store: Arc<dyn MessageStore> = Arc::new(database.messages());

    let worker = dashboard::FeedWorker::new(store.clone(), config.feed_limit);
    let feed = worker.feed();
    let _feed_handle = worker.spawn();

    if !config.webhook.signature_mode.is_required() {
        warn!(
            stage = "app",
            "webhook signature verification is disabled; unsigned payloads will be accepted"
        );
    }

    let state = router::AppState::new(
        metrics,
        store,
        webhook::IngestSettings::from_config(&config.webhook),
        feed,
        config.sse_heartbeat_secs,
        Duration::from_secs(config.request_timeout_secs),
    );

    let addr: SocketAddr = config.bind_addr;
    info!(
        stage = "app",
        %addr,
        env = %config.environment.as_str(),
        signature_mode = config.webhook.signature_mode.as_str(),
        "starting HTTP server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        router::app_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|err| err.into())
}
