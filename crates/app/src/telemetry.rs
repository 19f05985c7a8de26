use std::{
    fmt::Write as _,
    sync::{Mutex, OnceLock, PoisonError},
    time::Instant,
};

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use thiserror::Error;
use tracing_subscriber::{
    fmt::{self as tracing_fmt, time::UtcTime},
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
    EnvFilter,
};

use hookboard_util::{AppConfig, Environment};

// sqlx logs every statement at info.
const DEFAULT_FILTER: &str = "info,sqlx=warn";
const ACK_LATENCY_BUCKETS: [f64; 10] = [
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];
const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to initialize tracing: {0}")]
    Tracing(#[from] TryInitError),
    #[error("failed to initialize prometheus recorder: {0}")]
    Metrics(#[from] BuildError),
}

static TRACING_READY: OnceLock<()> = OnceLock::new();
static RECORDER: Mutex<Option<PrometheusHandle>> = Mutex::new(None);
static STARTED_AT: OnceLock<Instant> = OnceLock::new();

fn build_git_sha() -> &'static str {
    option_env!("GIT_SHA").unwrap_or("unknown")
}

/// Installs the global subscriber: JSON lines in production, pretty output
/// in development and compact uncoloured lines under test.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryError> {
    if TRACING_READY.get().is_some() {
        return Ok(());
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    let base = tracing_fmt::layer()
        .with_target(false)
        .with_timer(UtcTime::rfc_3339());

    match config.environment {
        Environment::Production => registry.with(base.json().flatten_event(true)).try_init()?,
        Environment::Development => registry.with(base.pretty()).try_init()?,
        Environment::Test => registry.with(base.compact().with_ansi(false)).try_init()?,
    }

    TRACING_READY.set(()).ok();
    tracing::info!(
        stage = "telemetry",
        env = config.environment.as_str(),
        version = BUILD_VERSION,
        git_sha = build_git_sha(),
        "tracing initialized"
    );
    Ok(())
}

/// Installs the Prometheus recorder once per process and returns its handle.
pub fn init_metrics() -> Result<PrometheusHandle, TelemetryError> {
    let mut slot = RECORDER.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(handle) = slot.as_ref() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("webhook_ack_latency_seconds".to_string()),
            &ACK_LATENCY_BUCKETS,
        )?
        .install_recorder()?;
    describe_metrics();
    STARTED_AT.get_or_init(Instant::now);

    *slot = Some(handle.clone());
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!(
        "webhook_requests_total",
        "Webhook ingestion requests by outcome (accepted or rejection kind)"
    );
    describe_counter!(
        "webhook_invalid_signature_total",
        "Webhook requests rejected by signature verification, by reason"
    );
    describe_counter!(
        "webhook_validation_failures_total",
        "Webhook payloads rejected by the validator"
    );
    describe_histogram!(
        "webhook_ack_latency_seconds",
        "Time to answer a webhook request, by outcome"
    );
    describe_counter!(
        "feed_reloads_total",
        "Dashboard feed reloads from the store, by reason"
    );
    describe_gauge!("sse_clients", "Connected live message stream clients");
}

/// Recorder output followed by the process-level build and uptime gauges.
pub fn render_metrics(handle: &PrometheusHandle) -> String {
    let mut body = handle.render();
    if !body.is_empty() && !body.ends_with('\n') {
        body.push('\n');
    }

    let uptime = STARTED_AT
        .get()
        .map(|start| start.elapsed().as_secs_f64())
        .unwrap_or_default();

    // Writing into a String cannot fail.
    let _ = writeln!(body, "# HELP app_build_info Build metadata for the running binary");
    let _ = writeln!(body, "# TYPE app_build_info gauge");
    let _ = writeln!(
        body,
        "app_build_info{{version=\"{BUILD_VERSION}\",git=\"{}\"}} 1",
        build_git_sha()
    );
    let _ = writeln!(body, "# HELP app_uptime_seconds Seconds since the process started");
    let _ = writeln!(body, "# TYPE app_uptime_seconds gauge");
    let _ = writeln!(body, "app_uptime_seconds {uptime}");
    body
}
