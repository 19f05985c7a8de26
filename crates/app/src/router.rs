use std::{sync::Arc, time::Duration};

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{
        sse::{KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::debug;

use hookboard_core::{FeedFilter, MessageType, WebhookMessage};
use hookboard_storage::MessageStore;

use crate::dashboard::SharedFeed;
use crate::problem::ProblemResponse;
use crate::sse::{SseHub, SseStream};
use crate::webhook::IngestSettings;
use crate::{telemetry, webhook};

#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    store: Arc<dyn MessageStore>,
    ingest: Arc<IngestSettings>,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    feed: SharedFeed,
    sse: SseHub,
    sse_heartbeat_secs: u64,
    request_timeout: Duration,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        store: Arc<dyn MessageStore>,
        ingest: IngestSettings,
        feed: SharedFeed,
        sse_heartbeat_secs: u64,
        request_timeout: Duration,
    ) -> Self {
        Self {
            metrics,
            store,
            ingest: Arc::new(ingest),
            clock: Arc::new(Utc::now),
            feed,
            sse: SseHub::new(),
            sse_heartbeat_secs,
            request_timeout,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn ingest(&self) -> &IngestSettings {
        &self.ingest
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn feed(&self) -> &SharedFeed {
        &self.feed
    }

    pub fn sse(&self) -> &SseHub {
        &self.sse
    }

    pub fn sse_heartbeat(&self) -> u64 {
        self.sse_heartbeat_secs
    }
}

/// Success body shared by the JSON endpoints.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl<T> Envelope<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
            count: None,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let timeout = state.request_timeout;
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/webhook", post(webhook::handle))
        .route("/api/messages", get(list_messages))
        .route("/api/messages/stream", get(message_stream))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

#[derive(Debug, Default, Deserialize)]
struct MessagesQuery {
    #[serde(default, rename = "type")]
    message_type: Option<String>,
    #[serde(default)]
    q: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Envelope<Vec<WebhookMessage>>>, ProblemResponse> {
    let filter = FeedFilter {
        message_type: parse_type_filter(query.message_type.as_deref())?,
        query: query.q,
        limit: query.limit,
    };
    let rows = state.feed().read().await.filtered(&filter);
    let count = rows.len();
    Ok(Json(Envelope {
        success: true,
        data: rows,
        count: Some(count),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct StreamQuery {
    #[serde(default, rename = "type")]
    message_type: Option<String>,
}

async fn message_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<SseStream>, ProblemResponse> {
    let filter = parse_type_filter(query.message_type.as_deref())?;
    let stream = state.sse().stream(state.store().subscribe_inserts(), filter);
    debug!(stage = "sse", clients = state.sse().connected(), "live client connected");

    let keep_alive = KeepAlive::new()
        .interval(Duration::from_secs(state.sse_heartbeat()))
        .text("heartbeat");
    Ok(Sse::new(stream).keep_alive(keep_alive))
}

// Unlike ingestion, which coerces unknown labels, an unknown filter is a
// client error.
fn parse_type_filter(raw: Option<&str>) -> Result<Option<MessageType>, ProblemResponse> {
    let Some(value) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    MessageType::parse(value).map(Some).ok_or_else(|| {
        ProblemResponse::new(
            StatusCode::BAD_REQUEST,
            "invalid_filter",
            format!("unknown message type '{value}'"),
        )
    })
}
