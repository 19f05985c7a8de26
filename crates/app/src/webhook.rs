use std::{net::SocketAddr, sync::Arc, time::Instant};

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use http_body_util::LengthLimitError;
use metrics::{counter, histogram};
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use hookboard_core::{
    signature::{self, SignatureError},
    validate, NewMessage, RequestContext, ValidationError, ValidationLimits, WebhookMessage,
};
use hookboard_storage::StoreError;
use hookboard_util::{SignatureMode, WebhookSettings};

use crate::problem::ProblemResponse;
use crate::router::{AppState, Envelope};

pub const HEADER_SIGNATURE: &str = "x-webhook-signature";
const HEADER_FORWARDED_FOR: &str = "x-forwarded-for";
const HEADER_REAL_IP: &str = "x-real-ip";

/// Ingestion knobs resolved once at startup.
#[derive(Clone)]
pub struct IngestSettings {
    pub secret: Option<Arc<[u8]>>,
    pub signature_mode: SignatureMode,
    pub max_body_bytes: usize,
    pub limits: ValidationLimits,
}

impl IngestSettings {
    pub fn from_config(config: &WebhookSettings) -> Self {
        Self {
            secret: config
                .secret
                .as_ref()
                .map(|secret| Arc::from(secret.as_bytes().to_vec().into_boxed_slice())),
            signature_mode: config.signature_mode,
            max_body_bytes: config.max_body_bytes,
            limits: ValidationLimits {
                max_title_len: config.max_title_len,
                max_message_len: config.max_message_len,
            },
        }
    }
}

/// Terminal outcomes of a rejected ingestion request.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("request body exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },
    #[error("content type must be application/json (got {0})")]
    UnsupportedContentType(String),
    #[error("signature verification failed: {0}")]
    InvalidSignature(SignatureError),
    #[error("request body is not valid JSON: {0}")]
    MalformedJson(String),
    #[error(transparent)]
    ValidationFailed(ValidationError),
    #[error("failed to persist webhook message: {0}")]
    StoreUnavailable(#[source] StoreError),
}

impl IngestError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            Self::MalformedJson(_) | Self::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            Self::StoreUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Problem `type` and metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PayloadTooLarge { .. } => "payload_too_large",
            Self::UnsupportedContentType(_) => "unsupported_content_type",
            Self::InvalidSignature(_) => "invalid_signature",
            Self::MalformedJson(_) => "malformed_json",
            Self::ValidationFailed(_) => "validation_failed",
            Self::StoreUnavailable(_) => "store_unavailable",
        }
    }

    pub fn is_server_fault(&self) -> bool {
        self.status().is_server_error()
    }
}

impl From<IngestError> for ProblemResponse {
    fn from(err: IngestError) -> Self {
        // Store internals stay in the logs.
        let detail = if err.is_server_fault() {
            "the message could not be stored; retry later".to_string()
        } else {
            err.to_string()
        };
        let problem = ProblemResponse::new(err.status(), err.kind(), detail);
        match err {
            IngestError::ValidationFailed(validation) => {
                problem.with_details(validation.violations)
            }
            _ => problem,
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        ProblemResponse::from(self).into_response()
    }
}

pub async fn handle(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, Json<Envelope<WebhookMessage>>), IngestError> {
    let start = Instant::now();
    let peer = connect_info.map(|ConnectInfo(addr)| addr);

    let result = ingest(&state, peer, &headers, body).await;

    let outcome = match &result {
        Ok(_) => "accepted",
        Err(err) => err.kind(),
    };
    counter!("webhook_requests_total", "outcome" => outcome).increment(1);
    histogram!("webhook_ack_latency_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());

    let message = result?;
    info!(
        stage = "ingress",
        id = %message.id,
        message_type = message.message_type.as_str(),
        latency_ms = start.elapsed().as_secs_f64() * 1000.0,
        "webhook message stored"
    );
    Ok((StatusCode::CREATED, Json(Envelope::new(message))))
}

async fn ingest(
    state: &AppState,
    peer: Option<SocketAddr>,
    headers: &HeaderMap,
    body: Body,
) -> Result<WebhookMessage, IngestError> {
    let settings = state.ingest();

    if let Some(declared) = declared_length(headers) {
        if declared > settings.max_body_bytes as u64 {
            warn!(
                stage = "ingress",
                declared,
                limit = settings.max_body_bytes,
                "declared content length over limit"
            );
            return Err(IngestError::PayloadTooLarge {
                limit: settings.max_body_bytes,
            });
        }
    }

    ensure_json_content_type(headers)?;

    let raw = read_body(body, settings.max_body_bytes).await?;

    if settings.signature_mode.is_required() {
        let provided = headers
            .get(HEADER_SIGNATURE)
            .and_then(|value| value.to_str().ok());
        signature::check(&raw, provided, settings.secret.as_deref()).map_err(|reason| {
            counter!("webhook_invalid_signature_total", "reason" => reason.as_str()).increment(1);
            warn!(stage = "signature", reason = reason.as_str(), "rejected webhook signature");
            IngestError::InvalidSignature(reason)
        })?;
    }

    let parsed: Value = serde_json::from_slice(&raw).map_err(|err| {
        warn!(stage = "ingress", error = %err, size_bytes = raw.len(), "malformed JSON body");
        IngestError::MalformedJson(err.to_string())
    })?;

    let validated = validate(&parsed, &settings.limits).map_err(|err| {
        counter!("webhook_validation_failures_total").increment(1);
        warn!(stage = "validator", fields = ?err.fields(), "payload failed validation");
        IngestError::ValidationFailed(err)
    })?;

    let record = NewMessage::new(validated, request_context(headers, peer), state.now());
    state.store().insert(record).await.map_err(|err| {
        error!(stage = "storage", error = %err, "failed to persist webhook message");
        IngestError::StoreUnavailable(err)
    })
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.trim().parse::<u64>().ok())
}

fn ensure_json_content_type(headers: &HeaderMap) -> Result<(), IngestError> {
    let Some(value) = headers.get(header::CONTENT_TYPE) else {
        return Err(IngestError::UnsupportedContentType("none".to_string()));
    };
    let raw = value
        .to_str()
        .map_err(|_| IngestError::UnsupportedContentType("<non-ascii>".to_string()))?;
    let media_type = raw.split(';').next().unwrap_or_default().trim();
    if media_type.eq_ignore_ascii_case("application/json") {
        Ok(())
    } else {
        warn!(stage = "ingress", content_type = raw, "unsupported content type");
        Err(IngestError::UnsupportedContentType(raw.to_string()))
    }
}

async fn read_body(body: Body, limit: usize) -> Result<Bytes, IngestError> {
    axum::body::to_bytes(body, limit).await.map_err(|err| {
        let inner = err.into_inner();
        if inner.is::<LengthLimitError>() {
            warn!(stage = "ingress", limit, "streamed body over limit");
            IngestError::PayloadTooLarge { limit }
        } else {
            IngestError::MalformedJson(format!("failed to read request body: {inner}"))
        }
    })
}

fn request_context(headers: &HeaderMap, peer: Option<SocketAddr>) -> RequestContext {
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let origin_ip = header_str(HEADER_FORWARDED_FOR)
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .or_else(|| header_str(HEADER_REAL_IP))
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()));

    RequestContext {
        origin_ip,
        user_agent: header_str(header::USER_AGENT.as_str()).map(str::to_string),
    }
}
