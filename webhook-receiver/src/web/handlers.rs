//! Webhook endpoint handlers.
//!
//! The handlers only decode the HTTP request and translate the pipeline
//! result into a status code; every decision is made by the
//! [`IngestionController`].

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::error::WebhookError;
use crate::process::{Dispatcher, JobRegistry, Notifier};
use crate::queue::JobSink;
use crate::store::{Payload, WebhookStore};
use crate::web::ingest::{InboundRequest, IngestError, IngestionController, Stage};
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<IngestionController>,
}

impl AppState {
    /// Wire the pipeline from its parts.
    pub fn new(
        config: Config,
        store: Arc<dyn WebhookStore>,
        registry: JobRegistry,
        sink: Arc<dyn JobSink>,
    ) -> Self {
        let config = Arc::new(config);
        let dispatcher = Dispatcher::new(
            config.event_namespace.clone(),
            Arc::new(config.jobs.clone()),
            Arc::new(registry),
            Notifier::default(),
            sink,
        );

        Self {
            controller: Arc::new(IngestionController::new(config, store, dispatcher)),
        }
    }
}

/// Build the router: health check plus the webhook endpoint with and
/// without a config key suffix.
pub fn router(state: AppState) -> Router {
    let path = state.controller.config().webhook_path.clone();

    Router::new()
        .route("/health", get(health))
        .route(&path, post(twilio_webhook))
        .route(&format!("{path}/:config_key"), post(twilio_webhook_keyed))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Twilio Webhook
// =============================================================================

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        // Store failures carry I/O details that stay in the logs.
        let message = match &self.error {
            WebhookError::Store(_) => "The webhook could not be stored.".to_string(),
            other => other.to_string(),
        };

        (
            self.error.status_code(),
            Json(WebhookResponse {
                status: self.error.kind(),
                record_id: self.record_id,
                error: Some(message),
            }),
        )
            .into_response()
    }
}

/// Twilio webhook endpoint using the default signing secret.
pub async fn twilio_webhook(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_webhook(state, None, uri, headers, body).await
}

/// Twilio webhook endpoint using the secret selected by `config_key`.
pub async fn twilio_webhook_keyed(
    State(state): State<AppState>,
    Path(config_key): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_webhook(state, Some(config_key), uri, headers, body).await
}

async fn handle_webhook(
    state: AppState,
    config_key: Option<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let config = state.controller.config();
    let url = request_url(config, &headers, &uri);

    let payload = match decode_payload(&headers, &body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(url = %url, error = %e, "webhook_payload_malformed");
            return IngestError {
                stage: Stage::Rejected,
                record_id: None,
                error: e,
            }
            .into_response();
        }
    };

    let signature = headers
        .get(config.signature_header.as_str())
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let request = InboundRequest {
        url,
        body: body.to_vec(),
        payload,
        signature,
        config_key,
    };

    match state.controller.ingest(request).await {
        Ok(receipt) => (
            StatusCode::OK,
            Json(WebhookResponse {
                status: "ok",
                record_id: Some(receipt.record.id),
                error: None,
            }),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Rebuild the URL the provider called and signed.
///
/// `PUBLIC_BASE_URL` wins when configured; otherwise the scheme comes from
/// `X-Forwarded-Proto` and the host from the `Host` header.
pub fn request_url(config: &Config, headers: &HeaderMap, uri: &Uri) -> String {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");

    if let Some(base) = &config.public_base_url {
        return format!("{base}{path_and_query}");
    }

    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or("http");

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .unwrap_or("localhost");

    format!("{scheme}://{host}{path_and_query}")
}

/// Decode a JSON or form-encoded body into a payload.
///
/// JSON arrays are keyed by index; repeated form fields become arrays.
pub fn decode_payload(headers: &HeaderMap, body: &[u8]) -> Result<Payload, WebhookError> {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            let mime = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false);

    if is_json {
        decode_json(body)
    } else {
        Ok(decode_form(body))
    }
}

fn decode_json(body: &[u8]) -> Result<Payload, WebhookError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Payload::new());
    }

    let value: Value = serde_json::from_slice(body)
        .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

    match value {
        Value::Object(map) => Ok(map),
        Value::Array(items) => Ok(items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect()),
        other => Err(WebhookError::MalformedPayload(format!(
            "expected a JSON object, got `{other}`"
        ))),
    }
}

fn decode_form(body: &[u8]) -> Payload {
    let mut payload = Payload::new();

    for (key, value) in url::form_urlencoded::parse(body) {
        let value = Value::String(value.into_owned());
        match payload.get_mut(&*key) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                payload.insert(key.into_owned(), value);
            }
        }
    }

    payload
}
