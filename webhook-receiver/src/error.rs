//! Error taxonomy for the ingestion pipeline.
//!
//! Every failure carries its own HTTP status so the web layer only has to
//! translate, never decide.

use axum::http::StatusCode;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum WebhookError {
    /// The provided signature does not match the request.
    #[error("The signature is invalid.")]
    InvalidSignature,

    /// No signing secret is configured for the endpoint.
    #[error("The webhook signing secret for `{name}` is not set. Make sure that the signing secret is configured.")]
    SigningSecretMissing { name: String },

    /// The request body is not a key/value mapping.
    #[error("The webhook payload could not be decoded: {0}")]
    MalformedPayload(String),

    /// None of the candidate type fields carried a value.
    #[error("Webhook call id `{id}` did not contain a type. Valid Twilio webhook calls should contain a type.")]
    MissingType { id: u64 },

    /// A route points at a job class nothing registered.
    #[error("Could not process webhook id `{id}` of type `{event_type}` because the configured job class `{job_class}` does not exist.")]
    JobClassNotFound {
        id: u64,
        event_type: String,
        job_class: String,
    },

    #[error("Webhook store failure: {0}")]
    Store(#[from] StoreError),
}

impl WebhookError {
    /// Short machine-readable name used in logs, responses and stored exceptions.
    pub fn kind(&self) -> &'static str {
        match self {
            WebhookError::InvalidSignature => "invalid_signature",
            WebhookError::SigningSecretMissing { .. } => "signing_secret_missing",
            WebhookError::MalformedPayload(_) => "malformed_payload",
            WebhookError::MissingType { .. } => "missing_type",
            WebhookError::JobClassNotFound { .. } => "job_class_not_found",
            WebhookError::Store(_) => "store_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
            WebhookError::MalformedPayload(_) | WebhookError::MissingType { .. } => {
                StatusCode::BAD_REQUEST
            }
            WebhookError::SigningSecretMissing { .. }
            | WebhookError::JobClassNotFound { .. }
            | WebhookError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
