//! Web server module for handling inbound Twilio webhooks.
//!
//! This module provides:
//! - Request signature verification
//! - The ingestion pipeline (verify → persist → classify → dispatch)
//! - axum handlers and the router
//!
//! ## Flow
//!
//! ```text
//! POST → signature → WebhookStore → EventTypeResolver → Dispatcher → 200
//! ```

pub mod handlers;
pub mod ingest;
pub mod signature;

pub use handlers::{
    decode_payload, health, request_url, router, twilio_webhook, twilio_webhook_keyed, AppState,
    HealthResponse, WebhookResponse,
};
pub use ingest::{InboundRequest, IngestError, IngestReceipt, IngestionController, Stage};
pub use signature::{compute_signature, verify_request, verify_twilio_signature, SignedRequest};
