//! The webhook ingestion pipeline.
//!
//! ```text
//! Received → Verifying → Rejected
//!                      → Verified → Persisted → Classifying → ClassificationFailed
//!                                                           → Classified → Dispatching → DispatchFailed
//!                                                                                      → Done
//! ```
//!
//! A request that fails verification never reaches the store. A store
//! failure stops the request in `Verified` with no record. Every failure
//! after persistence is written onto the record before it is returned, and
//! the record itself is kept.

use std::fmt;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::WebhookError;
use crate::process::{DispatchOutcome, Dispatcher, EventTypeResolver, ResolvedType};
use crate::store::{Payload, RecordedException, WebhookRecord, WebhookStore};
use crate::web::signature::{verify_request, SignedRequest};

/// Pipeline stages a request moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Verifying,
    Rejected,
    Verified,
    Persisted,
    Classifying,
    ClassificationFailed,
    Classified,
    Dispatching,
    DispatchFailed,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Verifying => "verifying",
            Stage::Rejected => "rejected",
            Stage::Verified => "verified",
            Stage::Persisted => "persisted",
            Stage::Classifying => "classifying",
            Stage::ClassificationFailed => "classification_failed",
            Stage::Classified => "classified",
            Stage::Dispatching => "dispatching",
            Stage::DispatchFailed => "dispatch_failed",
            Stage::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Stage::Rejected | Stage::ClassificationFailed | Stage::DispatchFailed | Stage::Done
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded inbound request.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// Full URL the provider signed
    pub url: String,
    /// Raw body bytes
    pub body: Vec<u8>,
    /// Decoded body
    pub payload: Payload,
    /// Signature header value
    pub signature: Option<String>,
    /// Route suffix selecting an alternate secret
    pub config_key: Option<String>,
}

/// Successful ingestion.
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub record: WebhookRecord,
    pub resolved: ResolvedType,
    pub outcome: DispatchOutcome,
    /// Every stage the request passed through, in order
    pub stages: Vec<Stage>,
}

/// Failed ingestion with the stage it stopped in.
#[derive(Debug)]
pub struct IngestError {
    pub stage: Stage,
    /// Set once a record exists
    pub record_id: Option<u64>,
    pub error: WebhookError,
}

impl IngestError {
    fn rejected(error: WebhookError) -> Self {
        Self {
            stage: Stage::Rejected,
            record_id: None,
            error,
        }
    }
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.error, self.stage)
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Stages entered so far by one request.
#[derive(Debug, Default)]
struct StageTrail {
    stages: Vec<Stage>,
}

impl StageTrail {
    fn enter(&mut self, stage: Stage, record_id: Option<u64>) {
        debug!(record_id = ?record_id, stage = %stage, "webhook_stage_entered");
        self.stages.push(stage);
    }
}

/// Runs the pipeline for one endpoint configuration.
#[derive(Clone)]
pub struct IngestionController {
    config: Arc<Config>,
    store: Arc<dyn WebhookStore>,
    resolver: EventTypeResolver,
    dispatcher: Dispatcher,
}

impl IngestionController {
    pub fn new(config: Arc<Config>, store: Arc<dyn WebhookStore>, dispatcher: Dispatcher) -> Self {
        let resolver = EventTypeResolver::new(config.type_keys.clone());
        Self {
            config,
            store,
            resolver,
            dispatcher,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn WebhookStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn ingest(&self, request: InboundRequest) -> Result<IngestReceipt, IngestError> {
        let signing = self.config.signing_config(request.config_key.as_deref());
        let mut trail = StageTrail::default();
        trail.enter(Stage::Received, None);

        info!(
            url = %request.url,
            config_key = ?request.config_key,
            has_signature = request.signature.is_some(),
            stage = %Stage::Received,
            "webhook_received"
        );

        let signed = SignedRequest {
            url: &request.url,
            body: &request.body,
            params: &request.payload,
            signature: request.signature.as_deref(),
        };

        trail.enter(Stage::Verifying, None);
        match verify_request(&signed, &signing) {
            Ok(true) => {}
            Ok(false) => {
                warn!(url = %request.url, stage = %Stage::Rejected, "webhook_signature_invalid");
                return Err(IngestError::rejected(WebhookError::InvalidSignature));
            }
            Err(e) => {
                error!(
                    name = %signing.name,
                    config_key = ?request.config_key,
                    error = %e,
                    stage = %Stage::Rejected,
                    "webhook_signing_secret_missing"
                );
                return Err(IngestError::rejected(e));
            }
        }

        trail.enter(Stage::Verified, None);

        let record = self
            .store
            .create(&signing.name, &request.url, request.payload)
            .await
            .map_err(|e| {
                error!(error = %e, stage = %Stage::Verified, "webhook_store_failed");
                IngestError {
                    stage: Stage::Verified,
                    record_id: None,
                    error: e.into(),
                }
            })?;

        info!(record_id = record.id, stage = %Stage::Persisted, "webhook_persisted");
        trail.enter(Stage::Persisted, Some(record.id));

        trail.enter(Stage::Classifying, Some(record.id));
        let resolved = match self.resolver.resolve(&record.payload) {
            Ok(resolved) => resolved,
            Err(missing) => {
                let error = WebhookError::MissingType { id: record.id };
                let context = json!({
                    "stage": Stage::Classifying.as_str(),
                    "candidate_keys": missing.candidates,
                });
                return Err(self.fail(&record, Stage::ClassificationFailed, error, context).await);
            }
        };

        info!(
            record_id = record.id,
            event_type = %resolved.value,
            matched_key = %resolved.key,
            stage = %Stage::Classified,
            "webhook_classified"
        );
        trail.enter(Stage::Classified, Some(record.id));

        trail.enter(Stage::Dispatching, Some(record.id));
        let outcome = match self.dispatcher.dispatch(&record, &resolved) {
            Ok(outcome) => outcome,
            Err(error) => {
                let context = json!({
                    "stage": Stage::Dispatching.as_str(),
                    "event_type": resolved.value,
                    "matched_key": resolved.key,
                });
                return Err(self.fail(&record, Stage::DispatchFailed, error, context).await);
            }
        };

        info!(record_id = record.id, outcome = ?outcome, stage = %Stage::Done, "webhook_processed");
        trail.enter(Stage::Done, Some(record.id));

        Ok(IngestReceipt {
            record,
            resolved,
            outcome,
            stages: trail.stages,
        })
    }

    /// Annotate the record with the failure and build the error to return.
    async fn fail(
        &self,
        record: &WebhookRecord,
        stage: Stage,
        error: WebhookError,
        context: serde_json::Value,
    ) -> IngestError {
        error!(
            record_id = record.id,
            kind = error.kind(),
            error = %error,
            stage = %stage,
            "webhook_processing_failed"
        );

        let exception = RecordedException::from_error(&error, context);
        if let Err(e) = self.store.mark_failed(record.id, exception).await {
            warn!(record_id = record.id, error = %e, "webhook_mark_failed_error");
        }

        IngestError {
            stage,
            record_id: Some(record.id),
            error,
        }
    }
}
