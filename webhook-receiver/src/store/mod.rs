//! Durable record of every accepted webhook call.
//!
//! Records are append-only: a record is created once per accepted request,
//! may have its `exception` set once processing fails, and is never deleted
//! here. Two models are provided:
//!
//! - [`MemoryStore`]: process-local, used by tests and throwaway deployments
//! - [`JsonlStore`]: append-only JSON-lines file replayed on startup

pub mod jsonl;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::{Config, StoreModel};
use crate::error::WebhookError;

pub use jsonl::JsonlStore;
pub use memory::MemoryStore;

/// Decoded request body: field name to scalar (or list of scalars).
pub type Payload = serde_json::Map<String, Value>;

/// One persisted webhook call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookRecord {
    /// Unique, insertion-ordered identifier assigned by the store
    pub id: u64,
    /// Logical source, e.g. "twilio"
    pub name: String,
    /// URL the provider called
    pub url: String,
    /// Raw decoded request body, original casing preserved
    pub payload: Payload,
    /// Set when processing failed after the record was created
    #[serde(default)]
    pub exception: Option<RecordedException>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Processing failure attached to a record for auditing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedException {
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub context: Value,
}

impl RecordedException {
    pub fn from_error(error: &WebhookError, context: Value) -> Self {
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
            context,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("webhook record {0} not found")]
    NotFound(u64),

    #[error("store i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait WebhookStore: Send + Sync {
    /// Persist a new record and return it with its assigned id.
    async fn create(&self, name: &str, url: &str, payload: Payload)
        -> Result<WebhookRecord, StoreError>;

    /// Attach a processing failure to an existing record.
    ///
    /// Setting the same exception twice leaves the record unchanged apart
    /// from `updated_at`.
    async fn mark_failed(&self, id: u64, exception: RecordedException) -> Result<(), StoreError>;

    async fn find(&self, id: u64) -> Result<Option<WebhookRecord>, StoreError>;

    /// All records in insertion order.
    async fn all(&self) -> Result<Vec<WebhookRecord>, StoreError>;
}

/// Build the store selected by the configuration.
pub async fn open_store(config: &Config) -> Result<Arc<dyn WebhookStore>, StoreError> {
    match config.store {
        StoreModel::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreModel::Jsonl => Ok(Arc::new(JsonlStore::open(&config.store_path).await?)),
    }
}
