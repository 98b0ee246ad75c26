//! In-memory webhook store.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::{Payload, RecordedException, StoreError, WebhookRecord, WebhookStore};

/// Records kept in a vector; ids are assigned under the same lock as the push.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<WebhookRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookStore for MemoryStore {
    async fn create(
        &self,
        name: &str,
        url: &str,
        payload: Payload,
    ) -> Result<WebhookRecord, StoreError> {
        let mut records = self.records.lock().await;
        let now = Utc::now();

        // Records are never removed, so the length is a safe id source.
        let record = WebhookRecord {
            id: records.len() as u64 + 1,
            name: name.to_string(),
            url: url.to_string(),
            payload,
            exception: None,
            created_at: now,
            updated_at: now,
        };

        records.push(record.clone());
        Ok(record)
    }

    async fn mark_failed(&self, id: u64, exception: RecordedException) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;

        record.exception = Some(exception);
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn find(&self, id: u64) -> Result<Option<WebhookRecord>, StoreError> {
        Ok(self.records.lock().await.iter().find(|r| r.id == id).cloned())
    }

    async fn all(&self) -> Result<Vec<WebhookRecord>, StoreError> {
        Ok(self.records.lock().await.clone())
    }
}
