//! Append-only JSON-lines webhook store.
//!
//! Every create and every update appends a full snapshot of the record. On
//! open the file is replayed and the last snapshot of each id wins, so the
//! file never has to be rewritten in place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{Payload, RecordedException, StoreError, WebhookRecord, WebhookStore};

pub struct JsonlStore {
    path: PathBuf,
    state: Mutex<JsonlState>,
}

struct JsonlState {
    file: File,
    /// File length after the last complete snapshot
    len: u64,
    records: BTreeMap<u64, WebhookRecord>,
    next_id: u64,
}

impl JsonlState {
    async fn append(&mut self, record: &WebhookRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        // Bytes past the last complete snapshot are a torn line; start a fresh one.
        let start = self.file.metadata().await?.len();
        if start != self.len {
            warn!(expected = self.len, actual = start, "webhook_store_torn_tail");
            line.insert(0, b'\n');
        }

        if let Err(e) = self.write_line(&line).await {
            // Roll back a partial write so the next snapshot lands on its own line.
            if let Err(truncate) = self.file.set_len(start).await {
                warn!(error = %truncate, "webhook_store_rollback_failed");
            }
            return Err(e.into());
        }

        self.len = start + line.len() as u64;
        Ok(())
    }

    async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.file.write_all(line).await?;
        self.file.flush().await
    }
}

impl JsonlStore {
    /// Open (or create) the store file and replay existing snapshots.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let records = replay(&path, &contents);

        let next_id = records.keys().next_back().map(|id| id + 1).unwrap_or(1);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        // A torn final line must not swallow the next snapshot.
        if !contents.is_empty() && !contents.ends_with('\n') {
            file.write_all(b"\n").await?;
            file.flush().await?;
        }
        let len = file.metadata().await?.len();

        info!(
            path = %path.display(),
            records = records.len(),
            next_id = next_id,
            "webhook_store_opened"
        );

        Ok(Self {
            path,
            state: Mutex::new(JsonlState {
                file,
                len,
                records,
                next_id,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Rebuild the record set from file contents, skipping unreadable lines.
fn replay(path: &Path, contents: &str) -> BTreeMap<u64, WebhookRecord> {
    let mut records = BTreeMap::new();

    for (index, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<WebhookRecord>(line) {
            Ok(record) => {
                records.insert(record.id, record);
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %e,
                    "webhook_store_line_skipped"
                );
            }
        }
    }

    records
}

#[async_trait]
impl WebhookStore for JsonlStore {
    async fn create(
        &self,
        name: &str,
        url: &str,
        payload: Payload,
    ) -> Result<WebhookRecord, StoreError> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let record = WebhookRecord {
            id: state.next_id,
            name: name.to_string(),
            url: url.to_string(),
            payload,
            exception: None,
            created_at: now,
            updated_at: now,
        };

        state.next_id += 1;
        state.append(&record).await?;
        state.records.insert(record.id, record.clone());

        Ok(record)
    }

    async fn mark_failed(&self, id: u64, exception: RecordedException) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;

        let mut updated = state
            .records
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))?;
        updated.exception = Some(exception);
        updated.updated_at = Utc::now();

        state.append(&updated).await?;
        state.records.insert(id, updated);

        Ok(())
    }

    async fn find(&self, id: u64) -> Result<Option<WebhookRecord>, StoreError> {
        Ok(self.state.lock().await.records.get(&id).cloned())
    }

    async fn all(&self) -> Result<Vec<WebhookRecord>, StoreError> {
        Ok(self.state.lock().await.records.values().cloned().collect())
    }
}
