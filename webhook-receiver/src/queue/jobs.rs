//! Follow-up jobs and the sink they are handed to.
//!
//! Enqueueing is fire-and-forget: the request that triggered a job never
//! waits for it, and job failures are only logged.

use async_trait::async_trait;
use tokio::runtime::Handle;
use tracing::{error, info};

use super::publisher::Publisher;
use super::types::JobMessage;
use crate::store::WebhookRecord;

/// Job class that logs the record.
pub const LOG_RECORD: &str = "log_record";

/// Job class that forwards the record to RabbitMQ.
pub const FORWARD_TO_QUEUE: &str = "forward_to_queue";

/// Follow-up work built from a webhook record.
#[async_trait]
pub trait WebhookJob: Send {
    /// Job class identifier, used in logs.
    fn name(&self) -> &str;

    async fn handle(self: Box<Self>) -> anyhow::Result<()>;
}

/// Non-blocking hand-off to whatever executes jobs.
pub trait JobSink: Send + Sync {
    fn enqueue(&self, job: Box<dyn WebhookJob>);
}

/// Runs every job on its own tokio task.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpawnSink;

impl JobSink for SpawnSink {
    fn enqueue(&self, job: Box<dyn WebhookJob>) {
        let name = job.name().to_string();

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                error!(job = %name, error = %e, "job_enqueue_without_runtime");
                return;
            }
        };

        handle.spawn(async move {
            match job.handle().await {
                Ok(()) => info!(job = %name, "job_completed"),
                Err(e) => error!(job = %name, error = %e, "job_failed"),
            }
        });
    }
}

/// Writes the record to the log.
pub struct LogRecordJob {
    record: WebhookRecord,
}

impl LogRecordJob {
    pub fn new(record: WebhookRecord) -> Self {
        Self { record }
    }
}

#[async_trait]
impl WebhookJob for LogRecordJob {
    fn name(&self) -> &str {
        LOG_RECORD
    }

    async fn handle(self: Box<Self>) -> anyhow::Result<()> {
        info!(
            record_id = self.record.id,
            name = %self.record.name,
            url = %self.record.url,
            payload = %serde_json::Value::Object(self.record.payload.clone()),
            "webhook_record_logged"
        );
        Ok(())
    }
}

/// Publishes the record to the job queue for an external worker.
pub struct ForwardToQueueJob {
    publisher: Publisher,
    record: WebhookRecord,
}

impl ForwardToQueueJob {
    pub fn new(publisher: Publisher, record: WebhookRecord) -> Self {
        Self { publisher, record }
    }
}

#[async_trait]
impl WebhookJob for ForwardToQueueJob {
    fn name(&self) -> &str {
        FORWARD_TO_QUEUE
    }

    async fn handle(self: Box<Self>) -> anyhow::Result<()> {
        let message = JobMessage::new(FORWARD_TO_QUEUE, self.record);
        self.publisher.publish_job(&message).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use tokio::sync::Notify;

    use super::*;
    use crate::store::Payload;

    fn record() -> WebhookRecord {
        WebhookRecord {
            id: 5,
            name: "twilio".to_string(),
            url: "/webhooks/twilio".to_string(),
            payload: Payload::new(),
            exception: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    struct SignalJob {
        done: Arc<Notify>,
        fail: bool,
    }

    #[async_trait]
    impl WebhookJob for SignalJob {
        fn name(&self) -> &str {
            "signal"
        }

        async fn handle(self: Box<Self>) -> anyhow::Result<()> {
            self.done.notify_one();
            if self.fail {
                anyhow::bail!("job blew up");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_spawn_sink_runs_job() {
        let done = Arc::new(Notify::new());
        SpawnSink.enqueue(Box::new(SignalJob {
            done: Arc::clone(&done),
            fail: false,
        }));

        tokio::time::timeout(std::time::Duration::from_secs(1), done.notified())
            .await
            .expect("job should run");
    }

    #[tokio::test]
    async fn test_spawn_sink_isolates_failures() {
        let done = Arc::new(Notify::new());
        SpawnSink.enqueue(Box::new(SignalJob {
            done: Arc::clone(&done),
            fail: true,
        }));

        tokio::time::timeout(std::time::Duration::from_secs(1), done.notified())
            .await
            .expect("failing job should still run");
    }

    #[test]
    fn test_spawn_sink_without_runtime_drops_job() {
        SpawnSink.enqueue(Box::new(LogRecordJob::new(record())));
    }

    #[tokio::test]
    async fn test_log_record_job() {
        let job = Box::new(LogRecordJob::new(record()));
        assert_eq!(job.name(), LOG_RECORD);
        job.handle().await.unwrap();
    }
}
