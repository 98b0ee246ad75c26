//! Queue message types for forwarded webhook jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::WebhookRecord;

/// Default queue name for forwarded webhook jobs.
pub const JOB_QUEUE: &str = "twilio_webhook_jobs";

/// A follow-up job handed to an external worker through RabbitMQ.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMessage {
    /// Job class the route resolved to
    pub job_class: String,
    /// The full webhook record the job is about
    pub record: WebhookRecord,
    pub enqueued_at: DateTime<Utc>,
}

impl JobMessage {
    pub fn new(job_class: impl Into<String>, record: WebhookRecord) -> Self {
        Self {
            job_class: job_class.into(),
            record,
            enqueued_at: Utc::now(),
        }
    }

    /// AMQP message id, stable for a given record and job class.
    pub fn message_id(&self) -> String {
        format!("{}-{}-{}", self.record.name, self.record.id, self.job_class)
    }
}
