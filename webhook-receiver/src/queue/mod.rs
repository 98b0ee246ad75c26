//! Follow-up job plumbing.
//!
//! This module provides:
//! - The [`WebhookJob`] trait implemented by follow-up work
//! - [`JobSink`], the non-blocking hand-off to an execution facility
//! - An async RabbitMQ publisher for jobs executed by external workers
//!
//! ## Flow
//!
//! ```text
//! Dispatcher → JobRegistry factory → JobSink::enqueue → (tokio task | RabbitMQ)
//! ```

pub mod jobs;
pub mod publisher;
pub mod types;

pub use jobs::{
    ForwardToQueueJob, JobSink, LogRecordJob, SpawnSink, WebhookJob, FORWARD_TO_QUEUE, LOG_RECORD,
};
pub use publisher::Publisher;
pub use types::{JobMessage, JOB_QUEUE};
