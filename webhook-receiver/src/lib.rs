//! Twilio webhooks - receive, verify, record and dispatch provider callbacks.
//!
//! This library backs the `twilio-webhooks-web` binary and can be embedded
//! in another axum application through [`web::router`].
//!
//! ## Architecture
//!
//! ```text
//! Twilio → Web Server → signature check → WebhookStore
//!                                       → EventTypeResolver → Dispatcher → Notifier
//!                                                                        → JobSink → (tokio | RabbitMQ)
//! ```

pub mod config;
pub mod error;
pub mod process;
pub mod queue;
pub mod store;
pub mod web;

// Re-export commonly used types
pub use config::{Config, SigningConfig, StoreModel};
pub use error::WebhookError;
pub use process::{
    DispatchOutcome, Dispatcher, EventReceiver, EventTypeResolver, JobRegistry, Notifier,
    ResolvedType, RoutingTable, WebhookEvent,
};
pub use queue::{JobMessage, JobSink, Publisher, SpawnSink, WebhookJob};
pub use store::{MemoryStore, JsonlStore, Payload, RecordedException, WebhookRecord, WebhookStore};
pub use web::{router, AppState, IngestionController};
