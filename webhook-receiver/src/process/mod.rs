//! Webhook classification and dispatch.
//!
//! ## Processing Flow
//!
//! ```text
//! WebhookRecord → EventTypeResolver → Dispatcher → Notifier + JobSink
//! ```

pub mod dispatcher;
pub mod events;
pub mod resolver;

pub use dispatcher::{DispatchOutcome, Dispatcher, JobFactory, JobRegistry, RoutingTable};
pub use events::{EventReceiver, Notifier, WebhookEvent};
pub use resolver::{EventTypeResolver, MissingType, ResolvedType};
