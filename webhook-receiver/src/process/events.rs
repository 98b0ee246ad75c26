//! In-process notifications for classified webhooks.
//!
//! Every subscriber owns an unbounded queue, so `notify` never blocks and
//! never drops an event for a subscriber that is still alive, however far
//! behind it is. Subscribers whose receiver was dropped are pruned on the
//! next send.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use crate::store::WebhookRecord;

/// A named notification carrying the record it is about.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    /// Namespace plus lowercased event type, e.g. `webhooks::initiated`
    pub name: String,
    pub record: WebhookRecord,
}

pub type EventReceiver = mpsc::UnboundedReceiver<WebhookEvent>;

#[derive(Clone, Default)]
pub struct Notifier {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<WebhookEvent>>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> EventReceiver {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        receiver
    }

    /// Deliver an event to every live subscriber; returns how many received it.
    pub fn notify(&self, name: String, record: WebhookRecord) -> usize {
        let event = WebhookEvent { name, record };
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // A send error means the receiver is gone.
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
        let delivered = subscribers.len();

        debug!(subscribers = delivered, event = %event.name, "webhook_event_broadcast");
        delivered
    }
}
