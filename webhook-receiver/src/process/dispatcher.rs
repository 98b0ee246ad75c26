//! Routing of classified webhooks to notifications and follow-up jobs.
//!
//! The routing table maps event types to job class names exactly as
//! configured. Names are turned into jobs through the [`JobRegistry`],
//! which is populated in code at startup; a configured name the registry
//! does not know is a configuration error reported at dispatch time.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{error, info};

use super::events::Notifier;
use super::resolver::{route_key, ResolvedType};
use crate::error::WebhookError;
use crate::queue::{
    ForwardToQueueJob, JobSink, LogRecordJob, Publisher, WebhookJob, FORWARD_TO_QUEUE, LOG_RECORD,
};
use crate::store::WebhookRecord;

/// Event type to job class mapping with normalized keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    routes: HashMap<String, String>,
}

impl RoutingTable {
    /// Build a table; event types are lowercased and dots become underscores.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            routes: pairs
                .into_iter()
                .map(|(event_type, job_class)| (route_key(event_type.as_ref()), job_class.into()))
                .collect(),
        }
    }

    /// Job class for an event type; an empty class counts as no route.
    pub fn lookup(&self, event_type: &str) -> Option<&str> {
        self.routes
            .get(&route_key(event_type))
            .map(String::as_str)
            .filter(|job_class| !job_class.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.routes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

pub type JobFactory = Arc<dyn Fn(WebhookRecord) -> Box<dyn WebhookJob> + Send + Sync>;

/// Job class names to job constructors.
#[derive(Clone, Default)]
pub struct JobRegistry {
    factories: HashMap<String, JobFactory>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("job_classes", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bundled jobs; `forward_to_queue` needs a publisher.
    pub fn with_builtin_jobs(publisher: Option<Publisher>) -> Self {
        let mut registry = Self::new();
        registry.register(LOG_RECORD, |record| Box::new(LogRecordJob::new(record)));

        if let Some(publisher) = publisher {
            registry.register(FORWARD_TO_QUEUE, move |record| {
                Box::new(ForwardToQueueJob::new(publisher.clone(), record))
            });
        }

        registry
    }

    pub fn register<F>(&mut self, job_class: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(WebhookRecord) -> Box<dyn WebhookJob> + Send + Sync + 'static,
    {
        self.factories.insert(job_class.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, job_class: &str) -> bool {
        self.factories.contains_key(job_class)
    }

    pub fn build(&self, job_class: &str, record: WebhookRecord) -> Option<Box<dyn WebhookJob>> {
        self.factories.get(job_class).map(|factory| factory(record))
    }
}

/// What dispatch did besides notifying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Enqueued { job_class: String },
    NoJobConfigured,
}

#[derive(Clone)]
pub struct Dispatcher {
    namespace: String,
    routes: Arc<RoutingTable>,
    registry: Arc<JobRegistry>,
    notifier: Notifier,
    sink: Arc<dyn JobSink>,
}

impl Dispatcher {
    pub fn new(
        namespace: impl Into<String>,
        routes: Arc<RoutingTable>,
        registry: Arc<JobRegistry>,
        notifier: Notifier,
        sink: Arc<dyn JobSink>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            routes,
            registry,
            notifier,
            sink,
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Routes whose job class is not registered, as `(event_type, job_class)`.
    pub fn unregistered_routes(&self) -> Vec<(String, String)> {
        self.routes
            .iter()
            .filter(|(_, job_class)| !job_class.is_empty() && !self.registry.contains(job_class))
            .map(|(event_type, job_class)| (event_type.to_string(), job_class.to_string()))
            .collect()
    }

    /// Notification name for a resolved type.
    pub fn event_name(&self, resolved: &ResolvedType) -> String {
        format!("{}{}", self.namespace, resolved.event_key())
    }

    /// Broadcast the event, then enqueue the routed job if there is one.
    pub fn dispatch(
        &self,
        record: &WebhookRecord,
        resolved: &ResolvedType,
    ) -> Result<DispatchOutcome, WebhookError> {
        let event_name = self.event_name(resolved);
        let subscribers = self.notifier.notify(event_name.clone(), record.clone());

        info!(
            record_id = record.id,
            event = %event_name,
            subscribers = subscribers,
            "webhook_event_notified"
        );

        let Some(job_class) = self.routes.lookup(&resolved.value) else {
            info!(record_id = record.id, event_type = %resolved.route_key(), "webhook_no_job_configured");
            return Ok(DispatchOutcome::NoJobConfigured);
        };

        let Some(job) = self.registry.build(job_class, record.clone()) else {
            error!(
                record_id = record.id,
                event_type = %resolved.route_key(),
                job_class = %job_class,
                "webhook_job_class_not_found"
            );
            return Err(WebhookError::JobClassNotFound {
                id: record.id,
                event_type: resolved.value.clone(),
                job_class: job_class.to_string(),
            });
        };

        self.sink.enqueue(job);

        info!(record_id = record.id, job_class = %job_class, "webhook_job_enqueued");

        Ok(DispatchOutcome::Enqueued {
            job_class: job_class.to_string(),
        })
    }
}
