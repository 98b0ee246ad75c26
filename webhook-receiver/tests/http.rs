//! End-to-end tests driving the router through `tower::ServiceExt::oneshot`.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::sync::mpsc::error::TryRecvError;
use tower::ServiceExt;

use twilio_webhooks::web::compute_signature;
use twilio_webhooks::{
    router, AppState, Config, EventReceiver, JobRegistry, JobSink, MemoryStore, Payload,
    RoutingTable, WebhookJob, WebhookRecord, WebhookStore,
};

const SECRET: &str = "test_signing_token";
const BASE_URL: &str = "https://localhost";
const PATH: &str = "/webhooks/twilio";

struct DummyJob {
    record: WebhookRecord,
}

#[async_trait]
impl WebhookJob for DummyJob {
    fn name(&self) -> &str {
        "dummy_job"
    }

    async fn handle(self: Box<Self>) -> anyhow::Result<()> {
        anyhow::ensure!(self.record.id > 0, "record without id");
        Ok(())
    }
}

/// Keeps enqueued jobs so tests can inspect them.
#[derive(Default)]
struct CollectingSink {
    jobs: Mutex<Vec<String>>,
}

impl JobSink for CollectingSink {
    fn enqueue(&self, job: Box<dyn WebhookJob>) {
        self.jobs.lock().unwrap().push(job.name().to_string());
    }
}

struct Harness {
    app: Router,
    store: Arc<MemoryStore>,
    sink: Arc<CollectingSink>,
    job_records: Arc<Mutex<Vec<u64>>>,
    events: EventReceiver,
}

impl Harness {
    fn new(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(CollectingSink::default());
        let job_records = Arc::new(Mutex::new(Vec::new()));

        let mut registry = JobRegistry::new();
        let seen = Arc::clone(&job_records);
        registry.register("dummy_job", move |record: WebhookRecord| {
            seen.lock().unwrap().push(record.id);
            Box::new(DummyJob { record })
        });

        let state = AppState::new(config, store.clone(), registry, sink.clone());
        let events = state.controller.dispatcher().notifier().subscribe();

        Self {
            app: router(state),
            store,
            sink,
            job_records,
            events,
        }
    }

    async fn post_json(&self, path: &str, payload: &Value, signature: Option<&str>) -> (StatusCode, Value) {
        self.post(path, "application/json", payload.to_string(), signature).await
    }

    async fn post(
        &self,
        path: &str,
        content_type: &str,
        body: String,
        signature: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header("host", "localhost")
            .header("content-type", content_type);
        if let Some(signature) = signature {
            builder = builder.header("X-Twilio-Signature", signature);
        }
        let request = builder.body(Body::from(body)).expect("request");

        let response = self.app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = response.into_body().collect().await.expect("body").to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        (status, body)
    }

    async fn records(&self) -> Vec<WebhookRecord> {
        self.store.all().await.unwrap()
    }

    fn jobs(&self) -> Vec<String> {
        self.sink.jobs.lock().unwrap().clone()
    }
}

fn config() -> Config {
    Config {
        signing_secret: Some(SECRET.to_string()),
        public_base_url: Some(BASE_URL.to_string()),
        jobs: RoutingTable::from_pairs([("initiated", "dummy_job")]),
        ..Config::default()
    }
}

fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        other => panic!("unsupported test payload {other}"),
    }
}

fn sign(secret: &str, path: &str, body: &Value) -> String {
    compute_signature(secret, &format!("{BASE_URL}{path}"), &payload(body.clone())).expect("signature")
}

#[tokio::test]
async fn it_can_handle_a_valid_request() {
    let mut harness = Harness::new(config());
    let body = json!({"CallStatus": "initiated", "key": "value"});

    let (status, response) = harness
        .post_json(PATH, &body, Some(&sign(SECRET, PATH, &body)))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "ok");

    let records = harness.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(Value::Object(records[0].payload.clone()), body);
    assert!(records[0].exception.is_none());
    assert_eq!(response["record_id"], records[0].id);

    let event = harness.events.try_recv().expect("event");
    assert_eq!(event.name, "webhooks::initiated");
    assert_eq!(event.record.id, records[0].id);

    assert_eq!(harness.jobs(), vec!["dummy_job".to_string()]);
    assert_eq!(*harness.job_records.lock().unwrap(), vec![records[0].id]);
}

#[tokio::test]
async fn it_can_handle_a_valid_request_even_with_wrong_case() {
    let mut harness = Harness::new(config());
    let body = json!({"CallStatus": "Initiated", "key": "value"});

    let (status, _) = harness
        .post_json(PATH, &body, Some(&sign(SECRET, PATH, &body)))
        .await;

    assert_eq!(status, StatusCode::OK);

    let records = harness.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payload["CallStatus"], "Initiated");

    assert_eq!(harness.events.try_recv().expect("event").name, "webhooks::initiated");
    assert_eq!(*harness.job_records.lock().unwrap(), vec![records[0].id]);
}

#[tokio::test]
async fn it_handles_form_encoded_requests() {
    let harness = Harness::new(config());
    let mut form = Payload::new();
    form.insert("CallStatus".to_string(), json!("initiated"));
    form.insert("From".to_string(), json!("+15005550006"));
    let signature = compute_signature(SECRET, &format!("{BASE_URL}{PATH}"), &form).unwrap();

    let (status, _) = harness
        .post(
            PATH,
            "application/x-www-form-urlencoded",
            "CallStatus=initiated&From=%2B15005550006".to_string(),
            Some(&signature),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(harness.records().await[0].payload["From"], "+15005550006");
}

#[tokio::test]
async fn a_request_with_an_invalid_signature_wont_be_logged() {
    let mut harness = Harness::new(config());
    let body = json!({"CallStatus": "Initiated", "key": "value"});

    let (status, response) = harness.post_json(PATH, &body, Some("invalid-signature")).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(response["status"], "invalid_signature");
    assert!(response.get("record_id").is_none());
    assert!(harness.records().await.is_empty());
    assert!(matches!(harness.events.try_recv(), Err(TryRecvError::Empty)));
    assert!(harness.jobs().is_empty());
}

#[tokio::test]
async fn an_unsigned_request_wont_be_logged() {
    let harness = Harness::new(config());
    let body = json!({"CallStatus": "initiated"});

    let (status, _) = harness.post_json(PATH, &body, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(harness.records().await.is_empty());
}

#[tokio::test]
async fn a_request_with_an_invalid_payload_will_be_logged_but_not_dispatched() {
    let mut harness = Harness::new(config());
    let body = json!(["invalid_payload"]);

    let (status, response) = harness
        .post_json(PATH, &body, Some(&sign(SECRET, PATH, &body)))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["status"], "missing_type");
    assert_eq!(response["record_id"], 1);

    let records = harness.records().await;
    assert_eq!(records.len(), 1);
    assert!(records[0].payload.get("CallStatus").is_none());
    assert_eq!(records[0].payload["0"], "invalid_payload");
    assert_eq!(
        records[0].exception.as_ref().map(|e| e.message.as_str()),
        Some("Webhook call id `1` did not contain a type. Valid Twilio webhook calls should contain a type.")
    );

    assert!(matches!(harness.events.try_recv(), Err(TryRecvError::Empty)));
    assert!(harness.jobs().is_empty());
}

#[tokio::test]
async fn a_request_with_a_config_key_will_use_the_correct_signing_token() {
    let mut config = Config {
        signing_secret: Some("secret1".to_string()),
        ..config()
    };
    config
        .keyed_signing_secrets
        .insert("somekey".to_string(), "secret2".to_string());
    let harness = Harness::new(config);

    let body = json!({"CallStatus": "initiated", "key": "value"});
    let keyed_path = format!("{PATH}/somekey");

    let (status, _) = harness
        .post_json(&keyed_path, &body, Some(&sign("secret2", &keyed_path, &body)))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = harness
        .post_json(&keyed_path, &body, Some(&sign("secret1", &keyed_path, &body)))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert_eq!(harness.records().await.len(), 1);
}

#[tokio::test]
async fn an_unknown_config_key_is_a_missing_secret() {
    let harness = Harness::new(config());
    let body = json!({"CallStatus": "initiated"});
    let keyed_path = format!("{PATH}/unknown");

    let (status, response) = harness
        .post_json(&keyed_path, &body, Some(&sign(SECRET, &keyed_path, &body)))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response["status"], "signing_secret_missing");
    assert!(harness.records().await.is_empty());
}

#[tokio::test]
async fn it_will_skip_validation_of_signature_when_instructed() {
    let mut harness = Harness::new(Config {
        verify_signature: false,
        ..config()
    });
    let body = json!({"CallStatus": "Initiated", "key": "value"});

    let (status, _) = harness.post_json(PATH, &body, Some("invalid-signature")).await;

    assert_eq!(status, StatusCode::OK);

    let records = harness.records().await;
    assert_eq!(records.len(), 1);
    assert!(records[0].exception.is_none());
    assert_eq!(harness.events.try_recv().expect("event").name, "webhooks::initiated");
    assert_eq!(*harness.job_records.lock().unwrap(), vec![records[0].id]);
}

#[tokio::test]
async fn a_missing_secret_is_distinct_from_a_bad_signature() {
    let harness = Harness::new(Config {
        signing_secret: None,
        ..config()
    });
    let body = json!({"CallStatus": "Initiated", "key": "value"});

    let (status, response) = harness.post_json(PATH, &body, Some("invalid-signature")).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response["status"], "signing_secret_missing");
    assert!(harness.records().await.is_empty());
}

#[tokio::test]
async fn a_configured_but_unknown_job_class_keeps_the_record() {
    let mut harness = Harness::new(Config {
        jobs: RoutingTable::from_pairs([("initiated", "job_does_not_exist")]),
        ..config()
    });
    let body = json!({"CallStatus": "initiated"});

    let (status, response) = harness
        .post_json(PATH, &body, Some(&sign(SECRET, PATH, &body)))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response["status"], "job_class_not_found");

    let records = harness.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].exception.as_ref().map(|e| e.message.as_str()),
        Some("Could not process webhook id `1` of type `initiated` because the configured job class `job_does_not_exist` does not exist.")
    );

    // The event goes out before the job lookup.
    assert_eq!(harness.events.try_recv().expect("event").name, "webhooks::initiated");
    assert!(harness.jobs().is_empty());
}

#[tokio::test]
async fn events_fire_even_when_no_job_is_configured() {
    let mut harness = Harness::new(Config {
        jobs: RoutingTable::default(),
        ..config()
    });
    let body = json!({"CallStatus": "initiated"});

    let (status, _) = harness
        .post_json(PATH, &body, Some(&sign(SECRET, PATH, &body)))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(harness.events.try_recv().expect("event").name, "webhooks::initiated");
    assert!(harness.jobs().is_empty());
}

#[tokio::test]
async fn message_status_is_used_when_call_status_is_absent() {
    let mut harness = Harness::new(Config {
        jobs: RoutingTable::from_pairs([("delivered", "dummy_job")]),
        ..config()
    });
    let body = json!({"MessageStatus": "Delivered", "MessageSid": "SM123"});

    let (status, _) = harness
        .post_json(PATH, &body, Some(&sign(SECRET, PATH, &body)))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(harness.events.try_recv().expect("event").name, "webhooks::delivered");
    assert_eq!(harness.jobs(), vec!["dummy_job".to_string()]);
}

#[tokio::test]
async fn a_malformed_body_is_rejected_without_a_record() {
    let harness = Harness::new(config());

    let (status, response) = harness
        .post(PATH, "application/json", "{not json".to_string(), Some("sig"))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(response["status"], "malformed_payload");
    assert!(harness.records().await.is_empty());
}

#[tokio::test]
async fn health_check_responds() {
    let harness = Harness::new(config());
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .expect("request");

    let response = harness.app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body, json!({"status": "ok"}));
}
