//! Configuration module for environment variable parsing.
//!
//! Everything is read once at startup into an immutable [`Config`] which is
//! shared behind an `Arc`. Per-request signing settings are derived from it
//! with [`Config::signing_config`].

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::process::RoutingTable;
use crate::queue::JOB_QUEUE;

/// Prefix of the per-route-suffix signing secret variables.
const KEYED_SECRET_PREFIX: &str = "TWILIO_WEBHOOK_SECRET_";

/// Which store implementation backs the webhook records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreModel {
    /// Records live in process memory and vanish on restart
    Memory,
    /// Records are appended to a JSON-lines file
    Jsonl,
}

impl FromStr for StoreModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreModel::Memory),
            "jsonl" | "file" => Ok(StoreModel::Jsonl),
            other => Err(format!("unknown store model `{other}`")),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// Logical source name stored on every record
    pub webhook_name: String,

    /// Path the webhook endpoint is mounted on
    pub webhook_path: String,

    /// Default signing secret (the Twilio auth token)
    pub signing_secret: Option<String>,

    /// Alternate signing secrets selected by the route suffix, keyed lowercase
    pub keyed_signing_secrets: HashMap<String, String>,

    /// Header carrying the request signature
    pub signature_header: String,

    /// Whether request signatures are verified at all
    pub verify_signature: bool,

    /// Public scheme and host the provider signs against, e.g. `https://hooks.example.com`
    pub public_base_url: Option<String>,

    /// Payload fields inspected, in order, for the event type
    pub type_keys: Vec<String>,

    /// Event type to job class routing
    pub jobs: RoutingTable,

    /// Prefix of broadcast notification names
    pub event_namespace: String,

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Store model selector
    pub store: StoreModel,

    /// File used by the JSON-lines store
    pub store_path: PathBuf,

    // =========================================================================
    // Job forwarding
    // =========================================================================

    /// RabbitMQ connection URL; enables the `forward_to_queue` job when set
    pub cloudamqp_url: Option<String>,

    /// Queue forwarded jobs are published to
    pub job_queue: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: 8080,
            webhook_name: "twilio".to_string(),
            webhook_path: "/webhooks/twilio".to_string(),
            signing_secret: None,
            keyed_signing_secrets: HashMap::new(),
            signature_header: "X-Twilio-Signature".to_string(),
            verify_signature: true,
            public_base_url: None,
            type_keys: vec!["CallStatus".to_string(), "MessageStatus".to_string()],
            jobs: RoutingTable::default(),
            event_namespace: "webhooks::".to_string(),
            store: StoreModel::Memory,
            store_path: PathBuf::from("webhook_calls.jsonl"),
            cloudamqp_url: None,
            job_queue: JOB_QUEUE.to_string(),
        }
    }
}

/// Signing settings for a single request.
///
/// Built fresh for every request so that the route suffix can pick a
/// different secret.
#[derive(Debug, Clone)]
pub struct SigningConfig {
    pub name: String,
    pub secret: Option<String>,
    pub signature_header: String,
    pub verify: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        Config {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),

            webhook_name: env::var("WEBHOOK_NAME").unwrap_or(defaults.webhook_name),

            webhook_path: env::var("WEBHOOK_PATH")
                .map(|p| normalize_path(&p))
                .unwrap_or(defaults.webhook_path),

            signing_secret: env::var("TWILIO_WEBHOOK_SECRET").ok(),

            keyed_signing_secrets: parse_keyed_secrets(env::vars()),

            signature_header: env::var("TWILIO_SIGNATURE_HEADER")
                .unwrap_or(defaults.signature_header),

            verify_signature: parse_bool("TWILIO_SIGNATURE_VERIFY", defaults.verify_signature),

            public_base_url: env::var("PUBLIC_BASE_URL")
                .ok()
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),

            type_keys: parse_csv("TWILIO_WEBHOOK_TYPE_KEYS")
                .filter(|keys| !keys.is_empty())
                .unwrap_or(defaults.type_keys),

            jobs: env::var("TWILIO_WEBHOOK_JOBS")
                .map(|raw| parse_routes(&raw))
                .unwrap_or_default(),

            event_namespace: env::var("WEBHOOK_EVENT_NAMESPACE")
                .unwrap_or(defaults.event_namespace),

            store: match env::var("WEBHOOK_STORE") {
                Ok(raw) => raw.parse().unwrap_or_else(|e| {
                    warn!(env_var = "WEBHOOK_STORE", value = %raw, error = %e, "Invalid store model, using memory");
                    StoreModel::Memory
                }),
                Err(_) => defaults.store,
            },

            store_path: env::var("WEBHOOK_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.store_path),

            cloudamqp_url: env::var("CLOUDAMQP_URL").ok().filter(|u| !u.trim().is_empty()),

            job_queue: env::var("WEBHOOK_JOB_QUEUE").unwrap_or(defaults.job_queue),
        }
    }

    /// Signing settings for a request, optionally selecting a keyed secret.
    ///
    /// An unknown key yields no secret rather than falling back to the
    /// default one.
    pub fn signing_config(&self, config_key: Option<&str>) -> SigningConfig {
        let secret = match config_key {
            Some(key) => self
                .keyed_signing_secrets
                .get(&key.to_ascii_lowercase())
                .cloned(),
            None => self.signing_secret.clone(),
        };

        SigningConfig {
            name: self.webhook_name.clone(),
            secret,
            signature_header: self.signature_header.clone(),
            verify: self.verify_signature,
        }
    }
}

/// Collect `TWILIO_WEBHOOK_SECRET_<KEY>` variables into a lowercase-keyed map.
fn parse_keyed_secrets(vars: impl Iterator<Item = (String, String)>) -> HashMap<String, String> {
    vars.filter_map(|(name, value)| {
        let key = name.strip_prefix(KEYED_SECRET_PREFIX)?;
        if key.is_empty() {
            return None;
        }
        Some((key.to_ascii_lowercase(), value))
    })
    .collect()
}

/// Parse a routing table like "initiated=log_record,completed=forward_to_queue".
fn parse_routes(raw: &str) -> RoutingTable {
    let mut pairs = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.split_once('=') {
            Some((event_type, job_class)) if !event_type.trim().is_empty() => {
                pairs.push((event_type.trim().to_string(), job_class.trim().to_string()));
            }
            _ => {
                warn!(env_var = "TWILIO_WEBHOOK_JOBS", entry = %entry, "Invalid route entry, skipping");
            }
        }
    }

    RoutingTable::from_pairs(pairs)
}

/// Parse a boolean flag, accepting the usual spellings.
fn parse_bool(name: &str, default: bool) -> bool {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            warn!(env_var = name, value = %raw, "Invalid boolean, using default");
            default
        }
    }
}

/// Parse a comma-separated list of strings.
fn parse_csv(name: &str) -> Option<Vec<String>> {
    env::var(name).ok().map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

fn normalize_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
