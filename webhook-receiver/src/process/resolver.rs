//! Event type extraction.
//!
//! Twilio does not send a dedicated event-type field; the status field of
//! the resource the callback is about plays that role (`CallStatus` for
//! voice, `MessageStatus` for messaging, ...). The resolver walks an ordered
//! list of candidate fields and takes the first one carrying a value.

use serde_json::Value;
use thiserror::Error;

use crate::store::Payload;

/// An event type pulled out of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedType {
    /// Value as sent by the provider, original casing
    pub value: String,
    /// Candidate field the value came from
    pub key: String,
}

impl ResolvedType {
    /// Lowercased type used for notifications.
    pub fn event_key(&self) -> String {
        self.value.to_lowercase()
    }

    /// Lowercased type with dots replaced, used for routing lookups.
    pub fn route_key(&self) -> String {
        route_key(&self.value)
    }
}

/// Normalize an event type for routing-table lookups.
pub fn route_key(event_type: &str) -> String {
    event_type.replace('.', "_").to_lowercase()
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("none of the candidate type fields {candidates:?} carried a value")]
pub struct MissingType {
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct EventTypeResolver {
    candidate_keys: Vec<String>,
}

impl EventTypeResolver {
    pub fn new(candidate_keys: Vec<String>) -> Self {
        Self { candidate_keys }
    }

    pub fn candidate_keys(&self) -> &[String] {
        &self.candidate_keys
    }

    /// Return the first candidate field present with a non-empty scalar value.
    pub fn resolve(&self, payload: &Payload) -> Result<ResolvedType, MissingType> {
        self.candidate_keys
            .iter()
            .find_map(|key| {
                scalar_value(payload.get(key)?).map(|value| ResolvedType {
                    value,
                    key: key.clone(),
                })
            })
            .ok_or_else(|| MissingType {
                candidates: self.candidate_keys.clone(),
            })
    }
}

fn scalar_value(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };

    (!text.is_empty()).then_some(text)
}
