//! Twilio webhook signature verification.
//!
//! Twilio signs each request with HMAC-SHA1 keyed by the account auth token:
//! the full request URL followed by every body parameter, sorted by name,
//! as `name + value`. The Base64 digest is sent in `X-Twilio-Signature`.
//! Reference: https://www.twilio.com/docs/usage/webhooks/webhooks-security
//!
//! Parameters that also appear in the URL query string are left out of the
//! signed parameter set; the query string itself is covered by the URL.
//!
//! For JSON bodies Twilio appends a `bodySHA256` query parameter instead of
//! signing body parameters. In that case only the URL is signed and the raw
//! body must hash to the given digest.

use std::collections::HashSet;

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::{Position, Url};

use crate::config::SigningConfig;
use crate::error::WebhookError;
use crate::store::Payload;

type HmacSha1 = Hmac<Sha1>;

const BODY_SHA256_PARAM: &str = "bodySHA256";

/// The parts of an inbound request covered by the signature.
#[derive(Debug, Clone, Copy)]
pub struct SignedRequest<'a> {
    /// Full URL as the provider called it, including the query string
    pub url: &'a str,
    /// Raw request body
    pub body: &'a [u8],
    /// Decoded body parameters
    pub params: &'a Payload,
    /// Value of the signature header, if present
    pub signature: Option<&'a str>,
}

/// Verify a request against the endpoint's signing settings.
///
/// Returns `Ok(true)` when verification is disabled or the signature
/// matches, `Ok(false)` on any mismatch or malformed input, and
/// `Err(SigningSecretMissing)` when verification is on but no secret is set.
pub fn verify_request(
    request: &SignedRequest<'_>,
    signing: &SigningConfig,
) -> Result<bool, WebhookError> {
    if !signing.verify {
        debug!(name = %signing.name, "webhook_signature_verification_disabled");
        return Ok(true);
    }

    let secret = match signing.secret.as_deref() {
        Some(secret) if !secret.trim().is_empty() => secret,
        _ => {
            return Err(WebhookError::SigningSecretMissing {
                name: signing.name.clone(),
            })
        }
    };

    let signature = match request.signature {
        Some(signature) if !signature.is_empty() => signature,
        _ => {
            warn!(header = %signing.signature_header, "webhook_signature_missing");
            return Ok(false);
        }
    };

    Ok(verify_twilio_signature(
        secret,
        request.url,
        request.body,
        request.params,
        signature,
    ))
}

/// Verify a Twilio signature for a URL and body.
///
/// The signature is accepted for the URL as given, with the scheme's default
/// port made explicit, or with the port removed, since proxies in front of
/// the receiver may add or strip it.
pub fn verify_twilio_signature(
    secret: &str,
    url: &str,
    body: &[u8],
    params: &Payload,
    signature: &str,
) -> bool {
    let parsed = match Url::parse(url) {
        Ok(u) => u,
        Err(e) => {
            warn!(url = %url, error = %e, "webhook_signature_invalid_url");
            return false;
        }
    };

    let query: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();

    let signed_params = match query.iter().find(|(k, _)| k == BODY_SHA256_PARAM) {
        Some((_, expected_hash)) => {
            let actual_hash = hex::encode(Sha256::digest(body));
            if !constant_time_compare(&actual_hash, &expected_hash.to_ascii_lowercase()) {
                warn!(body_length = body.len(), "webhook_signature_body_hash_mismatch");
                return false;
            }
            Payload::new()
        }
        None => without_query_params(params, &query),
    };

    let mut candidates = vec![url.to_string()];
    candidates.extend(url_with_port(&parsed));
    candidates.push(url_without_port(&parsed));
    candidates.dedup();

    for candidate in &candidates {
        match compute_signature(secret, candidate, &signed_params) {
            Some(expected) if constant_time_compare(&expected, signature) => return true,
            Some(_) => {}
            None => {
                warn!("webhook_signature_invalid_key");
                return false;
            }
        }
    }

    warn!(
        url = %url,
        candidates = candidates.len(),
        actual_length = signature.len(),
        "webhook_signature_mismatch"
    );

    false
}

/// Compute the Twilio signature for a URL and parameter set.
///
/// Returns `None` only if the HMAC cannot be keyed.
pub fn compute_signature(secret: &str, url: &str, params: &Payload) -> Option<String> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(signing_data(url, params).as_bytes());
    Some(STANDARD.encode(mac.finalize().into_bytes()))
}

/// URL followed by `name + value` for every parameter, names sorted.
///
/// Multi-valued parameters contribute one pair per value, values sorted.
fn signing_data(url: &str, params: &Payload) -> String {
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();

    let mut data = url.to_string();
    for key in keys {
        let mut values = match &params[key] {
            Value::Array(items) => items.iter().map(param_string).collect::<Vec<_>>(),
            other => vec![param_string(other)],
        };
        values.sort();

        for value in values {
            data.push_str(key);
            data.push_str(&value);
        }
    }
    data
}

fn param_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn without_query_params(params: &Payload, query: &[(String, String)]) -> Payload {
    let query_keys: HashSet<&str> = query.iter().map(|(k, _)| k.as_str()).collect();

    params
        .iter()
        .filter(|(k, _)| !query_keys.contains(k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// The URL with its port spelled out, default port included.
fn url_with_port(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;

    let mut out = format!("{}://", url.scheme());
    if !url.username().is_empty() {
        out.push_str(url.username());
        if let Some(password) = url.password() {
            out.push(':');
            out.push_str(password);
        }
        out.push('@');
    }
    out.push_str(host);
    out.push(':');
    out.push_str(&port.to_string());
    out.push_str(&url[Position::BeforePath..]);
    Some(out)
}

fn url_without_port(url: &Url) -> String {
    let mut stripped = url.clone();
    // Only fails for URLs that cannot carry a port at all.
    let _ = stripped.set_port(None);
    stripped.to_string()
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
