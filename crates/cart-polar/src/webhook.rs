//! # Polar Webhook Handling
//!
//! Signature verification and event parsing for Polar webhooks.
//!
//! Webhook delivery is a second, independent road to payment confirmation:
//! the handler extracts the session id and hands it to the same confirmation
//! path the success redirect uses. Nothing in the payload besides the session
//! id is treated as authoritative.

use cart_core::{CheckoutError, CheckoutResult};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

/// Signed-payload tolerance window in seconds (5 minutes)
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Webhook event kinds this system reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolarEventKind {
    /// A checkout session changed state (the paid transition arrives here)
    CheckoutUpdated,
    /// A checkout session was created
    CheckoutCreated,
    /// Anything else; acknowledged and ignored
    Unknown(String),
}

/// A verified, parsed webhook event
#[derive(Debug, Clone)]
pub struct PolarWebhookEvent {
    pub kind: PolarEventKind,
    /// The checkout/session object carried by the event
    pub data: Value,
}

impl PolarWebhookEvent {
    /// Session id carried by the event, if any
    pub fn session_id(&self) -> Option<&str> {
        self.data.get("id").and_then(|v| v.as_str())
    }

    /// Status string reported by the event object
    pub fn status(&self) -> Option<&str> {
        self.data.get("status").and_then(|v| v.as_str())
    }

    /// True when this event announces a completed payment. The caller still
    /// re-fetches the session before materializing anything.
    pub fn is_paid_checkout(&self) -> bool {
        self.kind == PolarEventKind::CheckoutUpdated
            && matches!(self.status(), Some("succeeded") | Some("paid"))
    }
}

/// Verify a webhook signature and parse the event.
///
/// The signature header has the form `t=<unix-ts>,v1=<hex-hmac>` and signs
/// `"{t}.{payload}"` with HMAC-SHA256 under the shared webhook secret.
/// Signatures older than the tolerance window are rejected to blunt replays.
pub fn verify_webhook(
    webhook_secret: &str,
    payload: &[u8],
    signature: &str,
) -> CheckoutResult<PolarWebhookEvent> {
    let sig_parts = parse_signature_header(signature)?;

    let now = Utc::now().timestamp();
    if (now - sig_parts.timestamp).abs() > TIMESTAMP_TOLERANCE_SECS {
        return Err(CheckoutError::WebhookVerificationFailed(
            "Timestamp outside tolerance".to_string(),
        ));
    }

    let signed_payload = format!(
        "{}.{}",
        sig_parts.timestamp,
        String::from_utf8_lossy(payload)
    );
    let expected_sig = compute_hmac_sha256(webhook_secret, &signed_payload);

    let valid = sig_parts
        .signatures
        .iter()
        .any(|sig| constant_time_compare(sig, &expected_sig));

    if !valid {
        return Err(CheckoutError::WebhookVerificationFailed(
            "Signature mismatch".to_string(),
        ));
    }

    parse_event(payload)
}

fn parse_event(payload: &[u8]) -> CheckoutResult<PolarWebhookEvent> {
    let raw: RawEvent = serde_json::from_slice(payload).map_err(|e| {
        CheckoutError::WebhookParseError(format!("Failed to parse webhook: {}", e))
    })?;

    debug!("Verified Polar webhook: type={}", raw.event_type);

    let kind = match raw.event_type.as_str() {
        "checkout.updated" => PolarEventKind::CheckoutUpdated,
        "checkout.created" => PolarEventKind::CheckoutCreated,
        other => PolarEventKind::Unknown(other.to_string()),
    };

    Ok(PolarWebhookEvent {
        kind,
        data: raw.data,
    })
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
}

struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_signature_header(header: &str) -> CheckoutResult<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let kv: Vec<&str> = part.split('=').collect();
        if kv.len() != 2 {
            continue;
        }
        match kv[0] {
            "t" => {
                timestamp = kv[1].parse().ok();
            }
            "v1" => {
                signatures.push(kv[1].to_string());
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        CheckoutError::WebhookVerificationFailed("Missing timestamp in signature".to_string())
    })?;

    if signatures.is_empty() {
        return Err(CheckoutError::WebhookVerificationFailed(
            "No v1 signature found".to_string(),
        ));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

fn compute_hmac_sha256(secret: &str, message: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(message.as_bytes());
    let result = mac.finalize();
    hex::encode(result.into_bytes())
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}
