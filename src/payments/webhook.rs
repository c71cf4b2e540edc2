//! Webhook authenticity and parsing
//!
//! Stripe signs each delivery with `Stripe-Signature:
//! t=<unix>,v1=<hex hmac>`, where the MAC is HMAC-SHA256 over
//! `"{t}.{raw payload}"` keyed by the endpoint's signing secret.
//! Verification is constant-time and bounded by a replay tolerance
//! window. Parsing maps the provider's event JSON onto the small set
//! of kinds the reconciler understands.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Deliveries older (or newer) than this many seconds are rejected as
/// replays.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Error, Debug)]
pub enum SignatureError {
    #[error("malformed signature header")]
    MalformedHeader,
    #[error("webhook timestamp outside tolerance")]
    StaleTimestamp,
    #[error("webhook signature mismatch")]
    BadSignature,
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed webhook payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("webhook event carries no payment intent")]
    MissingIntent,
}

/// Parsed `Stripe-Signature` header.
#[derive(Debug, Clone)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self, SignatureError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => {
                    timestamp = Some(value.parse().map_err(|_| SignatureError::MalformedHeader)?);
                }
                Some(("v1", value)) => signatures.push(value.to_string()),
                // Older scheme versions and unknown keys are ignored.
                Some(_) => {}
                None => return Err(SignatureError::MalformedHeader),
            }
        }
        match (timestamp, signatures.is_empty()) {
            (Some(timestamp), false) => Ok(Self { timestamp, signatures }),
            _ => Err(SignatureError::MalformedHeader),
        }
    }
}

/// Verifies a raw payload against its signature header.
///
/// `now` is passed in rather than read from the clock so callers (and
/// tests) control the replay window.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let header = SignatureHeader::parse(header)?;
    if (now - header.timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(SignatureError::StaleTimestamp);
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::BadSignature)?;
    mac.update(header.timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    for signature in &header.signatures {
        let Ok(bytes) = hex::decode(signature) else {
            continue;
        };
        // verify_slice is constant-time.
        if mac.clone().verify_slice(&bytes).is_ok() {
            return Ok(());
        }
    }
    Err(SignatureError::BadSignature)
}

/// Computes the `Stripe-Signature` header value for a payload. The
/// inverse of [`verify_signature`]; test fixtures and replay tooling
/// sign with it.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("hmac accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

/// Event kinds the reconciler acts on. Everything else is
/// acknowledged untouched so the provider never retries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    IntentSucceeded,
    IntentFailed,
    IntentCanceled,
    Other(String),
}

impl EventKind {
    fn from_type(kind: &str) -> Self {
        match kind {
            "payment_intent.succeeded" => EventKind::IntentSucceeded,
            "payment_intent.payment_failed" => EventKind::IntentFailed,
            "payment_intent.canceled" => EventKind::IntentCanceled,
            other => EventKind::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub kind: EventKind,
    pub intent_id: Option<String>,
    pub charge_id: Option<String>,
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<RawData>,
}

#[derive(Deserialize)]
struct RawData {
    object: RawObject,
}

#[derive(Deserialize)]
struct RawObject {
    id: String,
    #[serde(default)]
    latest_charge: Option<String>,
}

pub fn parse_event(payload: &[u8]) -> Result<WebhookEvent, ParseError> {
    let raw: RawEvent = serde_json::from_slice(payload)?;
    let kind = EventKind::from_type(&raw.kind);
    let object = raw.data.map(|d| d.object);
    let intent_id = object.as_ref().map(|o| o.id.clone());
    if intent_id.is_none() && !matches!(kind, EventKind::Other(_)) {
        return Err(ParseError::MissingIntent);
    }
    Ok(WebhookEvent {
        kind,
        intent_id,
        charge_id: object.and_then(|o| o.latest_charge),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";

    #[test]
    fn signed_payload_verifies() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let header = sign_payload(payload, SECRET, 1_700_000_000);
        assert!(verify_signature(payload, &header, SECRET, 1_700_000_000).is_ok());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let payload = br#"{"amount":100}"#;
        let header = sign_payload(payload, SECRET, 1_700_000_000);
        let err = verify_signature(br#"{"amount":999}"#, &header, SECRET, 1_700_000_000);
        assert!(matches!(err, Err(SignatureError::BadSignature)));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let payload = b"{}";
        let header = sign_payload(payload, SECRET, 1_700_000_000);
        let err = verify_signature(payload, &header, "whsec_other", 1_700_000_000);
        assert!(matches!(err, Err(SignatureError::BadSignature)));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let payload = b"{}";
        let header = sign_payload(payload, SECRET, 1_700_000_000);
        let err = verify_signature(payload, &header, SECRET, 1_700_000_000 + 301);
        assert!(matches!(err, Err(SignatureError::StaleTimestamp)));
    }

    #[test]
    fn header_without_signature_is_malformed() {
        assert!(matches!(
            SignatureHeader::parse("t=12345"),
            Err(SignatureError::MalformedHeader)
        ));
        assert!(matches!(
            SignatureHeader::parse("v1=abc"),
            Err(SignatureError::MalformedHeader)
        ));
        assert!(SignatureHeader::parse("t=12345,v1=abc,v0=def").is_ok());
    }

    #[test]
    fn parses_succeeded_event() {
        let payload = br#"{
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": {"object": {"id": "pi_123", "latest_charge": "ch_9"}}
        }"#;
        let event = parse_event(payload).unwrap();
        assert_eq!(event.kind, EventKind::IntentSucceeded);
        assert_eq!(event.intent_id.as_deref(), Some("pi_123"));
        assert_eq!(event.charge_id.as_deref(), Some("ch_9"));
    }

    #[test]
    fn unknown_kind_needs_no_object() {
        let payload = br#"{"id": "evt_2", "type": "charge.refunded"}"#;
        let event = parse_event(payload).unwrap();
        assert_eq!(event.kind, EventKind::Other("charge.refunded".into()));
        assert!(event.intent_id.is_none());
    }

    #[test]
    fn recognized_kind_without_intent_is_malformed() {
        let payload = br#"{"id": "evt_3", "type": "payment_intent.succeeded"}"#;
        assert!(matches!(parse_event(payload), Err(ParseError::MissingIntent)));
    }
}
