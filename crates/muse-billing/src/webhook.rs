//! Webhook verification and parsing
//!
//! The gateway signs each delivery with `stripe-signature: t=<unix>,v1=<hex>`,
//! where `v1` is HMAC-SHA256 over `"{t}.{raw body}"` keyed by the endpoint
//! secret. Verification always happens before the payload is parsed.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use crate::{BillingError, PaymentMetadata};

/// Maximum age of a signed delivery, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

/// Parsed webhook event
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    /// `payment_intent.succeeded`
    PaymentSucceeded(PaymentObject),

    /// `payment_intent.payment_failed`
    PaymentFailed(PaymentObject),

    /// `checkout.session.completed`
    CheckoutCompleted {
        session_id: String,
        payment_intent: Option<String>,
        payment_status: String,
        metadata: Option<PaymentMetadata>,
    },

    /// Anything else; acknowledged and ignored
    Unknown { event_type: String },
}

#[derive(Debug, Clone)]
pub struct PaymentObject {
    pub id: String,
    pub status: String,
    pub metadata: Option<PaymentMetadata>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct RawObject {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    payment_intent: Option<String>,
    #[serde(default)]
    payment_status: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

/// Verify a signature header against the raw payload.
pub fn verify_signature(payload: &[u8], header: &str, secret: &str, now: i64) -> Result<(), BillingError> {
    let mut timestamp: Option<&str> = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = Some(v),
            Some(("v1", v)) => candidates.push(v),
            _ => {}
        }
    }

    let (Some(raw_ts), false) = (timestamp, candidates.is_empty()) else {
        return Err(BillingError::InvalidSignature(
            "Unable to extract timestamp and signatures from header".into(),
        ));
    };
    let ts: i64 = raw_ts
        .parse()
        .map_err(|_| BillingError::InvalidSignature("Invalid timestamp in signature header".into()))?;
    let skew = now.checked_sub(ts).map(i64::unsigned_abs);
    if !skew.is_some_and(|skew| skew <= SIGNATURE_TOLERANCE_SECS.unsigned_abs()) {
        return Err(BillingError::InvalidSignature("Timestamp outside the tolerance zone".into()));
    }

    let mac = signed_mac(payload, raw_ts, secret)?;
    for candidate in candidates {
        let Ok(bytes) = hex::decode(candidate) else {
            continue;
        };
        if mac.clone().verify_slice(&bytes).is_ok() {
            return Ok(());
        }
    }

    Err(BillingError::InvalidSignature(
        "No signatures found matching the expected signature for payload".into(),
    ))
}

/// Produce a signature header for `payload`, as the gateway would.
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> Result<String, BillingError> {
    let ts = timestamp.to_string();
    let mac = signed_mac(payload, &ts, secret)?;
    Ok(format!("t={},v1={}", ts, hex::encode(mac.finalize().into_bytes())))
}

fn signed_mac(payload: &[u8], timestamp: &str, secret: &str) -> Result<HmacSha256, BillingError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BillingError::Config(format!("webhook secret: {}", e)))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Verify and parse a raw webhook delivery.
///
/// Fails closed: without a configured secret, or with a missing or wrong
/// signature, nothing is parsed.
pub fn parse_webhook_event(
    payload: &[u8],
    signature: &str,
    webhook_secret: Option<&str>,
    now: i64,
) -> Result<WebhookEvent, BillingError> {
    let Some(secret) = webhook_secret else {
        return Err(BillingError::InvalidSignature("Webhook secret is not configured".into()));
    };
    if signature.is_empty() {
        return Err(BillingError::InvalidSignature("Missing stripe-signature header".into()));
    }
    verify_signature(payload, signature, secret, now)?;

    let envelope: Envelope =
        serde_json::from_slice(payload).map_err(|e| BillingError::MalformedPayload(e.to_string()))?;
    debug!(event_type = %envelope.event_type, "Webhook verified");

    let handled = matches!(
        envelope.event_type.as_str(),
        "payment_intent.succeeded" | "payment_intent.payment_failed" | "checkout.session.completed"
    );
    if !handled {
        return Ok(WebhookEvent::Unknown {
            event_type: envelope.event_type,
        });
    }

    let object: RawObject = serde_json::from_value(envelope.data["object"].clone())
        .map_err(|e| BillingError::MalformedPayload(e.to_string()))?;
    let metadata = PaymentMetadata::from_map(&object.metadata);
    let event = match envelope.event_type.as_str() {
        "payment_intent.succeeded" => WebhookEvent::PaymentSucceeded(PaymentObject {
            id: object.id,
            status: object.status.unwrap_or_else(|| "succeeded".into()),
            metadata,
        }),
        "payment_intent.payment_failed" => WebhookEvent::PaymentFailed(PaymentObject {
            id: object.id,
            status: object.status.unwrap_or_else(|| "failed".into()),
            metadata,
        }),
        "checkout.session.completed" => WebhookEvent::CheckoutCompleted {
            session_id: object.id,
            payment_intent: object.payment_intent,
            payment_status: object.payment_status.unwrap_or_else(|| "paid".into()),
            metadata,
        },
        other => WebhookEvent::Unknown {
            event_type: other.to_string(),
        },
    };
    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const NOW: i64 = 1_767_000_000;

    fn body() -> Vec<u8> {
        serde_json::json!({
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": { "object": {
                "id": "pi_1",
                "status": "succeeded",
                "metadata": { "donor_email": "v@x.com", "kind": "photo_unlock", "target_id": "p1" }
            }}
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn valid_signature_parses_event() {
        let payload = body();
        let header = sign_payload(&payload, SECRET, NOW).unwrap();
        match parse_webhook_event(&payload, &header, Some(SECRET), NOW + 10).unwrap() {
            WebhookEvent::PaymentSucceeded(obj) => {
                assert_eq!(obj.id, "pi_1");
                assert_eq!(obj.metadata.unwrap().target_id.as_deref(), Some("p1"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn tampered_body_is_rejected() {
        let payload = body();
        let header = sign_payload(&payload, SECRET, NOW).unwrap();
        let mut tampered = payload.clone();
        tampered.extend_from_slice(b" ");
        let err = parse_webhook_event(&tampered, &header, Some(SECRET), NOW).unwrap_err();
        assert!(err.to_string().contains("No signatures found"));
    }

    #[test]
    fn stale_or_missing_signatures_are_rejected() {
        let payload = body();
        let header = sign_payload(&payload, SECRET, NOW).unwrap();
        let stale = verify_signature(&payload, &header, SECRET, NOW + SIGNATURE_TOLERANCE_SECS + 1);
        assert!(matches!(stale, Err(BillingError::InvalidSignature(_))));

        let garbage = verify_signature(&payload, "nonsense", SECRET, NOW);
        assert!(matches!(garbage, Err(BillingError::InvalidSignature(_))));

        let unconfigured = parse_webhook_event(&payload, &header, None, NOW);
        assert!(matches!(unconfigured, Err(BillingError::InvalidSignature(_))));
    }

    #[test]
    fn extreme_timestamps_are_rejected() {
        let payload = body();
        for ts in [i64::MIN, i64::MAX] {
            let header = format!("t={},v1=00", ts);
            let direct = verify_signature(&payload, &header, SECRET, NOW);
            assert!(matches!(direct, Err(BillingError::InvalidSignature(_))), "t={ts}");

            let parsed = parse_webhook_event(&payload, &header, Some(SECRET), NOW);
            assert!(matches!(parsed, Err(BillingError::InvalidSignature(_))), "t={ts}");
        }
    }

    #[test]
    fn unknown_events_are_passed_through() {
        let payload = br#"{"type":"customer.created","data":{"object":{"id":"cus_1"}}}"#;
        let header = sign_payload(payload, SECRET, NOW).unwrap();
        let event = parse_webhook_event(payload, &header, Some(SECRET), NOW).unwrap();
        assert!(matches!(event, WebhookEvent::Unknown { event_type } if event_type == "customer.created"));
    }
}
