//! Stripe adapter
//!
//! Signature: `stripe-signature` carries `t=<unix>,v1=<hex>[,v1=...]`
//! where each `v1` is an HMAC-SHA256 of `"{t}.{raw_body}"` keyed by the
//! endpoint secret. Timestamps outside the tolerance window are rejected
//! to blunt replay. Amounts arrive in minor units.

use crate::adapter::{EventReferences, ProviderAdapter};
use crate::signature::{constant_time_eq, hmac_sha256_hex};
use crate::AdapterResult;
use chrono::{TimeZone, Utc};
use payhook_types::{
    Currency, DisputeOutcome, Money, NormalizeError, NormalizedEvent, NormalizedEventType,
};
use serde_json::{json, Value};
use std::collections::HashMap;

const SIGNATURE_HEADER: &str = "stripe-signature";

/// Default replay tolerance, matching Stripe's own SDK default
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

const SUPPORTED_EVENTS: &[&str] = &[
    "charge.succeeded",
    "payment_intent.succeeded",
    "charge.failed",
    "payment_intent.payment_failed",
    "payment_intent.canceled",
    "charge.refunded",
    "refund.created",
    "refund.failed",
    "charge.dispute.created",
    "charge.dispute.closed",
];

/// Adapter for Stripe webhooks
#[derive(Debug, Clone, Copy)]
pub struct StripeAdapter {
    tolerance_secs: i64,
}

impl Default for StripeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl StripeAdapter {
    pub fn new() -> Self {
        Self {
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        }
    }

    /// Override the replay tolerance window
    pub fn with_tolerance_secs(tolerance_secs: i64) -> Self {
        Self { tolerance_secs }
    }

    fn map_event(event_type: &str) -> Option<NormalizedEventType> {
        match event_type {
            "charge.succeeded" | "payment_intent.succeeded" => {
                Some(NormalizedEventType::PaymentSuccessful)
            }
            "charge.failed" | "payment_intent.payment_failed" => {
                Some(NormalizedEventType::PaymentFailed)
            }
            "payment_intent.canceled" => Some(NormalizedEventType::PaymentAbandoned),
            "charge.refunded" => Some(NormalizedEventType::RefundSuccessful),
            "refund.created" => Some(NormalizedEventType::RefundPending),
            "refund.failed" => Some(NormalizedEventType::RefundFailed),
            "charge.dispute.created" => Some(NormalizedEventType::ChargeDisputed),
            "charge.dispute.closed" => Some(NormalizedEventType::DisputeResolved),
            _ => None,
        }
    }
}

/// Parsed form of the `stripe-signature` header
struct SignatureHeader {
    timestamp: i64,
    candidates: Vec<String>,
}

fn parse_signature_header(value: &str) -> Option<SignatureHeader> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in value.split(',') {
        let (key, val) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = val.parse::<i64>().ok(),
            "v1" => candidates.push(val.to_string()),
            // v0 and unknown schemes are ignored
            _ => {}
        }
    }
    Some(SignatureHeader {
        timestamp: timestamp?,
        candidates,
    })
}

impl ProviderAdapter for StripeAdapter {
    fn provider(&self) -> &'static str {
        "stripe"
    }

    fn supported_events(&self) -> &'static [&'static str] {
        SUPPORTED_EVENTS
    }

    fn verify_signature(
        &self,
        raw_body: &[u8],
        headers: &HashMap<String, String>,
        secrets: &[String],
    ) -> bool {
        let Some(header) = headers.get(SIGNATURE_HEADER) else {
            return false;
        };
        let Some(parsed) = parse_signature_header(header) else {
            return false;
        };
        if parsed.candidates.is_empty() {
            return false;
        }

        let age = (Utc::now().timestamp() - parsed.timestamp).abs();
        if age > self.tolerance_secs {
            return false;
        }

        // The signed payload is "{t}.{body}", not the body alone
        let mut signed_payload = parsed.timestamp.to_string().into_bytes();
        signed_payload.push(b'.');
        signed_payload.extend_from_slice(raw_body);

        secrets.iter().any(|secret| {
            let expected = hmac_sha256_hex(secret.as_bytes(), &signed_payload);
            parsed
                .candidates
                .iter()
                .any(|candidate| constant_time_eq(&expected, candidate))
        })
    }

    fn parse_payload(&self, raw_body: &[u8]) -> AdapterResult<Value> {
        Ok(serde_json::from_slice(raw_body)?)
    }

    fn normalize(&self, payload: &Value) -> Result<NormalizedEvent, NormalizeError> {
        let raw_type = self
            .extract_event_type(payload)
            .ok_or(NormalizeError::MissingField { field: "type" })?;
        let event_type =
            Self::map_event(&raw_type).ok_or(NormalizeError::UnknownEventType {
                event_type: raw_type.clone(),
            })?;

        let object = payload
            .get("data")
            .and_then(|d| d.get("object"))
            .ok_or(NormalizeError::MissingField { field: "data.object" })?;

        let provider_ref = object
            .get("id")
            .and_then(Value::as_str)
            .ok_or(NormalizeError::MissingField { field: "data.object.id" })?
            .to_string();

        let amount = object
            .get("amount")
            .and_then(Value::as_f64)
            .ok_or(NormalizeError::MissingField { field: "data.object.amount" })?;
        let currency_code = object
            .get("currency")
            .and_then(Value::as_str)
            .ok_or(NormalizeError::MissingField { field: "data.object.currency" })?;
        let currency =
            Currency::parse_lenient(currency_code).map_err(|e| NormalizeError::InvalidField {
                field: "data.object.currency",
                message: e.to_string(),
            })?;
        let money = Money::from_minor_units(amount, currency)?;

        let provider_timestamp = payload
            .get("created")
            .and_then(Value::as_i64)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        let dispute_outcome = if event_type == NormalizedEventType::DisputeResolved {
            object
                .get("status")
                .and_then(Value::as_str)
                .and_then(DisputeOutcome::parse)
        } else {
            None
        };

        Ok(NormalizedEvent {
            event_type,
            provider_event_id: self
                .extract_idempotency_key(payload)
                .ok_or(NormalizeError::MissingField { field: "id" })?,
            provider_ref,
            money,
            application_ref: self.extract_references(payload).application_ref,
            provider_timestamp,
            customer_email: object
                .get("billing_details")
                .and_then(|b| b.get("email"))
                .and_then(Value::as_str)
                .map(str::to_string),
            dispute_outcome,
            provider_metadata: json!({
                "livemode": payload.get("livemode"),
                "payment_method": object.get("payment_method"),
            }),
        })
    }

    fn extract_idempotency_key(&self, payload: &Value) -> Option<String> {
        // Stripe supplies a first-class event id (evt_...)
        payload.get("id").and_then(Value::as_str).map(str::to_string)
    }

    fn extract_references(&self, payload: &Value) -> EventReferences {
        let object = payload.get("data").and_then(|d| d.get("object"));
        EventReferences {
            provider_ref: object
                .and_then(|o| o.get("id"))
                .and_then(Value::as_str)
                .map(str::to_string),
            application_ref: object
                .and_then(|o| o.get("metadata"))
                .and_then(|m| m.get("application_ref"))
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    fn extract_event_type(&self, payload: &Value) -> Option<String> {
        payload.get("type").and_then(Value::as_str).map(str::to_string)
    }

    fn is_success_event(&self, event_type: &str) -> bool {
        matches!(event_type, "charge.succeeded" | "payment_intent.succeeded")
    }

    fn is_failure_event(&self, event_type: &str) -> bool {
        matches!(
            event_type,
            "charge.failed" | "payment_intent.payment_failed" | "payment_intent.canceled"
        )
    }

    fn is_refund_event(&self, event_type: &str) -> bool {
        event_type == "charge.refunded" || event_type.starts_with("refund.")
    }

    fn is_dispute_event(&self, event_type: &str) -> bool {
        event_type.starts_with("charge.dispute.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn charge_succeeded_body() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_1ABC",
            "type": "charge.succeeded",
            "created": 1717243200,
            "livemode": false,
            "data": {
                "object": {
                    "id": "ch_1ABC",
                    "amount": 2500,
                    "currency": "usd",
                    "payment_method": "pm_1",
                    "billing_details": { "email": "buyer@example.com" },
                    "metadata": { "application_ref": "order_9" }
                }
            }
        }))
        .unwrap()
    }

    fn sign(body: &[u8], secret: &str, timestamp: i64) -> String {
        let mut signed = timestamp.to_string().into_bytes();
        signed.push(b'.');
        signed.extend_from_slice(body);
        format!("t={},v1={}", timestamp, hmac_sha256_hex(secret.as_bytes(), &signed))
    }

    #[test]
    fn test_verify_signature_accepts_fresh_valid() {
        let adapter = StripeAdapter::new();
        let body = charge_succeeded_body();
        let mut headers = HashMap::new();
        headers.insert(
            SIGNATURE_HEADER.to_string(),
            sign(&body, "whsec_test", Utc::now().timestamp()),
        );
        assert!(adapter.verify_signature(&body, &headers, &["whsec_test".to_string()]));
    }

    #[test]
    fn test_verify_signature_rejects_stale_timestamp() {
        let adapter = StripeAdapter::new();
        let body = charge_succeeded_body();
        let stale = Utc::now().timestamp() - DEFAULT_TOLERANCE_SECS - 60;
        let mut headers = HashMap::new();
        headers.insert(SIGNATURE_HEADER.to_string(), sign(&body, "whsec_test", stale));
        assert!(!adapter.verify_signature(&body, &headers, &["whsec_test".to_string()]));
    }

    #[test]
    fn test_verify_signature_rejects_wrong_secret() {
        let adapter = StripeAdapter::new();
        let body = charge_succeeded_body();
        let mut headers = HashMap::new();
        headers.insert(
            SIGNATURE_HEADER.to_string(),
            sign(&body, "whsec_other", Utc::now().timestamp()),
        );
        assert!(!adapter.verify_signature(&body, &headers, &["whsec_test".to_string()]));
    }

    #[test]
    fn test_verify_signature_rejects_malformed_header() {
        let adapter = StripeAdapter::new();
        let body = charge_succeeded_body();
        let mut headers = HashMap::new();
        headers.insert(SIGNATURE_HEADER.to_string(), "not-a-signature".to_string());
        assert!(!adapter.verify_signature(&body, &headers, &["whsec_test".to_string()]));
    }

    #[test]
    fn test_normalize_charge_succeeded() {
        let adapter = StripeAdapter::new();
        let payload = adapter.parse_payload(&charge_succeeded_body()).unwrap();
        let event = adapter.normalize(&payload).unwrap();

        assert_eq!(event.event_type, NormalizedEventType::PaymentSuccessful);
        assert_eq!(event.provider_event_id, "evt_1ABC");
        assert_eq!(event.provider_ref, "ch_1ABC");
        assert_eq!(event.money.amount, 2500);
        assert_eq!(event.money.currency.code(), "USD");
        assert_eq!(event.application_ref.as_deref(), Some("order_9"));
        assert!(event.provider_timestamp.is_some());
    }

    #[test]
    fn test_normalize_dispute_closed_carries_outcome() {
        let adapter = StripeAdapter::new();
        let payload = json!({
            "id": "evt_2",
            "type": "charge.dispute.closed",
            "data": { "object": {
                "id": "dp_1",
                "amount": 2500,
                "currency": "usd",
                "status": "lost"
            }}
        });
        let event = adapter.normalize(&payload).unwrap();
        assert_eq!(event.event_type, NormalizedEventType::DisputeResolved);
        assert_eq!(event.dispute_outcome, Some(DisputeOutcome::Lost));
    }
}
