//! Paystack adapter
//!
//! Signature: `x-paystack-signature` carries an HMAC-SHA512 hex digest of
//! the raw request body, keyed by the account secret key. Amounts arrive
//! in kobo (minor units) already.

use crate::adapter::{EventReferences, ProviderAdapter};
use crate::signature::{constant_time_eq, hmac_sha512_hex};
use crate::AdapterResult;
use chrono::{DateTime, Utc};
use payhook_types::{
    Currency, DisputeOutcome, Money, NormalizeError, NormalizedEvent, NormalizedEventType,
};
use serde_json::{json, Value};
use std::collections::HashMap;

const SIGNATURE_HEADER: &str = "x-paystack-signature";

const SUPPORTED_EVENTS: &[&str] = &[
    "charge.success",
    "charge.failed",
    "charge.abandoned",
    "refund.processed",
    "refund.failed",
    "refund.pending",
    "charge.dispute.create",
    "charge.dispute.resolve",
];

/// Adapter for Paystack webhooks
#[derive(Debug, Clone, Copy, Default)]
pub struct PaystackAdapter;

impl PaystackAdapter {
    pub fn new() -> Self {
        Self
    }

    fn map_event(event_type: &str) -> Option<NormalizedEventType> {
        match event_type {
            "charge.success" => Some(NormalizedEventType::PaymentSuccessful),
            "charge.failed" => Some(NormalizedEventType::PaymentFailed),
            "charge.abandoned" => Some(NormalizedEventType::PaymentAbandoned),
            "refund.processed" => Some(NormalizedEventType::RefundSuccessful),
            "refund.failed" => Some(NormalizedEventType::RefundFailed),
            "refund.pending" => Some(NormalizedEventType::RefundPending),
            "charge.dispute.create" => Some(NormalizedEventType::ChargeDisputed),
            "charge.dispute.resolve" => Some(NormalizedEventType::DisputeResolved),
            _ => None,
        }
    }
}

impl ProviderAdapter for PaystackAdapter {
    fn provider(&self) -> &'static str {
        "paystack"
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
        let Some(signature) = headers.get(SIGNATURE_HEADER) else {
            return false;
        };
        secrets.iter().any(|secret| {
            let expected = hmac_sha512_hex(secret.as_bytes(), raw_body);
            constant_time_eq(&expected, signature)
        })
    }

    fn parse_payload(&self, raw_body: &[u8]) -> AdapterResult<Value> {
        Ok(serde_json::from_slice(raw_body)?)
    }

    fn normalize(&self, payload: &Value) -> Result<NormalizedEvent, NormalizeError> {
        let raw_type = self
            .extract_event_type(payload)
            .ok_or(NormalizeError::MissingField { field: "event" })?;
        let event_type =
            Self::map_event(&raw_type).ok_or(NormalizeError::UnknownEventType {
                event_type: raw_type.clone(),
            })?;

        let data = payload
            .get("data")
            .ok_or(NormalizeError::MissingField { field: "data" })?;

        let provider_ref = data
            .get("reference")
            .and_then(Value::as_str)
            .ok_or(NormalizeError::MissingField { field: "data.reference" })?
            .to_string();

        let amount = data
            .get("amount")
            .and_then(Value::as_f64)
            .ok_or(NormalizeError::MissingField { field: "data.amount" })?;
        let currency_code = data
            .get("currency")
            .and_then(Value::as_str)
            .ok_or(NormalizeError::MissingField { field: "data.currency" })?;
        let currency =
            Currency::parse_lenient(currency_code).map_err(|e| NormalizeError::InvalidField {
                field: "data.currency",
                message: e.to_string(),
            })?;
        // Paystack amounts are already in kobo
        let money = Money::from_minor_units(amount, currency)?;

        let provider_timestamp = data
            .get("paid_at")
            .or_else(|| data.get("created_at"))
            .and_then(Value::as_str)
            .and_then(parse_rfc3339);

        let dispute_outcome = if event_type == NormalizedEventType::DisputeResolved {
            data.get("resolution")
                .or_else(|| data.get("status"))
                .and_then(Value::as_str)
                .and_then(DisputeOutcome::parse)
        } else {
            None
        };

        Ok(NormalizedEvent {
            event_type,
            provider_event_id: self
                .extract_idempotency_key(payload)
                .unwrap_or_else(|| provider_ref.clone()),
            provider_ref,
            money,
            application_ref: self.extract_references(payload).application_ref,
            provider_timestamp,
            customer_email: data
                .get("customer")
                .and_then(|c| c.get("email"))
                .and_then(Value::as_str)
                .map(str::to_string),
            dispute_outcome,
            provider_metadata: json!({
                "channel": data.get("channel"),
                "gateway_response": data.get("gateway_response"),
                "fees": data.get("fees"),
            }),
        })
    }

    fn extract_idempotency_key(&self, payload: &Value) -> Option<String> {
        // Paystack has no event-level id; the charge id is stable across
        // redeliveries of the same event
        let data_id = payload.get("data").and_then(|d| d.get("id"));
        let raw_type = self.extract_event_type(payload)?;
        match data_id {
            Some(Value::Number(n)) => Some(format!("{}:{}", raw_type, n)),
            Some(Value::String(s)) => Some(format!("{}:{}", raw_type, s)),
            _ => None,
        }
    }

    fn extract_references(&self, payload: &Value) -> EventReferences {
        let data = payload.get("data");
        EventReferences {
            provider_ref: data
                .and_then(|d| d.get("reference"))
                .and_then(Value::as_str)
                .map(str::to_string),
            application_ref: data
                .and_then(|d| d.get("metadata"))
                .and_then(|m| m.get("application_ref"))
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    fn extract_event_type(&self, payload: &Value) -> Option<String> {
        payload.get("event").and_then(Value::as_str).map(str::to_string)
    }

    fn is_success_event(&self, event_type: &str) -> bool {
        event_type == "charge.success"
    }

    fn is_failure_event(&self, event_type: &str) -> bool {
        matches!(event_type, "charge.failed" | "charge.abandoned")
    }

    fn is_refund_event(&self, event_type: &str) -> bool {
        event_type.starts_with("refund.")
    }

    fn is_dispute_event(&self, event_type: &str) -> bool {
        event_type.starts_with("charge.dispute.")
    }
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn charge_success_body() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "event": "charge.success",
            "data": {
                "id": 302961,
                "reference": "ref_1",
                "amount": 10000,
                "currency": "NGN",
                "channel": "card",
                "gateway_response": "Approved",
                "paid_at": "2024-06-01T12:00:00Z",
                "customer": { "email": "buyer@example.com" },
                "metadata": { "application_ref": "order_1" }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_verify_signature_accepts_valid() {
        let adapter = PaystackAdapter::new();
        let body = charge_success_body();
        let secret = "sk_test_AAA";
        let mut headers = HashMap::new();
        headers.insert(
            SIGNATURE_HEADER.to_string(),
            hmac_sha512_hex(secret.as_bytes(), &body),
        );
        assert!(adapter.verify_signature(&body, &headers, &[secret.to_string()]));
    }

    #[test]
    fn test_verify_signature_tries_secrets_in_order() {
        let adapter = PaystackAdapter::new();
        let body = charge_success_body();
        let mut headers = HashMap::new();
        headers.insert(
            SIGNATURE_HEADER.to_string(),
            hmac_sha512_hex(b"sk_test_NEW", &body),
        );
        // Old secret first; rotation means the new one still validates
        let secrets = vec!["sk_test_OLD".to_string(), "sk_test_NEW".to_string()];
        assert!(adapter.verify_signature(&body, &headers, &secrets));
    }

    #[test]
    fn test_verify_signature_rejects_missing_header() {
        let adapter = PaystackAdapter::new();
        let body = charge_success_body();
        assert!(!adapter.verify_signature(&body, &HashMap::new(), &["sk".to_string()]));
    }

    #[test]
    fn test_verify_signature_rejects_tampered_body() {
        let adapter = PaystackAdapter::new();
        let body = charge_success_body();
        let mut headers = HashMap::new();
        headers.insert(
            SIGNATURE_HEADER.to_string(),
            hmac_sha512_hex(b"sk_test_AAA", &body),
        );
        let mut tampered = body.clone();
        tampered[0] ^= 1;
        assert!(!adapter.verify_signature(&tampered, &headers, &["sk_test_AAA".to_string()]));
    }

    #[test]
    fn test_normalize_charge_success() {
        let adapter = PaystackAdapter::new();
        let payload = adapter.parse_payload(&charge_success_body()).unwrap();
        let event = adapter.normalize(&payload).unwrap();

        assert_eq!(event.event_type, NormalizedEventType::PaymentSuccessful);
        assert_eq!(event.provider_ref, "ref_1");
        assert_eq!(event.money.amount, 10000);
        assert_eq!(event.money.currency.code(), "NGN");
        assert_eq!(event.application_ref.as_deref(), Some("order_1"));
        assert_eq!(event.customer_email.as_deref(), Some("buyer@example.com"));
        assert_eq!(event.provider_event_id, "charge.success:302961");
    }

    #[test]
    fn test_normalize_is_pure() {
        let adapter = PaystackAdapter::new();
        let payload = adapter.parse_payload(&charge_success_body()).unwrap();
        assert_eq!(
            adapter.normalize(&payload).unwrap(),
            adapter.normalize(&payload).unwrap()
        );
    }

    #[test]
    fn test_normalize_unknown_event_fails() {
        let adapter = PaystackAdapter::new();
        let payload = json!({ "event": "subscription.create", "data": {} });
        assert!(matches!(
            adapter.normalize(&payload),
            Err(NormalizeError::UnknownEventType { .. })
        ));
    }

    #[test]
    fn test_normalize_dispute_resolution() {
        let adapter = PaystackAdapter::new();
        let payload = json!({
            "event": "charge.dispute.resolve",
            "data": {
                "id": 99,
                "reference": "ref_d",
                "amount": 5000,
                "currency": "NGN",
                "resolution": "won"
            }
        });
        let event = adapter.normalize(&payload).unwrap();
        assert_eq!(event.event_type, NormalizedEventType::DisputeResolved);
        assert_eq!(event.dispute_outcome, Some(DisputeOutcome::Won));
    }

    #[test]
    fn test_classifiers() {
        let adapter = PaystackAdapter::new();
        assert!(adapter.is_success_event("charge.success"));
        assert!(adapter.is_failure_event("charge.failed"));
        assert!(adapter.is_refund_event("refund.processed"));
        assert!(adapter.is_dispute_event("charge.dispute.create"));
        assert!(!adapter.is_success_event("refund.processed"));
    }
}
