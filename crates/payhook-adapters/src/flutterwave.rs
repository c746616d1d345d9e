//! Flutterwave adapter
//!
//! Signature: `verif-hash` carries the SHA-256 hash of the configured
//! secret; there is no per-request MAC, so verification is a constant-time
//! comparison of the header against each candidate secret's hash.
//! Amounts arrive in major units and are converted to minor units here.

use crate::adapter::{EventReferences, ProviderAdapter};
use crate::signature::{constant_time_eq, sha256_hex};
use crate::AdapterResult;
use chrono::{DateTime, Utc};
use payhook_types::{Currency, Money, NormalizeError, NormalizedEvent, NormalizedEventType};
use serde_json::{json, Value};
use std::collections::HashMap;

const SIGNATURE_HEADER: &str = "verif-hash";

const SUPPORTED_EVENTS: &[&str] = &[
    "charge.completed",
    "refund.completed",
    "refund.failed",
];

/// Adapter for Flutterwave webhooks
#[derive(Debug, Clone, Copy, Default)]
pub struct FlutterwaveAdapter;

impl FlutterwaveAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Flutterwave folds the payment outcome into `data.status` under a
    /// single `charge.completed` event name
    fn map_event(event_type: &str, data_status: Option<&str>) -> Option<NormalizedEventType> {
        match event_type {
            "charge.completed" => match data_status {
                Some("successful") => Some(NormalizedEventType::PaymentSuccessful),
                Some("failed") => Some(NormalizedEventType::PaymentFailed),
                Some("abandoned") => Some(NormalizedEventType::PaymentAbandoned),
                _ => None,
            },
            "refund.completed" => Some(NormalizedEventType::RefundSuccessful),
            "refund.failed" => Some(NormalizedEventType::RefundFailed),
            _ => None,
        }
    }
}

impl ProviderAdapter for FlutterwaveAdapter {
    fn provider(&self) -> &'static str {
        "flutterwave"
    }

    fn supported_events(&self) -> &'static [&'static str] {
        SUPPORTED_EVENTS
    }

    fn verify_signature(
        &self,
        _raw_body: &[u8],
        headers: &HashMap<String, String>,
        secrets: &[String],
    ) -> bool {
        let Some(signature) = headers.get(SIGNATURE_HEADER) else {
            return false;
        };
        secrets.iter().any(|secret| {
            let expected = sha256_hex(secret.as_bytes());
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
        let data = payload
            .get("data")
            .ok_or(NormalizeError::MissingField { field: "data" })?;
        let data_status = data.get("status").and_then(Value::as_str);

        let event_type = Self::map_event(&raw_type, data_status).ok_or(
            NormalizeError::UnknownEventType {
                event_type: match data_status {
                    Some(status) => format!("{raw_type}:{status}"),
                    None => raw_type.clone(),
                },
            },
        )?;

        let provider_ref = data
            .get("flw_ref")
            .and_then(Value::as_str)
            .ok_or(NormalizeError::MissingField { field: "data.flw_ref" })?
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
        // Flutterwave reports major units; its settlement currencies all
        // carry two decimal places
        let minor = (amount * 100.0).round();
        let money = Money::from_minor_units(minor, currency)?;

        let provider_timestamp = data
            .get("created_at")
            .and_then(Value::as_str)
            .and_then(parse_rfc3339);

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
            dispute_outcome: None,
            provider_metadata: json!({
                "payment_type": data.get("payment_type"),
                "narration": data.get("narration"),
                "app_fee": data.get("app_fee"),
            }),
        })
    }

    fn extract_idempotency_key(&self, payload: &Value) -> Option<String> {
        let raw_type = self.extract_event_type(payload)?;
        match payload.get("data").and_then(|d| d.get("id")) {
            Some(Value::Number(n)) => Some(format!("{}:{}", raw_type, n)),
            Some(Value::String(s)) => Some(format!("{}:{}", raw_type, s)),
            _ => None,
        }
    }

    fn extract_references(&self, payload: &Value) -> EventReferences {
        let data = payload.get("data");
        EventReferences {
            provider_ref: data
                .and_then(|d| d.get("flw_ref"))
                .and_then(Value::as_str)
                .map(str::to_string),
            // tx_ref is the reference the merchant supplied at initiation
            application_ref: data
                .and_then(|d| d.get("tx_ref"))
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }

    fn extract_event_type(&self, payload: &Value) -> Option<String> {
        payload.get("event").and_then(Value::as_str).map(str::to_string)
    }

    fn is_success_event(&self, event_type: &str) -> bool {
        event_type == "charge.completed"
    }

    fn is_failure_event(&self, _event_type: &str) -> bool {
        // Failure is carried in data.status, not the event name
        false
    }

    fn is_refund_event(&self, event_type: &str) -> bool {
        event_type.starts_with("refund.")
    }

    fn is_dispute_event(&self, _event_type: &str) -> bool {
        false
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

    fn charge_completed_body(status: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "event": "charge.completed",
            "data": {
                "id": 285959875,
                "tx_ref": "order_7",
                "flw_ref": "FLW-MOCK-1",
                "amount": 100.0,
                "currency": "NGN",
                "status": status,
                "payment_type": "card",
                "created_at": "2024-06-01T12:00:00Z",
                "customer": { "email": "buyer@example.com" }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_verify_signature_matches_secret_hash() {
        let adapter = FlutterwaveAdapter::new();
        let secret = "FLWSECK_TEST-abc";
        let mut headers = HashMap::new();
        headers.insert(SIGNATURE_HEADER.to_string(), sha256_hex(secret.as_bytes()));
        assert!(adapter.verify_signature(b"{}", &headers, &[secret.to_string()]));

        headers.insert(SIGNATURE_HEADER.to_string(), "wrong".to_string());
        assert!(!adapter.verify_signature(b"{}", &headers, &[secret.to_string()]));
    }

    #[test]
    fn test_normalize_successful_charge_converts_to_minor_units() {
        let adapter = FlutterwaveAdapter::new();
        let payload = adapter
            .parse_payload(&charge_completed_body("successful"))
            .unwrap();
        let event = adapter.normalize(&payload).unwrap();

        assert_eq!(event.event_type, NormalizedEventType::PaymentSuccessful);
        assert_eq!(event.money.amount, 10000);
        assert_eq!(event.provider_ref, "FLW-MOCK-1");
        assert_eq!(event.application_ref.as_deref(), Some("order_7"));
        assert_eq!(event.provider_event_id, "charge.completed:285959875");
    }

    #[test]
    fn test_normalize_failed_charge() {
        let adapter = FlutterwaveAdapter::new();
        let payload = adapter
            .parse_payload(&charge_completed_body("failed"))
            .unwrap();
        let event = adapter.normalize(&payload).unwrap();
        assert_eq!(event.event_type, NormalizedEventType::PaymentFailed);
    }

    #[test]
    fn test_normalize_unknown_status_fails() {
        let adapter = FlutterwaveAdapter::new();
        let payload = adapter
            .parse_payload(&charge_completed_body("pending"))
            .unwrap();
        assert!(matches!(
            adapter.normalize(&payload),
            Err(NormalizeError::UnknownEventType { .. })
        ));
    }
}
