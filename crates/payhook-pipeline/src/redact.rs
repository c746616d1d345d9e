//! Redaction of stored payloads and headers
//!
//! Webhook logs are kept for months; card fragments and credentials must
//! never reach them. Matching is by case-insensitive substring on key
//! names, applied recursively.

use serde_json::Value;
use std::collections::HashMap;

const REDACTED: &str = "[REDACTED]";

/// Headers whose values are always redacted before storage
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "x-api-key",
    "x-secret-key",
    "x-auth-token",
];

/// Redact matching keys anywhere in a JSON tree
pub fn redact_payload(value: &Value, redact_keys: &[String]) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                let lower = key.to_ascii_lowercase();
                if redact_keys.iter().any(|k| lower.contains(&k.to_ascii_lowercase())) {
                    out.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(key.clone(), redact_payload(val, redact_keys));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| redact_payload(item, redact_keys))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Redact sensitive header values; keys are expected lowercased already
pub fn redact_headers(headers: &HashMap<String, String>) -> Value {
    let mut out = serde_json::Map::with_capacity(headers.len());
    for (key, value) in headers {
        let redacted = SENSITIVE_HEADERS.contains(&key.as_str());
        out.insert(
            key.clone(),
            Value::String(if redacted {
                REDACTED.to_string()
            } else {
                value.clone()
            }),
        );
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_redacts_nested_keys() {
        let payload = json!({
            "data": {
                "amount": 1000,
                "card_number": "4111111111111111",
                "customer": { "authorization_code": "AUTH_x" }
            }
        });
        let keys = vec!["card".to_string(), "authorization".to_string()];
        let redacted = redact_payload(&payload, &keys);

        assert_eq!(redacted["data"]["amount"], 1000);
        assert_eq!(redacted["data"]["card_number"], "[REDACTED]");
        assert_eq!(redacted["data"]["customer"]["authorization_code"], "[REDACTED]");
    }

    #[test]
    fn test_redacts_inside_arrays() {
        let payload = json!({ "items": [{ "cvv": "123" }, { "ok": true }] });
        let keys = vec!["cvv".to_string()];
        let redacted = redact_payload(&payload, &keys);
        assert_eq!(redacted["items"][0]["cvv"], "[REDACTED]");
        assert_eq!(redacted["items"][1]["ok"], true);
    }

    #[test]
    fn test_match_is_case_insensitive() {
        let payload = json!({ "CardNumber": "4242" });
        let keys = vec!["card".to_string()];
        let redacted = redact_payload(&payload, &keys);
        assert_eq!(redacted["CardNumber"], "[REDACTED]");
    }

    #[test]
    fn test_redacts_sensitive_headers_only() {
        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), "Bearer abc".to_string());
        headers.insert("x-api-key".to_string(), "key".to_string());
        headers.insert("content-type".to_string(), "application/json".to_string());

        let redacted = redact_headers(&headers);
        assert_eq!(redacted["authorization"], "[REDACTED]");
        assert_eq!(redacted["x-api-key"], "[REDACTED]");
        assert_eq!(redacted["content-type"], "application/json");
    }
}
