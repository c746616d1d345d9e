//! The provider adapter port

use crate::AdapterResult;
use payhook_types::{NormalizeError, NormalizedEvent};
use serde_json::Value;
use std::collections::HashMap;

/// References extracted from a provider payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventReferences {
    /// The provider's reference for the transaction
    pub provider_ref: Option<String>,
    /// The merchant's own reference, when the provider echoes it back
    pub application_ref: Option<String>,
}

/// Capability set implemented once per payment provider.
///
/// Headers are handed in with lowercase keys (the processor normalizes
/// them before the pipeline runs). `raw_body` is the verbatim HTTP body;
/// signature schemes are sensitive to byte-for-byte content, so adapters
/// must never re-serialize before verifying.
pub trait ProviderAdapter: Send + Sync {
    /// The provider name this adapter serves (lowercase)
    fn provider(&self) -> &'static str;

    /// Raw provider event names this adapter can normalize
    fn supported_events(&self) -> &'static [&'static str];

    /// Verify the webhook signature against each candidate secret in order.
    ///
    /// Trying secrets in order enables rotation: the incoming key is
    /// accepted if any configured secret validates. Returns `false` when
    /// the signature header is missing. The comparison against the
    /// candidate that ultimately matches is constant-time.
    fn verify_signature(
        &self,
        raw_body: &[u8],
        headers: &HashMap<String, String>,
        secrets: &[String],
    ) -> bool;

    /// Parse the raw body into the provider's structured payload
    fn parse_payload(&self, raw_body: &[u8]) -> AdapterResult<Value>;

    /// Translate a parsed payload into the normalized taxonomy
    fn normalize(&self, payload: &Value) -> Result<NormalizedEvent, NormalizeError>;

    /// The provider's unique id for this logical event, if it supplies one.
    ///
    /// Deterministic over the payload. When `None`, the pipeline
    /// synthesizes a key from the raw body instead.
    fn extract_idempotency_key(&self, payload: &Value) -> Option<String>;

    /// Extract transaction references from the payload
    fn extract_references(&self, payload: &Value) -> EventReferences;

    /// The raw provider event name, e.g. `charge.success`
    fn extract_event_type(&self, payload: &Value) -> Option<String>;

    /// Classify a raw event name as a success event
    fn is_success_event(&self, event_type: &str) -> bool;

    /// Classify a raw event name as a failure event
    fn is_failure_event(&self, event_type: &str) -> bool;

    /// Classify a raw event name as a refund event
    fn is_refund_event(&self, event_type: &str) -> bool;

    /// Classify a raw event name as a dispute event
    fn is_dispute_event(&self, event_type: &str) -> bool;
}
