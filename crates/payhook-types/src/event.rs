//! Normalized webhook events
//!
//! Providers emit the same economic event under different names and shapes.
//! Adapters translate each provider payload into a `NormalizedEvent` so the
//! pipeline only ever reasons about one taxonomy.

use crate::{Money, TypesError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The normalized taxonomy of provider webhook events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NormalizedEventType {
    PaymentSuccessful,
    PaymentFailed,
    PaymentAbandoned,
    RefundSuccessful,
    RefundFailed,
    RefundPending,
    ChargeDisputed,
    DisputeResolved,
}

impl NormalizedEventType {
    /// Events that can auto-create a transaction when none matches
    pub fn is_initial_payment_event(&self) -> bool {
        matches!(
            self,
            Self::PaymentSuccessful | Self::PaymentFailed | Self::PaymentAbandoned
        )
    }

    /// Stable string form
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentSuccessful => "PAYMENT_SUCCESSFUL",
            Self::PaymentFailed => "PAYMENT_FAILED",
            Self::PaymentAbandoned => "PAYMENT_ABANDONED",
            Self::RefundSuccessful => "REFUND_SUCCESSFUL",
            Self::RefundFailed => "REFUND_FAILED",
            Self::RefundPending => "REFUND_PENDING",
            Self::ChargeDisputed => "CHARGE_DISPUTED",
            Self::DisputeResolved => "DISPUTE_RESOLVED",
        }
    }
}

impl fmt::Display for NormalizedEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome carried by a resolved dispute, when the provider supplies one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisputeOutcome {
    Won,
    Lost,
}

impl DisputeOutcome {
    /// Parse a provider-supplied resolution string (case-insensitive)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "won" | "merchant_won" | "resolved_won" => Some(Self::Won),
            "lost" | "merchant_lost" | "resolved_lost" => Some(Self::Lost),
            _ => None,
        }
    }
}

/// A provider webhook translated into PayHook's canonical shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// The normalized event kind
    pub event_type: NormalizedEventType,
    /// Provider-supplied unique id for the logical event (idempotency key)
    pub provider_event_id: String,
    /// The provider's reference for the underlying transaction
    pub provider_ref: String,
    /// Amount and currency in minor units
    pub money: Money,
    /// The merchant's own reference, when the provider echoes it back
    pub application_ref: Option<String>,
    /// Event timestamp as reported by the provider
    pub provider_timestamp: Option<DateTime<Utc>>,
    /// Customer email, when present in the payload
    pub customer_email: Option<String>,
    /// Dispute outcome, only for `DisputeResolved` events that carry one
    pub dispute_outcome: Option<DisputeOutcome>,
    /// Provider-specific fields worth keeping (channel, fees, gateway response)
    pub provider_metadata: serde_json::Value,
}

/// Errors produced while building a `NormalizedEvent`
#[derive(Debug, Clone, thiserror::Error)]
pub enum NormalizeError {
    #[error("unknown event type: {event_type}")]
    UnknownEventType { event_type: String },

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid field {field}: {message}")]
    InvalidField { field: &'static str, message: String },
}

impl From<TypesError> for NormalizeError {
    fn from(e: TypesError) -> Self {
        NormalizeError::InvalidField {
            field: "amount/currency",
            message: e.to_string(),
        }
    }
}
