//! Status enums: transaction lifecycle, processing fates, verification
//! confidence, and transition triggers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a payment transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Created, no provider activity observed yet
    Pending,
    /// Provider acknowledged, payment in flight
    Processing,
    /// Payment completed successfully
    Successful,
    /// Payment failed (terminal)
    Failed,
    /// Customer abandoned the payment (terminal)
    Abandoned,
    /// Fully refunded (terminal)
    Refunded,
    /// Partially refunded, further refunds possible
    PartiallyRefunded,
    /// Under dispute/chargeback
    Disputed,
    /// Dispute resolved in the merchant's favor (terminal)
    ResolvedWon,
    /// Dispute resolved against the merchant (terminal)
    ResolvedLost,
}

impl TransactionStatus {
    /// Check if this is a terminal state (no outgoing transitions)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Failed
                | Self::Abandoned
                | Self::Refunded
                | Self::ResolvedWon
                | Self::ResolvedLost
        )
    }

    /// Stable string form, matching the persistence schema
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Successful => "SUCCESSFUL",
            Self::Failed => "FAILED",
            Self::Abandoned => "ABANDONED",
            Self::Refunded => "REFUNDED",
            Self::PartiallyRefunded => "PARTIALLY_REFUNDED",
            Self::Disputed => "DISPUTED",
            Self::ResolvedWon => "RESOLVED_WON",
            Self::ResolvedLost => "RESOLVED_LOST",
        }
    }

    /// Parse from the stable string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "SUCCESSFUL" => Some(Self::Successful),
            "FAILED" => Some(Self::Failed),
            "ABANDONED" => Some(Self::Abandoned),
            "REFUNDED" => Some(Self::Refunded),
            "PARTIALLY_REFUNDED" => Some(Self::PartiallyRefunded),
            "DISPUTED" => Some(Self::Disputed),
            "RESOLVED_WON" => Some(Self::ResolvedWon),
            "RESOLVED_LOST" => Some(Self::ResolvedLost),
            _ => None,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The fate of a single inbound webhook claim.
///
/// Every claim that reaches the processor ends in exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    /// Fully processed (with or without a state transition)
    Processed,
    /// A prior claim with the same idempotency key already exists
    Duplicate,
    /// No transaction matched the claim's references
    Unmatched,
    /// Signature missing, invalid, or unverifiable
    SignatureFailed,
    /// Payload parsed but its event kind or fields could not be normalized
    NormalizationFailed,
    /// The state machine rejected the implied transition
    TransitionRejected,
    /// Raw bytes were not valid for the declared format (or the pipeline timed out)
    ParseError,
}

impl ProcessingStatus {
    /// Fates that must not reach downstream consumers
    pub fn suppresses_dispatch(&self) -> bool {
        matches!(
            self,
            Self::Duplicate | Self::SignatureFailed | Self::NormalizationFailed | Self::ParseError
        )
    }

    /// Stable string form, matching the persistence schema
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "PROCESSED",
            Self::Duplicate => "DUPLICATE",
            Self::Unmatched => "UNMATCHED",
            Self::SignatureFailed => "SIGNATURE_FAILED",
            Self::NormalizationFailed => "NORMALIZATION_FAILED",
            Self::TransitionRejected => "TRANSITION_REJECTED",
            Self::ParseError => "PARSE_ERROR",
        }
    }

    /// Parse from the stable string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PROCESSED" => Some(Self::Processed),
            "DUPLICATE" => Some(Self::Duplicate),
            "UNMATCHED" => Some(Self::Unmatched),
            "SIGNATURE_FAILED" => Some(Self::SignatureFailed),
            "NORMALIZATION_FAILED" => Some(Self::NormalizationFailed),
            "TRANSITION_REJECTED" => Some(Self::TransitionRejected),
            "PARSE_ERROR" => Some(Self::ParseError),
            _ => None,
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How strongly a transaction's status is believed.
///
/// Confidence is ordered and never decreases over a transaction's life:
/// `WebhookOnly` is dominated by both `ApiVerified` and `Reconciled`,
/// which rank equally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationMethod {
    /// Only a (signed) webhook claim supports the status
    WebhookOnly,
    /// Confirmed against the provider's API
    ApiVerified,
    /// Confirmed by reconciliation against provider records
    Reconciled,
}

impl VerificationMethod {
    /// Confidence rank used to enforce monotonicity
    pub fn confidence_rank(&self) -> u8 {
        match self {
            Self::WebhookOnly => 0,
            Self::ApiVerified | Self::Reconciled => 1,
        }
    }

    /// Whether moving from `self` to `next` keeps confidence non-decreasing
    pub fn can_upgrade_to(&self, next: VerificationMethod) -> bool {
        next.confidence_rank() >= self.confidence_rank()
    }

    /// Stable string form, matching the persistence schema
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WebhookOnly => "WEBHOOK_ONLY",
            Self::ApiVerified => "API_VERIFIED",
            Self::Reconciled => "RECONCILED",
        }
    }

    /// Parse from the stable string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WEBHOOK_ONLY" => Some(Self::WebhookOnly),
            "API_VERIFIED" => Some(Self::ApiVerified),
            "RECONCILED" => Some(Self::Reconciled),
            _ => None,
        }
    }
}

impl fmt::Display for VerificationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What caused a status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    /// An inbound provider webhook
    Webhook,
    /// A synchronous verification call against the provider API
    ApiVerification,
    /// A scheduled reconciliation sweep
    Reconciliation,
    /// A webhook matched to a transaction created after it arrived
    LateMatch,
    /// An operator-initiated change
    Manual,
}

impl TriggerType {
    /// Stable string form, matching the persistence schema
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "WEBHOOK",
            Self::ApiVerification => "API_VERIFICATION",
            Self::Reconciliation => "RECONCILIATION",
            Self::LateMatch => "LATE_MATCH",
            Self::Manual => "MANUAL",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-handler delivery status for a dispatch record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatus {
    /// Created, handler not yet invoked
    Pending,
    /// Handed to the handler, which returned without error
    Delivered,
    /// Handler confirmed the effect was applied
    Success,
    /// Handler returned an error
    Failed,
    /// Suppressed (fate or configuration forbids dispatch)
    Skipped,
}

impl DispatchStatus {
    /// Stable string form, matching the persistence schema
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Delivered => "DELIVERED",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }

    /// Parse from the stable string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "DELIVERED" => Some(Self::Delivered),
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            "SKIPPED" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a transactional outbox event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    /// Awaiting delivery by the outbox worker
    Pending,
    /// Delivered successfully
    Processed,
    /// Last attempt failed; will be retried at `scheduled_for`
    Failed,
    /// Retries exhausted; requires operator attention
    DeadLetter,
}

impl OutboxStatus {
    /// Stable string form, matching the persistence schema
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processed => "PROCESSED",
            Self::Failed => "FAILED",
            Self::DeadLetter => "DEAD_LETTER",
        }
    }

    /// Parse from the stable string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "PROCESSED" => Some(Self::Processed),
            "FAILED" => Some(Self::Failed),
            "DEAD_LETTER" => Some(Self::DeadLetter),
            _ => None,
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
