//! PayHook State Machine - transition validation for payment transactions
//!
//! The state machine is pure: no I/O, no clock, no storage. Given the
//! current status, a target status, and the trigger context, it decides
//! allow or reject. Rejection is a value, not an error - callers record it
//! as an audit row and a `TRANSITION_REJECTED` fate.
//!
//! # Invariants
//!
//! 1. Terminal statuses admit no outgoing transitions, ever - not even
//!    forced manual overrides
//! 2. All non-terminal movement follows the edge table below
//! 3. A forced `MANUAL` trigger may take a non-table edge between
//!    non-terminal states

use payhook_types::{DisputeOutcome, NormalizedEventType, TransactionStatus, TriggerType};
use serde::{Deserialize, Serialize};

/// Context consulted when validating a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionContext {
    /// What is driving the transition
    pub trigger: TriggerType,
    /// Operator override flag; only honored for `TriggerType::Manual`
    pub force: bool,
}

impl TransitionContext {
    /// Context for a webhook-driven transition
    pub fn webhook() -> Self {
        Self {
            trigger: TriggerType::Webhook,
            force: false,
        }
    }

    /// Context for an operator-driven transition
    pub fn manual(force: bool) -> Self {
        Self {
            trigger: TriggerType::Manual,
            force,
        }
    }
}

/// The outcome of validating a transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionOutcome {
    /// The transition may be applied
    Allowed,
    /// The transition is rejected; the reason is operator-readable
    Rejected { reason: String },
}

impl TransitionOutcome {
    /// Check whether the transition was allowed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// The rejection reason, if rejected
    pub fn rejection_reason(&self) -> Option<&str> {
        match self {
            Self::Allowed => None,
            Self::Rejected { reason } => Some(reason),
        }
    }
}

/// Targets reachable from `from` by ordinary (non-forced) transitions
pub fn allowed_targets(from: TransactionStatus) -> &'static [TransactionStatus] {
    use TransactionStatus::*;
    match from {
        Pending => &[Processing, Abandoned, Failed],
        Processing => &[Successful, Failed, Abandoned],
        Successful => &[Refunded, PartiallyRefunded, Disputed],
        PartiallyRefunded => &[Refunded, Disputed],
        Disputed => &[ResolvedWon, ResolvedLost, Successful],
        Failed | Abandoned | Refunded | ResolvedWon | ResolvedLost => &[],
    }
}

/// Validate a proposed status transition.
///
/// Equal source and target is rejected here; callers treat an equal target
/// as "no transition" before consulting the machine, so reaching this path
/// with `from == to` means a duplicate slipped past deduplication.
pub fn validate_transition(
    from: TransactionStatus,
    to: TransactionStatus,
    ctx: TransitionContext,
) -> TransitionOutcome {
    if from.is_terminal() {
        return TransitionOutcome::Rejected {
            reason: format!("{from} is terminal; no further transitions are allowed"),
        };
    }

    if from == to {
        return TransitionOutcome::Rejected {
            reason: format!("transition {from} -> {to} is a no-op; already applied"),
        };
    }

    if allowed_targets(from).contains(&to) {
        return TransitionOutcome::Allowed;
    }

    if ctx.trigger == TriggerType::Manual && ctx.force {
        return TransitionOutcome::Allowed;
    }

    TransitionOutcome::Rejected {
        reason: format!("no edge {from} -> {to} for trigger {}", ctx.trigger),
    }
}

/// Map a normalized event to the transaction status it implies.
///
/// `None` means the event never changes status (refund failures and
/// pending refunds only annotate the transaction).
pub fn map_event_to_status(
    event_type: NormalizedEventType,
    dispute_outcome: Option<DisputeOutcome>,
) -> Option<TransactionStatus> {
    use NormalizedEventType::*;
    match event_type {
        PaymentSuccessful => Some(TransactionStatus::Successful),
        PaymentFailed => Some(TransactionStatus::Failed),
        PaymentAbandoned => Some(TransactionStatus::Abandoned),
        RefundSuccessful => Some(TransactionStatus::Refunded),
        RefundFailed | RefundPending => None,
        ChargeDisputed => Some(TransactionStatus::Disputed),
        DisputeResolved => Some(match dispute_outcome {
            Some(DisputeOutcome::Won) => TransactionStatus::ResolvedWon,
            Some(DisputeOutcome::Lost) => TransactionStatus::ResolvedLost,
            // No carried outcome: the dispute was cancelled
            None => TransactionStatus::Successful,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransactionStatus::*;

    #[test]
    fn test_table_edges_allowed() {
        let ctx = TransitionContext::webhook();
        assert!(validate_transition(Pending, Processing, ctx).is_allowed());
        assert!(validate_transition(Processing, Successful, ctx).is_allowed());
        assert!(validate_transition(Successful, Refunded, ctx).is_allowed());
        assert!(validate_transition(Successful, PartiallyRefunded, ctx).is_allowed());
        assert!(validate_transition(PartiallyRefunded, Refunded, ctx).is_allowed());
        assert!(validate_transition(Disputed, ResolvedWon, ctx).is_allowed());
        assert!(validate_transition(Disputed, Successful, ctx).is_allowed());
    }

    #[test]
    fn test_off_table_edges_rejected() {
        let ctx = TransitionContext::webhook();
        assert!(!validate_transition(Pending, Successful, ctx).is_allowed());
        assert!(!validate_transition(Successful, Failed, ctx).is_allowed());
        assert!(!validate_transition(Processing, Refunded, ctx).is_allowed());
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        let forced = TransitionContext::manual(true);
        for from in [Failed, Abandoned, Refunded, ResolvedWon, ResolvedLost] {
            for to in [Pending, Processing, Successful, Refunded, Disputed] {
                let outcome = validate_transition(from, to, forced);
                assert!(
                    !outcome.is_allowed(),
                    "terminal {from} must reject transition to {to}"
                );
            }
        }
    }

    #[test]
    fn test_equal_target_rejected() {
        let outcome =
            validate_transition(Successful, Successful, TransitionContext::webhook());
        assert!(!outcome.is_allowed());
        assert!(outcome.rejection_reason().unwrap().contains("already applied"));
    }

    #[test]
    fn test_manual_force_takes_off_table_edge() {
        // Not in the table, but forced manual between non-terminal states
        let outcome = validate_transition(Pending, Successful, TransitionContext::manual(true));
        assert!(outcome.is_allowed());

        // Without force, the same edge is rejected
        let outcome = validate_transition(Pending, Successful, TransitionContext::manual(false));
        assert!(!outcome.is_allowed());
    }

    #[test]
    fn test_event_mapping() {
        use NormalizedEventType::*;
        assert_eq!(map_event_to_status(PaymentSuccessful, None), Some(Successful));
        assert_eq!(map_event_to_status(PaymentFailed, None), Some(Failed));
        assert_eq!(map_event_to_status(PaymentAbandoned, None), Some(Abandoned));
        assert_eq!(map_event_to_status(RefundSuccessful, None), Some(Refunded));
        assert_eq!(map_event_to_status(RefundFailed, None), None);
        assert_eq!(map_event_to_status(RefundPending, None), None);
        assert_eq!(map_event_to_status(ChargeDisputed, None), Some(Disputed));
        assert_eq!(
            map_event_to_status(DisputeResolved, Some(payhook_types::DisputeOutcome::Won)),
            Some(ResolvedWon)
        );
        assert_eq!(
            map_event_to_status(DisputeResolved, Some(payhook_types::DisputeOutcome::Lost)),
            Some(ResolvedLost)
        );
        assert_eq!(map_event_to_status(DisputeResolved, None), Some(Successful));
    }
}
