//! PayHook Types - Canonical domain types for webhook-driven payment processing
//!
//! This crate contains all foundational types for PayHook with zero dependencies
//! on other payhook crates. It defines the complete type system for:
//!
//! - Identity types (TransactionId, WebhookLogId, AuditLogId, etc.)
//! - Money and currency types in minor units
//! - Transaction status and verification confidence
//! - Normalized webhook events and their taxonomy
//! - Processing fates (the terminal classification of every inbound claim)
//!
//! # Architectural Invariants
//!
//! These types support the core PayHook guarantees:
//!
//! 1. Every inbound webhook terminates with exactly one fate
//! 2. Transaction status only moves along edges the state machine permits
//! 3. Verification confidence never decreases
//! 4. Amounts are non-negative integers in the smallest currency unit

pub mod error;
pub mod event;
pub mod id;
pub mod money;
pub mod status;

pub use error::*;
pub use event::*;
pub use id::*;
pub use money::*;
pub use status::*;

/// Version of the PayHook types schema
pub const TYPES_VERSION: &str = "0.1.0";
