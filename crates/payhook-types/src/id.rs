//! Identity types for PayHook
//!
//! All identity types are strongly typed wrappers around UUIDs to prevent
//! accidental mixing of different ID types.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Parse from a string (with or without prefix)
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                let s = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(s)?))
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl AsRef<Uuid> for $name {
            fn as_ref(&self) -> &Uuid {
                &self.0
            }
        }
    };
}

define_id_type!(TransactionId, "txn", "Unique identifier for a payment transaction");
define_id_type!(WebhookLogId, "wh", "Unique identifier for an inbound webhook log row");
define_id_type!(AuditLogId, "audit", "Unique identifier for an audit log entry");
define_id_type!(DispatchLogId, "disp", "Unique identifier for a handler dispatch record");
define_id_type!(OutboxEventId, "obx", "Unique identifier for a transactional outbox event");
define_id_type!(ProcessingId, "proc", "Per-request identifier assigned by the processor");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display_has_prefix() {
        let id = TransactionId::new();
        assert!(id.to_string().starts_with("txn_"));
    }

    #[test]
    fn test_id_parse_roundtrip() {
        let id = WebhookLogId::new();
        let parsed = WebhookLogId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);

        // Bare UUID also parses
        let bare = WebhookLogId::parse(&id.0.to_string()).unwrap();
        assert_eq!(id, bare);
    }

    #[test]
    fn test_ids_are_distinct_types() {
        // Compile-time property; keep a trivial runtime assertion
        let a = TransactionId::new();
        let b = TransactionId::from_uuid(*a.as_uuid());
        assert_eq!(a, b);
    }
}
