//! PayHook Provider Adapters
//!
//! One adapter per payment provider. An adapter owns everything
//! provider-specific: signature verification against the provider's header
//! convention, payload parsing, normalization into PayHook's event
//! taxonomy, and reference/idempotency-key extraction. Nothing outside
//! this crate reads a provider payload's shape.
//!
//! Adapters are pure functions of their inputs. Secret material is handed
//! in by the caller per verification; adapters never store secrets.

pub mod flutterwave;
pub mod paystack;
pub mod registry;
pub mod signature;
pub mod stripe;

mod adapter;

pub use adapter::{EventReferences, ProviderAdapter};
pub use flutterwave::FlutterwaveAdapter;
pub use paystack::PaystackAdapter;
pub use registry::AdapterRegistry;
pub use stripe::StripeAdapter;

use thiserror::Error;

/// Result type for adapter operations
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Errors produced by provider adapters
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Raw bytes are not valid for the provider's declared format
    #[error("payload parse error: {message}")]
    Parse { message: String },

    /// No adapter registered for the provider
    #[error("unknown provider: {provider}")]
    UnknownProvider { provider: String },
}

impl From<serde_json::Error> for AdapterError {
    fn from(e: serde_json::Error) -> Self {
        AdapterError::Parse {
            message: e.to_string(),
        }
    }
}
