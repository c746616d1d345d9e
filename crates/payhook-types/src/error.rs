//! Error types for PayHook domain values

use thiserror::Error;

/// Result type for type-level validation
pub type TypesResult<T> = std::result::Result<T, TypesError>;

/// Validation errors for PayHook domain values
#[derive(Debug, Clone, Error)]
pub enum TypesError {
    /// Currency code is not three uppercase ASCII letters
    #[error("invalid currency code: {code:?}")]
    InvalidCurrency { code: String },

    /// Amount is negative, fractional, or out of range
    #[error("invalid amount in minor units: {raw}")]
    InvalidAmount { raw: f64 },

    /// Currency mismatch in arithmetic
    #[error("currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: String, actual: String },

    /// Amount overflow during arithmetic
    #[error("amount overflow")]
    AmountOverflow,
}
