//! Money types in minor units
//!
//! PayHook stores every amount as a non-negative integer in the smallest
//! unit of its currency (kobo, cents, pesewas). Providers disagree on
//! whether they send major or minor units; adapters convert at the edge so
//! nothing downstream ever sees a float.

use crate::{TypesError, TypesResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// ISO 4217 currency code: exactly three ASCII uppercase letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency([u8; 3]);

impl Currency {
    /// Parse a currency code, accepting only three uppercase ASCII letters
    pub fn new(code: &str) -> TypesResult<Self> {
        let bytes = code.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_uppercase()) {
            return Err(TypesError::InvalidCurrency {
                code: code.to_string(),
            });
        }
        Ok(Self([bytes[0], bytes[1], bytes[2]]))
    }

    /// Parse leniently: trims whitespace and uppercases before validating
    pub fn parse_lenient(code: &str) -> TypesResult<Self> {
        Self::new(code.trim().to_ascii_uppercase().as_str())
    }

    /// Get the ISO 4217 code
    pub fn code(&self) -> &str {
        // Validated at construction to be ASCII uppercase
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl TryFrom<String> for Currency {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.code().to_string()
    }
}

impl std::str::FromStr for Currency {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// An amount of money in minor units with its currency
///
/// The amount is a `u64`, which makes negative values unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Amount in the smallest currency unit (kobo, cents, ...)
    pub amount: u64,
    /// ISO 4217 currency
    pub currency: Currency,
}

impl Money {
    /// Create a new amount
    pub fn new(amount: u64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Create a zero amount
    pub fn zero(currency: Currency) -> Self {
        Self {
            amount: 0,
            currency,
        }
    }

    /// Build from an amount that may be negative or fractional on the wire.
    ///
    /// Rejects negatives and non-integral values rather than rounding:
    /// a provider sending `100.5` minor units is a schema mismatch, not a
    /// rounding problem.
    pub fn from_minor_units(raw: f64, currency: Currency) -> TypesResult<Self> {
        if !raw.is_finite() || raw < 0.0 || raw.fract() != 0.0 || raw > u64::MAX as f64 {
            return Err(TypesError::InvalidAmount { raw });
        }
        Ok(Self {
            amount: raw as u64,
            currency,
        })
    }

    /// Check if the amount is zero
    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    /// Checked addition (currencies must match)
    pub fn checked_add(self, other: Self) -> TypesResult<Self> {
        if self.currency != other.currency {
            return Err(TypesError::CurrencyMismatch {
                expected: self.currency.code().to_string(),
                actual: other.currency.code().to_string(),
            });
        }
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or(TypesError::AmountOverflow)?;
        Ok(Self {
            amount,
            currency: self.currency,
        })
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}
