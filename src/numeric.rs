//! NUMERIC/DECIMAL values kept in their textual form.
//!
//! PostgreSQL NUMERIC is variable precision and may hold `NaN`, and since
//! PostgreSQL 14 also `Infinity` and `-Infinity`. Keeping the
//! text avoids any loss of precision.

use std::fmt;

use crate::adapter::DecimalValue;

/// NUMERIC/DECIMAL type (stored as string for precision)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Numeric(pub String);

impl Numeric {
    /// Create from string representation
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn nan() -> Self {
        Self("NaN".to_string())
    }

    pub fn infinity() -> Self {
        Self("Infinity".to_string())
    }

    pub fn neg_infinity() -> Self {
        Self("-Infinity".to_string())
    }

    /// Parse as f64 (may lose precision for very large numbers)
    pub fn to_f64(&self) -> Result<f64, std::num::ParseFloatError> {
        self.0.trim().parse()
    }

    pub fn is_nan(&self) -> bool {
        self.0.trim().eq_ignore_ascii_case("nan")
    }

    /// `Infinity`, `+Infinity`, `-Infinity` and the `inf` abbreviations.
    pub fn is_infinite(&self) -> bool {
        let s = self.0.trim();
        let s = s.strip_prefix(['+', '-']).unwrap_or(s);
        s.eq_ignore_ascii_case("infinity") || s.eq_ignore_ascii_case("inf")
    }

    /// Get the string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl DecimalValue for Numeric {
    fn is_finite(&self) -> bool {
        !self.is_nan() && !self.is_infinite()
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<rust_decimal::Decimal> for Numeric {
    fn from(value: rust_decimal::Decimal) -> Self {
        Self(value.to_string())
    }
}
