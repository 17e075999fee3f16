//! Decimal adapter.
//!
//! Finite values render as their own text. PostgreSQL can only be sent one
//! non-finite numeric literal portably, so NaN and both infinities all
//! render as `'NaN'::numeric`.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use super::{Conform, Protocol, SqlQuote};

/// Literal used for every non-finite value.
pub const NAN_LITERAL: &str = "'NaN'::numeric";

/// A decimal value that can report whether it is finite.
pub trait DecimalValue: fmt::Display {
    fn is_finite(&self) -> bool;
}

impl DecimalValue for rust_decimal::Decimal {
    fn is_finite(&self) -> bool {
        true
    }
}

impl DecimalValue for f64 {
    fn is_finite(&self) -> bool {
        f64::is_finite(*self)
    }
}

impl DecimalValue for f32 {
    fn is_finite(&self) -> bool {
        f32::is_finite(*self)
    }
}

/// Shares ownership of a decimal value and renders it on demand.
///
/// Nothing is checked at wrap time: the value as it is when rendered is
/// what gets rendered.
#[derive(Debug)]
pub struct PgDecimal<D> {
    wrapped: Arc<RwLock<D>>,
}

impl<D: DecimalValue> PgDecimal<D> {
    pub fn wrap(value: Arc<RwLock<D>>) -> Self {
        Self { wrapped: value }
    }

    /// Take ownership of `value` behind a fresh shared reference.
    pub fn new(value: D) -> Self {
        Self::wrap(Arc::new(RwLock::new(value)))
    }

    /// The wrapped value.
    pub fn adapted(&self) -> &Arc<RwLock<D>> {
        &self.wrapped
    }

    pub fn to_literal(&self) -> String {
        let value = self.wrapped.read().unwrap_or_else(PoisonError::into_inner);
        if value.is_finite() {
            value.to_string()
        } else {
            NAN_LITERAL.to_string()
        }
    }
}

impl<D> Clone for PgDecimal<D> {
    fn clone(&self) -> Self {
        Self {
            wrapped: Arc::clone(&self.wrapped),
        }
    }
}

impl<D: DecimalValue> SqlQuote for PgDecimal<D> {
    fn getquoted(&self) -> String {
        self.to_literal()
    }
}

impl<D: DecimalValue> Conform for PgDecimal<D> {
    fn conform(&self, protocol: Protocol) -> Option<&dyn SqlQuote> {
        match protocol {
            Protocol::SqlQuote => Some(self),
            Protocol::Named(_) => None,
        }
    }
}

impl<D: DecimalValue> fmt::Display for PgDecimal<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_literal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::Numeric;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_float_non_finite() {
        assert_eq!(PgDecimal::new(f64::NAN).to_literal(), NAN_LITERAL);
        assert_eq!(PgDecimal::new(f64::INFINITY).getquoted(), NAN_LITERAL);
        assert_eq!(PgDecimal::new(f32::NEG_INFINITY).to_literal(), NAN_LITERAL);
        assert_eq!(PgDecimal::new(2.5f64).to_literal(), "2.5");
    }

    #[test]
    fn test_render_sees_latest_value() {
        let shared = Arc::new(RwLock::new(Numeric::new("1.0")));
        let adapter = PgDecimal::wrap(Arc::clone(&shared));
        assert_eq!(adapter.to_literal(), "1.0");

        *shared.write().unwrap() = Numeric::nan();
        assert_eq!(adapter.to_literal(), NAN_LITERAL);
    }

    #[test]
    fn test_wrapper_shares_ownership() {
        let shared = Arc::new(RwLock::new(Numeric::new("7")));
        let adapter = PgDecimal::wrap(Arc::clone(&shared));
        let copy = adapter.clone();
        assert_eq!(Arc::strong_count(&shared), 3);
        assert!(Arc::ptr_eq(adapter.adapted(), copy.adapted()));

        drop(adapter);
        drop(copy);
        assert_eq!(Arc::strong_count(&shared), 1);
    }
}
