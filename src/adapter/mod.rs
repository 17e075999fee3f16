//! Adapter protocol: how values render themselves into SQL text.
//!
//! A dispatcher asks a value to `conform` to a protocol; a value that
//! implements it hands back itself as the protocol object, anything else
//! answers `None`.

pub mod decimal;

pub use decimal::{DecimalValue, NAN_LITERAL, PgDecimal};

use std::fmt;

use crate::error::{LoError, LoResult};

/// Protocol tokens a value can be probed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Render as a SQL literal (`getquoted`).
    SqlQuote,
    /// Any protocol defined outside this crate.
    Named(&'static str),
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::SqlQuote => f.write_str("ISQLQuote"),
            Protocol::Named(name) => f.write_str(name),
        }
    }
}

/// Renders a value as SQL text.
pub trait SqlQuote {
    fn getquoted(&self) -> String;
}

/// Capability probe used by the dispatcher.
pub trait Conform {
    fn conform(&self, protocol: Protocol) -> Option<&dyn SqlQuote>;
}

/// Render `value` through `protocol`, failing if it doesn't conform.
pub fn adapt(value: &dyn Conform, protocol: Protocol) -> LoResult<String> {
    value
        .conform(protocol)
        .map(|quote| quote.getquoted())
        .ok_or_else(|| LoError::CannotAdapt(format!("value does not conform to {protocol}")))
}
