//! # pg-lobject
//!
//! Guarded PostgreSQL large objects and numeric SQL literals.
//!
//! A [`LargeObject`] is bound to the connection and transaction it was
//! opened in. Once the connection commits, rolls back, leaves transaction
//! mode or closes, every operation on the handle fails with a distinct
//! error instead of touching a descriptor the server already dropped.
//!
//! ## Quick Example
//!
//! ```rust
//! use pg_lobject::prelude::*;
//!
//! let conn = Connection::new(MemoryBackend::new());
//! let lo = conn.create_lobject()?;
//! lo.write(b"hello")?;
//!
//! conn.commit()?;
//! assert!(matches!(lo.write(b"again"), Err(LoError::StaleHandle)));
//!
//! let price = PgDecimal::new(f64::NAN);
//! assert_eq!(price.to_literal(), "'NaN'::numeric");
//! # Ok::<(), LoError>(())
//! ```

pub mod adapter;
pub mod backend;
pub mod config;
pub mod connection;
pub mod error;
pub mod guard;
pub mod lobject;
pub mod numeric;

pub use adapter::{Conform, DecimalValue, PgDecimal, Protocol, SqlQuote, adapt};
pub use backend::{Backend, INVALID_OID, MemoryBackend, Oid, PostgresBackend, Whence};
pub use config::Config;
pub use connection::Connection;
pub use error::{DriverError, LoError, LoResult};
pub use guard::{ConnectionState, Epoch, check_usable};
pub use lobject::{LargeObject, LoMode};
pub use numeric::Numeric;

pub mod prelude {
    pub use crate::adapter::{Conform, DecimalValue, PgDecimal, Protocol, SqlQuote, adapt};
    pub use crate::backend::{Backend, INVALID_OID, MemoryBackend, Oid, PostgresBackend, Whence};
    pub use crate::connection::Connection;
    pub use crate::error::*;
    pub use crate::lobject::{LargeObject, LoMode};
    pub use crate::numeric::Numeric;
}
