//! Connection state shared with the large objects opened on it.
//!
//! The connection owns the backend session and the three fields handles
//! are checked against: closed flag, isolation level and epoch. Handles
//! keep only a weak reference and never write any of them.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use crate::backend::{Backend, INVALID_OID, Oid};
use crate::config::Config;
use crate::error::{LoError, LoResult};
use crate::guard::{ConnectionState, Epoch};
use crate::lobject::{LargeObject, LoMode};

/// libpq's LO_BUFSIZE.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Isolation level values: 0 is autocommit.
pub const ISOLATION_LEVEL_AUTOCOMMIT: i32 = 0;
pub const ISOLATION_LEVEL_READ_COMMITTED: i32 = 1;
pub const ISOLATION_LEVEL_SERIALIZABLE: i32 = 2;

pub(crate) struct Inner<B> {
    pub(crate) backend: B,
    pub(crate) state: ConnectionState,
    pub(crate) chunk_size: usize,
    in_transaction: bool,
    default_level: i32,
}

impl<B: Backend> Inner<B> {
    /// Issue BEGIN unless a transaction is already open.
    pub(crate) fn ensure_transaction(&mut self) -> LoResult<()> {
        if !self.in_transaction && self.state.isolation_level > 0 {
            self.backend.begin()?;
            self.in_transaction = true;
        }
        Ok(())
    }

    /// End the current transaction with COMMIT or ROLLBACK and start a new epoch.
    ///
    /// The epoch advances even when the server call fails: the transaction
    /// is over either way.
    fn finish(&mut self, commit: bool) -> LoResult<()> {
        let result = if self.in_transaction {
            self.in_transaction = false;
            if commit {
                self.backend.commit()
            } else {
                self.backend.rollback()
            }
        } else {
            Ok(())
        };
        self.state.epoch += 1;
        result.map_err(LoError::from)
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A client connection able to open guarded large objects.
pub struct Connection<B: Backend> {
    pub(crate) inner: Arc<Mutex<Inner<B>>>,
}

impl<B: Backend> Connection<B> {
    /// Wrap a backend session at read committed isolation.
    pub fn new(backend: B) -> Self {
        Self::with_options(backend, ISOLATION_LEVEL_READ_COMMITTED, DEFAULT_CHUNK_SIZE)
    }

    /// Wrap a backend session using the `[connection]` and `[large_object]` settings.
    pub fn from_config(backend: B, config: &Config) -> LoResult<Self> {
        let level = validate_level(config.connection.isolation_level)?;
        Ok(Self::with_options(backend, level, config.large_object.chunk_size))
    }

    fn with_options(backend: B, isolation_level: i32, chunk_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                backend,
                state: ConnectionState {
                    closed: false,
                    isolation_level,
                    epoch: 0,
                },
                chunk_size: chunk_size.max(1),
                in_transaction: false,
                default_level: isolation_level,
            })),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner<B>> {
        lock(&self.inner)
    }

    /// Current values of the fields large objects are checked against.
    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    pub fn epoch(&self) -> Epoch {
        self.lock().state.epoch
    }

    pub fn isolation_level(&self) -> i32 {
        self.lock().state.isolation_level
    }

    pub fn closed(&self) -> bool {
        self.lock().state.closed
    }

    /// Whether BEGIN has been issued and not yet ended.
    pub fn in_transaction(&self) -> bool {
        self.lock().in_transaction
    }

    /// Switch isolation level, rolling back any open transaction first.
    pub fn set_isolation_level(&self, level: i32) -> LoResult<()> {
        let level = validate_level(level)?;
        let mut inner = self.lock();
        if inner.state.closed {
            return Err(LoError::ConnectionClosed);
        }
        if inner.state.isolation_level == level {
            return Ok(());
        }

        let result = if inner.state.isolation_level > 0 {
            inner.finish(false)
        } else {
            Ok(())
        };
        inner.state.isolation_level = level;
        info!(level, epoch = inner.state.epoch, "isolation level switched");
        result
    }

    pub fn commit(&self) -> LoResult<()> {
        let mut inner = self.lock();
        if inner.state.closed {
            return Err(LoError::ConnectionClosed);
        }
        let result = inner.finish(true);
        info!(epoch = inner.state.epoch, "transaction committed");
        result
    }

    pub fn rollback(&self) -> LoResult<()> {
        let mut inner = self.lock();
        if inner.state.closed {
            return Err(LoError::ConnectionClosed);
        }
        let result = inner.finish(false);
        info!(epoch = inner.state.epoch, "transaction rolled back");
        result
    }

    /// Roll back and restore the isolation level the connection started with.
    pub fn reset(&self) -> LoResult<()> {
        let mut inner = self.lock();
        if inner.state.closed {
            return Err(LoError::ConnectionClosed);
        }
        let result = inner.finish(false);
        inner.state.isolation_level = inner.default_level;
        info!(epoch = inner.state.epoch, "connection reset");
        result
    }

    /// Close the session. Closing twice is a no-op.
    ///
    /// An open transaction is rolled back first; its failure is logged and
    /// otherwise ignored since the session is going away.
    pub fn close(&self) -> LoResult<()> {
        let mut inner = self.lock();
        if inner.state.closed {
            return Ok(());
        }
        inner.state.closed = true;
        if inner.in_transaction {
            inner.in_transaction = false;
            if let Err(err) = inner.backend.rollback() {
                warn!(error = %err, "rollback on close failed");
            }
        }
        info!("connection closed");
        inner.backend.close().map_err(LoError::from)
    }

    /// Open or create a large object.
    ///
    /// With `oid == INVALID_OID` a new object is created (as `new_oid` when
    /// given), or imported from `new_file`; the handle is then opened for
    /// writing regardless of `mode`.
    pub fn lobject(
        &self,
        oid: Oid,
        mode: LoMode,
        new_oid: Option<Oid>,
        new_file: Option<&Path>,
    ) -> LoResult<LargeObject<B>> {
        LargeObject::open(self, oid, mode, new_oid, new_file)
    }

    /// Create a new empty object, opened for writing.
    pub fn create_lobject(&self) -> LoResult<LargeObject<B>> {
        self.lobject(INVALID_OID, LoMode::Write, None, None)
    }

    pub fn open_lobject(&self, oid: Oid, mode: LoMode) -> LoResult<LargeObject<B>> {
        self.lobject(oid, mode, None, None)
    }

    /// Create a new object from a local file.
    pub fn import_lobject(&self, path: impl AsRef<Path>) -> LoResult<LargeObject<B>> {
        self.lobject(INVALID_OID, LoMode::Write, None, Some(path.as_ref()))
    }
}

fn validate_level(level: i32) -> LoResult<i32> {
    match level {
        ISOLATION_LEVEL_AUTOCOMMIT..=ISOLATION_LEVEL_SERIALIZABLE => Ok(level),
        _ => Err(LoError::InvalidIsolationLevel(level)),
    }
}
