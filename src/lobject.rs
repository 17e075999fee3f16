//! Guarded large-object handles.
//!
//! Every file-like operation runs `check_usable` against the owning
//! connection's live state before calling into the backend.

use std::fmt;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use crate::backend::{self, Backend, INV_READ, INV_WRITE, INVALID_OID, Oid, Whence};
use crate::connection::{Connection, Inner, lock};
use crate::error::{LoError, LoResult};
use crate::guard::{self, Epoch};

/// Mode a large object is opened with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoMode {
    #[default]
    Read,
    Write,
    ReadWrite,
    /// Don't open: the handle only carries the object id.
    NoOpen,
}

impl LoMode {
    /// `lo_open` flags, or `None` when nothing is opened.
    pub fn flags(self) -> Option<i32> {
        match self {
            LoMode::Read => Some(INV_READ),
            LoMode::Write => Some(INV_WRITE),
            LoMode::ReadWrite => Some(INV_READ | INV_WRITE),
            LoMode::NoOpen => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoMode::Read => "r",
            LoMode::Write => "w",
            LoMode::ReadWrite => "rw",
            LoMode::NoOpen => "n",
        }
    }
}

impl FromStr for LoMode {
    type Err = LoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "r" => Ok(LoMode::Read),
            "w" => Ok(LoMode::Write),
            "rw" | "wr" => Ok(LoMode::ReadWrite),
            "n" => Ok(LoMode::NoOpen),
            other => Err(LoError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for LoMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A server-side large object bound to one connection and one epoch.
pub struct LargeObject<B: Backend> {
    conn: Weak<Mutex<Inner<B>>>,
    mark: Epoch,
    fd: Option<i32>,
    oid: Oid,
    mode: LoMode,
}

impl<B: Backend> LargeObject<B> {
    pub(crate) fn open(
        conn: &Connection<B>,
        oid: Oid,
        mode: LoMode,
        new_oid: Option<Oid>,
        new_file: Option<&Path>,
    ) -> LoResult<Self> {
        let mut inner = conn.lock();
        if inner.state.closed {
            return Err(LoError::Closed);
        }
        if inner.state.isolation_level == 0 {
            return Err(LoError::TransactionRequired);
        }

        let mark = inner.state.epoch;
        inner.ensure_transaction()?;

        let (oid, mode) = if oid == INVALID_OID {
            let created = match new_file {
                Some(path) => {
                    let chunk_size = inner.chunk_size;
                    backend::import(&mut inner.backend, path, chunk_size)?
                }
                None => inner.backend.lo_create(new_oid.unwrap_or(INVALID_OID))?,
            };
            debug!(oid = created, "large object created");
            (created, LoMode::Write)
        } else {
            (oid, mode)
        };

        let fd = match mode.flags() {
            Some(flags) => {
                let fd = inner.backend.lo_open(oid, flags)?;
                debug!(fd, oid, mode = mode.as_str(), "large object opened");
                Some(fd)
            }
            None => None,
        };

        Ok(Self {
            conn: Arc::downgrade(&conn.inner),
            mark,
            fd,
            oid,
            mode,
        })
    }

    /// Run `op` with the connection locked, after the handle passed the guard.
    fn guarded<T>(&self, op: impl FnOnce(&mut Inner<B>, i32) -> LoResult<T>) -> LoResult<T> {
        let conn = self.conn.upgrade().ok_or(LoError::Closed)?;
        let mut inner = lock(&conn);
        guard::check_usable(self.fd.is_some(), Some(&inner.state), self.mark)?;
        let fd = self.fd.ok_or(LoError::Closed)?;
        op(&mut inner, fd)
    }

    /// Fail with `Closed`, `TransactionRequired` or `StaleHandle`, in that order.
    pub fn check_usable(&self) -> LoResult<()> {
        let conn = self.conn.upgrade();
        let state = conn.as_ref().map(|conn| lock(conn).state);
        guard::check_usable(self.fd.is_some(), state.as_ref(), self.mark)
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn mode(&self) -> LoMode {
        self.mode
    }

    /// Epoch of the connection when the handle was opened.
    pub fn mark(&self) -> Epoch {
        self.mark
    }

    /// True once the descriptor is closed or the connection is closed or gone.
    pub fn closed(&self) -> bool {
        if self.fd.is_none() {
            return true;
        }
        match self.conn.upgrade() {
            Some(conn) => lock(&conn).state.closed,
            None => true,
        }
    }

    /// Read at most `size` bytes, or everything up to the end with `None`.
    pub fn read(&self, size: Option<usize>) -> LoResult<Vec<u8>> {
        self.guarded(|inner, fd| {
            let len = match size {
                Some(len) => len,
                None => {
                    let here = inner.backend.lo_tell(fd)?;
                    let end = inner.backend.lo_lseek(fd, 0, Whence::End)?;
                    inner.backend.lo_lseek(fd, here, Whence::Set)?;
                    usize::try_from(end - here).unwrap_or(0)
                }
            };
            let data = inner.backend.lo_read(fd, len)?;
            debug!(fd, requested = len, read = data.len(), "large object read");
            Ok(data)
        })
    }

    pub fn write(&self, buf: &[u8]) -> LoResult<usize> {
        self.guarded(|inner, fd| {
            let written = inner.backend.lo_write(fd, buf)?;
            debug!(fd, written, "large object written");
            Ok(written)
        })
    }

    /// Move the position, returning the new absolute offset.
    pub fn seek(&self, offset: i64, whence: Whence) -> LoResult<i64> {
        self.guarded(|inner, fd| {
            let pos = inner.backend.lo_lseek(fd, offset, whence)?;
            debug!(fd, offset, whence = whence.as_i32(), pos, "large object seek");
            Ok(pos)
        })
    }

    pub fn tell(&self) -> LoResult<i64> {
        self.guarded(|inner, fd| {
            let pos = inner.backend.lo_tell(fd)?;
            debug!(fd, pos, "large object tell");
            Ok(pos)
        })
    }

    /// Close the descriptor.
    ///
    /// The handle is closed afterwards even when the server reports a
    /// failure; that failure is still returned.
    pub fn close(&mut self) -> LoResult<()> {
        let conn = self.conn.upgrade().ok_or(LoError::Closed)?;
        let mut inner = lock(&conn);
        guard::check_usable(self.fd.is_some(), Some(&inner.state), self.mark)?;
        let fd = self.fd.take().ok_or(LoError::Closed)?;
        debug!(fd, oid = self.oid, "closing large object");
        inner.backend.lo_close(fd)?;
        Ok(())
    }

    /// Delete the server-side object. The local handle stays open.
    pub fn unlink(&self) -> LoResult<()> {
        self.guarded(|inner, _| {
            inner.ensure_transaction()?;
            inner.backend.lo_unlink(self.oid)?;
            debug!(oid = self.oid, "large object unlinked");
            Ok(())
        })
    }

    /// Write the object's contents to a local file.
    pub fn export(&self, path: impl AsRef<Path>) -> LoResult<()> {
        let path = path.as_ref();
        self.guarded(|inner, _| {
            inner.ensure_transaction()?;
            let chunk_size = inner.chunk_size;
            backend::export(&mut inner.backend, self.oid, path, chunk_size)
        })
    }
}

impl<B: Backend> Drop for LargeObject<B> {
    fn drop(&mut self) {
        if self.check_usable().is_err() {
            return;
        }
        if let Err(err) = self.close() {
            warn!(oid = self.oid, error = %err, "failed to close large object on drop");
        }
    }
}

impl<B: Backend> fmt::Debug for LargeObject<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LargeObject")
            .field("oid", &self.oid)
            .field("mode", &self.mode)
            .field("fd", &self.fd)
            .field("mark", &self.mark)
            .field("closed", &self.closed())
            .finish()
    }
}

impl<B: Backend> io::Read for LargeObject<B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = LargeObject::read(self, Some(buf.len())).map_err(io::Error::other)?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }
}

impl<B: Backend> io::Write for LargeObject<B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        LargeObject::write(self, buf).map_err(io::Error::other)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<B: Backend> io::Seek for LargeObject<B> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let (offset, whence) = match pos {
            io::SeekFrom::Start(n) => {
                let n = i64::try_from(n)
                    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset too large"))?;
                (n, Whence::Set)
            }
            io::SeekFrom::Current(n) => (n, Whence::Current),
            io::SeekFrom::End(n) => (n, Whence::End),
        };
        let pos = LargeObject::seek(self, offset, whence).map_err(io::Error::other)?;
        u64::try_from(pos).map_err(|_| io::Error::other(format!("negative position {pos}")))
    }
}
