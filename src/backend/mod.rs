//! Client library boundary.
//!
//! A `Backend` exposes the server's large-object primitives for one
//! session. Import and export are composed client-side from those
//! primitives in fixed-size chunks, the same way libpq does it.

pub mod memory;
pub mod postgres;

pub use memory::MemoryBackend;
pub use postgres::PostgresBackend;

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use tracing::debug;

use crate::error::{DriverError, LoResult};

/// Server-side object identifier.
pub type Oid = u32;

/// Zero: no object, or "let the server pick" when creating.
pub const INVALID_OID: Oid = 0;

/// Open flags understood by `lo_open`.
pub const INV_WRITE: i32 = 0x0002_0000;
pub const INV_READ: i32 = 0x0004_0000;

/// Seek reference point for `lo_lseek`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set = 0,
    Current = 1,
    End = 2,
}

impl Whence {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// One session of the external client library.
pub trait Backend {
    fn begin(&mut self) -> Result<(), DriverError>;
    fn commit(&mut self) -> Result<(), DriverError>;
    fn rollback(&mut self) -> Result<(), DriverError>;
    fn close(&mut self) -> Result<(), DriverError>;

    /// Create an empty object. `INVALID_OID` lets the server assign one.
    fn lo_create(&mut self, oid: Oid) -> Result<Oid, DriverError>;
    /// Open an object with `INV_READ`/`INV_WRITE` flags, returning a descriptor.
    fn lo_open(&mut self, oid: Oid, flags: i32) -> Result<i32, DriverError>;
    /// Read at most `len` bytes from the current position.
    fn lo_read(&mut self, fd: i32, len: usize) -> Result<Vec<u8>, DriverError>;
    fn lo_write(&mut self, fd: i32, buf: &[u8]) -> Result<usize, DriverError>;
    /// Move the position, returning the new absolute offset.
    fn lo_lseek(&mut self, fd: i32, offset: i64, whence: Whence) -> Result<i64, DriverError>;
    fn lo_tell(&mut self, fd: i32) -> Result<i64, DriverError>;
    fn lo_close(&mut self, fd: i32) -> Result<(), DriverError>;
    fn lo_unlink(&mut self, oid: Oid) -> Result<(), DriverError>;
}

/// Create a new object holding the contents of a local file.
pub fn import<B: Backend + ?Sized>(
    backend: &mut B,
    path: &Path,
    chunk_size: usize,
) -> LoResult<Oid> {
    let mut file = File::open(path)?;
    let oid = backend.lo_create(INVALID_OID)?;
    let fd = backend.lo_open(oid, INV_WRITE)?;

    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0usize;
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                let _ = backend.lo_close(fd);
                return Err(err.into());
            }
        };
        if let Err(err) = backend.lo_write(fd, &buf[..n]) {
            let _ = backend.lo_close(fd);
            return Err(err.into());
        }
        total += n;
    }
    backend.lo_close(fd)?;

    debug!(oid, bytes = total, path = %path.display(), "large object imported");
    Ok(oid)
}

/// Write the contents of an object to a local file.
///
/// Uses its own descriptor, so the caller's position is left untouched.
pub fn export<B: Backend + ?Sized>(
    backend: &mut B,
    oid: Oid,
    path: &Path,
    chunk_size: usize,
) -> LoResult<()> {
    let fd = backend.lo_open(oid, INV_READ)?;
    let mut file = match File::create(path) {
        Ok(file) => file,
        Err(err) => {
            let _ = backend.lo_close(fd);
            return Err(err.into());
        }
    };

    let mut total = 0usize;
    loop {
        let chunk = match backend.lo_read(fd, chunk_size.max(1)) {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = backend.lo_close(fd);
                return Err(err.into());
            }
        };
        if chunk.is_empty() {
            break;
        }
        if let Err(err) = file.write_all(&chunk) {
            let _ = backend.lo_close(fd);
            return Err(err.into());
        }
        total += chunk.len();
    }
    backend.lo_close(fd)?;
    file.flush()?;

    debug!(oid, bytes = total, path = %path.display(), "large object exported");
    Ok(())
}
