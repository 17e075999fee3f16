//! In-process stand-in for a PostgreSQL session.
//!
//! Objects live in a map shared by every clone of the backend, so a test
//! can keep one clone for inspection while the connection owns another.
//! Transactions snapshot the object map at BEGIN and restore it on
//! ROLLBACK; descriptors never survive the end of a transaction.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Backend, INV_READ, INV_WRITE, INVALID_OID, Oid, Whence};
use crate::error::DriverError;

const FIRST_OID: Oid = 16384;

/// Largest object the server accepts (4 TB), as in PostgreSQL.
pub const MAX_OBJECT_SIZE: i64 = 4 * 1024 * 1024 * 1024 * 1024;

#[derive(Debug, Clone)]
struct Descriptor {
    oid: Oid,
    pos: usize,
    flags: i32,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<Oid, Vec<u8>>,
    snapshot: Option<BTreeMap<Oid, Vec<u8>>>,
    descriptors: HashMap<i32, Descriptor>,
    next_oid: Oid,
    next_fd: i32,
    closed: bool,
    calls: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, DriverError>,
}

impl MemoryState {
    /// Count the call and fire any failure queued for it.
    fn enter(&mut self, op: &'static str) -> Result<(), DriverError> {
        *self.calls.entry(op).or_insert(0) += 1;
        if let Some(err) = self.failures.remove(op) {
            return Err(err);
        }
        if self.closed {
            return Err(DriverError::with_code("08003", "connection already closed"));
        }
        Ok(())
    }

    fn descriptor(&mut self, fd: i32) -> Result<&mut Descriptor, DriverError> {
        self.descriptors
            .get_mut(&fd)
            .ok_or_else(|| invalid_descriptor(fd))
    }

    fn end_transaction(&mut self) {
        self.snapshot = None;
        self.descriptors.clear();
    }
}

/// Shared in-memory large-object store.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        {
            let mut state = backend.lock();
            state.next_oid = FIRST_OID;
            state.next_fd = 0;
        }
        backend
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next call to `op` (e.g. `"lo_close"`) fail with `err`.
    pub fn fail_next(&self, op: &'static str, err: DriverError) {
        self.lock().failures.insert(op, err);
    }

    /// Number of times `op` has been called.
    pub fn calls(&self, op: &str) -> usize {
        self.lock().calls.get(op).copied().unwrap_or(0)
    }

    /// Contents of an object, if it exists.
    pub fn object(&self, oid: Oid) -> Option<Vec<u8>> {
        self.lock().objects.get(&oid).cloned()
    }

    /// Store an object outside of any transaction.
    pub fn insert_object(&self, data: impl Into<Vec<u8>>) -> Oid {
        let mut state = self.lock();
        let oid = state.next_oid.max(FIRST_OID);
        state.next_oid = oid + 1;
        state.objects.insert(oid, data.into());
        oid
    }

    pub fn open_descriptors(&self) -> usize {
        self.lock().descriptors.len()
    }

    pub fn in_transaction(&self) -> bool {
        self.lock().snapshot.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

impl Backend for MemoryBackend {
    fn begin(&mut self) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.enter("begin")?;
        if state.snapshot.is_none() {
            state.snapshot = Some(state.objects.clone());
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.enter("commit")?;
        state.end_transaction();
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.enter("rollback")?;
        if let Some(snapshot) = state.snapshot.take() {
            state.objects = snapshot;
        }
        state.end_transaction();
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.enter("close")?;
        state.closed = true;
        Ok(())
    }

    fn lo_create(&mut self, oid: Oid) -> Result<Oid, DriverError> {
        let mut state = self.lock();
        state.enter("lo_create")?;
        let oid = if oid == INVALID_OID {
            let mut next = state.next_oid.max(FIRST_OID);
            while state.objects.contains_key(&next) {
                next += 1;
            }
            state.next_oid = next + 1;
            next
        } else if state.objects.contains_key(&oid) {
            return Err(DriverError::with_code(
                "23505",
                "duplicate key value violates unique constraint \
                 \"pg_largeobject_metadata_oid_index\"",
            ));
        } else {
            oid
        };
        state.objects.insert(oid, Vec::new());
        Ok(oid)
    }

    fn lo_open(&mut self, oid: Oid, flags: i32) -> Result<i32, DriverError> {
        let mut state = self.lock();
        state.enter("lo_open")?;
        if flags & (INV_READ | INV_WRITE) == 0 {
            return Err(DriverError::with_code(
                "22023",
                format!("invalid flags for opening a large object: {flags}"),
            ));
        }
        if !state.objects.contains_key(&oid) {
            return Err(missing_object(oid));
        }
        let fd = state.next_fd;
        state.next_fd += 1;
        state.descriptors.insert(fd, Descriptor { oid, pos: 0, flags });
        Ok(fd)
    }

    fn lo_read(&mut self, fd: i32, len: usize) -> Result<Vec<u8>, DriverError> {
        let mut state = self.lock();
        state.enter("lo_read")?;
        let Descriptor { oid, pos, .. } = state.descriptor(fd)?.clone();
        let data = state.objects.get(&oid).ok_or_else(|| missing_object(oid))?;
        let start = pos.min(data.len());
        let end = start.saturating_add(len).min(data.len());
        let chunk = data[start..end].to_vec();
        state.descriptor(fd)?.pos = end;
        Ok(chunk)
    }

    fn lo_write(&mut self, fd: i32, buf: &[u8]) -> Result<usize, DriverError> {
        let mut state = self.lock();
        state.enter("lo_write")?;
        let Descriptor { oid, pos, flags } = state.descriptor(fd)?.clone();
        if flags & INV_WRITE == 0 {
            return Err(DriverError::with_code(
                "55000",
                format!("large object descriptor {fd} was not opened for writing"),
            ));
        }
        let end = pos
            .checked_add(buf.len())
            .filter(|&end| i64::try_from(end).is_ok_and(|end| end <= MAX_OBJECT_SIZE))
            .ok_or_else(|| {
                DriverError::with_code(
                    "22023",
                    format!("invalid large object write request size: {}", buf.len()),
                )
            })?;
        let data = state.objects.get_mut(&oid).ok_or_else(|| missing_object(oid))?;
        if data.len() < end {
            data.try_reserve(end - data.len())
                .map_err(|e| DriverError::with_code("53200", format!("out of memory: {e}")))?;
            data.resize(end, 0);
        }
        data[pos..end].copy_from_slice(buf);
        state.descriptor(fd)?.pos = end;
        Ok(buf.len())
    }

    fn lo_lseek(&mut self, fd: i32, offset: i64, whence: Whence) -> Result<i64, DriverError> {
        let mut state = self.lock();
        state.enter("lo_lseek")?;
        let Descriptor { oid, pos, .. } = state.descriptor(fd)?.clone();
        let size = state.objects.get(&oid).map_or(0, Vec::len);
        let base = match whence {
            Whence::Set => 0,
            Whence::Current => pos as i64,
            Whence::End => size as i64,
        };
        let invalid = || {
            DriverError::with_code(
                "22023",
                format!("invalid large object seek target: {base} + {offset}"),
            )
        };
        let target = base
            .checked_add(offset)
            .filter(|target| (0..=MAX_OBJECT_SIZE).contains(target))
            .ok_or_else(invalid)?;
        state.descriptor(fd)?.pos = usize::try_from(target).map_err(|_| invalid())?;
        Ok(target)
    }

    fn lo_tell(&mut self, fd: i32) -> Result<i64, DriverError> {
        let mut state = self.lock();
        state.enter("lo_tell")?;
        Ok(state.descriptor(fd)?.pos as i64)
    }

    fn lo_close(&mut self, fd: i32) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.enter("lo_close")?;
        state
            .descriptors
            .remove(&fd)
            .map(|_| ())
            .ok_or_else(|| invalid_descriptor(fd))
    }

    fn lo_unlink(&mut self, oid: Oid) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.enter("lo_unlink")?;
        state
            .objects
            .remove(&oid)
            .map(|_| ())
            .ok_or_else(|| missing_object(oid))
    }
}

fn missing_object(oid: Oid) -> DriverError {
    DriverError::with_code("42704", format!("large object {oid} does not exist"))
}

fn invalid_descriptor(fd: i32) -> DriverError {
    DriverError::with_code("42704", format!("invalid large-object descriptor: {fd}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rollback_restores_objects() {
        let mut backend = MemoryBackend::new();
        let kept = backend.insert_object(b"kept".to_vec());

        backend.begin().unwrap();
        let created = backend.lo_create(INVALID_OID).unwrap();
        backend.lo_unlink(kept).unwrap();
        backend.rollback().unwrap();

        assert_eq!(backend.object(kept), Some(b"kept".to_vec()));
        assert_eq!(backend.object(created), None);
    }

    #[test]
    fn test_descriptors_end_with_transaction() {
        let mut backend = MemoryBackend::new();
        let oid = backend.insert_object(b"abc".to_vec());

        backend.begin().unwrap();
        let fd = backend.lo_open(oid, INV_READ).unwrap();
        backend.commit().unwrap();

        let err = backend.lo_read(fd, 3).unwrap_err();
        assert_eq!(err.code.as_deref(), Some("42704"));
    }

    #[test]
    fn test_write_requires_write_flag() {
        let mut backend = MemoryBackend::new();
        let oid = backend.insert_object(Vec::new());
        backend.begin().unwrap();
        let fd = backend.lo_open(oid, INV_READ).unwrap();

        let err = backend.lo_write(fd, b"x").unwrap_err();
        assert_eq!(err.code.as_deref(), Some("55000"));
    }

    #[test]
    fn test_write_past_end_zero_fills() {
        let mut backend = MemoryBackend::new();
        let oid = backend.insert_object(b"ab".to_vec());
        backend.begin().unwrap();
        let fd = backend.lo_open(oid, INV_READ | INV_WRITE).unwrap();

        assert_eq!(backend.lo_lseek(fd, 4, Whence::Set).unwrap(), 4);
        backend.lo_write(fd, b"z").unwrap();
        assert_eq!(backend.object(oid), Some(b"ab\0\0z".to_vec()));
    }

    #[test]
    fn test_create_with_existing_oid() {
        let mut backend = MemoryBackend::new();
        let oid = backend.insert_object(Vec::new());
        backend.begin().unwrap();

        let err = backend.lo_create(oid).unwrap_err();
        assert_eq!(err.code.as_deref(), Some("23505"));
    }

    #[test]
    fn test_injected_failure_fires_once() {
        let mut backend = MemoryBackend::new();
        backend.fail_next("begin", DriverError::new("server closed the connection unexpectedly"));

        assert!(backend.begin().is_err());
        assert!(backend.begin().is_ok());
        assert_eq!(backend.calls("begin"), 2);
    }

    #[test]
    fn test_seek_out_of_range() {
        let mut backend = MemoryBackend::new();
        let oid = backend.insert_object(b"abc".to_vec());
        backend.begin().unwrap();
        let fd = backend.lo_open(oid, INV_READ).unwrap();

        let err = backend.lo_lseek(fd, i64::MAX, Whence::End).unwrap_err();
        assert_eq!(err.code.as_deref(), Some("22023"));
        let err = backend.lo_lseek(fd, MAX_OBJECT_SIZE + 1, Whence::Set).unwrap_err();
        assert_eq!(err.code.as_deref(), Some("22023"));
        let err = backend.lo_lseek(fd, -4, Whence::End).unwrap_err();
        assert_eq!(err.code.as_deref(), Some("22023"));

        // Rejected seeks leave the position alone.
        assert_eq!(backend.lo_tell(fd).unwrap(), 0);
    }

    #[test]
    fn test_write_past_size_limit() {
        let mut backend = MemoryBackend::new();
        let oid = backend.insert_object(b"abc".to_vec());
        backend.begin().unwrap();
        let fd = backend.lo_open(oid, INV_READ | INV_WRITE).unwrap();

        assert_eq!(
            backend.lo_lseek(fd, MAX_OBJECT_SIZE, Whence::Set).unwrap(),
            MAX_OBJECT_SIZE
        );
        let err = backend.lo_write(fd, b"x").unwrap_err();
        assert_eq!(err.code.as_deref(), Some("22023"));
        assert_eq!(backend.object(oid), Some(b"abc".to_vec()));
    }

    #[test]
    fn test_read_after_unlink() {
        let mut backend = MemoryBackend::new();
        let oid = backend.insert_object(b"abc".to_vec());
        backend.begin().unwrap();
        let fd = backend.lo_open(oid, INV_READ).unwrap();
        backend.lo_unlink(oid).unwrap();

        let err = backend.lo_read(fd, 3).unwrap_err();
        assert_eq!(err.code.as_deref(), Some("42704"));
        assert_eq!(err.message, format!("large object {oid} does not exist"));
    }
}
