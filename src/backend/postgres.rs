//! Blocking backend over a sqlx PostgreSQL session.
//!
//! Each call runs one statement against the server-side large-object
//! functions (`lo_open`, `loread`, `lo_lseek64`, ...) on a private
//! current-thread runtime.

use sqlx::postgres::{PgArguments, PgConnection};
use sqlx::postgres::types::Oid as PgOid;
use sqlx::{Connection, Executor};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use super::{Backend, Oid, Whence};
use crate::error::DriverError;

impl From<sqlx::Error> for DriverError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => Self {
                code: db.code().map(|c| c.into_owned()),
                message: db.message().to_string(),
            },
            _ => Self::new(err.to_string()),
        }
    }
}

type ScalarQuery<'q, T> = sqlx::query::QueryScalar<'q, sqlx::Postgres, T, PgArguments>;

/// `loread` takes its length as an `int4`.
const MAX_LOREAD: usize = i32::MAX as usize;

/// Read `len` bytes in requests of at most `max`, stopping early at the end
/// of the object.
fn read_in_chunks(
    len: usize,
    max: usize,
    mut fetch: impl FnMut(i32) -> Result<Vec<u8>, DriverError>,
) -> Result<Vec<u8>, DriverError> {
    let mut data = Vec::new();
    while data.len() < len {
        let want = (len - data.len()).min(max);
        let want = i32::try_from(want)
            .map_err(|_| DriverError::new(format!("read request too large: {want}")))?;
        let chunk = fetch(want)?;
        let short = chunk.len() < want as usize;
        data.extend_from_slice(&chunk);
        if short {
            break;
        }
    }
    Ok(data)
}

/// A single server session driven synchronously.
pub struct PostgresBackend {
    runtime: Runtime,
    conn: Option<PgConnection>,
}

impl PostgresBackend {
    /// Connect using a `postgres://` URL.
    ///
    /// # Panics
    ///
    /// Every call blocks on a private runtime, so neither this nor any
    /// later call may run on an async task: tokio panics when a runtime is
    /// started from within one. Async callers should move the backend onto
    /// `tokio::task::spawn_blocking` or a plain thread.
    pub fn connect(url: &str) -> Result<Self, DriverError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DriverError::new(format!("failed to start runtime: {e}")))?;
        let conn = runtime.block_on(PgConnection::connect(url))?;
        debug!("postgres backend connected");
        Ok(Self {
            runtime,
            conn: Some(conn),
        })
    }

    fn conn(&mut self) -> Result<(&Runtime, &mut PgConnection), DriverError> {
        match self.conn.as_mut() {
            Some(conn) => Ok((&self.runtime, conn)),
            None => Err(DriverError::with_code("08003", "connection already closed")),
        }
    }

    fn simple(&mut self, sql: &'static str) -> Result<(), DriverError> {
        let (rt, conn) = self.conn()?;
        rt.block_on(conn.execute(sql))?;
        Ok(())
    }

    fn scalar_i32(&mut self, query: ScalarQuery<'_, i32>) -> Result<i32, DriverError> {
        let (rt, conn) = self.conn()?;
        Ok(rt.block_on(query.fetch_one(conn))?)
    }
}

impl Backend for PostgresBackend {
    fn begin(&mut self) -> Result<(), DriverError> {
        self.simple("BEGIN")
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.simple("COMMIT")
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        self.simple("ROLLBACK")
    }

    fn close(&mut self) -> Result<(), DriverError> {
        match self.conn.take() {
            Some(conn) => Ok(self.runtime.block_on(conn.close())?),
            None => Ok(()),
        }
    }

    fn lo_create(&mut self, oid: Oid) -> Result<Oid, DriverError> {
        let (rt, conn) = self.conn()?;
        let created: PgOid = rt.block_on(
            sqlx::query_scalar("SELECT lo_create($1)")
                .bind(PgOid(oid))
                .fetch_one(conn),
        )?;
        Ok(created.0)
    }

    fn lo_open(&mut self, oid: Oid, flags: i32) -> Result<i32, DriverError> {
        let query = sqlx::query_scalar("SELECT lo_open($1, $2)").bind(PgOid(oid)).bind(flags);
        self.scalar_i32(query)
    }

    fn lo_read(&mut self, fd: i32, len: usize) -> Result<Vec<u8>, DriverError> {
        let (rt, conn) = self.conn()?;
        read_in_chunks(len, MAX_LOREAD, |want| {
            let data: Vec<u8> = rt.block_on(
                sqlx::query_scalar("SELECT loread($1, $2)")
                    .bind(fd)
                    .bind(want)
                    .fetch_one(&mut *conn),
            )?;
            Ok(data)
        })
    }

    fn lo_write(&mut self, fd: i32, buf: &[u8]) -> Result<usize, DriverError> {
        let query = sqlx::query_scalar("SELECT lowrite($1, $2)").bind(fd).bind(buf);
        let written = self.scalar_i32(query)?;
        usize::try_from(written)
            .map_err(|_| DriverError::new(format!("lowrite returned {written}")))
    }

    fn lo_lseek(&mut self, fd: i32, offset: i64, whence: Whence) -> Result<i64, DriverError> {
        let (rt, conn) = self.conn()?;
        let pos: i64 = rt.block_on(
            sqlx::query_scalar("SELECT lo_lseek64($1, $2, $3)")
                .bind(fd)
                .bind(offset)
                .bind(whence.as_i32())
                .fetch_one(conn),
        )?;
        Ok(pos)
    }

    fn lo_tell(&mut self, fd: i32) -> Result<i64, DriverError> {
        let (rt, conn) = self.conn()?;
        let pos: i64 =
            rt.block_on(sqlx::query_scalar("SELECT lo_tell64($1)").bind(fd).fetch_one(conn))?;
        Ok(pos)
    }

    fn lo_close(&mut self, fd: i32) -> Result<(), DriverError> {
        self.scalar_i32(sqlx::query_scalar("SELECT lo_close($1)").bind(fd))?;
        Ok(())
    }

    fn lo_unlink(&mut self, oid: Oid) -> Result<(), DriverError> {
        self.scalar_i32(sqlx::query_scalar("SELECT lo_unlink($1)").bind(PgOid(oid)))?;
        Ok(())
    }
}
