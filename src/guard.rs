//! Usability checks for connection-owned large objects.
//!
//! A handle is usable only while its descriptor is open, its connection is
//! alive and inside a transaction, and the connection has not committed or
//! rolled back since the handle was opened.

use crate::error::{LoError, LoResult};

/// Connection epoch, bumped on every commit, rollback and reset.
pub type Epoch = u64;

/// Snapshot of the connection fields a handle is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    pub closed: bool,
    pub isolation_level: i32,
    pub epoch: Epoch,
}

/// Check a handle against the current state of its connection.
///
/// `conn` is `None` when the owning connection no longer exists. The closed
/// check runs first: a closed connection's epoch is never compared.
pub fn check_usable(
    descriptor_open: bool,
    conn: Option<&ConnectionState>,
    captured: Epoch,
) -> LoResult<()> {
    let conn = match conn {
        Some(conn) if descriptor_open && !conn.closed => conn,
        _ => return Err(LoError::Closed),
    };

    if conn.isolation_level == 0 {
        return Err(LoError::TransactionRequired);
    }

    if conn.epoch != captured {
        return Err(LoError::StaleHandle);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(closed: bool, isolation_level: i32, epoch: Epoch) -> ConnectionState {
        ConnectionState {
            closed,
            isolation_level,
            epoch,
        }
    }

    #[test]
    fn test_usable() {
        assert!(check_usable(true, Some(&state(false, 1, 5)), 5).is_ok());
    }

    #[test]
    fn test_closed_precedes_everything() {
        let err = check_usable(false, Some(&state(false, 0, 9)), 5).unwrap_err();
        assert!(matches!(err, LoError::Closed));

        let err = check_usable(true, Some(&state(true, 0, 9)), 5).unwrap_err();
        assert!(matches!(err, LoError::Closed));

        let err = check_usable(true, None, 5).unwrap_err();
        assert!(matches!(err, LoError::Closed));
    }

    #[test]
    fn test_autocommit_precedes_epoch() {
        let err = check_usable(true, Some(&state(false, 0, 6)), 5).unwrap_err();
        assert!(matches!(err, LoError::TransactionRequired));
    }

    #[test]
    fn test_stale_epoch() {
        let err = check_usable(true, Some(&state(false, 2, 6)), 5).unwrap_err();
        assert!(matches!(err, LoError::StaleHandle));
    }

    #[test]
    fn test_exhaustive_predicate() {
        for open in [false, true] {
            for closed in [false, true] {
                for level in [0, 1, 2] {
                    for epoch in [4, 5] {
                        let conn = state(closed, level, epoch);
                        let expected = open && !closed && level != 0 && epoch == 5;
                        assert_eq!(check_usable(open, Some(&conn), 5).is_ok(), expected);
                    }
                }
            }
        }
    }
}
