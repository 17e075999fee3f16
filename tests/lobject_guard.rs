use pg_lobject::prelude::*;
use pretty_assertions::assert_eq;

fn connection() -> (Connection<MemoryBackend>, MemoryBackend) {
    let backend = MemoryBackend::new();
    (Connection::new(backend.clone()), backend)
}

#[test]
fn test_rollback_makes_handle_stale() {
    let (conn, backend) = connection();
    let oid = backend.insert_object(b"payload".to_vec());

    // Reach epoch 5 before opening.
    for _ in 0..5 {
        conn.commit().unwrap();
    }
    let lo = conn.open_lobject(oid, LoMode::Read).unwrap();
    assert_eq!(lo.mark(), 5);
    lo.check_usable().unwrap();

    conn.rollback().unwrap();
    assert_eq!(conn.epoch(), 6);
    assert!(matches!(lo.check_usable(), Err(LoError::StaleHandle)));
    assert!(matches!(lo.read(None), Err(LoError::StaleHandle)));
}

#[test]
fn test_every_operation_is_guarded_after_commit() {
    let (conn, backend) = connection();
    let dir = tempfile::tempdir().unwrap();
    let mut lo = conn.create_lobject().unwrap();
    lo.write(b"abc").unwrap();
    conn.commit().unwrap();

    assert!(matches!(lo.read(Some(1)), Err(LoError::StaleHandle)));
    assert!(matches!(lo.write(b"x"), Err(LoError::StaleHandle)));
    assert!(matches!(lo.seek(0, Whence::Set), Err(LoError::StaleHandle)));
    assert!(matches!(lo.tell(), Err(LoError::StaleHandle)));
    assert!(matches!(lo.unlink(), Err(LoError::StaleHandle)));
    assert!(matches!(lo.export(dir.path().join("out")), Err(LoError::StaleHandle)));
    assert!(matches!(lo.close(), Err(LoError::StaleHandle)));

    assert_eq!(backend.calls("lo_lseek"), 0);
    assert_eq!(backend.calls("lo_unlink"), 0);
    assert_eq!(backend.calls("lo_close"), 0);
}

#[test]
fn test_leaving_transaction_mode_reports_transaction_required() {
    let (conn, _backend) = connection();
    let lo = conn.create_lobject().unwrap();

    // Switching to autocommit also advances the epoch; the level check wins.
    conn.set_isolation_level(0).unwrap();
    assert!(conn.epoch() != lo.mark());
    assert!(matches!(lo.check_usable(), Err(LoError::TransactionRequired)));
}

#[test]
fn test_open_in_autocommit_is_refused() {
    let (conn, backend) = connection();
    conn.set_isolation_level(0).unwrap();

    let err = conn.create_lobject().unwrap_err();
    assert!(matches!(err, LoError::TransactionRequired));
    assert!(err.is_retryable());
    assert_eq!(backend.calls("begin"), 0);
    assert_eq!(backend.calls("lo_create"), 0);
}

#[test]
fn test_closed_connection_takes_priority() {
    let (conn, _backend) = connection();
    let lo = conn.create_lobject().unwrap();
    conn.commit().unwrap();
    conn.close().unwrap();

    assert!(lo.closed());
    assert!(matches!(lo.check_usable(), Err(LoError::Closed)));
    assert!(matches!(conn.create_lobject(), Err(LoError::Closed)));
}

#[test]
fn test_close_twice() {
    let (conn, backend) = connection();
    let mut lo = conn.create_lobject().unwrap();

    lo.close().unwrap();
    assert!(lo.closed());
    assert!(matches!(lo.close(), Err(LoError::Closed)));
    assert_eq!(backend.calls("lo_close"), 1);
}

#[test]
fn test_failed_close_still_closes_handle() {
    let (conn, backend) = connection();
    let mut lo = conn.create_lobject().unwrap();
    backend.fail_next("lo_close", DriverError::with_code("XX000", "lo_close failed"));

    let err = lo.close().unwrap_err();
    match err {
        LoError::Driver(e) => assert_eq!(e.message, "lo_close failed"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(lo.closed());
    assert!(matches!(lo.write(b"x"), Err(LoError::Closed)));

    drop(lo);
    assert_eq!(backend.calls("lo_close"), 1);
}

#[test]
fn test_write_then_read_back() {
    let (conn, _backend) = connection();
    let lo = conn.create_lobject().unwrap();
    let oid = lo.oid();
    assert_eq!(lo.write(b"some data").unwrap(), 9);
    drop(lo);
    conn.commit().unwrap();

    let lo = conn.open_lobject(oid, LoMode::Read).unwrap();
    assert_eq!(lo.read(None).unwrap(), b"some data".to_vec());
}

#[test]
fn test_seek_tell_and_partial_read() {
    let (conn, backend) = connection();
    let oid = backend.insert_object(b"some data".to_vec());
    let lo = conn.open_lobject(oid, LoMode::Read).unwrap();

    assert_eq!(lo.seek(5, Whence::Set).unwrap(), 5);
    assert_eq!(lo.tell().unwrap(), 5);
    assert_eq!(lo.read(None).unwrap(), b"data".to_vec());

    assert_eq!(lo.seek(-4, Whence::End).unwrap(), 5);
    assert_eq!(lo.seek(-2, Whence::Current).unwrap(), 3);
    assert_eq!(lo.read(Some(3)).unwrap(), b"e d".to_vec());
    assert_eq!(lo.tell().unwrap(), 6);

    // read(None) leaves the position at the end
    lo.seek(0, Whence::Set).unwrap();
    lo.read(None).unwrap();
    assert_eq!(lo.tell().unwrap(), 9);
}

#[test]
fn test_open_missing_object() {
    let (conn, _backend) = connection();
    let err = conn.open_lobject(4242, LoMode::Read).unwrap_err();
    match err {
        LoError::Driver(e) => {
            assert_eq!(e.code.as_deref(), Some("42704"));
            assert_eq!(e.message, "large object 4242 does not exist");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_write_on_read_only_handle() {
    let (conn, backend) = connection();
    let oid = backend.insert_object(b"ro".to_vec());
    let lo = conn.open_lobject(oid, LoMode::Read).unwrap();
    assert!(matches!(lo.write(b"x"), Err(LoError::Driver(_))));
    // the handle is still usable afterwards
    lo.check_usable().unwrap();
}

#[test]
fn test_unlink_keeps_handle_open() {
    let (conn, backend) = connection();
    let lo = conn.create_lobject().unwrap();
    let oid = lo.oid();

    lo.unlink().unwrap();
    assert!(!lo.closed());
    assert_eq!(backend.object(oid), None);

    drop(lo);
    conn.commit().unwrap();
    assert!(conn.open_lobject(oid, LoMode::Read).is_err());
}

#[test]
fn test_rollback_discards_created_object() {
    let (conn, backend) = connection();
    let lo = conn.create_lobject().unwrap();
    let oid = lo.oid();
    lo.write(b"gone").unwrap();
    conn.rollback().unwrap();

    assert_eq!(backend.object(oid), None);
}

#[test]
fn test_import_and_export() {
    let (conn, backend) = connection();
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("in.txt");
    let dst = dir.path().join("out.txt");
    std::fs::write(&src, "imported contents").unwrap();

    let lo = conn.import_lobject(&src).unwrap();
    assert_eq!(lo.mode(), LoMode::Write);
    assert_eq!(backend.object(lo.oid()), Some(b"imported contents".to_vec()));

    lo.export(&dst).unwrap();
    assert_eq!(std::fs::read_to_string(&dst).unwrap(), "imported contents");
}

#[test]
fn test_handles_share_one_connection() {
    let (conn, _backend) = connection();
    let first = conn.create_lobject().unwrap();
    let second = conn.create_lobject().unwrap();
    first.check_usable().unwrap();
    second.check_usable().unwrap();

    conn.reset().unwrap();
    assert!(matches!(first.check_usable(), Err(LoError::StaleHandle)));
    assert!(matches!(second.check_usable(), Err(LoError::StaleHandle)));

    let third = conn.create_lobject().unwrap();
    third.check_usable().unwrap();
}
