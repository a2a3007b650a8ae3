use chrono::{TimeZone, Utc};
use sqlqueue_core::{DateFormat, Error, MisuseErrorKind, Value, named_params, params};
use sqlqueue_sqlite::{CheckpointMode, Connection, ConnectionConfig, StepResult};

fn open(config: ConnectionConfig) -> Connection {
    Connection::connect(config).expect("open sqlite memory db")
}

fn count(conn: &Connection, table: &str) -> i64 {
    let mut rows = conn
        .query(&format!("SELECT count(*) FROM {table}"), ())
        .expect("count query");
    assert!(rows.next().expect("step"));
    rows.int(0).expect("read count")
}

#[test]
fn test_bound_values_read_back_unchanged() {
    let conn = open(ConnectionConfig::memory());
    conn.execute_batch("CREATE TABLE v (i INTEGER, r REAL, t TEXT, b BLOB, n, flag INTEGER, u TEXT)")
        .unwrap();

    let uuid = uuid::Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap();
    let none: Option<i64> = None;
    conn.execute(
        "INSERT INTO v VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![i64::MAX, 2.25_f64, "héllo", vec![0_u8, 1, 255], none, true, uuid],
    )
    .unwrap();

    let mut rows = conn.query("SELECT * FROM v", ()).unwrap();
    assert!(rows.next().unwrap());
    assert_eq!(rows.int("i").unwrap(), i64::MAX);
    assert!((rows.double("r").unwrap() - 2.25).abs() < f64::EPSILON);
    assert_eq!(rows.text("t").unwrap().as_deref(), Some("héllo"));
    assert_eq!(rows.blob("b").unwrap(), Some(vec![0, 1, 255]));
    assert!(rows.is_null("n").unwrap());
    assert!(rows.bool("flag").unwrap());
    assert_eq!(
        rows.text("u").unwrap().as_deref(),
        Some("67e55044-10b1-426f-9247-bb680e5fe0c8")
    );
    assert!(!rows.next().unwrap());
}

#[test]
fn test_dates_follow_the_connection_policy() {
    let conn = open(ConnectionConfig::memory());
    conn.execute_batch("CREATE TABLE d (at)").unwrap();
    let when = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();

    conn.execute("INSERT INTO d VALUES (?)", params![when]).unwrap();
    conn.set_date_format(Some(DateFormat::Rfc3339)).unwrap();
    conn.execute("INSERT INTO d VALUES (?)", params![when]).unwrap();

    let mut rows = conn.query("SELECT at, typeof(at) FROM d ORDER BY rowid", ()).unwrap();
    assert!(rows.next().unwrap());
    assert_eq!(rows.text(1).unwrap().as_deref(), Some("real"));
    assert_eq!(rows.date(0).unwrap(), Some(when));

    assert!(rows.next().unwrap());
    assert_eq!(rows.text(1).unwrap().as_deref(), Some("text"));
    assert_eq!(rows.text(0).unwrap().as_deref(), Some("2024-05-01T12:30:00.000Z"));
    assert_eq!(rows.date(0).unwrap(), Some(when));
}

#[test]
fn test_named_arguments_skip_unknown_keys() {
    let conn = open(ConnectionConfig::memory());
    conn.execute_batch("CREATE TABLE p (a, b)").unwrap();
    conn.execute(
        "INSERT INTO p VALUES (:a, :b)",
        named_params! { "a" => 1, ":b" => "two", "nope" => 3 },
    )
    .unwrap();

    let mut rows = conn.query("SELECT a, b FROM p", ()).unwrap();
    assert!(rows.next().unwrap());
    assert_eq!(rows.row().unwrap(), vec![Value::BigInt(1), Value::Text("two".into())]);
}

#[test]
fn test_closing_the_connection_invalidates_cursors_and_cache() {
    let conn = open(ConnectionConfig::memory().cache_statements(true));
    conn.execute_batch("CREATE TABLE t (x); INSERT INTO t VALUES (1), (2), (3);")
        .unwrap();
    conn.execute("INSERT INTO t VALUES (?)", params![4]).unwrap();
    assert_eq!(conn.cached_statement_count(), 1);

    let mut rows = conn.query("SELECT x FROM t", ()).unwrap();
    assert!(rows.next().unwrap());
    assert!(conn.has_open_cursors());

    conn.close().unwrap();
    assert!(!conn.is_open());
    assert!(rows.is_closed());
    assert!(!conn.has_open_cursors());
    assert_eq!(conn.cached_statement_count(), 0);

    let err = rows.step().unwrap_err();
    assert!(matches!(
        err,
        Error::Misuse(ref m) if m.kind == MisuseErrorKind::CursorClosed
    ));
    // closing again after the connection already did is harmless
    rows.close();
}

#[test]
fn test_cached_statements_are_reused() {
    let conn = open(ConnectionConfig::memory().cache_statements(true));
    conn.execute_batch("CREATE TABLE t (x)").unwrap();

    let insert = "INSERT INTO t VALUES (?)";
    for i in 0..3 {
        conn.execute(insert, params![i]).unwrap();
    }
    assert_eq!(conn.statement_use_counts(insert), vec![3]);

    let select = "SELECT x FROM t ORDER BY x";
    let first = conn.query(select, ()).unwrap();
    let second = conn.query(select, ()).unwrap();
    // the first statement was busy, so a second one was compiled
    assert_eq!(conn.statement_use_counts(select), vec![1, 1]);
    drop(first);
    drop(second);

    let mut third = conn.query(select, ()).unwrap();
    assert_eq!(conn.statement_use_counts(select), vec![1, 2]);
    // a reused statement starts from the first row with fresh bindings
    assert!(third.next().unwrap());
    assert_eq!(third.int(0).unwrap(), 0);
}

#[test]
fn test_disabling_the_cache_finalizes_it() {
    let conn = open(ConnectionConfig::memory().cache_statements(true));
    conn.execute_batch("CREATE TABLE t (x)").unwrap();
    conn.execute("INSERT INTO t VALUES (1)", ()).unwrap();
    assert_eq!(conn.cached_statement_count(), 1);

    conn.set_should_cache_statements(false).unwrap();
    assert_eq!(conn.cached_statement_count(), 0);
    conn.execute("INSERT INTO t VALUES (1)", ()).unwrap();
    assert_eq!(conn.cached_statement_count(), 0);
    assert_eq!(count(&conn, "t"), 2);
}

#[test]
fn test_uncached_connection_compiles_every_time() {
    let conn = open(ConnectionConfig::memory());
    conn.execute_batch("CREATE TABLE t (x)").unwrap();
    for _ in 0..3 {
        conn.execute("INSERT INTO t VALUES (1)", ()).unwrap();
    }
    assert_eq!(conn.cached_statement_count(), 0);
    assert!(conn.statement_use_counts("INSERT INTO t VALUES (1)").is_empty());
}

#[test]
fn test_query_cursor_closes_on_exhaustion_but_prepared_does_not() {
    let conn = open(ConnectionConfig::memory());
    conn.execute_batch("CREATE TABLE t (x); INSERT INTO t VALUES (1);")
        .unwrap();

    let mut auto = conn.query("SELECT x FROM t", ()).unwrap();
    assert_eq!(auto.step().unwrap(), StepResult::Row);
    assert_eq!(auto.step().unwrap(), StepResult::Done);
    assert!(auto.is_closed());
    assert!(!conn.has_open_cursors());

    let mut manual = conn.prepare("SELECT x FROM t").unwrap();
    assert_eq!(manual.step().unwrap(), StepResult::Row);
    assert_eq!(manual.step().unwrap(), StepResult::Done);
    assert!(!manual.is_closed());
    assert!(conn.has_open_cursors());

    manual.reset().unwrap();
    assert_eq!(manual.step().unwrap(), StepResult::Row);
    drop(manual);
    assert!(!conn.has_open_cursors());
}

#[test]
fn test_savepoint_rollback_request_restores_state() {
    let conn = open(ConnectionConfig::memory());
    conn.execute_batch("CREATE TABLE t (x); INSERT INTO t VALUES (1);")
        .unwrap();

    conn.in_savepoint(|conn, request| {
        conn.execute("INSERT INTO t VALUES (2)", ())?;
        request.rollback();
        Ok(())
    })
    .unwrap();

    assert_eq!(count(&conn, "t"), 1);
    // release always ran, so the generated savepoint no longer exists
    assert!(conn.release_savepoint("sqlqueue_sp_1").is_err());
    assert!(conn.is_autocommit());
}

#[test]
fn test_savepoint_body_error_rolls_back_and_propagates() {
    let conn = open(ConnectionConfig::memory());
    conn.execute_batch("CREATE TABLE t (x)").unwrap();

    let result: sqlqueue_core::Result<()> = conn.in_savepoint(|conn, _| {
        conn.execute("INSERT INTO t VALUES (1)", ())?;
        conn.execute("INSERT INTO missing VALUES (1)", ())
    });
    assert!(result.is_err());
    assert_eq!(count(&conn, "t"), 0);
    assert!(conn.is_autocommit());
}

#[test]
fn test_savepoints_nest_inside_a_transaction() {
    let conn = open(ConnectionConfig::memory());
    conn.execute_batch("CREATE TABLE t (x)").unwrap();

    conn.begin_transaction().unwrap();
    conn.execute("INSERT INTO t VALUES (1)", ()).unwrap();
    let kept = conn
        .in_savepoint(|conn, _| {
            conn.execute("INSERT INTO t VALUES (2)", ())?;
            conn.in_savepoint(|conn, inner| {
                conn.execute("INSERT INTO t VALUES (3)", ())?;
                inner.rollback();
                Ok(())
            })?;
            Ok("kept")
        })
        .unwrap();
    assert_eq!(kept, "kept");
    conn.commit().unwrap();

    let mut rows = conn.query("SELECT x FROM t ORDER BY x", ()).unwrap();
    let mut seen = Vec::new();
    while rows.next().unwrap() {
        seen.push(rows.int(0).unwrap());
    }
    assert_eq!(seen, vec![1, 2]);
}

#[test]
fn test_transaction_rollback_and_commit() {
    let conn = open(ConnectionConfig::memory());
    conn.execute_batch("CREATE TABLE t (x)").unwrap();

    conn.begin_transaction().unwrap();
    conn.execute("INSERT INTO t VALUES (1)", ()).unwrap();
    conn.rollback().unwrap();
    assert_eq!(count(&conn, "t"), 0);

    conn.begin_transaction().unwrap();
    conn.execute("INSERT INTO t VALUES (1)", ()).unwrap();
    conn.commit().unwrap();
    assert_eq!(count(&conn, "t"), 1);
}

#[test]
fn test_wal_checkpoint_reports_frames() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open(ConnectionConfig::file(dir.path().join("wal.db")));
    conn.execute_batch("PRAGMA journal_mode=WAL; CREATE TABLE t (x); INSERT INTO t VALUES (1);")
        .unwrap();

    let passive = conn.checkpoint(CheckpointMode::Passive, None).unwrap();
    assert!(passive.log_frames >= 0);
    assert!(passive.checkpointed_frames <= passive.log_frames);

    let truncated = conn.checkpoint(CheckpointMode::Truncate, Some("main")).unwrap();
    assert!(truncated.log_frames >= 0);
    assert!(truncated.checkpointed_frames <= truncated.log_frames);
}

#[test]
fn test_read_only_open_refuses_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ro.db");
    {
        let conn = open(ConnectionConfig::file(&path));
        conn.execute_batch("CREATE TABLE t (x)").unwrap();
    }

    let conn = open(
        ConnectionConfig::file(&path).flags(sqlqueue_sqlite::OpenFlags::read_only()),
    );
    let err = conn.execute("INSERT INTO t VALUES (1)", ()).unwrap_err();
    assert_eq!(err.code(), Some(8)); // SQLITE_READONLY
}

#[test]
fn test_open_failure_leaves_connection_closed() {
    let dir = tempfile::tempdir().unwrap();
    let config = ConnectionConfig::file(dir.path().join("missing").join("x.db"))
        .flags(sqlqueue_sqlite::OpenFlags::read_write());
    let conn = Connection::new(config);
    let err = conn.open().unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
    assert!(!conn.is_open());
    conn.close().unwrap();
}

#[test]
fn test_reopen_succeeds_after_a_failed_open() {
    let dir = tempfile::tempdir().unwrap();
    let parent = dir.path().join("later");
    let conn = Connection::new(ConnectionConfig::file(parent.join("x.db")));

    let err = conn.open().unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "unexpected error: {err}");
    assert!(!conn.is_open());

    std::fs::create_dir(&parent).unwrap();
    conn.open().expect("open after the directory exists");
    assert!(conn.is_open());
    conn.execute_batch("CREATE TABLE t (x); INSERT INTO t VALUES (1);")
        .unwrap();
    assert_eq!(count(&conn, "t"), 1);
}

#[test]
fn test_temporary_location_round_trips() {
    let conn = open(ConnectionConfig::temporary());
    assert!(conn.is_open());
    conn.execute_batch("CREATE TABLE t (name TEXT)").unwrap();
    conn.execute("INSERT INTO t VALUES (?)", params!["scratch"])
        .unwrap();

    let mut rows = conn.query("SELECT name FROM t", ()).unwrap();
    assert!(rows.next().unwrap());
    assert_eq!(rows.text(0).unwrap().as_deref(), Some("scratch"));
    assert!(!rows.next().unwrap());
    drop(rows);

    conn.close().unwrap();
    assert!(!conn.is_open());
}

#[test]
fn test_unknown_vfs_fails_then_default_vfs_opens() {
    let conn = Connection::new(ConnectionConfig::memory().vfs("no-such-vfs"));
    let err = conn.open().unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "unexpected error: {err}");
    assert!(err.to_string().contains("no-such-vfs"), "unexpected message: {err}");
    assert!(!conn.is_open());

    conn.open_with(sqlqueue_sqlite::OpenFlags::create_read_write(), None)
        .expect("open with the default VFS");
    assert!(conn.is_open());
    conn.execute_batch("CREATE TABLE t (x)").unwrap();
    assert_eq!(count(&conn, "t"), 0);
}

#[test]
fn test_conflicting_flags_are_rejected_before_opening() {
    let conn = Connection::new(ConnectionConfig::memory());
    let flags = sqlqueue_sqlite::OpenFlags {
        read_only: true,
        create: true,
        ..Default::default()
    };
    let err = conn.open_with(flags, None).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "unexpected error: {err}");
    assert!(!conn.is_open());

    let err = conn
        .open_with(sqlqueue_sqlite::OpenFlags::create_read_write(), Some(""))
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)), "unexpected error: {err}");
    conn.open().unwrap();
    assert!(conn.is_open());
}

#[test]
fn test_error_policy_toggles() {
    let conn = open(ConnectionConfig::memory().log_errors(false));
    assert!(!conn.logs_errors());
    assert!(!conn.crashes_on_errors());

    conn.set_log_errors(true);
    assert!(conn.logs_errors());
    assert!(conn.execute("NOT SQL", ()).is_err());

    conn.set_log_errors(false);
    conn.set_crash_on_errors(false);
    assert!(!conn.logs_errors());
    assert!(conn.execute("NOT SQL", ()).is_err());
    assert!(conn.is_open());
}
