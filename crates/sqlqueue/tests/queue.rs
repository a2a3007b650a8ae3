use sqlqueue::error::code;
use sqlqueue::{
    Connection, ConnectionConfig, DatabaseQueue, Error, MisuseErrorKind, TransactionErrorKind,
    params,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn memory_queue() -> DatabaseQueue {
    let queue = DatabaseQueue::open(ConnectionConfig::memory()).expect("open queue");
    queue
        .perform(|conn| conn.execute_batch("CREATE TABLE t (v INTEGER)"))
        .expect("create table");
    queue
}

fn count(conn: &Connection) -> sqlqueue::Result<i64> {
    let mut rows = conn.query("SELECT count(*) FROM t", ())?;
    rows.next()?;
    rows.int(0)
}

#[test]
fn test_concurrent_read_modify_write_loses_no_updates() {
    let queue = Arc::new(DatabaseQueue::new(ConnectionConfig::memory()));
    queue
        .perform(|conn| {
            conn.execute_batch("CREATE TABLE counter (n INTEGER); INSERT INTO counter VALUES (0);")
        })
        .unwrap();

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for _ in 0..100 {
                    queue
                        .perform(|conn| {
                            let n = {
                                let mut rows = conn.query("SELECT n FROM counter", ())?;
                                rows.next()?;
                                rows.int(0)?
                            };
                            conn.execute("UPDATE counter SET n = ?", params![n + 1])
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let total = queue
        .perform(|conn| {
            let mut rows = conn.query("SELECT n FROM counter", ())?;
            rows.next()?;
            rows.int(0)
        })
        .unwrap();
    assert_eq!(total, 800);
}

#[test]
fn test_work_runs_in_arrival_order() {
    let queue = Arc::new(memory_queue());
    let order = Arc::new(Mutex::new(Vec::new()));
    let (entered_tx, entered_rx) = mpsc::channel();

    let first = {
        let queue = Arc::clone(&queue);
        let order = Arc::clone(&order);
        thread::spawn(move || {
            queue
                .perform(|_| {
                    entered_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(400));
                    order.lock().unwrap().push(0);
                    Ok(())
                })
                .unwrap();
        })
    };
    entered_rx.recv().unwrap();

    let mut waiters = Vec::new();
    for id in 1..=3 {
        let queue = Arc::clone(&queue);
        let order = Arc::clone(&order);
        waiters.push(thread::spawn(move || {
            queue
                .perform(|_| {
                    order.lock().unwrap().push(id);
                    Ok(())
                })
                .unwrap();
        }));
        thread::sleep(Duration::from_millis(50));
    }

    first.join().unwrap();
    for waiter in waiters {
        waiter.join().unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
}

#[test]
fn test_transaction_commits_on_success() {
    let queue = memory_queue();
    let value = queue
        .in_transaction(|conn, _| {
            assert!(conn.in_transaction());
            conn.execute("INSERT INTO t VALUES (1)", ())?;
            Ok("done")
        })
        .unwrap();
    assert_eq!(value, "done");

    queue
        .perform(|conn| {
            assert!(!conn.in_transaction());
            assert_eq!(count(conn)?, 1);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_transaction_rolls_back_on_request() {
    let queue = memory_queue();
    let value = queue
        .in_immediate_transaction(|conn, rollback| {
            conn.execute("INSERT INTO t VALUES (1)", ())?;
            rollback.rollback();
            Ok(7)
        })
        .unwrap();
    assert_eq!(value, 7);
    assert_eq!(queue.perform(count).unwrap(), 0);
}

#[test]
fn test_transaction_rolls_back_on_error() {
    let queue = memory_queue();
    let err = queue
        .in_exclusive_transaction(|conn, _| -> sqlqueue::Result<()> {
            conn.execute("INSERT INTO t VALUES (1)", ())?;
            Err(Error::Custom("stop".to_string()))
        })
        .unwrap_err();
    assert!(matches!(err, Error::Custom(ref m) if m == "stop"));

    queue
        .perform(|conn| {
            assert!(!conn.in_transaction());
            assert_eq!(count(conn)?, 0);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_nested_transaction_is_refused() {
    let queue = memory_queue();
    let err = queue
        .in_deferred_transaction(|conn, _| conn.begin_transaction())
        .unwrap_err();
    match err {
        Error::Transaction(t) => assert_eq!(t.kind, TransactionErrorKind::AlreadyActive),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_savepoint_inside_queue() {
    let queue = memory_queue();
    queue
        .in_transaction(|conn, _| {
            conn.execute("INSERT INTO t VALUES (1)", ())?;
            conn.in_savepoint(|conn, rollback| {
                conn.execute("INSERT INTO t VALUES (2)", ())?;
                rollback.rollback();
                Ok(())
            })
        })
        .unwrap();
    queue
        .in_savepoint(|conn, _| conn.execute("INSERT INTO t VALUES (3)", ()))
        .unwrap();

    assert_eq!(queue.perform(count).unwrap(), 2);
}

#[test]
fn test_reentrant_submission_is_misuse() {
    let queue = memory_queue();
    let err = queue
        .perform(|_| queue.perform(|_| Ok(())))
        .unwrap_err();
    match err {
        Error::Misuse(m) => assert_eq!(m.kind, MisuseErrorKind::ReentrantQueue),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(queue.perform(count).expect("queue usable after misuse"), 0);
}

#[test]
fn test_panicking_work_releases_the_queue_and_rolls_back() {
    let queue = Arc::new(memory_queue());
    let worker = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let _ = queue.in_transaction(|conn, _| -> sqlqueue::Result<()> {
                conn.execute("INSERT INTO t VALUES (1)", ())?;
                panic!("unit of work blew up");
            });
        })
    };
    assert!(worker.join().is_err());

    queue
        .perform(|conn| {
            assert!(!conn.in_transaction());
            assert_eq!(count(conn)?, 0);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_closed_queue_reopens_on_next_use() {
    let dir = tempfile::tempdir().unwrap();
    let queue = DatabaseQueue::open(ConnectionConfig::file(dir.path().join("q.db"))).unwrap();
    queue
        .perform(|conn| conn.execute_batch("CREATE TABLE t (v); INSERT INTO t VALUES (1);"))
        .unwrap();

    queue.close().unwrap();
    assert!(!queue.is_open());
    queue.close().unwrap();

    assert_eq!(queue.perform(count).unwrap(), 1);
    assert!(queue.is_open());
}

#[test]
fn test_failed_open_skips_the_work() {
    let dir = tempfile::tempdir().unwrap();
    let queue = DatabaseQueue::new(ConnectionConfig::file(
        dir.path().join("missing").join("q.db"),
    ));
    let ran = AtomicBool::new(false);

    let err = queue
        .perform(|_| {
            ran.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "unexpected error: {err}");
    assert!(!ran.load(Ordering::SeqCst));
    assert!(!queue.is_open());
}

#[test]
fn test_interrupt_reaches_running_work_without_waiting() {
    let queue = Arc::new(memory_queue());
    let done = Arc::new(AtomicBool::new(false));

    let interrupter = {
        let queue = Arc::clone(&queue);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(50));
                queue.interrupt().unwrap();
            }
        })
    };

    let err = queue
        .perform(|conn| {
            let mut rows = conn.query(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) \
                 SELECT count(*) FROM c",
                (),
            )?;
            rows.next()
        })
        .unwrap_err();
    done.store(true, Ordering::SeqCst);
    interrupter.join().unwrap();

    assert_eq!(err.code(), Some(code::INTERRUPT));
}
