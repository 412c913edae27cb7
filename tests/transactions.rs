//! Transaction-cycle behavior: group commit, whole-cycle replay on
//! failure, and index consistency under concurrent writers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use shaledb::{Database, DbError, IndexSpec, Value};

fn test_db(dir: &tempfile::TempDir) -> Database {
    let _ = env_logger::builder().is_test(true).try_init();
    Database::builder()
        .page_size(1024)
        .open(dir.path().join("txn.shale"))
        .unwrap()
}

/// Waits until `counter` reaches `target` (replay-safe: the counter never
/// resets, so a replayed body sails through).
fn wait_for(counter: &AtomicUsize, target: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while counter.load(Ordering::SeqCst) < target && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn ten_concurrent_inserts_commit_as_one_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let docs = db.create_doc_set("users").unwrap();
    docs.use_indexes(&[IndexSpec::unique("tag")]).unwrap();
    db.commit().unwrap();
    let revision_before = db.revision();

    let entered = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..10i64)
        .map(|i| {
            let db = db.clone();
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                db.transact(move |db| {
                    let docs = db.get_doc_set("users")?.ok_or_else(|| {
                        DbError::NotExist("users".into())
                    })?;
                    docs.insert(Value::object(vec![
                        ("id", Value::from(i)),
                        ("tag", Value::from(format!("tag-{i}"))),
                    ]))?;
                    // Hold the cycle open until every body has joined, so
                    // all ten transactions overlap in one cycle.
                    entered.fetch_add(1, Ordering::SeqCst);
                    wait_for(&entered, 10);
                    Ok(i)
                })
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let docs = db.get_doc_set("users").unwrap().unwrap();
    assert_eq!(docs.count().unwrap(), 10);
    assert_eq!(docs.get_ids().unwrap().len(), 10);
    for i in 0..10i64 {
        let hits = docs.find_index("tag", format!("tag-{i}")).unwrap();
        assert_eq!(hits.len(), 1, "tag-{i}");
    }

    // Overlapping transactions commit once.
    assert_eq!(db.revision(), revision_before + 1);
}

#[test]
fn failing_member_replays_the_whole_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let kv = db.create_kv_set("state").unwrap();
    kv.set("base", 0i64).unwrap();
    db.commit().unwrap();

    let entered = Arc::new(AtomicUsize::new(0));
    let good_runs = Arc::new(AtomicUsize::new(0));
    let bad_runs = Arc::new(AtomicUsize::new(0));

    let good = {
        let db = db.clone();
        let entered = Arc::clone(&entered);
        let good_runs = Arc::clone(&good_runs);
        thread::spawn(move || {
            db.transact(move |db| {
                good_runs.fetch_add(1, Ordering::SeqCst);
                let kv = db
                    .get_kv_set("state")?
                    .ok_or_else(|| DbError::NotExist("state".into()))?;
                kv.set("good", 1i64)?;
                entered.fetch_add(1, Ordering::SeqCst);
                wait_for(&entered, 2);
                Ok(())
            })
        })
    };
    let bad = {
        let db = db.clone();
        let entered = Arc::clone(&entered);
        let bad_runs = Arc::clone(&bad_runs);
        thread::spawn(move || {
            db.transact(move |db| -> Result<(), DbError> {
                bad_runs.fetch_add(1, Ordering::SeqCst);
                let kv = db
                    .get_kv_set("state")?
                    .ok_or_else(|| DbError::NotExist("state".into()))?;
                kv.set("bad", 1i64)?;
                entered.fetch_add(1, Ordering::SeqCst);
                wait_for(&entered, 2);
                Err(DbError::Invalid("deliberate failure".into()))
            })
        })
    };

    good.join().unwrap().unwrap();
    let err = bad.join().unwrap().unwrap_err();
    assert!(matches!(err, DbError::Invalid(_)));

    // Both bodies ran twice: original cycle plus replay.
    assert_eq!(good_runs.load(Ordering::SeqCst), 2);
    assert_eq!(bad_runs.load(Ordering::SeqCst), 2);

    // The good transaction's replayed effect committed; the bad one's
    // changes were rolled back.
    assert_eq!(kv.get(&Value::from("good")).unwrap(), Some(Value::from(1i64)));
    assert_eq!(kv.get(&Value::from("bad")).unwrap(), None);
    assert_eq!(kv.get(&Value::from("base")).unwrap(), Some(Value::from(0i64)));
}

#[test]
fn sequential_transactions_commit_separately() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    db.create_kv_set("c").unwrap();
    db.commit().unwrap();
    let base = db.revision();

    for i in 0..3i64 {
        db.transact(move |db| {
            let kv = db
                .get_kv_set("c")?
                .ok_or_else(|| DbError::NotExist("c".into()))?;
            kv.set(Value::from(i), Value::from(i))?;
            Ok(())
        })
        .unwrap();
    }

    assert_eq!(db.revision(), base + 3);
    let kv = db.get_kv_set("c").unwrap().unwrap();
    assert_eq!(kv.count().unwrap(), 3);
}

#[test]
fn transaction_results_come_back_typed() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    db.create_kv_set("c").unwrap();
    db.commit().unwrap();

    let value: String = db
        .transact(|db| {
            let kv = db
                .get_kv_set("c")?
                .ok_or_else(|| DbError::NotExist("c".into()))?;
            kv.set("k", "hello")?;
            Ok("hello".to_owned())
        })
        .unwrap();
    assert_eq!(value, "hello");
}
