//! Key-value set behavior end to end: CRUD, durability across reopen,
//! rollback, and the previous-commit snapshot chain.

use shaledb::{Database, Value};

fn test_db(dir: &tempfile::TempDir) -> Database {
    let _ = env_logger::builder().is_test(true).try_init();
    Database::builder()
        .page_size(1024)
        .open(dir.path().join("kv.shale"))
        .unwrap()
}

#[test]
fn set_get_delete_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let set = db.create_kv_set("config").unwrap();

    set.set("host", "localhost").unwrap();
    set.set("port", 5432i64).unwrap();
    set.set(Value::from(42i64), Value::array(vec![Value::Bool(true)]))
        .unwrap();

    assert_eq!(
        set.get(&Value::from("host")).unwrap(),
        Some(Value::from("localhost"))
    );
    assert_eq!(
        set.get(&Value::from("port")).unwrap(),
        Some(Value::from(5432i64))
    );
    assert_eq!(set.count().unwrap(), 3);

    assert!(set.delete(&Value::from("host")).unwrap());
    assert!(!set.delete(&Value::from("host")).unwrap());
    assert_eq!(set.get(&Value::from("host")).unwrap(), None);
    assert_eq!(set.count().unwrap(), 2);
}

#[test]
fn overwrite_replaces_without_count_change() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let set = db.create_kv_set("c").unwrap();

    set.set("k", "v1").unwrap();
    set.set("k", "v2").unwrap();
    assert_eq!(set.count().unwrap(), 1);
    assert_eq!(set.get(&Value::from("k")).unwrap(), Some(Value::from("v2")));
}

#[test]
fn get_all_and_keys_are_key_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let set = db.create_kv_set("c").unwrap();

    for k in ["delta", "alpha", "charlie", "bravo"] {
        set.set(k, k.len() as i64).unwrap();
    }
    let keys: Vec<String> = set
        .get_keys()
        .unwrap()
        .into_iter()
        .map(|k| k.as_str().unwrap().to_owned())
        .collect();
    assert_eq!(keys, vec!["alpha", "bravo", "charlie", "delta"]);

    let all = set.get_all().unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].0, Value::from("alpha"));
}

#[test]
fn commit_then_reopen_preserves_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kv.shale");
    {
        let db = Database::builder().page_size(1024).open(&path).unwrap();
        let set = db.create_kv_set("c").unwrap();
        for i in 0..200i64 {
            set.set(Value::from(i), Value::from(format!("value-{i}")))
                .unwrap();
        }
        db.commit().unwrap();
    }

    let db = Database::builder().page_size(1024).open(&path).unwrap();
    let set = db.get_kv_set("c").unwrap().expect("set survived reopen");
    assert_eq!(set.count().unwrap(), 200);
    for i in (0..200i64).step_by(17) {
        assert_eq!(
            set.get(&Value::from(i)).unwrap(),
            Some(Value::from(format!("value-{i}")))
        );
    }
}

#[test]
fn uncommitted_mutations_vanish_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kv.shale");
    {
        let db = Database::builder().page_size(1024).open(&path).unwrap();
        let set = db.create_kv_set("c").unwrap();
        set.set("committed", 1i64).unwrap();
        db.commit().unwrap();
        set.set("uncommitted", 2i64).unwrap();
        // dropped without commit
    }

    let db = Database::builder().page_size(1024).open(&path).unwrap();
    let set = db.get_kv_set("c").unwrap().unwrap();
    assert!(set.get(&Value::from("committed")).unwrap().is_some());
    assert!(set.get(&Value::from("uncommitted")).unwrap().is_none());
}

#[test]
fn rollback_restores_committed_state_and_addresses() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let set = db.create_kv_set("c").unwrap();
    set.set("stable", 1i64).unwrap();
    db.commit().unwrap();

    let before = db.stats();
    for i in 0..50i64 {
        set.set(Value::from(i), Value::from("scratch")).unwrap();
    }
    assert!(db.stats().alloc_high_water > before.alloc_high_water);

    db.rollback();
    let after = db.stats();
    assert_eq!(after.alloc_high_water, before.alloc_high_water);
    assert_eq!(after.free_addrs, before.free_addrs);
    assert_eq!(set.get(&Value::from("stable")).unwrap(), Some(Value::from(1i64)));
    assert_eq!(set.get(&Value::from(0i64)).unwrap(), None);
}

#[test]
fn prev_commit_sees_the_prior_generation() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let set = db.create_kv_set("c").unwrap();

    set.set("k", "v1").unwrap();
    db.commit().unwrap();
    set.set("k", "v2").unwrap();
    db.commit().unwrap();

    assert_eq!(set.get(&Value::from("k")).unwrap(), Some(Value::from("v2")));

    let prev = db.prev_commit().unwrap().expect("previous commit exists");
    let prev_set = prev.get_kv_set("c").unwrap().expect("set in prev commit");
    assert_eq!(
        prev_set.get(&Value::from("k")).unwrap(),
        Some(Value::from("v1"))
    );
}

#[test]
fn large_values_chain_across_data_pages() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kv.shale");
    let blob = Value::Blob((0..10_000u32).map(|i| (i % 251) as u8).collect());
    {
        let db = Database::builder().page_size(1024).open(&path).unwrap();
        let set = db.create_kv_set("c").unwrap();
        set.set("big", blob.clone()).unwrap();
        assert_eq!(set.get(&Value::from("big")).unwrap(), Some(blob.clone()));
        db.commit().unwrap();
    }

    let db = Database::builder().page_size(1024).open(&path).unwrap();
    let set = db.get_kv_set("c").unwrap().unwrap();
    assert_eq!(set.get(&Value::from("big")).unwrap(), Some(blob));
}

#[test]
fn deleting_a_set_removes_it() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let set = db.create_kv_set("doomed").unwrap();
    set.set("k", 1i64).unwrap();
    db.commit().unwrap();

    assert!(db.delete_kv_set("doomed").unwrap());
    assert!(db.get_kv_set("doomed").unwrap().is_none());
    assert!(set.get(&Value::from("k")).is_err());
    db.commit().unwrap();

    let names = db.kv_set_names().unwrap();
    assert!(names.is_empty());
}

#[test]
fn missing_set_reads_fail_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    assert!(db.get_kv_set("nope").unwrap().is_none());
}
