//! Multi-version behavior and durability: named snapshots pinning
//! generations, refcount GC reclaiming addresses, crash recovery through
//! the previous root, and dump/import/rebuild.

use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;

use shaledb::{Database, IndexSpec, Query, Value};

const PAGE: usize = 1024;

fn open(path: &std::path::Path) -> Database {
    let _ = env_logger::builder().is_test(true).try_init();
    Database::builder().page_size(PAGE).open(path).unwrap()
}

#[test]
fn snapshot_pins_a_deleted_set() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir.path().join("s.shale"));
    let kv = db.create_kv_set("c").unwrap();
    for i in 0..50i64 {
        kv.set(Value::from(i), Value::from(format!("v{i}"))).unwrap();
    }
    db.commit().unwrap();

    db.create_snapshot("before-drop").unwrap();
    db.commit().unwrap();

    db.delete_kv_set("c").unwrap();
    db.commit().unwrap();
    assert!(db.get_kv_set("c").unwrap().is_none());

    // More churn that would reuse freed pages if the snapshot were not
    // holding them.
    let other = db.create_kv_set("other").unwrap();
    for i in 0..50i64 {
        other.set(Value::from(i), Value::from("x")).unwrap();
    }
    db.commit().unwrap();

    let snap = db.get_snapshot("before-drop").unwrap().expect("snapshot");
    let old = snap.get_kv_set("c").unwrap().expect("set inside snapshot");
    assert_eq!(old.count().unwrap(), 50);
    assert_eq!(
        old.get(&Value::from(7i64)).unwrap(),
        Some(Value::from("v7"))
    );
}

#[test]
fn deleting_a_snapshot_releases_its_pages() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir.path().join("s.shale"));
    let kv = db.create_kv_set("c").unwrap();
    for i in 0..100i64 {
        kv.set(Value::from(i), Value::from(format!("value-{i}")))
            .unwrap();
    }
    db.commit().unwrap();
    db.create_snapshot("pin").unwrap();
    db.commit().unwrap();
    db.delete_kv_set("c").unwrap();
    db.commit().unwrap();

    let pinned = db.stats();
    assert!(db.delete_snapshot("pin").unwrap());
    db.commit().unwrap();
    let released = db.stats();
    assert!(
        released.free_addrs > pinned.free_addrs,
        "dropping the snapshot freed nothing ({} -> {})",
        pinned.free_addrs,
        released.free_addrs
    );
}

#[test]
fn freed_addresses_are_reused_by_later_allocations() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir.path().join("s.shale"));
    let kv = db.create_kv_set("c").unwrap();
    for i in 0..200i64 {
        kv.set(Value::from(i), Value::from(format!("value-{i}")))
            .unwrap();
    }
    db.commit().unwrap();

    for i in 0..200i64 {
        kv.delete(&Value::from(i)).unwrap();
    }
    db.commit().unwrap();
    let after_delete = db.stats();
    assert!(after_delete.free_addrs > 0);

    for i in 0..200i64 {
        kv.set(Value::from(i), Value::from(format!("again-{i}")))
            .unwrap();
    }
    db.commit().unwrap();
    let after_refill = db.stats();
    assert!(
        after_refill.free_addrs < after_delete.free_addrs,
        "refill did not reuse freed addresses"
    );
    // Refilling equivalent contents must not grow the file by another full
    // copy of the data.
    let grown = after_refill.alloc_high_water - after_delete.alloc_high_water;
    assert!(
        (grown as usize) < 40,
        "file grew by {grown} pages despite a full free list"
    );
}

#[test]
fn recovery_falls_back_to_previous_root() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s.shale");
    {
        let db = open(&path);
        let kv = db.create_kv_set("c").unwrap();
        kv.set("k", "v1").unwrap();
        db.commit().unwrap();
        kv.set("k", "v2").unwrap();
        db.commit().unwrap();
    }

    // Tear the current root page: the super page records its address at
    // byte offset 20 (4-byte header + 16-byte signature), little-endian.
    {
        let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
        let mut header = [0u8; 24];
        file.read_exact_at(&mut header, 0).unwrap();
        let current_root = u32::from_le_bytes(header[20..24].try_into().unwrap());
        let garbage = vec![0xEEu8; PAGE];
        file.write_all_at(&garbage, current_root as u64 * PAGE as u64)
            .unwrap();
        file.sync_all().unwrap();
    }

    let db = open(&path);
    let kv = db.get_kv_set("c").unwrap().expect("set from fallback root");
    assert_eq!(kv.get(&Value::from("k")).unwrap(), Some(Value::from("v1")));
}

#[test]
fn reopen_replays_the_free_list() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s.shale");
    let free_before;
    {
        let db = open(&path);
        let kv = db.create_kv_set("c").unwrap();
        for i in 0..100i64 {
            kv.set(Value::from(i), Value::from("x")).unwrap();
        }
        db.commit().unwrap();
        for i in 0..100i64 {
            kv.delete(&Value::from(i)).unwrap();
        }
        db.commit().unwrap();
        free_before = db.stats().free_addrs;
        assert!(free_before > 0);
    }

    let db = open(&path);
    assert_eq!(db.stats().free_addrs, free_before);
}

#[test]
fn snapshot_walks_backwards_through_commits() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir.path().join("s.shale"));
    let kv = db.create_kv_set("c").unwrap();

    kv.set("k", 1i64).unwrap();
    db.commit().unwrap();
    kv.set("k", 2i64).unwrap();
    db.commit().unwrap();
    kv.set("k", 3i64).unwrap();
    db.commit().unwrap();

    let prev = db.prev_commit().unwrap().unwrap();
    let prev_kv = prev.get_kv_set("c").unwrap().unwrap();
    assert_eq!(prev_kv.get(&Value::from("k")).unwrap(), Some(Value::from(2i64)));

    let prev2 = prev.prev_commit().unwrap().unwrap();
    let prev2_kv = prev2.get_kv_set("c").unwrap().unwrap();
    assert_eq!(prev2_kv.get(&Value::from("k")).unwrap(), Some(Value::from(1i64)));
}

#[test]
fn dump_import_round_trips_logical_contents() {
    let dir = tempfile::tempdir().unwrap();
    let db = open(&dir.path().join("a.shale"));

    let kv = db.create_kv_set("config").unwrap();
    kv.set("host", "localhost").unwrap();
    kv.set("blob", Value::Blob(vec![0, 255, 7])).unwrap();

    let docs = db.create_doc_set("users").unwrap();
    docs.use_indexes(&[IndexSpec::on("status"), IndexSpec::unique("email")])
        .unwrap();
    docs.insert(Value::object(vec![
        ("id", Value::from(1i64)),
        ("status", Value::from("online")),
        ("email", Value::from("a@x.com")),
    ]))
    .unwrap();
    docs.insert(Value::object(vec![
        ("id", Value::from(2i64)),
        ("status", Value::from("offline")),
        ("email", Value::from("b@x.com")),
    ]))
    .unwrap();
    db.commit().unwrap();

    let dump = db.dump().unwrap();

    let db2 = open(&dir.path().join("b.shale"));
    db2.import(&dump).unwrap();
    db2.commit().unwrap();

    let kv2 = db2.get_kv_set("config").unwrap().unwrap();
    assert_eq!(
        kv2.get(&Value::from("host")).unwrap(),
        Some(Value::from("localhost"))
    );
    assert_eq!(
        kv2.get(&Value::from("blob")).unwrap(),
        Some(Value::Blob(vec![0, 255, 7]))
    );

    let docs2 = db2.get_doc_set("users").unwrap().unwrap();
    assert_eq!(docs2.count().unwrap(), 2);
    let online = docs2.query(&Query::eq("status", "online")).unwrap();
    assert_eq!(online.len(), 1);
    assert_eq!(docs2.find_index("email", "b@x.com").unwrap().len(), 1);

    assert_eq!(db2.dump().unwrap(), dump);
}

#[test]
fn rebuild_compacts_and_preserves_contents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s.shale");
    let db = open(&path);
    let kv = db.create_kv_set("c").unwrap();
    for round in 0..5 {
        for i in 0..100i64 {
            kv.set(Value::from(i), Value::from(format!("round-{round}-{i}")))
                .unwrap();
        }
        db.commit().unwrap();
    }
    let before = db.stats();

    db.rebuild().unwrap();

    let kv = db.get_kv_set("c").unwrap().unwrap();
    assert_eq!(kv.count().unwrap(), 100);
    assert_eq!(
        kv.get(&Value::from(42i64)).unwrap(),
        Some(Value::from("round-4-42"))
    );
    let after = db.stats();
    assert!(
        after.alloc_high_water < before.alloc_high_water,
        "rebuild did not compact ({} -> {})",
        before.alloc_high_water,
        after.alloc_high_water
    );

    // The rebuilt file stands on its own.
    drop(kv);
    db.close();
    let db = open(&path);
    let kv = db.get_kv_set("c").unwrap().unwrap();
    assert_eq!(kv.count().unwrap(), 100);
}
