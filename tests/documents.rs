//! Document sets end to end: id assignment, CRUD, secondary index
//! maintenance, and the query engine.

use shaledb::{Database, DbError, IndexSpec, Query, Value};

fn test_db(dir: &tempfile::TempDir) -> Database {
    let _ = env_logger::builder().is_test(true).try_init();
    Database::builder()
        .page_size(1024)
        .open(dir.path().join("docs.shale"))
        .unwrap()
}

fn user(id: Option<i64>, status: &str, role: &str) -> Value {
    let mut fields = vec![
        ("status", Value::from(status)),
        ("role", Value::from(role)),
    ];
    if let Some(id) = id {
        fields.push(("id", Value::from(id)));
    }
    Value::object(fields)
}

fn id_of(doc: &Value) -> i64 {
    doc.get("id").and_then(Value::as_f64).unwrap() as i64
}

#[test]
fn insert_assigns_incrementing_ids() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let docs = db.create_doc_set("users").unwrap();

    let a = docs.insert(user(None, "online", "admin")).unwrap();
    let b = docs.insert(user(None, "offline", "user")).unwrap();
    assert_eq!(a, Value::from(1i64));
    assert_eq!(b, Value::from(2i64));

    let got = docs.get(&a).unwrap().unwrap();
    assert_eq!(got.get("status"), Some(&Value::from("online")));
    assert_eq!(docs.count().unwrap(), 2);
    assert_eq!(
        docs.get_ids().unwrap(),
        vec![Value::from(1i64), Value::from(2i64)]
    );
}

#[test]
fn explicit_id_conflict_is_already_exists() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let docs = db.create_doc_set("users").unwrap();

    docs.insert(user(Some(7), "online", "admin")).unwrap();
    let err = docs.insert(user(Some(7), "offline", "user")).unwrap_err();
    assert!(err.is_already_exists());
    assert_eq!(docs.count().unwrap(), 1);
}

#[test]
fn ids_continue_past_committed_maximum() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let docs = db.create_doc_set("users").unwrap();

    docs.insert(user(Some(10), "online", "admin")).unwrap();
    let next = docs.insert(user(None, "offline", "user")).unwrap();
    assert_eq!(next, Value::from(11i64));
}

#[test]
fn update_and_upsert() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let docs = db.create_doc_set("users").unwrap();

    let err = docs.update(&user(Some(1), "online", "admin")).unwrap_err();
    assert!(err.is_not_exist());

    docs.insert(user(Some(1), "online", "admin")).unwrap();
    docs.update(&user(Some(1), "away", "admin")).unwrap();
    assert_eq!(
        docs.get(&Value::from(1i64)).unwrap().unwrap().get("status"),
        Some(&Value::from("away"))
    );

    docs.upsert(user(Some(1), "busy", "admin")).unwrap();
    docs.upsert(user(Some(2), "online", "user")).unwrap();
    assert_eq!(docs.count().unwrap(), 2);
}

#[test]
fn status_role_query_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let docs = db.create_doc_set("users").unwrap();
    docs.use_indexes(&[IndexSpec::on("status"), IndexSpec::on("role")])
        .unwrap();

    docs.insert(user(Some(1), "online", "admin")).unwrap();
    docs.insert(user(Some(2), "offline", "user")).unwrap();

    let q = Query::and(vec![
        Query::eq("status", "online"),
        Query::eq("role", "admin"),
    ]);
    let hits = docs.query(&q).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(id_of(&hits[0]), 1);

    assert!(docs.delete(&Value::from(1i64)).unwrap());
    assert!(docs.query(&q).unwrap().is_empty());
}

#[test]
fn find_index_tracks_document_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let docs = db.create_doc_set("users").unwrap();
    docs.use_indexes(&[IndexSpec::on("status")]).unwrap();

    docs.insert(user(Some(1), "online", "a")).unwrap();
    docs.insert(user(Some(2), "online", "b")).unwrap();
    docs.insert(user(Some(3), "offline", "c")).unwrap();

    let online = docs.find_index("status", "online").unwrap();
    assert_eq!(online.len(), 2);

    docs.update(&user(Some(2), "offline", "b")).unwrap();
    assert_eq!(docs.find_index("status", "online").unwrap().len(), 1);
    assert_eq!(docs.find_index("status", "offline").unwrap().len(), 2);

    docs.delete(&Value::from(3i64)).unwrap();
    assert_eq!(docs.find_index("status", "offline").unwrap().len(), 1);
}

#[test]
fn indexes_build_over_existing_documents() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let docs = db.create_doc_set("users").unwrap();

    for i in 0..50i64 {
        let status = if i % 3 == 0 { "online" } else { "offline" };
        docs.insert(user(Some(i), status, "user")).unwrap();
    }
    docs.use_indexes(&[IndexSpec::on("status")]).unwrap();

    let online = docs.find_index("status", "online").unwrap();
    assert_eq!(online.len(), (0..50).filter(|i| i % 3 == 0).count());
}

#[test]
fn removing_an_index_declaration_drops_it() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let docs = db.create_doc_set("users").unwrap();
    docs.use_indexes(&[IndexSpec::on("status"), IndexSpec::on("role")])
        .unwrap();
    docs.insert(user(Some(1), "online", "admin")).unwrap();

    docs.use_indexes(&[IndexSpec::on("status")]).unwrap();
    assert_eq!(docs.find_index("status", "online").unwrap().len(), 1);
    let err = docs.find_index("role", "admin").unwrap_err();
    assert!(err.is_not_exist());
}

#[test]
fn unique_index_rejects_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let docs = db.create_doc_set("users").unwrap();
    docs.use_indexes(&[IndexSpec::unique("email")]).unwrap();

    docs.insert(Value::object(vec![
        ("id", Value::from(1i64)),
        ("email", Value::from("a@x.com")),
    ]))
    .unwrap();

    let err = docs
        .insert(Value::object(vec![
            ("id", Value::from(2i64)),
            ("email", Value::from("a@x.com")),
        ]))
        .unwrap_err();
    assert!(err.is_already_exists());

    // Updating the holder to the same key is not a conflict with itself.
    docs.update(&Value::object(vec![
        ("id", Value::from(1i64)),
        ("email", Value::from("a@x.com")),
        ("name", Value::from("alice")),
    ]))
    .unwrap();
}

#[test]
fn unique_violation_leaves_earlier_indexes_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let docs = db.create_doc_set("users").unwrap();
    docs.use_indexes(&[IndexSpec::on("status"), IndexSpec::unique("email")])
        .unwrap();

    docs.insert(Value::object(vec![
        ("id", Value::from(1i64)),
        ("status", Value::from("online")),
        ("email", Value::from("a@x.com")),
    ]))
    .unwrap();

    // The status index (declared first) must not pick up the rejected doc.
    let err = docs
        .insert(Value::object(vec![
            ("id", Value::from(2i64)),
            ("status", Value::from("brand-new-status")),
            ("email", Value::from("a@x.com")),
        ]))
        .unwrap_err();
    assert!(err.is_already_exists());

    assert_eq!(docs.count().unwrap(), 1);
    assert!(docs
        .find_index("status", "brand-new-status")
        .unwrap()
        .is_empty());
    assert!(docs.get(&Value::from(2i64)).unwrap().is_none());
}

#[test]
fn building_a_unique_index_over_conflicting_documents_fails() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let docs = db.create_doc_set("users").unwrap();
    docs.insert(Value::object(vec![
        ("id", Value::from(1i64)),
        ("email", Value::from("same@x.com")),
    ]))
    .unwrap();
    docs.insert(Value::object(vec![
        ("id", Value::from(2i64)),
        ("email", Value::from("same@x.com")),
    ]))
    .unwrap();

    let err = docs.use_indexes(&[IndexSpec::unique("email")]).unwrap_err();
    assert!(err.is_already_exists());
}

#[test]
fn nested_path_indexes() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let docs = db.create_doc_set("users").unwrap();
    docs.use_indexes(&[IndexSpec::named("city", "address.city", false)])
        .unwrap();

    docs.insert(Value::object(vec![
        ("id", Value::from(1i64)),
        (
            "address",
            Value::object(vec![("city", Value::from("berlin"))]),
        ),
    ]))
    .unwrap();
    docs.insert(Value::object(vec![("id", Value::from(2i64))]))
        .unwrap();

    assert_eq!(docs.find_index("city", "berlin").unwrap().len(), 1);
    // Documents without the field land under the undefined key.
    assert_eq!(
        docs.find_index("city", Value::Undefined).unwrap().len(),
        1
    );
}

#[test]
fn range_and_boolean_queries() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let docs = db.create_doc_set("events").unwrap();
    docs.use_indexes(&[IndexSpec::on("priority")]).unwrap();

    for i in 0..20i64 {
        docs.insert(Value::object(vec![
            ("id", Value::from(i)),
            ("priority", Value::from(i % 10)),
        ]))
        .unwrap();
    }

    let high = docs.query(&Query::ge("priority", 8i64)).unwrap();
    assert_eq!(high.len(), 4); // priorities 8 and 9, twice each

    let window = docs.query(&Query::between("priority", 3i64, 5i64)).unwrap();
    assert_eq!(window.len(), 6);

    let either = docs
        .query(&Query::or(vec![
            Query::eq("priority", 0i64),
            Query::eq("priority", 9i64),
        ]))
        .unwrap();
    assert_eq!(either.len(), 4);

    let not_zero = docs.query(&Query::not(Query::eq("priority", 0i64))).unwrap();
    assert_eq!(not_zero.len(), 18);

    let ne_zero = docs.query(&Query::ne("priority", 0i64)).unwrap();
    assert_eq!(ne_zero.len(), 18);

    let sliced = docs
        .query(&Query::slice(Query::ge("priority", 0i64), 5, 3))
        .unwrap();
    assert_eq!(sliced.len(), 3);

    // "id" targets the primary tree directly.
    let by_id = docs.query(&Query::between("id", 5i64, 7i64)).unwrap();
    let ids: Vec<i64> = by_id.iter().map(id_of).collect();
    assert_eq!(ids, vec![5, 6, 7]);
}

#[test]
fn querying_an_unknown_index_fails() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let docs = db.create_doc_set("users").unwrap();
    docs.insert(user(Some(1), "online", "admin")).unwrap();

    let err = docs.query(&Query::eq("nope", 1i64)).unwrap_err();
    assert!(err.is_not_exist());
}

#[test]
fn non_object_documents_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let docs = db.create_doc_set("users").unwrap();
    let err = docs.insert(Value::from(42i64)).unwrap_err();
    assert!(matches!(err, DbError::Invalid(_)));
}

#[test]
fn documents_survive_commit_and_reopen_with_indexes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("docs.shale");
    {
        let db = Database::builder().page_size(1024).open(&path).unwrap();
        let docs = db.create_doc_set("users").unwrap();
        docs.use_indexes(&[IndexSpec::on("status")]).unwrap();
        for i in 0..30i64 {
            docs.insert(user(Some(i), if i % 2 == 0 { "a" } else { "b" }, "r"))
                .unwrap();
        }
        db.commit().unwrap();
    }

    let db = Database::builder().page_size(1024).open(&path).unwrap();
    let docs = db.get_doc_set("users").unwrap().unwrap();
    assert_eq!(docs.count().unwrap(), 30);
    assert_eq!(docs.find_index("status", "a").unwrap().len(), 15);
}
