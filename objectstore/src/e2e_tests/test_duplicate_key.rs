//! Test that inserting an existing id is refused without side effects.

use crate::e2e_tests::helpers::*;
use crate::error::StoreError;
use crate::testing::{Person, TestObject, person};
use crate::types::ObjectId;
use tempfile::tempdir;

#[tokio::test]
async fn test_duplicate_insert_after_reopen() {
    let dir = tempdir().expect("create temp dir");
    {
        let collection = open_collection(dir.path(), vec![index("by-name", &["Name"])]);
        let mut guard = collection.begin_write().await.expect("write lock");
        insert_all(&mut guard, &[1, 2, 3], |id| person(id, &format!("n{id}"), None));
        guard.sync().expect("sync");
    }

    let collection = open_collection(dir.path(), vec![index("by-name", &["Name"])]);
    let mut guard = collection.begin_write().await.expect("write lock");
    let err = guard
        .insert(ObjectId::from_u128(2), &person(2, "intruder", Some(1)))
        .expect_err("duplicate id");
    assert!(matches!(err, StoreError::DuplicateKey(id) if id == ObjectId::from_u128(2)));
    assert!(!err.is_structural());

    assert_eq!(guard.count().expect("count"), 3);
    let mut cursor = guard.cursor::<Person>(Some("by-name")).expect("cursor");
    let mut names = Vec::new();
    while cursor.move_next(&guard).expect("move") {
        names.push(cursor.current().expect("current").expect("found").name.clone());
    }
    assert_eq!(names, vec!["n1", "n2", "n3"]);

    let loaded = guard.try_load(ObjectId::from_u128(2)).expect("load");
    assert_eq!(loaded, Some(person(2, "n2", None)));
    assert!(matches!(loaded, Some(TestObject::Person(_))));
}
