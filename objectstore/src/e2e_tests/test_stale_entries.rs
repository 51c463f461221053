//! Test that stale and mismatched index entries never abort a scan.

use crate::e2e_tests::helpers::*;
use crate::serializer::{Loaded, ObjectSerializer};
use crate::testing::{Person, TestSerializer, device, person};
use crate::types::ObjectId;
use tempfile::tempdir;

fn name_of(id: u128) -> String {
    format!("n{id:02}")
}

#[tokio::test]
async fn test_scan_reports_stale_and_mismatched_entries() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![index("by-name", &["Name"])]);
    let mut guard = collection.begin_write().await.expect("write lock");
    insert_all(&mut guard, &shuffled(20, 13), |id| person(id, &name_of(id), None));

    // Change the primary file behind the indexes' back.
    for id in [3u128, 4, 10] {
        guard
            .objects_mut()
            .delete(ObjectId::from_u128(id))
            .expect("delete");
    }
    let payload = TestSerializer
        .serialize(&device(7, &name_of(7), 1))
        .expect("serialize");
    guard
        .objects_mut()
        .update(ObjectId::from_u128(7), &payload)
        .expect("update");

    let mut cursor = guard.cursor::<Person>(Some("by-name")).expect("cursor");
    let (mut found, mut stale, mut mismatched) = (0, Vec::new(), Vec::new());
    while cursor.move_next(&guard).expect("move") {
        let id = cursor.current_object_id().expect("id");
        match cursor.current_loaded().expect("loaded") {
            Loaded::Found(p) => {
                assert_eq!(p.id, id);
                found += 1;
            }
            Loaded::Stale => stale.push(id),
            Loaded::TypeMismatch => mismatched.push(id),
        }
        if !cursor.current_type_compatible().expect("compatible") {
            assert_eq!(cursor.current().expect("current"), None);
        }
    }
    assert_eq!(found, 16);
    assert_eq!(stale, ids(&[3, 4, 10]));
    assert_eq!(mismatched, ids(&[7]));

    // Only the entries whose object is gone are purged; the device still
    // produces the same key.
    assert_eq!(guard.remove_stale_index_entries().expect("purge"), 3);
    cursor.reset();
    assert_eq!(drain_forward(&mut cursor, &guard).expect("forward").len(), 17);
}

#[tokio::test]
async fn test_update_over_unreadable_payload_leaves_purgeable_entry() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![index("by-name", &["Name"])]);
    let mut guard = collection.begin_write().await.expect("write lock");
    insert_all(&mut guard, &[1, 2, 3], |id| person(id, &name_of(id), None));

    guard
        .objects_mut()
        .update(ObjectId::from_u128(1), &[0xEE, 0x01])
        .expect("overwrite payload");
    assert!(guard
        .update(ObjectId::from_u128(1), &person(1, "zed", None))
        .expect("update"));

    let index = guard.index("by-name").expect("index");
    assert_eq!(index.count().expect("count"), 4);

    let mut cursor = guard.cursor::<Person>(Some("by-name")).expect("cursor");
    let order = drain_forward(&mut cursor, &guard).expect("forward");
    // The old "n01" entry now points at an object named "zed".
    assert_eq!(order, ids(&[1, 2, 3, 1]));

    assert_eq!(guard.remove_stale_index_entries().expect("purge"), 1);
    cursor.reset();
    assert_eq!(
        drain_forward(&mut cursor, &guard).expect("forward"),
        ids(&[2, 3, 1])
    );
}

#[tokio::test]
async fn test_unreadable_payload_is_a_mismatch_not_an_abort() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![index("by-name", &["Name"])]);
    let mut guard = collection.begin_write().await.expect("write lock");
    insert_all(&mut guard, &[0, 1, 2], |id| person(id, &name_of(id), None));
    guard
        .objects_mut()
        .update(ObjectId::from_u128(1), b"\xEEgarbage")
        .expect("overwrite payload");

    for index_name in [Some("by-name"), None] {
        let mut cursor = guard.cursor::<Person>(index_name).expect("cursor");
        let mut outcomes = Vec::new();
        while cursor.move_next(&guard).expect("move") {
            outcomes.push((
                cursor.current_object_id().expect("id"),
                cursor.current_type_compatible().expect("compatible"),
            ));
        }
        assert_eq!(
            outcomes,
            vec![
                (ObjectId::from_u128(0), true),
                (ObjectId::from_u128(1), false),
                (ObjectId::from_u128(2), true),
            ],
            "{index_name:?}"
        );
    }
}

#[tokio::test]
async fn test_delete_of_unreadable_payload_leaves_purgeable_entry() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![index("by-name", &["Name"])]);
    let mut guard = collection.begin_write().await.expect("write lock");
    insert_all(&mut guard, &[1, 2], |id| person(id, &name_of(id), None));
    guard
        .objects_mut()
        .update(ObjectId::from_u128(2), &[0xEE])
        .expect("overwrite payload");

    assert_eq!(guard.delete(ObjectId::from_u128(2)).expect("delete"), None);
    assert!(!guard.contains(ObjectId::from_u128(2)).expect("contains"));
    assert_eq!(guard.count().expect("count"), 1);

    let index = guard.index("by-name").expect("index");
    assert_eq!(index.count().expect("count"), 2);
    assert_eq!(guard.remove_stale_index_entries().expect("purge"), 1);

    let mut cursor = guard.cursor::<Person>(Some("by-name")).expect("cursor");
    assert_eq!(
        drain_forward(&mut cursor, &guard).expect("forward"),
        ids(&[1])
    );
}
