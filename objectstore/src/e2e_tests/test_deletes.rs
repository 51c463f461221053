//! Test that deletes keep order, rank and counts consistent.

use std::collections::BTreeSet;

use crate::e2e_tests::helpers::*;
use crate::testing::{Person, person};
use crate::types::ObjectId;
use tempfile::tempdir;

fn name_of(id: u128) -> String {
    format!("d{:05}", (id * 104_729) % 3000)
}

#[tokio::test]
async fn test_deleting_every_third_object() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![index("by-name", &["Name"])]);
    let mut guard = collection.begin_write().await.expect("write lock");
    insert_all(&mut guard, &shuffled(3000, 77), |id| person(id, &name_of(id), None));

    let mut remaining: BTreeSet<u128> = (0..3000).collect();
    for id in shuffled(3000, 78).into_iter().filter(|id| id % 3 == 0) {
        let removed = guard.delete(ObjectId::from_u128(id)).expect("delete");
        assert!(removed.is_some());
        remaining.remove(&id);
    }
    assert_eq!(guard.count().expect("count"), 2000);
    assert_eq!(guard.index("by-name").expect("index").count().expect("count"), 2000);

    let mut expected: Vec<u128> = remaining.iter().copied().collect();
    expected.sort_by_key(|&id| name_of(id));

    let mut cursor = guard.cursor::<Person>(Some("by-name")).expect("cursor");
    assert_eq!(drain_forward(&mut cursor, &guard).expect("forward"), ids(&expected));

    for rank in [0u64, 1, 999, 1000, 1999] {
        assert!(cursor.go_to_object(&guard, rank).expect("go to rank"));
        let index = usize::try_from(rank).expect("small");
        assert_eq!(
            cursor.current_object_id().expect("id"),
            ObjectId::from_u128(expected[index])
        );
        assert_eq!(cursor.current_rank(&guard).expect("rank"), rank);
    }
    assert!(!cursor.go_to_object(&guard, 2000).expect("out of range"));

    let mut by_id = guard.cursor::<Person>(None).expect("cursor");
    let ids_in_order = drain_forward(&mut by_id, &guard).expect("forward");
    let remaining_ids: Vec<u128> = remaining.into_iter().collect();
    assert_eq!(ids_in_order, ids(&remaining_ids));
}

#[tokio::test]
async fn test_deleting_everything_leaves_an_empty_usable_collection() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![index("by-name", &["Name"])]);
    let mut guard = collection.begin_write().await.expect("write lock");
    insert_all(&mut guard, &shuffled(1500, 1), |id| person(id, &name_of(id), None));

    for id in shuffled(1500, 2) {
        guard.delete(ObjectId::from_u128(id)).expect("delete");
    }
    assert_eq!(guard.count().expect("count"), 0);
    assert_eq!(guard.objects().tree().depth().expect("depth"), 1);

    let mut cursor = guard.cursor::<Person>(Some("by-name")).expect("cursor");
    assert!(!cursor.go_to_first(&guard).expect("first"));
    assert!(!cursor.go_to_last(&guard).expect("last"));
    assert!(!cursor.move_next(&guard).expect("next"));
    assert!(!cursor.skip(&guard, 1).expect("skip"));

    guard
        .insert(ObjectId::from_u128(7), &person(7, "again", None))
        .expect("insert after emptying");
    cursor.reset();
    assert!(cursor.move_next(&guard).expect("next"));
    assert_eq!(cursor.current_object_id().expect("id"), ObjectId::from_u128(7));
}
