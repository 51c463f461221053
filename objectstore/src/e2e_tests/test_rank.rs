//! Test rank-based positioning over a multi-level tree.

use crate::e2e_tests::helpers::*;
use crate::error::StoreError;
use crate::testing::{Person, person};
use crate::types::ObjectId;
use tempfile::tempdir;

const COUNT: u128 = 2000;

fn name_of(id: u128) -> String {
    // Reverse of id order, so index order differs from insert and id order.
    format!("n{:05}", COUNT - id)
}

#[tokio::test]
async fn test_go_to_object_matches_enumeration() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![index("by-name", &["Name"])]);
    {
        let mut guard = collection.begin_write().await.expect("write lock");
        insert_all(&mut guard, &shuffled(COUNT, 42), |id| person(id, &name_of(id), None));
    }

    let guard = collection.begin_read().await.expect("read lock");
    assert!(guard.index("by-name").expect("index").tree().depth().expect("depth") >= 2);

    let mut cursor = guard.cursor::<Person>(Some("by-name")).expect("cursor");
    let enumerated = drain_forward(&mut cursor, &guard).expect("forward");
    assert_eq!(enumerated.len(), 2000);

    for (rank, id) in enumerated.iter().enumerate() {
        let rank = u64::try_from(rank).expect("small");
        assert!(cursor.go_to_object(&guard, rank).expect("go to rank"));
        assert_eq!(cursor.current_object_id().expect("id"), *id);
        assert_eq!(cursor.current_rank(&guard).expect("rank"), rank);
    }

    assert!(!cursor.go_to_object(&guard, 2000).expect("out of range"));
    assert!(matches!(cursor.current_rank(&guard), Err(StoreError::NotStarted)));
}

#[tokio::test]
async fn test_rank_tracks_sequential_moves() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![index("by-name", &["Name"])]);
    {
        let mut guard = collection.begin_write().await.expect("write lock");
        insert_all(&mut guard, &shuffled(COUNT, 5), |id| person(id, &name_of(id), None));
    }

    let guard = collection.begin_read().await.expect("read lock");
    let mut by_name = guard.cursor::<Person>(Some("by-name")).expect("cursor");
    let mut by_id = guard.cursor::<Person>(None).expect("cursor");

    let mut expected = 0u64;
    while by_name.move_next(&guard).expect("move") {
        assert_eq!(by_name.current_rank(&guard).expect("rank"), expected);
        expected += 1;
    }
    assert_eq!(expected, 2000);

    assert!(by_id.go_to_object(&guard, 1234).expect("go to rank"));
    assert_eq!(by_id.current_object_id().expect("id"), ObjectId::from_u128(1234));
    assert!(by_id.move_previous(&guard).expect("previous"));
    assert_eq!(by_id.current_rank(&guard).expect("rank"), 1233);
}
