//! Test that bookmarks return to the same entry.

use crate::e2e_tests::helpers::*;
use crate::testing::{Person, person};
use crate::types::ObjectId;
use tempfile::tempdir;

fn name_of(id: u128) -> String {
    format!("b{:04}", (id * 7919) % 1000)
}

#[tokio::test]
async fn test_bookmark_roundtrip_within_and_across_guards() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![index("by-name", &["Name"])]);
    {
        let mut guard = collection.begin_write().await.expect("write lock");
        insert_all(&mut guard, &shuffled(1000, 9), |id| person(id, &name_of(id), None));
    }

    let guard = collection.begin_read().await.expect("read lock");
    let mut cursor = guard.cursor::<Person>(Some("by-name")).expect("cursor");
    assert!(cursor.go_to_object(&guard, 437).expect("go to rank"));
    let marked = cursor.current_object_id().expect("id");
    let bookmark = cursor.bookmark(&guard).expect("bookmark").expect("positioned");

    for _ in 0..20 {
        assert!(cursor.move_next(&guard).expect("move"));
    }
    assert!(cursor.reset_to(&guard, bookmark).expect("restore"));
    assert_eq!(cursor.current_object_id().expect("id"), marked);
    assert_eq!(cursor.current_rank(&guard).expect("rank"), 437);
    drop(guard);

    // Releasing and reacquiring the lock without mutations keeps the bookmark valid.
    let guard = collection.begin_read().await.expect("read lock");
    cursor.reset();
    assert!(cursor.reset_to(&guard, bookmark).expect("restore"));
    assert_eq!(cursor.current_object_id().expect("id"), marked);
    assert!(cursor.move_next(&guard).expect("move"));
    assert_eq!(cursor.current_rank(&guard).expect("rank"), 438);
}

#[tokio::test]
async fn test_bookmark_between_entries() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![]);
    {
        let mut guard = collection.begin_write().await.expect("write lock");
        let evens: Vec<u128> = shuffled(100, 1).into_iter().map(|id| id * 2).collect();
        insert_all(&mut guard, &evens, |id| person(id, "even", None));
    }

    let guard = collection.begin_read().await.expect("read lock");
    let mut cursor = guard.cursor::<Person>(None).expect("cursor");
    // 51 is not stored; the cursor parks between 50 and 52.
    cursor
        .continue_after(&guard, &person(51, "odd", None))
        .expect("seek");
    let bookmark = cursor.bookmark(&guard).expect("bookmark").expect("parked");
    assert!(cursor.move_next(&guard).expect("move"));
    assert_eq!(cursor.current_object_id().expect("id"), ObjectId::from_u128(52));

    assert!(cursor.reset_to(&guard, bookmark).expect("restore"));
    assert!(cursor.current().is_err());
    assert!(cursor.move_previous(&guard).expect("move"));
    assert_eq!(cursor.current_object_id().expect("id"), ObjectId::from_u128(50));
}

#[tokio::test]
async fn test_bookmark_after_mutation_does_not_fail() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![index("by-name", &["Name"])]);
    {
        let mut guard = collection.begin_write().await.expect("write lock");
        insert_all(&mut guard, &shuffled(600, 2), |id| person(id, &name_of(id), None));
    }

    let bookmark = {
        let guard = collection.begin_read().await.expect("read lock");
        let mut cursor = guard.cursor::<Person>(Some("by-name")).expect("cursor");
        assert!(cursor.go_to_object(&guard, 599).expect("go to rank"));
        cursor.bookmark(&guard).expect("bookmark").expect("positioned")
    };

    {
        let mut guard = collection.begin_write().await.expect("write lock");
        for id in 0..500u128 {
            guard.delete(ObjectId::from_u128(id)).expect("delete");
        }
    }

    // The position may now be anywhere or nowhere; it must not be an error.
    let guard = collection.begin_read().await.expect("read lock");
    let mut cursor = guard.cursor::<Person>(Some("by-name")).expect("cursor");
    if cursor.reset_to(&guard, bookmark).expect("restore") && cursor.current().is_ok() {
        assert!(cursor.current_rank(&guard).expect("rank") < 100);
    }
}
