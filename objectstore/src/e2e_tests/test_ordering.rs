//! Test that enumeration follows index order regardless of insert order.

use crate::e2e_tests::helpers::*;
use crate::testing::{Person, person};
use crate::types::ObjectId;
use tempfile::tempdir;

fn age_of(id: u128) -> Option<i64> {
    // Ids 200 and up have no age; the rest cycle through ten ages.
    (id < 200).then(|| i64::try_from(id % 10).expect("small"))
}

fn name_of(id: u128) -> String {
    format!("p{:03}", id % 50)
}

#[tokio::test]
async fn test_ascending_index_order_with_ties() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![index("by-age", &["Age", "Name"])]);

    let order = shuffled(210, 7);
    {
        let mut guard = collection.begin_write().await.expect("write lock");
        insert_all(&mut guard, &order, |id| person(id, &name_of(id), age_of(id)));
    }

    // Missing ages encode as null, which sorts before every integer.
    let mut expected: Vec<u128> = (0..210).collect();
    expected.sort_by_key(|&id| (age_of(id).unwrap_or(i64::MIN), name_of(id), id));

    let guard = collection.begin_read().await.expect("read lock");
    let mut cursor = guard.cursor::<Person>(Some("by-age")).expect("cursor");
    assert_eq!(drain_forward(&mut cursor, &guard).expect("forward"), ids(&expected));

    cursor.reset();
    let mut backward = drain_backward(&mut cursor, &guard).expect("backward");
    backward.reverse();
    assert_eq!(backward, ids(&expected));
}

#[tokio::test]
async fn test_descending_field_orders_ties_by_id() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![index("by-age-desc", &["-Age"])]);

    let order = shuffled(210, 11);
    {
        let mut guard = collection.begin_write().await.expect("write lock");
        insert_all(&mut guard, &order, |id| person(id, &name_of(id), age_of(id)));
    }

    // Descending complements the value bytes only: nulls move to the end
    // and equal ages still follow ascending ids.
    let mut with_age: Vec<u128> = (0..200).collect();
    with_age.sort_by_key(|&id| (std::cmp::Reverse(age_of(id)), id));
    let expected: Vec<u128> = with_age.into_iter().chain(200..210).collect();

    let guard = collection.begin_read().await.expect("read lock");
    let mut cursor = guard.cursor::<Person>(Some("by-age-desc")).expect("cursor");
    assert_eq!(drain_forward(&mut cursor, &guard).expect("forward"), ids(&expected));
}

#[tokio::test]
async fn test_primary_cursor_walks_ids_in_order() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![]);

    let order = shuffled(500, 3);
    {
        let mut guard = collection.begin_write().await.expect("write lock");
        insert_all(&mut guard, &order, |id| person(id, "same", None));
    }

    let guard = collection.begin_read().await.expect("read lock");
    let mut cursor = guard.cursor::<Person>(None).expect("cursor");
    let forward = drain_forward(&mut cursor, &guard).expect("forward");
    assert_eq!(forward.len(), 500);
    assert!(forward.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(forward.first(), Some(&ObjectId::from_u128(0)));

    assert!(cursor.go_to_last(&guard).expect("last"));
    let last = cursor.current().expect("current").expect("found");
    assert_eq!(last.id, ObjectId::from_u128(499));
}
