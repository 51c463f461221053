//! Test payloads that spill into overflow blocks.

use crate::e2e_tests::helpers::*;
use crate::testing::{Person, TestObject, person_in};
use crate::types::ObjectId;
use tempfile::tempdir;

fn city(id: u128, len: usize) -> String {
    let letter = char::from(b'a' + u8::try_from(id % 26).expect("small"));
    std::iter::repeat_n(letter, len).collect()
}

#[tokio::test]
async fn test_large_payloads_roundtrip_through_updates() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![index("by-name", &["Name"])]);

    {
        let mut guard = collection.begin_write().await.expect("write lock");
        for id in 0..40u128 {
            let len = if id % 2 == 0 { 30_000 } else { 40 };
            guard
                .insert(
                    ObjectId::from_u128(id),
                    &person_in(id, &format!("o{id:02}"), None, &city(id, len)),
                )
                .expect("insert");
        }

        // Grow the small ones, shrink the large ones.
        for id in 0..40u128 {
            let len = if id % 2 == 0 { 12 } else { 20_000 };
            assert!(guard
                .update(
                    ObjectId::from_u128(id),
                    &person_in(id, &format!("o{id:02}"), None, &city(id, len)),
                )
                .expect("update"));
        }
        guard.sync().expect("sync");
    }

    let collection = open_collection(dir.path(), vec![index("by-name", &["Name"])]);
    let guard = collection.begin_read().await.expect("read lock");
    let mut cursor = guard.cursor::<Person>(Some("by-name")).expect("cursor");
    let mut seen = 0u128;
    while cursor.move_next(&guard).expect("move") {
        let p = cursor.current().expect("current").expect("found");
        let expected_len = if seen % 2 == 0 { 12 } else { 20_000 };
        assert_eq!(p.id, ObjectId::from_u128(seen));
        assert_eq!(p.city.as_deref(), Some(city(seen, expected_len).as_str()));
        seen += 1;
    }
    assert_eq!(seen, 40);

    let loaded = guard.try_load(ObjectId::from_u128(3)).expect("load");
    assert!(matches!(
        loaded,
        Some(TestObject::Person(p)) if p.city.as_ref().map(String::len) == Some(20_000)
    ));
}

#[tokio::test]
async fn test_deleting_large_payloads_reuses_space() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![]);
    let mut guard = collection.begin_write().await.expect("write lock");

    for id in 0..10u128 {
        guard
            .insert(ObjectId::from_u128(id), &person_in(id, "big", None, &city(id, 50_000)))
            .expect("insert");
    }
    let blocks_after_first_round = guard.objects().tree().file().total_pages();
    for id in 0..10u128 {
        assert!(guard.delete(ObjectId::from_u128(id)).expect("delete").is_some());
    }
    for id in 10..20u128 {
        guard
            .insert(ObjectId::from_u128(id), &person_in(id, "big", None, &city(id, 50_000)))
            .expect("insert");
    }
    assert!(guard.objects().tree().file().total_pages() <= blocks_after_first_round + 1);
    assert_eq!(guard.count().expect("count"), 10);
    assert!(guard.try_load(ObjectId::from_u128(3)).expect("load").is_none());
    assert!(matches!(guard.try_load(ObjectId::from_u128(13)).expect("load"), Some(_)));
}
