//! Test keyset pagination with `continue_after` / `continue_before`.

use crate::e2e_tests::helpers::*;
use crate::lock::ReadGuard;
use crate::testing::{TestObject, TestSerializer, device, label, person};
use crate::types::ObjectId;
use tempfile::tempdir;

const PAGE: usize = 7;

fn age_of(id: u128) -> Option<i64> {
    // Heavy ties, plus a run of objects without the field.
    (id % 9 != 0).then(|| i64::try_from(id % 4).expect("small"))
}

/// One page forward from `after` (or from the start).
fn page_forward(
    guard: &ReadGuard<TestSerializer>,
    after: Option<&TestObject>,
) -> Vec<TestObject> {
    let mut cursor = guard.cursor::<TestObject>(Some("by-age")).expect("cursor");
    if let Some(last) = after {
        cursor.continue_after(guard, last).expect("seek");
    }
    let mut page = Vec::new();
    while page.len() < PAGE && cursor.move_next(guard).expect("move") {
        page.push(cursor.current().expect("current").expect("found").clone());
    }
    page
}

/// One page backward from `before` (or from the end).
fn page_backward(
    guard: &ReadGuard<TestSerializer>,
    before: Option<&TestObject>,
) -> Vec<TestObject> {
    let mut cursor = guard.cursor::<TestObject>(Some("by-age")).expect("cursor");
    if let Some(first) = before {
        cursor.continue_before(guard, first).expect("seek");
    }
    let mut page = Vec::new();
    while page.len() < PAGE && cursor.move_previous(guard).expect("move") {
        page.push(cursor.current().expect("current").expect("found").clone());
    }
    page
}

fn id_of(object: &TestObject) -> ObjectId {
    match object {
        TestObject::Person(p) => p.id,
        TestObject::Device(d) => d.id,
        TestObject::Label(_) => ObjectId::MIN,
    }
}

#[tokio::test]
async fn test_pages_have_no_gaps_or_overlaps_with_ties() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![index("by-age", &["Age"])]);
    {
        let mut guard = collection.begin_write().await.expect("write lock");
        insert_all(&mut guard, &shuffled(100, 21), |id| {
            person(id, &format!("p{id}"), age_of(id))
        });
    }

    let guard = collection.begin_read().await.expect("read lock");
    let mut cursor = guard.cursor::<TestObject>(Some("by-age")).expect("cursor");
    let everything = drain_forward(&mut cursor, &guard).expect("forward");
    assert_eq!(everything.len(), 100);

    let mut paged = Vec::new();
    let mut last: Option<TestObject> = None;
    loop {
        let page = page_forward(&guard, last.as_ref());
        if page.is_empty() {
            break;
        }
        paged.extend(page.iter().map(id_of));
        last = page.last().cloned();
    }
    assert_eq!(paged, everything);

    let mut paged_back = Vec::new();
    let mut first: Option<TestObject> = None;
    loop {
        let page = page_backward(&guard, first.as_ref());
        if page.is_empty() {
            break;
        }
        paged_back.extend(page.iter().map(id_of));
        first = page.last().cloned();
    }
    paged_back.reverse();
    assert_eq!(paged_back, everything);
}

#[tokio::test]
async fn test_pagination_picks_up_inserts_between_pages() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![index("by-age", &["Age"])]);
    {
        let mut guard = collection.begin_write().await.expect("write lock");
        insert_all(&mut guard, &shuffled(30, 4), |id| {
            person(id, &format!("p{id}"), age_of(id))
        });
    }

    let first_page = {
        let guard = collection.begin_read().await.expect("read lock");
        page_forward(&guard, None)
    };
    let last = first_page.last().cloned().expect("non-empty page");

    // Sorts after everything on the first page, and before it.
    {
        let mut guard = collection.begin_write().await.expect("write lock");
        guard
            .insert(ObjectId::from_u128(500), &person(500, "late", Some(99)))
            .expect("insert");
        guard
            .insert(ObjectId::from_u128(501), &person(501, "early", None))
            .expect("insert");
    }

    let guard = collection.begin_read().await.expect("read lock");
    let mut rest = Vec::new();
    let mut cursor_item = Some(last);
    loop {
        let page = page_forward(&guard, cursor_item.as_ref());
        if page.is_empty() {
            break;
        }
        rest.extend(page.iter().map(id_of));
        cursor_item = page.last().cloned();
    }

    let first_ids: Vec<ObjectId> = first_page.iter().map(id_of).collect();
    assert!(rest.contains(&ObjectId::from_u128(500)));
    assert!(!rest.contains(&ObjectId::from_u128(501)));
    assert!(rest.iter().all(|id| !first_ids.contains(id)));
    assert_eq!(first_ids.len() + rest.len(), 31);
}

#[tokio::test]
async fn test_continue_from_item_without_id_skips_all_equal_values() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![index("by-kind", &["Kind"])]);
    {
        let mut guard = collection.begin_write().await.expect("write lock");
        for id in 0..5u128 {
            guard
                .insert(ObjectId::from_u128(id), &device(id, "d", 1))
                .expect("insert");
            guard
                .insert(ObjectId::from_u128(10 + id), &label("l"))
                .expect("insert");
            guard
                .insert(ObjectId::from_u128(20 + id), &person(20 + id, "p", None))
                .expect("insert");
        }
    }

    let guard = collection.begin_read().await.expect("read lock");
    let mut cursor = guard.cursor::<TestObject>(Some("by-kind")).expect("cursor");

    // "device" < "label" < "person"
    cursor.continue_after(&guard, &label("any")).expect("seek");
    assert!(cursor.move_next(&guard).expect("move"));
    assert_eq!(cursor.current_object_id().expect("id"), ObjectId::from_u128(20));

    cursor.continue_before(&guard, &label("any")).expect("seek");
    assert!(cursor.move_previous(&guard).expect("move"));
    assert_eq!(cursor.current_object_id().expect("id"), ObjectId::from_u128(4));

    // With an id, continuing resumes right after that exact entry.
    cursor.continue_after(&guard, &device(2, "d", 1)).expect("seek");
    assert!(cursor.move_next(&guard).expect("move"));
    assert_eq!(cursor.current_object_id().expect("id"), ObjectId::from_u128(3));
}

#[tokio::test]
async fn test_primary_cursor_continues_by_id() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![]);
    {
        let mut guard = collection.begin_write().await.expect("write lock");
        insert_all(&mut guard, &shuffled(20, 8), |id| person(id, "x", None));
    }

    let guard = collection.begin_read().await.expect("read lock");
    let mut cursor = guard.cursor::<TestObject>(None).expect("cursor");

    cursor.continue_after(&guard, &person(5, "x", None)).expect("seek");
    assert!(cursor.move_next(&guard).expect("move"));
    assert_eq!(cursor.current_object_id().expect("id"), ObjectId::from_u128(6));

    cursor.continue_before(&guard, &person(5, "x", None)).expect("seek");
    assert!(cursor.move_previous(&guard).expect("move"));
    assert_eq!(cursor.current_object_id().expect("id"), ObjectId::from_u128(4));

    cursor.continue_after(&guard, &person(19, "x", None)).expect("seek");
    assert!(!cursor.move_next(&guard).expect("move past end"));
}
