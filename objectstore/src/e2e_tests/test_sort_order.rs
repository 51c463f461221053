//! Test sort-order matching against a two-field index.

use crate::e2e_tests::helpers::*;
use crate::index::ScanDirection;
use crate::testing::{Person, person};
use tempfile::tempdir;

#[tokio::test]
async fn test_sort_order_matching() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(
        dir.path(),
        vec![index("name-age", &["Name", "-Age"]), index("city", &["City"])],
    );
    let guard = collection.begin_read().await.expect("read lock");

    let same = |constant: &[&str], order: &[&str]| {
        guard
            .same_sort_order("name-age", constant, order)
            .expect("known index")
    };
    let reverse = |constant: &[&str], order: &[&str]| {
        guard
            .reverse_sort_order("name-age", constant, order)
            .expect("known index")
    };

    assert!(same(&[], &["Name", "-Age"]));
    assert!(same(&[], &["+Name", "-Age"]));
    assert!(same(&[], &["Name"]));
    assert!(!same(&[], &["Name", "Age"]));
    assert!(!same(&[], &["Name", "-Age", "City"]));
    assert!(!same(&[], &["-Age"]));

    assert!(reverse(&[], &["-Name", "Age"]));
    assert!(reverse(&[], &["-Name"]));
    assert!(!reverse(&[], &["-Name", "-Age"]));
    assert!(!reverse(&[], &["Name", "-Age"]));

    // Constant fields drop out on both sides, in any order.
    assert!(same(&["Name"], &["-Age"]));
    assert!(reverse(&["Name"], &["Age"]));
    assert!(same(&["Age"], &["Name"]));
    assert!(same(&["Name"], &["Name", "-Age"]));
    assert!(same(&["Age", "Name"], &[]));
    assert!(!same(&["Name"], &["Age"]));

    assert_eq!(
        guard.find_best_index(&["Name"], &["Age"]),
        Some(("name-age", ScanDirection::Backward))
    );
    assert_eq!(
        guard.find_best_index(&[], &["City"]),
        Some(("city", ScanDirection::Forward))
    );
    assert_eq!(guard.find_best_index(&[], &["Age"]), None);
}

#[tokio::test]
async fn test_matched_order_holds_on_real_scan() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![index("name-age", &["Name", "-Age"])]);
    {
        let mut guard = collection.begin_write().await.expect("write lock");
        insert_all(&mut guard, &shuffled(120, 17), |id| {
            let name = if id % 2 == 0 { "a" } else { "b" };
            person(id, name, Some(i64::try_from((id * 37) % 50).expect("small")))
        });
    }

    let guard = collection.begin_read().await.expect("read lock");
    let mut cursor = guard.cursor::<Person>(Some("name-age")).expect("cursor");

    let mut forward = Vec::new();
    while cursor.move_next(&guard).expect("move") {
        let p = cursor.current().expect("current").expect("found");
        forward.push((p.name.clone(), p.age));
    }
    // Name ascending, then age descending within a name.
    assert!(forward.windows(2).all(|w| {
        w[0].0 < w[1].0 || (w[0].0 == w[1].0 && w[0].1 >= w[1].1)
    }));

    cursor.reset();
    let mut backward = Vec::new();
    while cursor.move_previous(&guard).expect("move") {
        let p = cursor.current().expect("current").expect("found");
        backward.push((p.name.clone(), p.age));
    }
    // Reverse scan yields (-Name, Age).
    assert!(backward.windows(2).all(|w| {
        w[0].0 > w[1].0 || (w[0].0 == w[1].0 && w[0].1 <= w[1].1)
    }));
}
