//! Test that index files are rebuilt when they cannot be trusted.

use std::path::Path;

use crate::e2e_tests::helpers::*;
use crate::index::IndexBTreeFile;
use crate::testing::{Person, person};
use crate::types::ObjectId;
use tempfile::tempdir;

fn name_of(id: u128) -> String {
    format!("r{:03}", 99 - id)
}

async fn populate(dir: &Path) {
    let collection = open_collection(dir, vec![index("by-name", &["Name"])]);
    let mut guard = collection.begin_write().await.expect("write lock");
    insert_all(&mut guard, &shuffled(100, 31), |id| person(id, &name_of(id), Some(1)));
    guard.sync().expect("sync");
}

async fn names_in_index_order(
    dir: &Path,
    definition: crate::index::IndexDefinition,
) -> Vec<ObjectId> {
    let name = definition.name.clone();
    let collection = open_collection(dir, vec![definition]);
    let guard = collection.begin_read().await.expect("read lock");
    let mut cursor = guard.cursor::<Person>(Some(&name)).expect("cursor");
    drain_forward(&mut cursor, &guard).expect("forward")
}

#[tokio::test]
async fn test_changed_declaration_rebuilds_index() {
    let dir = tempdir().expect("create temp dir");
    populate(dir.path()).await;

    // Same index name, opposite direction.
    let order = names_in_index_order(dir.path(), index("by-name", &["-Name"])).await;
    let expected: Vec<u128> = (0..100).collect();
    assert_eq!(order, ids(&expected));

    let stored = IndexBTreeFile::open(&dir.path().join("people.by-name.index"), 8)
        .expect("open index");
    assert_eq!(stored.definition(), &index("by-name", &["-Name"]));
}

#[tokio::test]
async fn test_missing_index_file_is_rebuilt() {
    let dir = tempdir().expect("create temp dir");
    populate(dir.path()).await;
    std::fs::remove_file(dir.path().join("people.by-name.index")).expect("remove index");

    let order = names_in_index_order(dir.path(), index("by-name", &["Name"])).await;
    let expected: Vec<u128> = (0..100).rev().collect();
    assert_eq!(order, ids(&expected));
}

#[tokio::test]
async fn test_out_of_step_index_is_rebuilt() {
    let dir = tempdir().expect("create temp dir");
    populate(dir.path()).await;
    {
        let collection = open_collection(dir.path(), vec![index("by-name", &["Name"])]);
        let mut guard = collection.begin_write().await.expect("write lock");
        guard
            .objects_mut()
            .delete(ObjectId::from_u128(50))
            .expect("delete behind the index");
        guard.sync().expect("sync");
    }

    let order = names_in_index_order(dir.path(), index("by-name", &["Name"])).await;
    assert_eq!(order.len(), 99);
    assert!(!order.contains(&ObjectId::from_u128(50)));
}

#[tokio::test]
async fn test_new_index_on_existing_collection() {
    let dir = tempdir().expect("create temp dir");
    populate(dir.path()).await;

    let collection = open_collection(
        dir.path(),
        vec![index("by-name", &["Name"]), index("by-age", &["Age", "-Name"])],
    );
    let guard = collection.begin_read().await.expect("read lock");
    assert_eq!(guard.index_names(), vec!["by-name", "by-age"]);
    let mut cursor = guard.cursor::<Person>(Some("by-age")).expect("cursor");
    let order = drain_forward(&mut cursor, &guard).expect("forward");
    let expected: Vec<u128> = (0..100).collect();
    assert_eq!(order, ids(&expected));
}
