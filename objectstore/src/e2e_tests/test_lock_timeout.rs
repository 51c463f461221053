//! Test lock acquisition timeouts.

use crate::e2e_tests::helpers::*;
use crate::error::StoreError;
use crate::testing::person;
use crate::types::ObjectId;
use tempfile::tempdir;

#[tokio::test]
async fn test_writer_blocks_readers_and_writers_until_timeout() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![]);

    let mut held = collection.begin_write().await.expect("write lock");
    held.insert(ObjectId::from_u128(1), &person(1, "ada", None))
        .expect("insert");

    let err = collection.begin_read().await.err().expect("read times out");
    assert!(matches!(
        err,
        StoreError::LockTimeout { exclusive: false, ref collection, .. } if collection == COLLECTION
    ));
    let err = collection.begin_write().await.err().expect("write times out");
    assert!(matches!(err, StoreError::LockTimeout { exclusive: true, .. }));
    drop(held);

    let guard = collection.begin_read().await.expect("read lock after release");
    assert_eq!(guard.count().expect("count"), 1);
}

#[tokio::test]
async fn test_reader_blocks_writer_but_not_readers() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![]);

    let reader = collection.begin_read().await.expect("read lock");
    let err = collection.begin_write().await.err().expect("write times out");
    assert!(matches!(err, StoreError::LockTimeout { exclusive: true, .. }));

    // The abandoned writer does not hold up later readers.
    let second = collection.begin_read().await.expect("second read lock");
    drop((reader, second));

    let mut writer = collection.begin_write().await.expect("write lock");
    writer
        .insert(ObjectId::from_u128(2), &person(2, "bob", None))
        .expect("insert");
    assert_eq!(writer.count().expect("count"), 1);
}
