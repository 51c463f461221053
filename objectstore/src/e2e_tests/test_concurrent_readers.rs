//! Test that readers run concurrently and each sees a consistent tree.

use std::time::Duration;

use crate::e2e_tests::helpers::*;
use crate::error::StoreError;
use crate::testing::{Person, person};
use crate::types::ObjectId;
use tempfile::tempdir;

fn name_of(id: u128) -> String {
    format!("c{:04}", (id * 31) % 1000)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_readers_see_identical_order() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![index("by-name", &["Name"])]);
    {
        let mut guard = collection.begin_write().await.expect("write lock");
        insert_all(&mut guard, &shuffled(1000, 99), |id| person(id, &name_of(id), None));
    }

    let expected = {
        let guard = collection.begin_read().await.expect("read lock");
        let mut cursor = guard.cursor::<Person>(Some("by-name")).expect("cursor");
        drain_forward(&mut cursor, &guard).expect("forward")
    };

    let readers = (0..8).map(|reader| {
        let collection = collection.clone();
        tokio::spawn(async move {
            let guard = collection.begin_read().await?;
            let mut cursor = guard.cursor::<Person>(Some("by-name"))?;
            if reader % 2 == 0 {
                drain_forward(&mut cursor, &guard)
            } else {
                let mut ids = drain_backward(&mut cursor, &guard)?;
                ids.reverse();
                Ok(ids)
            }
        })
    });

    for result in futures::future::join_all(readers).await {
        let ids = result.expect("reader task").expect("reader");
        assert_eq!(ids, expected);
    }
}

#[tokio::test]
async fn test_two_read_guards_at_once() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![]);

    let first = collection.begin_read().await.expect("read lock");
    let second = collection.begin_read().await.expect("second read lock");
    assert_eq!(first.count().expect("count"), second.count().expect("count"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_interleaved_with_writer() {
    let dir = tempdir().expect("create temp dir");
    let collection = open_collection(dir.path(), vec![index("by-name", &["Name"])]);
    {
        let mut guard = collection.begin_write().await.expect("write lock");
        insert_all(&mut guard, &shuffled(300, 5), |id| person(id, &name_of(id), None));
    }

    let writer = {
        let collection = collection.clone();
        tokio::spawn(async move {
            for id in 300..400u128 {
                let mut guard = collection.begin_write().await?;
                guard.insert(ObjectId::from_u128(id), &person(id, &name_of(id), None))?;
                drop(guard);
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            Ok::<_, StoreError>(())
        })
    };

    let readers = (0..4).map(|_| {
        let collection = collection.clone();
        tokio::spawn(async move {
            for _ in 0..10 {
                let guard = collection.begin_read().await?;
                let mut cursor = guard.cursor::<Person>(Some("by-name"))?;
                let mut names = Vec::new();
                while cursor.move_next(&guard)? {
                    let person = cursor.current()?.ok_or(StoreError::NotStarted)?;
                    names.push(person.name.clone());
                }
                // Within one guard the snapshot is complete and ordered.
                assert_eq!(names.len() as u64, guard.count()?);
                assert!(names.windows(2).all(|w| w[0] <= w[1]));
                drop(guard);
                tokio::task::yield_now().await;
            }
            Ok::<_, StoreError>(())
        })
    });

    for result in futures::future::join_all(readers).await {
        result.expect("reader task").expect("reader");
    }
    writer.await.expect("writer task").expect("writer");

    let guard = collection.begin_read().await.expect("read lock");
    assert_eq!(guard.count().expect("count"), 400);
}
