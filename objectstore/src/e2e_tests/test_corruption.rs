//! Test that damaged files are reported as structural errors.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::e2e_tests::helpers::*;
use crate::storage::page::PAGE_SIZE_U64;
use crate::testing::{Person, person};
use crate::types::ObjectId;
use tempfile::tempdir;

/// Flip one byte at `offset`.
fn flip_byte(path: &Path, offset: u64) {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .expect("open file");
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(offset)).expect("seek");
    file.read_exact(&mut byte).expect("read");
    byte[0] ^= 0x5A;
    file.seek(SeekFrom::Start(offset)).expect("seek");
    file.write_all(&byte).expect("write");
}

async fn populate(dir: &Path) {
    let collection = open_collection(dir, vec![index("by-name", &["Name"])]);
    let mut guard = collection.begin_write().await.expect("write lock");
    insert_all(&mut guard, &shuffled(10, 3), |id| person(id, &format!("n{id}"), None));
    guard.sync().expect("sync");
}

#[tokio::test]
async fn test_damaged_primary_block_is_structural() {
    let dir = tempdir().expect("create temp dir");
    populate(dir.path()).await;

    // Block 1 holds the root leaf of the small primary tree.
    flip_byte(&dir.path().join("people.btree"), PAGE_SIZE_U64 + 4000);

    let err = try_open_collection(dir.path(), vec![index("by-name", &["Name"])])
        .err()
        .expect("damaged file");
    assert!(err.is_structural(), "{err}");
}

#[tokio::test]
async fn test_damaged_header_is_structural() {
    let dir = tempdir().expect("create temp dir");
    populate(dir.path()).await;
    flip_byte(&dir.path().join("people.btree"), 0);

    let err = try_open_collection(dir.path(), vec![])
        .err()
        .expect("damaged header");
    assert!(err.is_structural(), "{err}");
}

#[tokio::test]
async fn test_damaged_index_is_rebuilt() {
    let dir = tempdir().expect("create temp dir");
    populate(dir.path()).await;
    flip_byte(&dir.path().join("people.by-name.index"), PAGE_SIZE_U64 + 100);

    let collection = open_collection(dir.path(), vec![index("by-name", &["Name"])]);
    let guard = collection.begin_read().await.expect("read lock");
    let mut cursor = guard.cursor::<Person>(Some("by-name")).expect("cursor");
    let order = drain_forward(&mut cursor, &guard).expect("forward");
    assert_eq!(order.len(), 10);
    assert_eq!(order[0], ObjectId::from_u128(0));
}

#[tokio::test]
async fn test_truncated_file_is_structural() {
    let dir = tempdir().expect("create temp dir");
    populate(dir.path()).await;

    let path = dir.path().join("people.btree");
    let file = OpenOptions::new().write(true).open(&path).expect("open");
    file.set_len(PAGE_SIZE_U64 + 10).expect("truncate");
    drop(file);

    let err = try_open_collection(dir.path(), vec![])
        .err()
        .expect("truncated file");
    assert!(err.is_structural(), "{err}");
}
