//! Common helpers for end-to-end tests.

use std::path::Path;
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::collection::ObjectFile;
use crate::cursor::FileCursor;
use crate::error::StoreError;
use crate::index::IndexDefinition;
use crate::lock::{Locked, WriteGuard};
use crate::serializer::ObjectSerializer;
use crate::testing::{TestObject, TestSerializer, test_config};
use crate::types::ObjectId;

pub const COLLECTION: &str = "people";

/// Parse an index declaration, panicking on invalid input.
#[must_use]
pub fn index(name: &str, fields: &[&str]) -> IndexDefinition {
    #[allow(clippy::expect_used)]
    let definition = IndexDefinition::new(name, fields).expect("valid index declaration");
    definition
}

/// Open (or reopen) the test collection under `dir`.
#[must_use]
pub fn open_collection(dir: &Path, indexes: Vec<IndexDefinition>) -> ObjectFile<TestSerializer> {
    #[allow(clippy::expect_used)]
    let collection = try_open_collection(dir, indexes).expect("open collection");
    collection
}

/// Open the test collection under `dir`, returning any error.
pub fn try_open_collection(
    dir: &Path,
    indexes: Vec<IndexDefinition>,
) -> Result<ObjectFile<TestSerializer>, StoreError> {
    ObjectFile::open(&test_config(dir), COLLECTION, indexes, Arc::new(TestSerializer))
}

/// `0..n` in an order fixed by `seed`.
#[must_use]
pub fn shuffled(n: u128, seed: u64) -> Vec<u128> {
    let mut ids: Vec<u128> = (0..n).collect();
    ids.shuffle(&mut StdRng::seed_from_u64(seed));
    ids
}

/// Insert objects built by `make`, one per id, in the given order.
pub fn insert_all(
    guard: &mut WriteGuard<TestSerializer>,
    ids: &[u128],
    make: impl Fn(u128) -> TestObject,
) {
    for &id in ids {
        #[allow(clippy::expect_used)]
        guard
            .insert(ObjectId::from_u128(id), &make(id))
            .expect("insert");
    }
}

/// Object ids of every remaining entry, moving forward.
pub fn drain_forward<T, S>(
    cursor: &mut FileCursor<T, S>,
    guard: &impl Locked<S>,
) -> Result<Vec<ObjectId>, StoreError>
where
    S: ObjectSerializer,
    T: TryFrom<S::Object>,
{
    let mut ids = Vec::new();
    while cursor.move_next(guard)? {
        ids.push(cursor.current_object_id()?);
    }
    Ok(ids)
}

/// Object ids of every remaining entry, moving backward.
pub fn drain_backward<T, S>(
    cursor: &mut FileCursor<T, S>,
    guard: &impl Locked<S>,
) -> Result<Vec<ObjectId>, StoreError>
where
    S: ObjectSerializer,
    T: TryFrom<S::Object>,
{
    let mut ids = Vec::new();
    while cursor.move_previous(guard)? {
        ids.push(cursor.current_object_id()?);
    }
    Ok(ids)
}

/// Ids from integers.
#[must_use]
pub fn ids(values: &[u128]) -> Vec<ObjectId> {
    values.iter().copied().map(ObjectId::from_u128).collect()
}
