//! A collection: one primary object file and its secondary indexes.
//!
//! All files of a collection share one reader/writer lock. Mutations go
//! through `WriteGuard`, reads and cursors through either guard. Every
//! mutation computes all index keys before it touches a file, so a refused
//! request leaves nothing behind.
//!
//! # File Layout
//!
//! - Primary file: `{directory}/{name}.btree`
//! - Index files: `{directory}/{name}.{index}.index`
//!
//! # Invariants
//!
//! - Every object has exactly one key in each index, unless its previous
//!   payload could not be deserialized during an update (the old key is then
//!   left behind as a stale entry until `remove_stale_index_entries`)
//! - Index keys never refer to an object that was deleted through the
//!   collection, unless its payload could not be deserialized at the time
//! - An object that reports its own id is stored under that id

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::RwLock;

use crate::config::StoreConfig;
use crate::cursor::FileCursor;
use crate::database::validate_collection_name;
use crate::error::StoreError;
use crate::index::{IndexBTreeFile, IndexDefinition, IndexError, ScanDirection};
use crate::lock::{ReadGuard, WriteGuard};
use crate::objects::ObjectBTreeFile;
use crate::serializer::ObjectSerializer;
use crate::storage::btree::RawCursor;
use crate::types::ObjectId;

/// Source of collection identities, checked by cursors against guards.
static NEXT_COLLECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to an open collection. Cheap to clone; clones share the lock.
pub struct ObjectFile<S: ObjectSerializer> {
    name: String,
    definitions: Arc<[IndexDefinition]>,
    state: Arc<RwLock<CollectionState<S>>>,
    lock_timeout: Duration,
}

impl<S: ObjectSerializer> Clone for ObjectFile<S> {
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            definitions: Arc::clone(&self.definitions),
            state: Arc::clone(&self.state),
            lock_timeout: self.lock_timeout,
        }
    }
}

impl<S: ObjectSerializer> ObjectFile<S> {
    /// Open a collection, creating missing files.
    ///
    /// Each declared index is opened and checked against its declaration. An
    /// index that is missing, damaged, declared differently, or out of step
    /// with the primary file is rebuilt from the primary file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The collection name is invalid
    /// - Two indexes share a name
    /// - The primary file is damaged or cannot be opened
    pub fn open(
        config: &StoreConfig,
        name: &str,
        indexes: Vec<IndexDefinition>,
        serializer: Arc<S>,
    ) -> Result<Self, StoreError> {
        validate_collection_name(name)?;

        let mut seen = HashSet::new();
        for definition in &indexes {
            if !seen.insert(definition.name.as_str()) {
                return Err(IndexError::DuplicateIndex(definition.name.clone()).into());
            }
        }

        std::fs::create_dir_all(&config.directory)?;

        let primary_path = objects_path(&config.directory, name);
        let objects = ObjectBTreeFile::open_or_create(&primary_path, config.cache_blocks)?;

        let mut index_files = Vec::with_capacity(indexes.len());
        for definition in &indexes {
            let path = index_path(&config.directory, name, &definition.name);
            let index = open_index(&path, definition, &objects, &*serializer, config.cache_blocks)?;
            index_files.push(index);
        }

        let state = CollectionState {
            id: NEXT_COLLECTION_ID.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            serializer,
            objects,
            indexes: index_files,
        };

        tracing::info!(
            "Opened collection '{}' with {} objects and {} indexes",
            name,
            state.count()?,
            indexes.len()
        );

        Ok(Self {
            name: name.to_string(),
            definitions: indexes.into(),
            state: Arc::new(RwLock::new(state)),
            lock_timeout: config.lock_timeout,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index declarations this collection was opened with.
    #[must_use]
    pub fn definitions(&self) -> &[IndexDefinition] {
        &self.definitions
    }

    /// Acquire shared access.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if the lock is not granted within the configured
    /// timeout.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub async fn begin_read(&self) -> Result<ReadGuard<S>, StoreError> {
        let state = Arc::clone(&self.state);
        match tokio::time::timeout(self.lock_timeout, state.read_owned()).await {
            Ok(guard) => Ok(ReadGuard::new(guard)),
            Err(_) => Err(self.lock_timeout_error(false)),
        }
    }

    /// Acquire exclusive access.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if the lock is not granted within the configured
    /// timeout.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub async fn begin_write(&self) -> Result<WriteGuard<S>, StoreError> {
        let state = Arc::clone(&self.state);
        match tokio::time::timeout(self.lock_timeout, state.write_owned()).await {
            Ok(guard) => Ok(WriteGuard::new(guard)),
            Err(_) => Err(self.lock_timeout_error(true)),
        }
    }

    fn lock_timeout_error(&self, exclusive: bool) -> StoreError {
        tracing::warn!(
            "{} lock on collection '{}' timed out after {:?}",
            if exclusive { "Write" } else { "Read" },
            self.name,
            self.lock_timeout
        );
        StoreError::LockTimeout {
            collection: self.name.clone(),
            timeout: self.lock_timeout,
            exclusive,
        }
    }
}

/// The files of a collection. Only reachable through a lock guard.
pub struct CollectionState<S: ObjectSerializer> {
    id: u64,
    name: String,
    serializer: Arc<S>,
    objects: ObjectBTreeFile,
    indexes: Vec<IndexBTreeFile>,
}

impl<S: ObjectSerializer> CollectionState<S> {
    /// Process-unique identity of the collection.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    /// The primary object file.
    #[must_use]
    pub const fn objects(&self) -> &ObjectBTreeFile {
        &self.objects
    }

    /// An index by name.
    #[must_use]
    pub fn index(&self, name: &str) -> Option<&IndexBTreeFile> {
        self.indexes.iter().find(|index| index.name() == name)
    }

    pub(crate) fn index_at(&self, position: usize) -> Result<&IndexBTreeFile, StoreError> {
        self.indexes
            .get(position)
            .ok_or_else(|| StoreError::UnknownIndex(format!("#{position}")))
    }

    /// Names of the indexes, in declaration order.
    #[must_use]
    pub fn index_names(&self) -> Vec<&str> {
        self.indexes.iter().map(IndexBTreeFile::name).collect()
    }

    /// Number of stored objects.
    pub fn count(&self) -> Result<u64, StoreError> {
        self.objects.count()
    }

    pub fn contains(&self, id: ObjectId) -> Result<bool, StoreError> {
        self.objects.contains(id)
    }

    /// Load an object. An absent id is `Ok(None)`.
    pub fn try_load(&self, id: ObjectId) -> Result<Option<S::Object>, StoreError> {
        self.objects.try_load_object(id, &*self.serializer)
    }

    /// Store a new object and its index keys.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` (and changes nothing) if the id exists,
    /// `ObjectIdMismatch` if the object carries another id, or `KeyTooLarge`
    /// if an index key of the object does not fit.
    pub fn insert(&mut self, id: ObjectId, object: &S::Object) -> Result<(), StoreError> {
        self.check_object_id(id, object)?;
        let payload = self.serializer.serialize(object)?;
        let keys = self.index_keys(id, object)?;

        self.objects.insert(id, &payload)?;
        for (index, key) in self.indexes.iter_mut().zip(&keys) {
            index.insert_key(key)?;
        }

        tracing::trace!("Inserted {} into '{}'", id, self.name);
        Ok(())
    }

    /// Replace an object. Returns false (and changes nothing) if the id is
    /// absent. Index keys whose values changed are moved.
    pub fn update(&mut self, id: ObjectId, object: &S::Object) -> Result<bool, StoreError> {
        self.check_object_id(id, object)?;
        let payload = self.serializer.serialize(object)?;
        let new_keys = self.index_keys(id, object)?;

        let Some(old_payload) = self.objects.load(id)? else {
            return Ok(false);
        };
        let old_keys = match self.serializer.deserialize(&old_payload) {
            Ok(old) => Some(self.index_keys(id, &old)?),
            Err(e) => {
                tracing::warn!(
                    "Previous payload of {} in '{}' is unreadable ({}); its index entries are left stale",
                    id,
                    self.name,
                    e
                );
                None
            }
        };

        self.objects.update(id, &payload)?;
        for (position, (index, new_key)) in self.indexes.iter_mut().zip(&new_keys).enumerate() {
            let old_key = old_keys.as_ref().map(|keys| &keys[position]);
            if old_key == Some(new_key) {
                continue;
            }
            if let Some(old_key) = old_key {
                index.remove_key(old_key)?;
            }
            index.insert_key(new_key)?;
        }

        tracing::trace!("Updated {} in '{}'", id, self.name);
        Ok(true)
    }

    /// Remove an object and its index keys. Returns the removed object, or
    /// `None` if the id is absent or its payload could not be read. In the
    /// latter case the object's index entries are left stale.
    pub fn delete(&mut self, id: ObjectId) -> Result<Option<S::Object>, StoreError> {
        let Some(payload) = self.objects.load(id)? else {
            return Ok(None);
        };
        let object = match self.serializer.deserialize(&payload) {
            Ok(object) => object,
            Err(e) => {
                self.objects.delete(id)?;
                tracing::warn!(
                    "Deleted unreadable object {} from '{}' ({}); its index entries are left stale",
                    id,
                    self.name,
                    e
                );
                return Ok(None);
            }
        };
        let keys = self.index_keys(id, &object)?;

        self.objects.delete(id)?;
        for (index, key) in self.indexes.iter_mut().zip(&keys) {
            if !index.remove_key(key)? {
                tracing::debug!("Index {} had no entry for {}", index.name(), id);
            }
        }

        tracing::trace!("Deleted {} from '{}'", id, self.name);
        Ok(Some(object))
    }

    /// An object that knows its own id must be stored under it; pagination
    /// boundaries are built from that id.
    fn check_object_id(&self, id: ObjectId, object: &S::Object) -> Result<(), StoreError> {
        match self.serializer.object_id(object) {
            Some(own) if own != id => Err(StoreError::ObjectIdMismatch {
                key: id,
                object: own,
            }),
            _ => Ok(()),
        }
    }

    fn index_keys(&self, id: ObjectId, object: &S::Object) -> Result<Vec<Vec<u8>>, StoreError> {
        self.indexes
            .iter()
            .map(|index| index.key_for(id, object, &*self.serializer))
            .collect()
    }

    /// True if scanning the named index forward yields `sort_order`.
    pub fn same_sort_order(
        &self,
        index: &str,
        constant_fields: &[&str],
        sort_order: &[&str],
    ) -> Result<bool, StoreError> {
        Ok(self
            .named_index(index)?
            .definition()
            .same_sort_order(constant_fields, sort_order))
    }

    /// True if scanning the named index backward yields `sort_order`.
    pub fn reverse_sort_order(
        &self,
        index: &str,
        constant_fields: &[&str],
        sort_order: &[&str],
    ) -> Result<bool, StoreError> {
        Ok(self
            .named_index(index)?
            .definition()
            .reverse_sort_order(constant_fields, sort_order))
    }

    /// The first index (in declaration order) that yields `sort_order`
    /// forward, else the first that yields it backward.
    #[must_use]
    pub fn find_best_index(
        &self,
        constant_fields: &[&str],
        sort_order: &[&str],
    ) -> Option<(&str, ScanDirection)> {
        let candidates: Vec<(&str, ScanDirection)> = self
            .indexes
            .iter()
            .filter_map(|index| {
                index
                    .definition()
                    .scan_direction(constant_fields, sort_order)
                    .map(|direction| (index.name(), direction))
            })
            .collect();
        candidates
            .iter()
            .find(|(_, direction)| *direction == ScanDirection::Forward)
            .or_else(|| candidates.first())
            .copied()
    }

    fn named_index(&self, name: &str) -> Result<&IndexBTreeFile, StoreError> {
        self.index(name)
            .ok_or_else(|| StoreError::UnknownIndex(name.to_string()))
    }

    /// A cursor over the primary file (`None`) or the named index, yielding
    /// objects of type `T`.
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    pub fn cursor<T>(&self, index: Option<&str>) -> Result<FileCursor<T, S>, StoreError>
    where
        T: TryFrom<S::Object>,
    {
        let position = match index {
            None => None,
            Some(name) => Some(
                self.indexes
                    .iter()
                    .position(|i| i.name() == name)
                    .ok_or_else(|| StoreError::UnknownIndex(name.to_string()))?,
            ),
        };
        Ok(FileCursor::new(
            self.id,
            position,
            Arc::clone(&self.serializer),
        ))
    }

    /// Remove index entries whose object is gone or no longer produces that
    /// key. Returns the number of entries removed.
    pub fn remove_stale_index_entries(&mut self) -> Result<u64, StoreError> {
        let mut removed = 0u64;
        for index in &mut self.indexes {
            let stale = stale_keys(index, &self.objects, &*self.serializer)?;
            for key in &stale {
                index.remove_key(key)?;
            }
            if !stale.is_empty() {
                tracing::info!(
                    "Removed {} stale entries from index {} of '{}'",
                    stale.len(),
                    index.name(),
                    self.name
                );
            }
            removed += stale.len() as u64;
        }
        Ok(removed)
    }

    /// Flush every file of the collection to disk.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        self.objects.sync()?;
        for index in &mut self.indexes {
            index.sync()?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) const fn objects_mut(&mut self) -> &mut ObjectBTreeFile {
        &mut self.objects
    }
}

fn objects_path(directory: &Path, collection: &str) -> PathBuf {
    directory.join(format!("{collection}.btree"))
}

fn index_path(directory: &Path, collection: &str, index: &str) -> PathBuf {
    directory.join(format!("{collection}.{index}.index"))
}

/// Open an index file, rebuilding it when it cannot be trusted.
fn open_index<S: ObjectSerializer>(
    path: &Path,
    definition: &IndexDefinition,
    objects: &ObjectBTreeFile,
    serializer: &S,
    cache_blocks: usize,
) -> Result<IndexBTreeFile, StoreError> {
    if !path.exists() {
        tracing::info!("Creating index {}", definition);
        return rebuild_index(path, definition, objects, serializer, cache_blocks);
    }

    match IndexBTreeFile::open(path, cache_blocks) {
        Ok(index) if index.definition() != definition => {
            tracing::warn!(
                "Index file {} was built for {}, declared as {}; rebuilding",
                path.display(),
                index.definition(),
                definition
            );
            drop(index);
            rebuild_index(path, definition, objects, serializer, cache_blocks)
        }
        Ok(index) => {
            let stored = objects.count()?;
            match index.count() {
                Ok(indexed) if indexed == stored => return Ok(index),
                Ok(indexed) => tracing::warn!(
                    "Index {} holds {} entries for {} objects; rebuilding",
                    definition,
                    indexed,
                    stored
                ),
                Err(e) if e.is_structural() => tracing::warn!(
                    "Index file {} is damaged ({}); rebuilding",
                    path.display(),
                    e
                ),
                Err(e) => return Err(e),
            }
            drop(index);
            rebuild_index(path, definition, objects, serializer, cache_blocks)
        }
        Err(e) if e.is_structural() => {
            tracing::warn!("Index file {} is damaged ({}); rebuilding", path.display(), e);
            rebuild_index(path, definition, objects, serializer, cache_blocks)
        }
        Err(e) => Err(e),
    }
}

/// Replace the index file with one regenerated from the primary file.
fn rebuild_index<S: ObjectSerializer>(
    path: &Path,
    definition: &IndexDefinition,
    objects: &ObjectBTreeFile,
    serializer: &S,
    cache_blocks: usize,
) -> Result<IndexBTreeFile, StoreError> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    let mut index = IndexBTreeFile::create(path, definition.clone(), cache_blocks)?;

    let tree = objects.tree();
    let mut cursor = RawCursor::new();
    let mut indexed = 0u64;
    let mut moved = cursor.go_to_first(tree)?;
    while moved {
        let (Some(key), Some(payload)) = (cursor.key(), cursor.value(tree)?) else {
            return Err(StoreError::corruption(format!(
                "cursor over {} stopped on no entry",
                path.display()
            )));
        };
        let id = ObjectBTreeFile::object_id_of(key)?;
        match serializer.deserialize(&payload) {
            Ok(object) => {
                let key = index.key_for(id, &object, serializer)?;
                index.insert_key(&key)?;
                indexed += 1;
            }
            Err(e) => tracing::warn!("Skipping {} while building {}: {}", id, definition, e),
        }
        moved = cursor.move_next(tree)?;
    }
    index.sync()?;

    tracing::info!("Built index {} with {} entries", definition, indexed);
    Ok(index)
}

/// Keys of an index that do not match the current state of their object.
fn stale_keys<S: ObjectSerializer>(
    index: &IndexBTreeFile,
    objects: &ObjectBTreeFile,
    serializer: &S,
) -> Result<Vec<Vec<u8>>, StoreError> {
    let tree = index.tree();
    let mut cursor = RawCursor::new();
    let mut stale = Vec::new();
    while cursor.move_next(tree)? {
        let Some(key) = cursor.key() else { break };
        let id = index.object_id_of(key)?;
        let current = match objects.load(id)? {
            None => None,
            Some(payload) => match serializer.deserialize(&payload) {
                Ok(object) => Some(index.key_for(id, &object, serializer)?),
                // Unreadable payloads keep their entries; nothing to compare against.
                Err(_) => continue,
            },
        };
        if current.as_deref() != Some(key) {
            tracing::debug!("Index {} entry for {} is stale", index.name(), id);
            stale.push(key.to_vec());
        }
    }
    Ok(stale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::Loaded;
    use crate::testing::{Person, TestObject, TestSerializer, label, person, test_config};
    use tempfile::tempdir;

    fn by_name() -> IndexDefinition {
        IndexDefinition::new("by-name", &["Name"]).expect("valid index")
    }

    fn by_age() -> IndexDefinition {
        IndexDefinition::new("by-age", &["-Age", "Name"]).expect("valid index")
    }

    fn open(dir: &Path, indexes: Vec<IndexDefinition>) -> ObjectFile<TestSerializer> {
        ObjectFile::open(
            &test_config(dir),
            "people",
            indexes,
            Arc::new(TestSerializer),
        )
        .expect("open collection")
    }

    #[tokio::test]
    async fn test_insert_update_delete_keep_indexes_in_step() {
        let dir = tempdir().expect("create temp dir");
        let collection = open(dir.path(), vec![by_name(), by_age()]);
        let mut guard = collection.begin_write().await.expect("write lock");

        guard.insert(ObjectId::from_u128(1), &person(1, "ada", Some(36))).expect("insert");
        guard.insert(ObjectId::from_u128(2), &person(2, "bob", Some(41))).expect("insert");

        assert!(guard
            .update(ObjectId::from_u128(1), &person(1, "alice", Some(36)))
            .expect("update"));
        assert!(!guard
            .update(ObjectId::from_u128(9), &person(9, "nobody", None))
            .expect("update missing"));

        for name in ["by-name", "by-age"] {
            let index = guard.index(name).expect("index exists");
            assert_eq!(index.count().expect("count"), 2);
        }

        let removed = guard.delete(ObjectId::from_u128(2)).expect("delete");
        assert!(matches!(removed, Some(TestObject::Person(p)) if p.name == "bob"));
        assert_eq!(guard.delete(ObjectId::from_u128(2)).expect("delete again"), None);

        assert_eq!(guard.count().expect("count"), 1);
        assert_eq!(guard.index("by-name").expect("index").count().expect("count"), 1);
        assert_eq!(guard.remove_stale_index_entries().expect("purge"), 0);
    }

    #[tokio::test]
    async fn test_rejected_insert_changes_nothing() {
        let dir = tempdir().expect("create temp dir");
        let collection = open(dir.path(), vec![by_name()]);
        let mut guard = collection.begin_write().await.expect("write lock");
        let id = ObjectId::from_u128(7);

        guard.insert(id, &person(7, "ada", None)).expect("insert");
        let err = guard.insert(id, &person(7, "eve", None)).expect_err("duplicate");
        assert!(matches!(err, StoreError::DuplicateKey(dup) if dup == id));

        let huge = "x".repeat(4000);
        let err = guard
            .insert(ObjectId::from_u128(8), &person(8, &huge, None))
            .expect_err("key too large");
        assert!(matches!(err, StoreError::KeyTooLarge { .. }));

        assert_eq!(guard.count().expect("count"), 1);
        assert_eq!(guard.index("by-name").expect("index").count().expect("count"), 1);
        let loaded = guard.try_load(id).expect("load");
        assert!(matches!(loaded, Some(TestObject::Person(p)) if p.name == "ada"));
    }

    #[tokio::test]
    async fn test_object_must_be_stored_under_its_own_id() {
        let dir = tempdir().expect("create temp dir");
        let collection = open(dir.path(), vec![by_name()]);
        let mut guard = collection.begin_write().await.expect("write lock");
        let id = ObjectId::from_u128(3);

        let err = guard
            .insert(id, &person(4, "ada", None))
            .expect_err("mismatched insert");
        assert!(matches!(
            err,
            StoreError::ObjectIdMismatch { key, object }
                if key == id && object == ObjectId::from_u128(4)
        ));
        assert_eq!(guard.count().expect("count"), 0);
        assert_eq!(guard.index("by-name").expect("index").count().expect("count"), 0);

        guard.insert(id, &person(3, "ada", None)).expect("insert");
        let err = guard
            .update(id, &person(5, "bob", None))
            .expect_err("mismatched update");
        assert!(matches!(err, StoreError::ObjectIdMismatch { .. }));
        let loaded = guard.try_load(id).expect("load");
        assert!(matches!(loaded, Some(TestObject::Person(p)) if p.name == "ada"));

        // Objects without an id of their own go under any key.
        guard
            .insert(ObjectId::from_u128(9), &label("note"))
            .expect("insert label");
        assert_eq!(guard.count().expect("count"), 2);
    }

    #[tokio::test]
    async fn test_index_created_for_existing_objects() {
        let dir = tempdir().expect("create temp dir");
        {
            let collection = open(dir.path(), vec![]);
            let mut guard = collection.begin_write().await.expect("write lock");
            for i in 0..50u128 {
                guard
                    .insert(ObjectId::from_u128(i), &person(i, &format!("p{i:02}"), None))
                    .expect("insert");
            }
            guard.sync().expect("sync");
        }

        let collection = open(dir.path(), vec![by_name()]);
        let guard = collection.begin_read().await.expect("read lock");
        assert_eq!(guard.index("by-name").expect("index").count().expect("count"), 50);

        let mut cursor = guard.cursor::<Person>(Some("by-name")).expect("cursor");
        assert!(cursor.go_to_first(&guard).expect("first"));
        assert_eq!(cursor.current().expect("current").map(|p| p.name.as_str()), Some("p00"));
    }

    #[tokio::test]
    async fn test_stale_entries_purged() {
        let dir = tempdir().expect("create temp dir");
        let collection = open(dir.path(), vec![by_name()]);
        let mut guard = collection.begin_write().await.expect("write lock");

        for i in 0..5u128 {
            guard
                .insert(ObjectId::from_u128(i), &person(i, &format!("p{i}"), None))
                .expect("insert");
        }
        // Bypass the façade so the index keeps entries for removed objects.
        guard.objects_mut().delete(ObjectId::from_u128(1)).expect("delete");
        guard.objects_mut().delete(ObjectId::from_u128(3)).expect("delete");

        let mut cursor = guard.cursor::<Person>(Some("by-name")).expect("cursor");
        let mut outcomes = Vec::new();
        while cursor.move_next(&guard).expect("move") {
            outcomes.push(cursor.current_loaded().expect("loaded").is_found());
        }
        assert_eq!(outcomes, vec![true, false, true, false, true]);
        assert!(matches!(cursor.current_loaded(), Err(StoreError::NotStarted)));

        assert_eq!(guard.remove_stale_index_entries().expect("purge"), 2);
        assert_eq!(guard.index("by-name").expect("index").count().expect("count"), 3);
        drop(cursor);

        let mut cursor = guard.cursor::<Person>(Some("by-name")).expect("cursor");
        assert!(cursor.go_to_first(&guard).expect("first"));
        assert!(matches!(cursor.current_loaded().expect("loaded"), Loaded::Found(_)));
    }

    #[tokio::test]
    async fn test_best_index_prefers_forward_scan() {
        let dir = tempdir().expect("create temp dir");
        let collection = open(dir.path(), vec![by_name(), by_age()]);
        let guard = collection.begin_read().await.expect("read lock");

        assert_eq!(
            guard.find_best_index(&[], &["Name"]),
            Some(("by-name", ScanDirection::Forward))
        );
        assert_eq!(
            guard.find_best_index(&[], &["-Name"]),
            Some(("by-name", ScanDirection::Backward))
        );
        assert_eq!(
            guard.find_best_index(&["Age"], &["Name"]),
            Some(("by-name", ScanDirection::Forward))
        );
        assert_eq!(
            guard.find_best_index(&[], &["Age"]),
            Some(("by-age", ScanDirection::Backward))
        );
        assert_eq!(guard.find_best_index(&[], &["City"]), None);

        assert!(guard.same_sort_order("by-age", &[], &["-Age"]).expect("known index"));
        assert!(guard.reverse_sort_order("by-age", &[], &["Age", "-Name"]).expect("known index"));
        assert!(matches!(
            guard.same_sort_order("by-city", &[], &["City"]),
            Err(StoreError::UnknownIndex(_))
        ));
    }

    #[test]
    fn test_invalid_declarations_rejected() {
        let dir = tempdir().expect("create temp dir");
        let config = test_config(dir.path());

        let err = ObjectFile::open(&config, "../people", vec![], Arc::new(TestSerializer))
            .err()
            .expect("invalid name");
        assert!(matches!(err, StoreError::InvalidName(_)));

        let err = ObjectFile::open(
            &config,
            "people",
            vec![by_name(), by_name()],
            Arc::new(TestSerializer),
        )
        .err()
        .expect("duplicate index");
        assert!(matches!(
            err,
            StoreError::InvalidIndex(IndexError::DuplicateIndex(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_index_cursor() {
        let dir = tempdir().expect("create temp dir");
        let collection = open(dir.path(), vec![by_name()]);
        let guard = collection.begin_read().await.expect("read lock");
        assert!(matches!(
            guard.cursor::<Person>(Some("missing")),
            Err(StoreError::UnknownIndex(name)) if name == "missing"
        ));
    }
}
