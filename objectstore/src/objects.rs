//! Primary object file: object id -> serialized payload.

use std::path::Path;

use crate::error::StoreError;
use crate::serializer::ObjectSerializer;
use crate::storage::btree::{BTree, BTreeError};
use crate::storage::header::FileKind;
use crate::types::ObjectId;

/// A B+Tree keyed by the raw 16 bytes of the object id.
#[derive(Debug)]
pub struct ObjectBTreeFile {
    tree: BTree,
}

impl ObjectBTreeFile {
    /// Open the file at `path`, creating an empty one if it does not exist.
    pub fn open_or_create(path: &Path, cache_blocks: usize) -> Result<Self, StoreError> {
        let tree = if path.exists() {
            let tree = BTree::open(path, cache_blocks)?;
            if tree.header().kind != FileKind::Objects {
                return Err(StoreError::corruption(format!(
                    "{} is an {} file, expected an objects file",
                    path.display(),
                    tree.header().kind
                )));
            }
            tree
        } else {
            BTree::create(path, FileKind::Objects, Vec::new(), cache_blocks)?
        };
        Ok(Self { tree })
    }

    /// The underlying tree.
    #[must_use]
    pub const fn tree(&self) -> &BTree {
        &self.tree
    }

    /// Store a new object.
    ///
    /// Fails with `DuplicateKey` (and changes nothing) if the id exists.
    pub fn insert(&mut self, id: ObjectId, payload: &[u8]) -> Result<(), StoreError> {
        match self.tree.insert(id.as_bytes(), payload) {
            Err(BTreeError::DuplicateKey) => Err(StoreError::DuplicateKey(id)),
            other => Ok(other?),
        }
    }

    /// Replace the payload of an object. Returns the old payload, or `None`
    /// if the id is absent.
    pub fn update(&mut self, id: ObjectId, payload: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tree.update(id.as_bytes(), payload)?)
    }

    /// Remove an object. Returns its payload, or `None` if the id is absent.
    pub fn delete(&mut self, id: ObjectId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tree.remove(id.as_bytes())?)
    }

    /// Payload of an object, or `None` if the id is absent.
    pub fn load(&self, id: ObjectId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.tree.get(id.as_bytes())?)
    }

    /// Deserialized object, or `None` if the id is absent.
    pub fn try_load_object<S: ObjectSerializer>(
        &self,
        id: ObjectId,
        serializer: &S,
    ) -> Result<Option<S::Object>, StoreError> {
        self.load(id)?
            .map(|payload| serializer.deserialize(&payload))
            .transpose()
            .map_err(StoreError::from)
    }

    /// True if an object with this id exists.
    pub fn contains(&self, id: ObjectId) -> Result<bool, StoreError> {
        Ok(self.tree.contains(id.as_bytes())?)
    }

    /// Number of stored objects.
    pub fn count(&self) -> Result<u64, StoreError> {
        Ok(self.tree.len()?)
    }

    /// Object id stored under a raw key.
    pub fn object_id_of(key: &[u8]) -> Result<ObjectId, StoreError> {
        ObjectId::from_slice(key).ok_or_else(|| {
            StoreError::corruption(format!(
                "object file key of {} bytes is not an object id",
                key.len()
            ))
        })
    }

    /// Flush the header and sync the file to disk.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        Ok(self.tree.sync()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_insert_load_update_delete() {
        let dir = tempdir().expect("create temp dir");
        let mut file =
            ObjectBTreeFile::open_or_create(&dir.path().join("o.btree"), 32).expect("create");
        let id = ObjectId::from_u128(1);

        file.insert(id, b"one").expect("insert");
        assert_eq!(file.load(id).expect("load"), Some(b"one".to_vec()));
        assert!(file.contains(id).expect("contains"));

        assert_eq!(
            file.update(id, b"uno").expect("update"),
            Some(b"one".to_vec())
        );
        assert_eq!(file.load(id).expect("load"), Some(b"uno".to_vec()));

        assert_eq!(file.delete(id).expect("delete"), Some(b"uno".to_vec()));
        assert_eq!(file.load(id).expect("load"), None);
        assert_eq!(file.delete(id).expect("delete again"), None);
        assert_eq!(file.count().expect("count"), 0);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let dir = tempdir().expect("create temp dir");
        let mut file =
            ObjectBTreeFile::open_or_create(&dir.path().join("o.btree"), 32).expect("create");
        let id = ObjectId::from_u128(9);

        file.insert(id, b"first").expect("insert");
        let err = file.insert(id, b"second").expect_err("duplicate");
        assert!(matches!(err, StoreError::DuplicateKey(dup) if dup == id));
        assert_eq!(file.load(id).expect("load"), Some(b"first".to_vec()));
    }

    #[test]
    fn test_large_payload_roundtrip() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("o.btree");
        let payload: Vec<u8> = (0..50_000u32).map(|i| (i % 13) as u8).collect();

        {
            let mut file = ObjectBTreeFile::open_or_create(&path, 32).expect("create");
            file.insert(ObjectId::from_u128(5), &payload).expect("insert");
            file.sync().expect("sync");
        }

        let file = ObjectBTreeFile::open_or_create(&path, 32).expect("reopen");
        assert_eq!(
            file.load(ObjectId::from_u128(5)).expect("load"),
            Some(payload)
        );
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("x.index");
        drop(BTree::create(&path, FileKind::Index, Vec::new(), 8).expect("create"));

        let err = ObjectBTreeFile::open_or_create(&path, 8).expect_err("wrong kind");
        assert!(err.is_structural());
    }
}
