//! Secondary index file: encoded field values + object id -> nothing.
//!
//! The index never stores payloads. Every key ends in the object id, which
//! is resolved through the primary object file.

use std::path::Path;

use crate::codec::{self, MissingFieldAction};
use crate::error::StoreError;
use crate::index::IndexDefinition;
use crate::serializer::ObjectSerializer;
use crate::storage::btree::{BTree, BTreeError};
use crate::storage::header::FileKind;
use crate::types::ObjectId;

/// A B+Tree over codec-encoded keys of one index declaration.
#[derive(Debug)]
pub struct IndexBTreeFile {
    definition: IndexDefinition,
    tree: BTree,
}

impl IndexBTreeFile {
    /// Create an empty index file, recording the definition in its header.
    pub fn create(
        path: &Path,
        definition: IndexDefinition,
        cache_blocks: usize,
    ) -> Result<Self, StoreError> {
        let tree = BTree::create(path, FileKind::Index, definition.to_bytes(), cache_blocks)?;
        tracing::debug!("created index {} at {}", definition, path.display());
        Ok(Self { definition, tree })
    }

    /// Open an index file, reading its definition from the header.
    pub fn open(path: &Path, cache_blocks: usize) -> Result<Self, StoreError> {
        let tree = BTree::open(path, cache_blocks)?;
        if tree.header().kind != FileKind::Index {
            return Err(StoreError::corruption(format!(
                "{} is an {} file, expected an index file",
                path.display(),
                tree.header().kind
            )));
        }
        let definition = IndexDefinition::from_bytes(&tree.header().descriptor)
            .map_err(|e| StoreError::Corruption(Box::new(e)))?;
        Ok(Self { definition, tree })
    }

    /// The declaration this index was built from.
    #[must_use]
    pub const fn definition(&self) -> &IndexDefinition {
        &self.definition
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// The underlying tree.
    #[must_use]
    pub const fn tree(&self) -> &BTree {
        &self.tree
    }

    /// The key this index stores for an object.
    pub fn key_for<S: ObjectSerializer>(
        &self,
        id: ObjectId,
        object: &S::Object,
        serializer: &S,
    ) -> Result<Vec<u8>, StoreError> {
        Ok(codec::encode_key(
            &self.definition,
            id,
            object,
            serializer,
            MissingFieldAction::Null,
        )?)
    }

    /// Add a key. A key that is already present is left as is.
    pub fn insert_key(&mut self, key: &[u8]) -> Result<(), StoreError> {
        match self.tree.insert(key, &[]) {
            Err(BTreeError::DuplicateKey) => {
                tracing::debug!("index {} already holds the key", self.definition.name);
                Ok(())
            }
            other => Ok(other?),
        }
    }

    /// Remove a key. Returns false if it was not present.
    pub fn remove_key(&mut self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.tree.remove(key)?.is_some())
    }

    /// True if the key is present.
    pub fn contains_key(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.tree.contains(key)?)
    }

    /// Object id a stored key refers to.
    pub fn object_id_of(&self, key: &[u8]) -> Result<ObjectId, StoreError> {
        Ok(codec::skip_key(key, &self.definition)?)
    }

    /// Number of keys.
    pub fn count(&self) -> Result<u64, StoreError> {
        Ok(self.tree.len()?)
    }

    /// Flush the header and sync the file to disk.
    pub fn sync(&mut self) -> Result<(), StoreError> {
        Ok(self.tree.sync()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_fields;
    use crate::types::FieldValue;
    use tempfile::tempdir;

    fn key(definition: &IndexDefinition, name: &str, id: u128) -> Vec<u8> {
        encode_fields(
            definition,
            ObjectId::from_u128(id),
            &[Some(FieldValue::String(name.to_string()))],
            MissingFieldAction::Null,
        )
        .expect("encode")
    }

    #[test]
    fn test_definition_persisted() {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("people.by-name.index");
        let definition = IndexDefinition::new("by-name", &["Name", "-Age"]).expect("valid");

        {
            let mut index = IndexBTreeFile::create(&path, definition.clone(), 16).expect("create");
            index.sync().expect("sync");
        }

        let index = IndexBTreeFile::open(&path, 16).expect("open");
        assert_eq!(index.definition(), &definition);
        assert_eq!(index.name(), "by-name");
    }

    #[test]
    fn test_keys_resolve_to_object_ids() {
        let dir = tempdir().expect("create temp dir");
        let definition = IndexDefinition::new("by-name", &["Name"]).expect("valid");
        let mut index =
            IndexBTreeFile::create(&dir.path().join("i.index"), definition.clone(), 16)
                .expect("create");

        let k = key(&definition, "ada", 42);
        index.insert_key(&k).expect("insert");
        index.insert_key(&k).expect("insert twice is a no-op");
        assert_eq!(index.count().expect("count"), 1);
        assert_eq!(
            index.object_id_of(&k).expect("decode"),
            ObjectId::from_u128(42)
        );

        assert!(index.remove_key(&k).expect("remove"));
        assert!(!index.remove_key(&k).expect("remove again"));
        assert!(!index.contains_key(&k).expect("contains"));
    }
}
