//! Registry of open collections, keyed by collection name.
//!
//! Every caller asking for the same collection shares one `ObjectFile`, and
//! with it one reader/writer lock. Opening the same files twice would let
//! two writers interleave.
//!
//! # Invariants
//!
//! - Each collection name maps to exactly one `ObjectFile`
//! - Collections are never removed once opened (for the lifetime of the database)
//! - All collection names are validated before they reach the file system

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::collection::ObjectFile;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::index::{IndexDefinition, IndexError};
use crate::serializer::ObjectSerializer;

/// Maximum length for a collection name.
const MAX_COLLECTION_NAME_LENGTH: usize = 128;

/// A directory of collections sharing one serializer.
pub struct Database<S: ObjectSerializer> {
    config: StoreConfig,
    serializer: Arc<S>,
    /// Uses `RwLock` to allow concurrent lookups of open collections.
    collections: RwLock<HashMap<String, ObjectFile<S>>>,
}

impl<S: ObjectSerializer> Database<S> {
    /// Create a database over `config.directory`, creating the directory if needed.
    pub fn new(config: StoreConfig, serializer: Arc<S>) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&config.directory)?;
        tracing::info!("Using object store at {}", config.directory.display());
        Ok(Self {
            config,
            serializer,
            collections: RwLock::new(HashMap::new()),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Get or open a collection.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The registry lock is poisoned
    /// - The name or an index declaration is invalid
    /// - The collection is already open with other index declarations
    /// - The collection files cannot be opened or created
    #[allow(clippy::disallowed_methods)] // Arc::clone is safe and expected
    #[allow(clippy::significant_drop_tightening)] // False positive - we need the lock held during insert
    pub fn collection(
        &self,
        name: &str,
        indexes: Vec<IndexDefinition>,
    ) -> Result<ObjectFile<S>, StoreError> {
        // Fast path: the collection is already open (read lock only)
        {
            let collections = self
                .collections
                .read()
                .map_err(|_| StoreError::LockPoisoned)?;
            if let Some(collection) = collections.get(name) {
                return check_definitions(collection, &indexes);
            }
        }

        // Slow path: open the collection (write lock)
        let mut collections = self
            .collections
            .write()
            .map_err(|_| StoreError::LockPoisoned)?;

        // Double-check: another thread may have opened it while we waited for the write lock
        if let Some(collection) = collections.get(name) {
            return check_definitions(collection, &indexes);
        }

        let collection =
            ObjectFile::open(&self.config, name, indexes, Arc::clone(&self.serializer))?;
        collections.insert(name.to_string(), collection.clone());
        Ok(collection)
    }

    /// Names of the open collections, sorted.
    pub fn collection_names(&self) -> Result<Vec<String>, StoreError> {
        let collections = self
            .collections
            .read()
            .map_err(|_| StoreError::LockPoisoned)?;
        let mut names: Vec<String> = collections.keys().cloned().collect();
        drop(collections);
        names.sort();
        Ok(names)
    }
}

fn check_definitions<S: ObjectSerializer>(
    collection: &ObjectFile<S>,
    indexes: &[IndexDefinition],
) -> Result<ObjectFile<S>, StoreError> {
    if collection.definitions() == indexes {
        Ok(collection.clone())
    } else {
        Err(IndexError::DefinitionConflict(collection.name().to_string()).into())
    }
}

/// Error returned when validating a collection name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionNameError {
    /// The name is empty.
    Empty,
    /// The name exceeds the maximum length.
    TooLong,
    /// The name contains invalid characters.
    InvalidCharacters,
}

impl std::fmt::Display for CollectionNameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "collection name must not be empty"),
            Self::TooLong => write!(
                f,
                "collection name exceeds maximum length of {MAX_COLLECTION_NAME_LENGTH} characters"
            ),
            Self::InvalidCharacters => write!(
                f,
                "collection name contains invalid characters; only alphanumeric, hyphens, and underscores are allowed"
            ),
        }
    }
}

impl std::error::Error for CollectionNameError {}

/// Validate that a collection name is well-formed.
///
/// Valid names:
/// - Are non-empty
/// - Are at most 128 characters
/// - Contain only alphanumeric characters, hyphens, and underscores
///
/// The name becomes part of file names, so dots and path separators are
/// refused.
///
/// # Examples
///
/// ```
/// use objectstore::database::validate_collection_name;
///
/// assert!(validate_collection_name("people").is_ok());
/// assert!(validate_collection_name("audit_log-2").is_ok());
/// assert!(validate_collection_name("").is_err());
/// assert!(validate_collection_name("../evil").is_err());
/// ```
pub fn validate_collection_name(name: &str) -> Result<(), CollectionNameError> {
    if name.is_empty() {
        return Err(CollectionNameError::Empty);
    }

    if name.len() > MAX_COLLECTION_NAME_LENGTH {
        return Err(CollectionNameError::TooLong);
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CollectionNameError::InvalidCharacters);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestSerializer, person, test_config};
    use crate::types::ObjectId;
    use tempfile::tempdir;

    #[test]
    fn test_validate_collection_name_valid() {
        assert!(validate_collection_name("people").is_ok());
        assert!(validate_collection_name("people_v2").is_ok());
        assert!(validate_collection_name("Audit-Log").is_ok());
        assert!(validate_collection_name("a").is_ok());
    }

    #[test]
    fn test_validate_collection_name_empty() {
        assert_eq!(
            validate_collection_name(""),
            Err(CollectionNameError::Empty)
        );
    }

    #[test]
    fn test_validate_collection_name_too_long() {
        let long_name = "a".repeat(MAX_COLLECTION_NAME_LENGTH + 1);
        assert_eq!(
            validate_collection_name(&long_name),
            Err(CollectionNameError::TooLong)
        );

        // Exactly at limit should be OK
        let at_limit = "a".repeat(MAX_COLLECTION_NAME_LENGTH);
        assert!(validate_collection_name(&at_limit).is_ok());
    }

    #[test]
    fn test_validate_collection_name_invalid_characters() {
        for name in ["../evil", "a.b", "a/b", "a b", "naïve", "x\\y"] {
            assert_eq!(
                validate_collection_name(name),
                Err(CollectionNameError::InvalidCharacters),
                "{name}"
            );
        }
    }

    #[tokio::test]
    async fn test_collection_shared_between_callers() {
        let dir = tempdir().expect("create temp dir");
        let database =
            Database::new(test_config(dir.path()), Arc::new(TestSerializer)).expect("database");
        let by_name = IndexDefinition::new("by-name", &["Name"]).expect("valid index");

        let first = database
            .collection("people", vec![by_name.clone()])
            .expect("open");
        let second = database
            .collection("people", vec![by_name.clone()])
            .expect("open again");

        {
            let mut guard = first.begin_write().await.expect("write lock");
            guard
                .insert(ObjectId::from_u128(1), &person(1, "ada", None))
                .expect("insert");
        }
        let guard = second.begin_read().await.expect("read lock");
        assert_eq!(guard.count().expect("count"), 1);
        drop(guard);

        database.collection("devices", vec![]).expect("open");
        assert_eq!(
            database.collection_names().expect("names"),
            vec!["devices".to_string(), "people".to_string()]
        );
    }

    #[test]
    fn test_conflicting_declarations_rejected() {
        let dir = tempdir().expect("create temp dir");
        let database =
            Database::new(test_config(dir.path()), Arc::new(TestSerializer)).expect("database");
        let by_name = IndexDefinition::new("by-name", &["Name"]).expect("valid index");
        let by_name_desc = IndexDefinition::new("by-name", &["-Name"]).expect("valid index");

        database.collection("people", vec![by_name]).expect("open");
        let err = database
            .collection("people", vec![by_name_desc])
            .err()
            .expect("conflict");
        assert!(matches!(
            err,
            StoreError::InvalidIndex(IndexError::DefinitionConflict(name)) if name == "people"
        ));
    }
}
