//! Errors crossing the store boundary.
//!
//! Lower layers keep their own error enums. At the boundary every error
//! that means "the file is damaged" becomes `Corruption`, with the original
//! error kept as its source; ordinary refusals keep their own variant.

use std::time::Duration;

use crate::codec::CodecError;
use crate::database::CollectionNameError;
use crate::index::IndexError;
use crate::serializer::SerializerError;
use crate::storage::btree::{BTreeError, MAX_KEY_SIZE};
use crate::storage::file::FileError;
use crate::storage::overflow::OverflowError;
use crate::types::ObjectId;

/// Errors returned by collections and cursors.
#[derive(Debug)]
pub enum StoreError {
    /// The operating system failed an I/O request.
    Io(FileError),
    /// A file violates a structural invariant.
    Corruption(Box<dyn std::error::Error + Send + Sync>),
    /// The collection lock was not granted in time. Nothing was changed.
    LockTimeout {
        collection: String,
        timeout: Duration,
        exclusive: bool,
    },
    /// An object with this id already exists. Nothing was changed.
    DuplicateKey(ObjectId),
    /// The object carries an id other than the one it was to be stored
    /// under. Nothing was changed.
    ObjectIdMismatch { key: ObjectId, object: ObjectId },
    /// An encoded key exceeds the largest key the tree accepts.
    KeyTooLarge { size: usize, max: usize },
    /// The cursor has not been positioned on an entry.
    NotStarted,
    /// No index with this name is declared on the collection.
    UnknownIndex(String),
    /// An index declaration is invalid.
    InvalidIndex(IndexError),
    /// A collection name is invalid.
    InvalidName(CollectionNameError),
    /// A cursor was used with a guard of another collection.
    WrongCollection,
    /// The serializer failed.
    Serializer(SerializerError),
    /// A request the storage layer refused for a reason other than damage.
    Storage(BTreeError),
    /// A registry lock was poisoned by a panicking thread.
    LockPoisoned,
}

impl StoreError {
    /// True if the error reports damaged files.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::Corruption(_))
    }

    pub(crate) fn corruption(message: String) -> Self {
        Self::Corruption(Box::new(BTreeError::Corrupt(message)))
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "{e}"),
            Self::Corruption(e) => write!(f, "structural inconsistency: {e}"),
            Self::LockTimeout {
                collection,
                timeout,
                exclusive,
            } => write!(
                f,
                "{} lock on '{collection}' not granted within {} ms",
                if *exclusive { "write" } else { "read" },
                timeout.as_millis()
            ),
            Self::DuplicateKey(id) => write!(f, "object {id} already exists"),
            Self::ObjectIdMismatch { key, object } => {
                write!(f, "object {object} cannot be stored under id {key}")
            }
            Self::KeyTooLarge { size, max } => {
                write!(f, "encoded key of {size} bytes exceeds {max}")
            }
            Self::NotStarted => write!(f, "enumeration not started"),
            Self::UnknownIndex(name) => write!(f, "unknown index '{name}'"),
            Self::InvalidIndex(e) => write!(f, "{e}"),
            Self::InvalidName(e) => write!(f, "{e}"),
            Self::WrongCollection => write!(f, "cursor belongs to another collection"),
            Self::Serializer(e) => write!(f, "{e}"),
            Self::Storage(e) => write!(f, "{e}"),
            Self::LockPoisoned => write!(f, "registry lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Corruption(e) => Some(e.as_ref()),
            Self::InvalidIndex(e) => Some(e),
            Self::InvalidName(e) => Some(e),
            Self::Serializer(e) => Some(e),
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<BTreeError> for StoreError {
    fn from(e: BTreeError) -> Self {
        if e.is_structural() {
            return Self::Corruption(Box::new(e));
        }
        match e {
            BTreeError::KeyTooLarge(size) => Self::KeyTooLarge {
                size,
                max: MAX_KEY_SIZE,
            },
            BTreeError::File(f) | BTreeError::Overflow(OverflowError::File(f)) => Self::Io(f),
            other => Self::Storage(other),
        }
    }
}

impl From<FileError> for StoreError {
    fn from(e: FileError) -> Self {
        if e.is_structural() {
            Self::Corruption(Box::new(e))
        } else {
            Self::Io(e)
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(FileError::Io(e))
    }
}

impl From<CodecError> for StoreError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::KeyTooLarge(size) => Self::KeyTooLarge {
                size,
                max: MAX_KEY_SIZE,
            },
            other => Self::Corruption(Box::new(other)),
        }
    }
}

impl From<IndexError> for StoreError {
    fn from(e: IndexError) -> Self {
        Self::InvalidIndex(e)
    }
}

impl From<CollectionNameError> for StoreError {
    fn from(e: CollectionNameError) -> Self {
        Self::InvalidName(e)
    }
}

impl From<SerializerError> for StoreError {
    fn from(e: SerializerError) -> Self {
        Self::Serializer(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_structural_errors_become_corruption() {
        let err = StoreError::from(BTreeError::Corrupt("cycle".to_string()));
        assert!(err.is_structural());
        assert!(err.source().is_some());
        assert_eq!(
            err.to_string(),
            "structural inconsistency: corrupt tree: cycle"
        );
    }

    #[test]
    fn test_io_errors_stay_io() {
        let io = std::io::Error::other("disk on fire");
        let err = StoreError::from(BTreeError::File(FileError::Io(io)));
        assert!(matches!(err, StoreError::Io(_)));
        assert!(!err.is_structural());
    }

    #[test]
    fn test_key_too_large_mapping() {
        let err = StoreError::from(CodecError::KeyTooLarge(2000));
        assert!(matches!(
            err,
            StoreError::KeyTooLarge {
                size: 2000,
                max: MAX_KEY_SIZE
            }
        ));
    }

    #[test]
    fn test_lock_timeout_display() {
        let err = StoreError::LockTimeout {
            collection: "people".to_string(),
            timeout: Duration::from_millis(250),
            exclusive: true,
        };
        assert_eq!(
            err.to_string(),
            "write lock on 'people' not granted within 250 ms"
        );
    }
}
