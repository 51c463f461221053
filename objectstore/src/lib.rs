// Life of a request:
// 1. A caller takes a collection's read or write guard
// 2. Writes: the object is serialized, every index key is encoded, then
//    the primary file and each index file are updated
// 3. Reads: a cursor walks the primary file or an index in key order,
//    resolves each entry's object id through the primary file and hands
//    back the object, or a stale/type-mismatch marker
//
// System components:
//  - Block store: checksummed 8KB blocks, block cache, B+Tree with subtree counts
//  - Key codec: typed field tuples to byte-comparable keys
//  - Collection: primary object file + secondary index files under one lock
//  - Cursor engine: ordered traversal, rank, bookmarks, keyset pagination

pub mod codec;
pub mod collection;
pub mod config;
pub mod cursor;
pub mod database;
pub mod error;
pub mod index;
pub mod lock;
pub mod objects;
pub mod serializer;
pub mod storage;
pub mod types;

#[cfg(test)]
mod testing;

mod e2e_tests;

pub use codec::MissingFieldAction;
pub use collection::{CollectionState, ObjectFile};
pub use config::StoreConfig;
pub use cursor::{CursorBookmark, FileCursor};
pub use database::Database;
pub use error::StoreError;
pub use index::{IndexDefinition, ScanDirection};
pub use lock::{Locked, ReadGuard, WriteGuard};
pub use serializer::{Loaded, ObjectSerializer, SerializerError};
pub use types::{FieldValue, ObjectId};
