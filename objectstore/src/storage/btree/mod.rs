//! B+Tree over a block file.

pub mod cursor;
pub mod node;
pub mod tree;

pub use cursor::{Bookmark, RawCursor};
pub use node::{MAX_INLINE_VALUE_SIZE, MAX_KEY_SIZE};
pub use tree::{BTree, BTreeError};
