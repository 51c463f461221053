//! Secondary indexes: declarations, sort-order matching and index files.

pub mod definition;
pub mod file;

pub use definition::{IndexDefinition, IndexError, IndexField, ScanDirection};
pub use file::IndexBTreeFile;
