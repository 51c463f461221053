//! Block storage: fixed-size blocks, the block cache, and the B+Tree built on them.

pub mod btree;
pub mod cache;
pub mod file;
pub mod header;
pub mod overflow;
pub mod page;
