//! Disk-based B+Tree with subtree counts.
//!
//! Every collection file (primary object file or index file) is one tree:
//! - Key: variable-length byte string (at most `MAX_KEY_SIZE` bytes)
//! - Value: arbitrary bytes; longer than `MAX_INLINE_VALUE_SIZE` goes to overflow blocks
//!
//! Internal nodes record how many entries live below each child, so the
//! rank of a key and the entry at a rank are both found in one descent.
//! Mutations walk down once, remember the path, and fix counts and splits
//! on the way back up; nodes carry no parent pointers.
//!
//! Splits are by byte size. Deletion removes leaves and internal nodes that
//! become empty and collapses a root with a single child; partially filled
//! nodes are not merged.

use crate::storage::btree::node::{
    ChildRef, InternalNode, LeafEntry, LeafNode, LeafValue, MAX_INLINE_VALUE_SIZE, MAX_KEY_SIZE,
    Node, NodeError,
};
use crate::storage::file::{BlockFile, FileError};
use crate::storage::header::{FileHeader, FileKind};
use crate::storage::overflow::{OverflowError, free_overflow, read_overflow, write_overflow};
use crate::storage::page::PageId;
use std::path::Path;

/// Deepest tree accepted before a descent is declared corrupt.
const MAX_DEPTH: usize = 64;

/// One internal node on a root-to-leaf path and the child taken.
#[derive(Debug, Clone, Copy)]
struct PathStep {
    page: PageId,
    index: usize,
}

/// A node split waiting to be recorded in the parent.
#[derive(Debug)]
struct Split {
    separator: Vec<u8>,
    left_count: u64,
    right_page: PageId,
    right_count: u64,
}

/// A B+Tree that owns its block file.
pub struct BTree {
    file: BlockFile,
}

impl BTree {
    /// Create a new file holding an empty tree.
    pub fn create(
        path: &Path,
        kind: FileKind,
        descriptor: Vec<u8>,
        cache_blocks: usize,
    ) -> Result<Self, BTreeError> {
        let mut file = BlockFile::create(path, kind, descriptor, cache_blocks)?;

        let root = file.allocate_page()?;
        file.write_page(root, LeafNode::new().to_page()?)?;
        file.set_root_page(root);
        file.flush_header()?;

        Ok(Self { file })
    }

    /// Open the tree stored in an existing file.
    pub fn open(path: &Path, cache_blocks: usize) -> Result<Self, BTreeError> {
        let file = BlockFile::open(path, cache_blocks)?;
        let root = file.header().root_page;
        if root == 0 || root >= file.total_pages() {
            return Err(BTreeError::Corrupt(format!(
                "root block {root} is not a data block of {}",
                path.display()
            )));
        }
        Ok(Self { file })
    }

    /// The underlying block file.
    #[must_use]
    pub const fn file(&self) -> &BlockFile {
        &self.file
    }

    /// The file header.
    #[must_use]
    pub const fn header(&self) -> &FileHeader {
        self.file.header()
    }

    /// Root block of the tree.
    #[must_use]
    pub const fn root_page(&self) -> PageId {
        self.file.header().root_page
    }

    /// Counter bumped by every structural mutation.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.file.header().generation
    }

    /// Read and decode any node.
    pub fn read_node(&self, page_id: PageId) -> Result<Node, BTreeError> {
        let page = self.file.read_page(page_id)?;
        Ok(Node::from_page(&page)?)
    }

    /// Read and decode a leaf.
    pub fn read_leaf(&self, page_id: PageId) -> Result<LeafNode, BTreeError> {
        let page = self.file.read_page(page_id)?;
        Ok(LeafNode::from_page(&page)?)
    }

    fn read_internal(&self, page_id: PageId) -> Result<InternalNode, BTreeError> {
        let page = self.file.read_page(page_id)?;
        Ok(InternalNode::from_page(&page)?)
    }

    fn write_leaf(&mut self, page_id: PageId, leaf: &LeafNode) -> Result<(), BTreeError> {
        self.file.write_page(page_id, leaf.to_page()?)?;
        Ok(())
    }

    fn write_internal(&mut self, page_id: PageId, node: &InternalNode) -> Result<(), BTreeError> {
        self.file.write_page(page_id, node.to_page()?)?;
        Ok(())
    }

    /// Number of entries in the tree.
    pub fn len(&self) -> Result<u64, BTreeError> {
        Ok(self.read_node(self.root_page())?.count())
    }

    /// True if the tree has no entries.
    pub fn is_empty(&self) -> Result<bool, BTreeError> {
        Ok(self.len()? == 0)
    }

    /// Number of levels, counting the leaf level.
    pub fn depth(&self) -> Result<usize, BTreeError> {
        let mut page_id = self.root_page();
        for depth in 1..=MAX_DEPTH {
            match self.read_node(page_id)? {
                Node::Leaf(_) => return Ok(depth),
                Node::Internal(node) => page_id = node.children[0].page,
            }
        }
        Err(too_deep())
    }

    /// Look up a value by key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BTreeError> {
        let (_, _, leaf) = self.descend(key)?;
        match leaf.search(key) {
            Ok(slot) => Ok(Some(self.resolve_value(&leaf.entries[slot].value)?)),
            Err(_) => Ok(None),
        }
    }

    /// True if the key is present.
    pub fn contains(&self, key: &[u8]) -> Result<bool, BTreeError> {
        let (_, _, leaf) = self.descend(key)?;
        Ok(leaf.search(key).is_ok())
    }

    /// Materialize a stored value, following overflow chains.
    pub fn resolve_value(&self, value: &LeafValue) -> Result<Vec<u8>, BTreeError> {
        match value {
            LeafValue::Inline(bytes) => Ok(bytes.clone()),
            LeafValue::Overflow(overflow_ref) => Ok(read_overflow(&self.file, overflow_ref)?),
        }
    }

    /// Insert a new key.
    ///
    /// Fails with `DuplicateKey` if the key is present; the tree is unchanged.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<(), BTreeError> {
        check_key(key)?;
        let (path, leaf_id, mut leaf) = self.descend(key)?;
        let slot = match leaf.search(key) {
            Ok(_) => return Err(BTreeError::DuplicateKey),
            Err(slot) => slot,
        };

        let value = self.store_value(value)?;
        leaf.entries.insert(
            slot,
            LeafEntry {
                key: key.to_vec(),
                value,
            },
        );

        let split = self.write_leaf_or_split(leaf_id, leaf)?;
        self.propagate(&path, split, 1)?;
        self.file.bump_generation();
        self.file.flush_header()?;
        Ok(())
    }

    /// Replace the value of an existing key.
    ///
    /// Returns the old value, or `None` (and changes nothing) if the key is absent.
    pub fn update(&mut self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>, BTreeError> {
        let (path, leaf_id, mut leaf) = self.descend(key)?;
        let Ok(slot) = leaf.search(key) else {
            return Ok(None);
        };

        let old = self.resolve_value(&leaf.entries[slot].value)?;
        let new_value = self.store_value(value)?;
        let old_value = std::mem::replace(&mut leaf.entries[slot].value, new_value);
        if let LeafValue::Overflow(overflow_ref) = old_value {
            free_overflow(&mut self.file, &overflow_ref)?;
        }

        let split = self.write_leaf_or_split(leaf_id, leaf)?;
        let structural = split.is_some();
        self.propagate(&path, split, 0)?;
        if structural {
            self.file.bump_generation();
        }
        self.file.flush_header()?;
        Ok(Some(old))
    }

    /// Remove a key.
    ///
    /// Returns the removed value, or `None` if the key was absent.
    pub fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, BTreeError> {
        let (path, leaf_id, mut leaf) = self.descend(key)?;
        let Ok(slot) = leaf.search(key) else {
            return Ok(None);
        };

        let entry = leaf.entries.remove(slot);
        let value = self.resolve_value(&entry.value)?;
        if let LeafValue::Overflow(overflow_ref) = &entry.value {
            free_overflow(&mut self.file, overflow_ref)?;
        }

        let mut removed_child = false;
        if leaf.is_empty() && !path.is_empty() {
            self.unlink_leaf(&leaf)?;
            self.file.free_page(leaf_id)?;
            removed_child = true;
        } else {
            self.write_leaf(leaf_id, &leaf)?;
        }

        for step in path.iter().rev() {
            let mut node = self.read_internal(step.page)?;
            if removed_child {
                node.children.remove(step.index);
                if step.index > 0 {
                    node.keys.remove(step.index - 1);
                } else if !node.keys.is_empty() {
                    node.keys.remove(0);
                }
                if node.children.is_empty() {
                    self.file.free_page(step.page)?;
                    continue;
                }
                removed_child = false;
            } else {
                adjust_count(&mut node.children[step.index], -1)?;
            }
            self.write_internal(step.page, &node)?;
        }

        if removed_child {
            // Every node on the path emptied out, root included.
            let root = self.file.allocate_page()?;
            self.write_leaf(root, &LeafNode::new())?;
            self.file.set_root_page(root);
        }
        self.collapse_root()?;

        self.file.bump_generation();
        self.file.flush_header()?;
        Ok(Some(value))
    }

    /// Number of entries whose key is strictly less than `key`.
    ///
    /// When `key` is present this is its 0-based rank.
    pub fn rank_of(&self, key: &[u8]) -> Result<u64, BTreeError> {
        let mut rank = 0u64;
        let mut page_id = self.root_page();
        for _ in 0..MAX_DEPTH {
            match self.read_node(page_id)? {
                Node::Leaf(leaf) => return Ok(rank + leaf.lower_bound(key) as u64),
                Node::Internal(node) => {
                    let index = node.child_index(key);
                    rank += node.count_before(index);
                    page_id = node.children[index].page;
                }
            }
        }
        Err(too_deep())
    }

    /// Leaf block and slot of the entry at `rank`, or `None` if out of range.
    pub fn locate_rank(&self, rank: u64) -> Result<Option<(PageId, usize)>, BTreeError> {
        let mut remaining = rank;
        let mut page_id = self.root_page();
        for _ in 0..MAX_DEPTH {
            match self.read_node(page_id)? {
                Node::Leaf(leaf) => {
                    let slot = usize::try_from(remaining).unwrap_or(usize::MAX);
                    if slot < leaf.len() {
                        return Ok(Some((page_id, slot)));
                    }
                    if page_id == self.root_page() {
                        return Ok(None);
                    }
                    return Err(BTreeError::Corrupt(format!(
                        "subtree count of leaf {page_id} disagrees with its {} entries",
                        leaf.len()
                    )));
                }
                Node::Internal(node) => {
                    if page_id == self.root_page() && remaining >= node.total_count() {
                        return Ok(None);
                    }
                    let mut next = None;
                    for child in &node.children {
                        if remaining < child.count {
                            next = Some(child.page);
                            break;
                        }
                        remaining -= child.count;
                    }
                    page_id = next.ok_or_else(|| {
                        BTreeError::Corrupt(format!(
                            "subtree counts of block {page_id} do not cover rank {rank}"
                        ))
                    })?;
                }
            }
        }
        Err(too_deep())
    }

    /// Leaf and slot of the first entry whose key is `>= key`.
    ///
    /// The slot may equal the leaf length, meaning the entry (if any) is
    /// the first of a following leaf.
    pub fn locate_lower(&self, key: &[u8]) -> Result<(PageId, usize), BTreeError> {
        let (_, leaf_id, leaf) = self.descend(key)?;
        Ok((leaf_id, leaf.lower_bound(key)))
    }

    /// Leaf and slot of the first entry whose key is `> key`.
    pub fn locate_upper(&self, key: &[u8]) -> Result<(PageId, usize), BTreeError> {
        let (_, leaf_id, leaf) = self.descend(key)?;
        Ok((leaf_id, leaf.upper_bound(key)))
    }

    /// Leftmost leaf.
    pub fn first_leaf(&self) -> Result<PageId, BTreeError> {
        self.edge_leaf(false)
    }

    /// Rightmost leaf.
    pub fn last_leaf(&self) -> Result<PageId, BTreeError> {
        self.edge_leaf(true)
    }

    /// Flush the header and sync the file to disk.
    pub fn sync(&mut self) -> Result<(), BTreeError> {
        Ok(self.file.sync()?)
    }

    fn edge_leaf(&self, rightmost: bool) -> Result<PageId, BTreeError> {
        let mut page_id = self.root_page();
        for _ in 0..MAX_DEPTH {
            match self.read_node(page_id)? {
                Node::Leaf(_) => return Ok(page_id),
                Node::Internal(node) => {
                    let child = if rightmost {
                        node.children.last()
                    } else {
                        node.children.first()
                    };
                    page_id = child.map(|c| c.page).ok_or_else(|| {
                        BTreeError::Corrupt(format!("internal block {page_id} has no children"))
                    })?;
                }
            }
        }
        Err(too_deep())
    }

    /// Walk from the root to the leaf responsible for `key`.
    fn descend(&self, key: &[u8]) -> Result<(Vec<PathStep>, PageId, LeafNode), BTreeError> {
        let mut path = Vec::new();
        let mut page_id = self.root_page();
        for _ in 0..MAX_DEPTH {
            match self.read_node(page_id)? {
                Node::Leaf(leaf) => return Ok((path, page_id, leaf)),
                Node::Internal(node) => {
                    let index = node.child_index(key);
                    path.push(PathStep {
                        page: page_id,
                        index,
                    });
                    page_id = node.children[index].page;
                }
            }
        }
        Err(too_deep())
    }

    fn store_value(&mut self, value: &[u8]) -> Result<LeafValue, BTreeError> {
        if value.len() > MAX_INLINE_VALUE_SIZE {
            Ok(LeafValue::Overflow(write_overflow(&mut self.file, value)?))
        } else {
            Ok(LeafValue::Inline(value.to_vec()))
        }
    }

    /// Write a leaf, splitting it first if it no longer fits in a block.
    fn write_leaf_or_split(
        &mut self,
        leaf_id: PageId,
        mut leaf: LeafNode,
    ) -> Result<Option<Split>, BTreeError> {
        if leaf.fits() {
            self.write_leaf(leaf_id, &leaf)?;
            return Ok(None);
        }

        let mut right = leaf.split();
        let right_id = self.file.allocate_page()?;

        right.prev_leaf = leaf_id;
        right.next_leaf = leaf.next_leaf;
        if leaf.next_leaf != 0 {
            let mut next = self.read_leaf(leaf.next_leaf)?;
            next.prev_leaf = right_id;
            self.write_leaf(leaf.next_leaf, &next)?;
        }
        leaf.next_leaf = right_id;

        let split = Split {
            separator: right.entries[0].key.clone(),
            left_count: leaf.len() as u64,
            right_page: right_id,
            right_count: right.len() as u64,
        };

        self.write_leaf(leaf_id, &leaf)?;
        self.write_leaf(right_id, &right)?;
        Ok(Some(split))
    }

    /// Record a child split (or a count change of `delta`) in every node on
    /// the path, splitting internal nodes and growing a new root as needed.
    fn propagate(
        &mut self,
        path: &[PathStep],
        mut split: Option<Split>,
        delta: i64,
    ) -> Result<(), BTreeError> {
        for step in path.iter().rev() {
            let mut node = self.read_internal(step.page)?;
            match split.take() {
                Some(s) => {
                    node.children[step.index].count = s.left_count;
                    node.keys.insert(step.index, s.separator);
                    node.children.insert(
                        step.index + 1,
                        ChildRef {
                            page: s.right_page,
                            count: s.right_count,
                        },
                    );
                }
                None if delta == 0 => return Ok(()),
                None => adjust_count(&mut node.children[step.index], delta)?,
            }

            if node.fits() {
                self.write_internal(step.page, &node)?;
            } else {
                let (separator, right) = node.split();
                let right_id = self.file.allocate_page()?;
                split = Some(Split {
                    separator,
                    left_count: node.total_count(),
                    right_page: right_id,
                    right_count: right.total_count(),
                });
                self.write_internal(step.page, &node)?;
                self.write_internal(right_id, &right)?;
            }
        }

        if let Some(s) = split {
            let old_root = self.root_page();
            let root = InternalNode::new_root(
                ChildRef {
                    page: old_root,
                    count: s.left_count,
                },
                s.separator,
                ChildRef {
                    page: s.right_page,
                    count: s.right_count,
                },
            );
            let root_id = self.file.allocate_page()?;
            self.write_internal(root_id, &root)?;
            self.file.set_root_page(root_id);
            tracing::trace!("tree {} grew a new root {root_id}", self.file.path().display());
        }

        Ok(())
    }

    fn unlink_leaf(&mut self, leaf: &LeafNode) -> Result<(), BTreeError> {
        if leaf.prev_leaf != 0 {
            let mut prev = self.read_leaf(leaf.prev_leaf)?;
            prev.next_leaf = leaf.next_leaf;
            self.write_leaf(leaf.prev_leaf, &prev)?;
        }
        if leaf.next_leaf != 0 {
            let mut next = self.read_leaf(leaf.next_leaf)?;
            next.prev_leaf = leaf.prev_leaf;
            self.write_leaf(leaf.next_leaf, &next)?;
        }
        Ok(())
    }

    /// Replace a root that has a single child by that child.
    fn collapse_root(&mut self) -> Result<(), BTreeError> {
        for _ in 0..MAX_DEPTH {
            let root = self.root_page();
            match self.read_node(root)? {
                Node::Internal(node) if node.children.len() == 1 => {
                    self.file.set_root_page(node.children[0].page);
                    self.file.free_page(root)?;
                }
                _ => return Ok(()),
            }
        }
        Err(too_deep())
    }
}

impl std::fmt::Debug for BTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTree").field("file", &self.file).finish()
    }
}

fn check_key(key: &[u8]) -> Result<(), BTreeError> {
    if key.len() > MAX_KEY_SIZE {
        return Err(BTreeError::KeyTooLarge(key.len()));
    }
    Ok(())
}

fn adjust_count(child: &mut ChildRef, delta: i64) -> Result<(), BTreeError> {
    child.count = child.count.checked_add_signed(delta).ok_or_else(|| {
        BTreeError::Corrupt(format!("subtree count underflow for block {}", child.page))
    })?;
    Ok(())
}

fn too_deep() -> BTreeError {
    BTreeError::Corrupt(format!("tree deeper than {MAX_DEPTH} levels (cycle?)"))
}

/// Errors that can occur during B+Tree operations.
#[derive(Debug)]
pub enum BTreeError {
    /// File I/O error.
    File(FileError),
    /// Node decoding error.
    Node(NodeError),
    /// Overflow chain error.
    Overflow(OverflowError),
    /// The key is already present.
    DuplicateKey,
    /// The key is longer than `MAX_KEY_SIZE`.
    KeyTooLarge(usize),
    /// The tree violates one of its invariants.
    Corrupt(String),
}

impl BTreeError {
    /// True if the error means the file is damaged rather than the request
    /// being refused or the OS failing.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        match self {
            Self::File(e) => e.is_structural(),
            Self::Overflow(e) => e.is_structural(),
            Self::Node(_) | Self::Corrupt(_) => true,
            Self::DuplicateKey | Self::KeyTooLarge(_) => false,
        }
    }
}

impl std::fmt::Display for BTreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(e) => write!(f, "file error: {e}"),
            Self::Node(e) => write!(f, "node error: {e}"),
            Self::Overflow(e) => write!(f, "overflow error: {e}"),
            Self::DuplicateKey => write!(f, "duplicate key"),
            Self::KeyTooLarge(len) => write!(f, "key of {len} bytes exceeds {MAX_KEY_SIZE}"),
            Self::Corrupt(message) => write!(f, "corrupt tree: {message}"),
        }
    }
}

impl std::error::Error for BTreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::File(e) => Some(e),
            Self::Node(e) => Some(e),
            Self::Overflow(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FileError> for BTreeError {
    fn from(e: FileError) -> Self {
        Self::File(e)
    }
}

impl From<NodeError> for BTreeError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}

impl From<OverflowError> for BTreeError {
    fn from(e: OverflowError) -> Self {
        Self::Overflow(e)
    }
}
