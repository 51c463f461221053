//! B+Tree node types and serialization.
//!
//! Keys are variable-length byte strings compared as unsigned bytes.
//! - Internal nodes: separator keys and `(child block, subtree count)` pairs
//! - Leaf nodes: key/value entries, doubly-linked for range scans
//!
//! The subtree counts let a cursor compute the rank of an entry, or find
//! the entry at a rank, in one root-to-leaf descent.

#![allow(clippy::cast_possible_truncation)]

use crate::storage::overflow::{OVERFLOW_REF_SIZE, OverflowRef};
use crate::storage::page::{PAGE_SIZE, Page, PageHeader, PageId, PageType};

/// Largest key accepted by the tree.
pub const MAX_KEY_SIZE: usize = 1024;

/// Largest value stored inside a leaf; longer values go to overflow blocks.
pub const MAX_INLINE_VALUE_SIZE: usize = 1024;

/// Node header layout (after block header):
/// - `entry_count`: 2 bytes (keys for internal nodes)
/// - `prev_leaf`: 8 bytes (leaf only, 0 if none)
/// - `next_leaf`: 8 bytes (leaf only, 0 if none)
///
/// Total: 18 bytes
const NODE_HEADER_SIZE: usize = 18;

/// Offset where node data starts (after block header + node header).
const DATA_OFFSET: usize = PageHeader::SIZE + NODE_HEADER_SIZE;

/// Available space for node data.
pub const DATA_SPACE: usize = PAGE_SIZE - DATA_OFFSET;

/// Size of a child reference: block id + subtree count.
const CHILD_REF_SIZE: usize = 16;

/// Leaf entry overhead: `key_len` (2) + flags (1) + `value_len` (2).
const LEAF_ENTRY_OVERHEAD: usize = 5;

/// Leaf entry flag: the value is an `OverflowRef`.
const FLAG_OVERFLOW: u8 = 0x01;

/// Where a leaf entry's value lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafValue {
    Inline(Vec<u8>),
    Overflow(OverflowRef),
}

impl LeafValue {
    /// Bytes the value occupies inside the leaf.
    #[must_use]
    pub fn stored_len(&self) -> usize {
        match self {
            Self::Inline(bytes) => bytes.len(),
            Self::Overflow(_) => OVERFLOW_REF_SIZE,
        }
    }
}

/// A key/value entry in a leaf node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafEntry {
    pub key: Vec<u8>,
    pub value: LeafValue,
}

impl LeafEntry {
    fn byte_size(&self) -> usize {
        LEAF_ENTRY_OVERHEAD + self.key.len() + self.value.stored_len()
    }
}

/// A leaf node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeafNode {
    pub prev_leaf: PageId,
    pub next_leaf: PageId,
    pub entries: Vec<LeafEntry>,
}

impl LeafNode {
    /// Create an empty, unlinked leaf.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            prev_leaf: 0,
            next_leaf: 0,
            entries: Vec::new(),
        }
    }

    /// Number of entries.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the leaf has no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Binary search for a key.
    pub fn search(&self, key: &[u8]) -> Result<usize, usize> {
        self.entries.binary_search_by(|e| e.key.as_slice().cmp(key))
    }

    /// Index of the first entry whose key is `>= key`.
    #[must_use]
    pub fn lower_bound(&self, key: &[u8]) -> usize {
        self.entries.partition_point(|e| e.key.as_slice() < key)
    }

    /// Index of the first entry whose key is `> key`.
    #[must_use]
    pub fn upper_bound(&self, key: &[u8]) -> usize {
        self.entries.partition_point(|e| e.key.as_slice() <= key)
    }

    /// Serialized size of the entries.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.entries.iter().map(LeafEntry::byte_size).sum()
    }

    /// True if the node fits in one block.
    #[must_use]
    pub fn fits(&self) -> bool {
        self.byte_size() <= DATA_SPACE
    }

    /// Move the upper half (by bytes) into a new leaf and return it.
    ///
    /// Sibling links are left to the caller.
    ///
    /// # Pre-conditions
    /// - At least two entries
    pub fn split(&mut self) -> Self {
        debug_assert!(self.entries.len() >= 2, "cannot split a leaf with < 2 entries");
        let sizes: Vec<usize> = self.entries.iter().map(LeafEntry::byte_size).collect();
        let at = split_point(&sizes, 1, self.entries.len() - 1);
        let right = self.entries.split_off(at);
        Self {
            prev_leaf: 0,
            next_leaf: 0,
            entries: right,
        }
    }

    /// Serialize the node to a block.
    pub fn to_page(&self) -> Result<Page, NodeError> {
        let size = self.byte_size();
        if size > DATA_SPACE {
            return Err(NodeError::Overfull(size));
        }

        let mut page = Page::formatted(PageType::BTreeLeaf);
        page.write_u16(PageHeader::SIZE, self.entries.len() as u16);
        page.write_u64(PageHeader::SIZE + 2, self.prev_leaf);
        page.write_u64(PageHeader::SIZE + 10, self.next_leaf);

        let mut offset = DATA_OFFSET;
        for entry in &self.entries {
            let overflow_bytes;
            let (flags, value_bytes): (u8, &[u8]) = match &entry.value {
                LeafValue::Inline(bytes) => (0, bytes),
                LeafValue::Overflow(r) => {
                    overflow_bytes = r.to_bytes();
                    (FLAG_OVERFLOW, &overflow_bytes)
                }
            };
            page.write_u16(offset, entry.key.len() as u16);
            page.write_u8(offset + 2, flags);
            page.write_u16(offset + 3, value_bytes.len() as u16);
            offset += LEAF_ENTRY_OVERHEAD;
            page.write_bytes(offset, &entry.key);
            offset += entry.key.len();
            page.write_bytes(offset, value_bytes);
            offset += value_bytes.len();
        }

        Ok(page)
    }

    /// Deserialize a leaf from a block, validating every length and the key order.
    pub fn from_page(page: &Page) -> Result<Self, NodeError> {
        let page_type = page.page_type_byte();
        if page_type != PageType::BTreeLeaf as u8 {
            return Err(NodeError::UnexpectedPageType(page_type));
        }

        let count = page.read_u16(PageHeader::SIZE) as usize;
        let prev_leaf = page.read_u64(PageHeader::SIZE + 2);
        let next_leaf = page.read_u64(PageHeader::SIZE + 10);

        let mut reader = NodeReader::new(page);
        let mut entries: Vec<LeafEntry> = Vec::with_capacity(count);
        for index in 0..count {
            let key_len = reader.u16()? as usize;
            let flags = reader.u8()?;
            let value_len = reader.u16()? as usize;
            if key_len > MAX_KEY_SIZE {
                return Err(NodeError::KeyTooLarge(key_len));
            }
            let key = reader.bytes(key_len)?.to_vec();
            let raw_value = reader.bytes(value_len)?;

            let value = match flags {
                0 => LeafValue::Inline(raw_value.to_vec()),
                FLAG_OVERFLOW => LeafValue::Overflow(
                    OverflowRef::from_bytes(raw_value).ok_or(NodeError::InvalidOverflowRef)?,
                ),
                other => return Err(NodeError::InvalidEntryFlags(other)),
            };

            if let Some(prev) = entries.last()
                && prev.key >= key
            {
                return Err(NodeError::KeysOutOfOrder { index });
            }
            entries.push(LeafEntry { key, value });
        }

        Ok(Self {
            prev_leaf,
            next_leaf,
            entries,
        })
    }
}

/// A child pointer together with the number of entries below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildRef {
    pub page: PageId,
    pub count: u64,
}

/// An internal node: `children.len() == keys.len() + 1`.
///
/// `children[i]` holds keys `k` with `keys[i-1] <= k < keys[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode {
    pub keys: Vec<Vec<u8>>,
    pub children: Vec<ChildRef>,
}

impl InternalNode {
    /// Create a root over two children separated by `key`.
    #[must_use]
    pub fn new_root(left: ChildRef, key: Vec<u8>, right: ChildRef) -> Self {
        Self {
            keys: vec![key],
            children: vec![left, right],
        }
    }

    /// Index of the child whose range contains `key`.
    #[must_use]
    pub fn child_index(&self, key: &[u8]) -> usize {
        self.keys.partition_point(|k| k.as_slice() <= key)
    }

    /// Total entries below this node.
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.children.iter().map(|c| c.count).sum()
    }

    /// Entries in the children before `index`.
    #[must_use]
    pub fn count_before(&self, index: usize) -> u64 {
        self.children[..index].iter().map(|c| c.count).sum()
    }

    /// Serialized size of keys and children.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        CHILD_REF_SIZE
            + self
                .keys
                .iter()
                .map(|k| 2 + k.len() + CHILD_REF_SIZE)
                .sum::<usize>()
    }

    /// True if the node fits in one block.
    #[must_use]
    pub fn fits(&self) -> bool {
        self.byte_size() <= DATA_SPACE
    }

    /// Split by bytes. Returns the separator to push up and the right node.
    ///
    /// # Pre-conditions
    /// - At least three keys
    pub fn split(&mut self) -> (Vec<u8>, Self) {
        debug_assert!(self.keys.len() >= 3, "cannot split an internal node with < 3 keys");
        let sizes: Vec<usize> = self.keys.iter().map(|k| 2 + k.len() + CHILD_REF_SIZE).collect();
        let at = split_point(&sizes, 1, self.keys.len() - 2);

        let right_keys = self.keys.split_off(at + 1);
        let right_children = self.children.split_off(at + 1);
        let separator = self.keys.pop().unwrap_or_default();

        (
            separator,
            Self {
                keys: right_keys,
                children: right_children,
            },
        )
    }

    /// Serialize the node to a block.
    pub fn to_page(&self) -> Result<Page, NodeError> {
        let size = self.byte_size();
        if size > DATA_SPACE {
            return Err(NodeError::Overfull(size));
        }

        let mut page = Page::formatted(PageType::BTreeInternal);
        page.write_u16(PageHeader::SIZE, self.keys.len() as u16);

        let mut offset = DATA_OFFSET;
        let first = self.children[0];
        page.write_u64(offset, first.page);
        page.write_u64(offset + 8, first.count);
        offset += CHILD_REF_SIZE;

        for (key, child) in self.keys.iter().zip(&self.children[1..]) {
            page.write_u16(offset, key.len() as u16);
            offset += 2;
            page.write_bytes(offset, key);
            offset += key.len();
            page.write_u64(offset, child.page);
            page.write_u64(offset + 8, child.count);
            offset += CHILD_REF_SIZE;
        }

        Ok(page)
    }

    /// Deserialize an internal node from a block.
    pub fn from_page(page: &Page) -> Result<Self, NodeError> {
        let page_type = page.page_type_byte();
        if page_type != PageType::BTreeInternal as u8 {
            return Err(NodeError::UnexpectedPageType(page_type));
        }

        let key_count = page.read_u16(PageHeader::SIZE) as usize;
        let mut reader = NodeReader::new(page);

        let mut children = Vec::with_capacity(key_count + 1);
        let mut keys: Vec<Vec<u8>> = Vec::with_capacity(key_count);
        children.push(reader.child(0)?);

        for index in 0..key_count {
            let key_len = reader.u16()? as usize;
            if key_len > MAX_KEY_SIZE {
                return Err(NodeError::KeyTooLarge(key_len));
            }
            let key = reader.bytes(key_len)?.to_vec();
            if let Some(prev) = keys.last()
                && *prev >= key
            {
                return Err(NodeError::KeysOutOfOrder { index });
            }
            keys.push(key);
            children.push(reader.child(index + 1)?);
        }

        Ok(Self { keys, children })
    }
}

/// A decoded node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Internal(InternalNode),
    Leaf(LeafNode),
}

impl Node {
    /// Decode whichever node type the block holds.
    pub fn from_page(page: &Page) -> Result<Self, NodeError> {
        let page_type = page.page_type_byte();
        if page_type == PageType::BTreeLeaf as u8 {
            Ok(Self::Leaf(LeafNode::from_page(page)?))
        } else if page_type == PageType::BTreeInternal as u8 {
            Ok(Self::Internal(InternalNode::from_page(page)?))
        } else {
            Err(NodeError::UnexpectedPageType(page_type))
        }
    }

    /// Serialize the node to a block.
    pub fn to_page(&self) -> Result<Page, NodeError> {
        match self {
            Self::Internal(node) => node.to_page(),
            Self::Leaf(node) => node.to_page(),
        }
    }

    /// Entries below this node.
    #[must_use]
    pub fn count(&self) -> u64 {
        match self {
            Self::Internal(node) => node.total_count(),
            Self::Leaf(node) => node.len() as u64,
        }
    }
}

/// Pick the index in `[min, max]` where the running byte total first
/// reaches half of the whole.
fn split_point(sizes: &[usize], min: usize, max: usize) -> usize {
    let total: usize = sizes.iter().sum();
    let mut running = 0;
    let mut at = sizes.len();
    for (i, size) in sizes.iter().enumerate() {
        running += size;
        if running * 2 >= total {
            at = i + 1;
            break;
        }
    }
    at.clamp(min, max)
}

/// Bounds-checked sequential reader over a node's data area.
struct NodeReader<'a> {
    page: &'a Page,
    offset: usize,
}

impl<'a> NodeReader<'a> {
    const fn new(page: &'a Page) -> Self {
        Self {
            page,
            offset: DATA_OFFSET,
        }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], NodeError> {
        let bytes = self
            .page
            .get_bytes(self.offset, len)
            .ok_or(NodeError::Truncated {
                offset: self.offset,
            })?;
        self.offset += len;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, NodeError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, NodeError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u64(&mut self) -> Result<u64, NodeError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.bytes(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn child(&mut self, index: usize) -> Result<ChildRef, NodeError> {
        let page = self.u64()?;
        let count = self.u64()?;
        if page == 0 {
            return Err(NodeError::InvalidChild { index });
        }
        Ok(ChildRef { page, count })
    }
}

/// Errors decoding or encoding a node.
#[derive(Debug)]
pub enum NodeError {
    /// The block is not the expected node type.
    UnexpectedPageType(u8),
    /// A length field points past the end of the block.
    Truncated { offset: usize },
    /// A stored key is longer than `MAX_KEY_SIZE`.
    KeyTooLarge(usize),
    /// Unknown leaf entry flags.
    InvalidEntryFlags(u8),
    /// An overflow entry with a malformed reference.
    InvalidOverflowRef,
    /// Keys are not strictly ascending.
    KeysOutOfOrder { index: usize },
    /// A child pointer refers to the header block.
    InvalidChild { index: usize },
    /// The node does not fit in a block.
    Overfull(usize),
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnexpectedPageType(t) => write!(f, "unexpected block type for node: 0x{t:02x}"),
            Self::Truncated { offset } => write!(f, "node data truncated at offset {offset}"),
            Self::KeyTooLarge(len) => write!(f, "stored key of {len} bytes exceeds {MAX_KEY_SIZE}"),
            Self::InvalidEntryFlags(flags) => write!(f, "invalid leaf entry flags: 0x{flags:02x}"),
            Self::InvalidOverflowRef => write!(f, "invalid overflow reference in leaf entry"),
            Self::KeysOutOfOrder { index } => write!(f, "node keys out of order at index {index}"),
            Self::InvalidChild { index } => write!(f, "child {index} points at block 0"),
            Self::Overfull(size) => {
                write!(f, "node of {size} bytes exceeds block capacity {DATA_SPACE}")
            }
        }
    }
}

impl std::error::Error for NodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &[u8], value: &[u8]) -> LeafEntry {
        LeafEntry {
            key: key.to_vec(),
            value: LeafValue::Inline(value.to_vec()),
        }
    }

    #[test]
    fn test_leaf_roundtrip() {
        let leaf = LeafNode {
            prev_leaf: 3,
            next_leaf: 9,
            entries: vec![
                entry(b"apple", b"1"),
                entry(b"banana", b""),
                LeafEntry {
                    key: b"cherry".to_vec(),
                    value: LeafValue::Overflow(OverflowRef::new(42, 5000)),
                },
            ],
        };

        let page = leaf.to_page().expect("serialize");
        let restored = LeafNode::from_page(&page).expect("parse");
        assert_eq!(restored, leaf);
    }

    #[test]
    fn test_leaf_bounds() {
        let leaf = LeafNode {
            prev_leaf: 0,
            next_leaf: 0,
            entries: vec![entry(b"b", b""), entry(b"d", b"")],
        };

        assert_eq!(leaf.search(b"b"), Ok(0));
        assert_eq!(leaf.search(b"c"), Err(1));
        assert_eq!(leaf.lower_bound(b"b"), 0);
        assert_eq!(leaf.upper_bound(b"b"), 1);
        assert_eq!(leaf.lower_bound(b"e"), 2);
    }

    #[test]
    fn test_internal_roundtrip_and_routing() {
        let node = InternalNode {
            keys: vec![b"m".to_vec(), b"t".to_vec()],
            children: vec![
                ChildRef { page: 1, count: 10 },
                ChildRef { page: 2, count: 20 },
                ChildRef { page: 3, count: 30 },
            ],
        };

        let page = node.to_page().expect("serialize");
        let restored = InternalNode::from_page(&page).expect("parse");
        assert_eq!(restored, node);

        assert_eq!(node.child_index(b"a"), 0);
        assert_eq!(node.child_index(b"m"), 1);
        assert_eq!(node.child_index(b"s"), 1);
        assert_eq!(node.child_index(b"z"), 2);
        assert_eq!(node.total_count(), 60);
        assert_eq!(node.count_before(2), 30);
    }

    #[test]
    fn test_leaf_split_by_bytes() {
        let mut leaf = LeafNode::new();
        for i in 0..40u8 {
            leaf.entries.push(entry(&[i], &[0u8; 300]));
        }
        assert!(!leaf.fits());

        let right = leaf.split();
        assert!(leaf.fits());
        assert!(right.fits());
        assert_eq!(leaf.len() + right.len(), 40);
        assert!(leaf.entries.last().expect("left").key < right.entries[0].key);
    }

    #[test]
    fn test_internal_split_keeps_counts() {
        let mut node = InternalNode {
            keys: (1..=9u8).map(|i| vec![i; 900]).collect(),
            children: (0..10u64).map(|i| ChildRef { page: i + 1, count: i }).collect(),
        };
        let total = node.total_count();
        assert!(!node.fits());

        let (separator, right) = node.split();
        assert_eq!(node.children.len(), node.keys.len() + 1);
        assert_eq!(right.children.len(), right.keys.len() + 1);
        assert!(node.keys.iter().all(|k| *k < separator));
        assert!(right.keys.iter().all(|k| *k > separator));
        assert_eq!(node.total_count() + right.total_count(), total);
    }

    #[test]
    fn test_overfull_leaf_rejected() {
        let mut leaf = LeafNode::new();
        for i in 0..10u8 {
            leaf.entries.push(entry(&[i], &[0u8; 1000]));
        }
        assert!(matches!(leaf.to_page(), Err(NodeError::Overfull(_))));
    }

    #[test]
    fn test_corrupt_length_detected() {
        let leaf = LeafNode {
            prev_leaf: 0,
            next_leaf: 0,
            entries: vec![entry(b"key", b"value")],
        };
        let mut page = leaf.to_page().expect("serialize");
        // Claim a value far longer than the block.
        page.write_u16(DATA_OFFSET + 3, u16::MAX);

        assert!(matches!(
            LeafNode::from_page(&page),
            Err(NodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_keys_out_of_order_detected() {
        let leaf = LeafNode {
            prev_leaf: 0,
            next_leaf: 0,
            entries: vec![entry(b"a", b""), entry(b"b", b"")],
        };
        let mut page = leaf.to_page().expect("serialize");
        // Rewrite the second key so that it equals the first.
        page.write_bytes(DATA_OFFSET + LEAF_ENTRY_OVERHEAD + 1 + LEAF_ENTRY_OVERHEAD, b"a");

        assert!(matches!(
            LeafNode::from_page(&page),
            Err(NodeError::KeysOutOfOrder { index: 1 })
        ));
    }

    #[test]
    fn test_node_dispatch() {
        let leaf = LeafNode::new();
        let page = leaf.to_page().expect("serialize");
        assert!(matches!(Node::from_page(&page), Ok(Node::Leaf(_))));

        let page = Page::formatted(PageType::Overflow);
        assert!(matches!(
            Node::from_page(&page),
            Err(NodeError::UnexpectedPageType(_))
        ));
    }
}
