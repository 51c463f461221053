//! Positioned iteration over a B+Tree.
//!
//! A `RawCursor` holds a position in the leaf chain and the decoded leaf it
//! points into. It does not borrow the tree: every move takes the tree
//! explicitly, so a cursor can outlive the lock guard of one call and be
//! driven again under the next. The cached leaf is revalidated against the
//! block cache on every move, so a leaf rewritten in between is re-read.

use std::sync::Arc;

use crate::storage::btree::node::{LeafEntry, LeafNode, LeafValue};
use crate::storage::btree::tree::{BTree, BTreeError};
use crate::storage::page::{Page, PageId, PageType};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
enum Position {
    /// Before the first move.
    #[default]
    Unstarted,
    /// On an entry.
    At { leaf: PageId, slot: usize },
    /// Between entries: before `slot` of `leaf` (which may equal its length).
    Gap { leaf: PageId, slot: usize },
    /// Moved past either end. Stays here until reset or repositioned.
    Exhausted,
}

/// An opaque, copyable cursor position.
///
/// A bookmark is only meaningful for the file state it was taken from; after
/// structural mutations it may point at a different entry or nowhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bookmark {
    position: Position,
    generation: u64,
}

impl Bookmark {
    /// Generation of the tree when the bookmark was taken.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

struct LoadedLeaf {
    page_id: PageId,
    page: Arc<Page>,
    node: LeafNode,
}

/// A cursor over the entries of one tree, in key order.
#[derive(Default)]
pub struct RawCursor {
    position: Position,
    leaf: Option<LoadedLeaf>,
}

impl RawCursor {
    /// A cursor positioned before the first entry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            position: Position::Unstarted,
            leaf: None,
        }
    }

    /// True if the cursor is on an entry.
    #[must_use]
    pub const fn is_positioned(&self) -> bool {
        matches!(self.position, Position::At { .. })
    }

    /// True if the last move ran off either end.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        matches!(self.position, Position::Exhausted)
    }

    /// Return to the unstarted state.
    pub fn reset(&mut self) {
        self.position = Position::Unstarted;
        self.leaf = None;
    }

    /// Key of the current entry.
    #[must_use]
    pub fn key(&self) -> Option<&[u8]> {
        self.entry().map(|e| e.key.as_slice())
    }

    /// Stored value of the current entry (may be an overflow reference).
    #[must_use]
    pub fn leaf_value(&self) -> Option<&LeafValue> {
        self.entry().map(|e| &e.value)
    }

    /// Materialized value of the current entry.
    pub fn value(&self, tree: &BTree) -> Result<Option<Vec<u8>>, BTreeError> {
        self.leaf_value()
            .map(|value| tree.resolve_value(value))
            .transpose()
    }

    /// Move to the next entry. From the unstarted state this is the first entry.
    pub fn move_next(&mut self, tree: &BTree) -> Result<bool, BTreeError> {
        match self.position {
            Position::Unstarted => self.go_to_first(tree),
            Position::Exhausted => Ok(false),
            Position::At { leaf, slot } => self.forward_from(tree, leaf, slot + 1),
            Position::Gap { leaf, slot } => self.forward_from(tree, leaf, slot),
        }
    }

    /// Move to the previous entry. From the unstarted state this is the last entry.
    pub fn move_previous(&mut self, tree: &BTree) -> Result<bool, BTreeError> {
        match self.position {
            Position::Unstarted => self.go_to_last(tree),
            Position::Exhausted => Ok(false),
            Position::At { leaf, slot } | Position::Gap { leaf, slot } => {
                self.backward_from(tree, leaf, slot.checked_sub(1))
            }
        }
    }

    /// Position on the first entry. Returns false if the tree is empty.
    pub fn go_to_first(&mut self, tree: &BTree) -> Result<bool, BTreeError> {
        let leaf = tree.first_leaf()?;
        self.forward_from(tree, leaf, 0)
    }

    /// Position on the last entry. Returns false if the tree is empty.
    pub fn go_to_last(&mut self, tree: &BTree) -> Result<bool, BTreeError> {
        let leaf = tree.last_leaf()?;
        self.backward_from(tree, leaf, Some(usize::MAX))
    }

    /// Position on the entry at a 0-based rank.
    ///
    /// Out of range resets the cursor and returns false.
    pub fn go_to_rank(&mut self, tree: &BTree, rank: u64) -> Result<bool, BTreeError> {
        match tree.locate_rank(rank)? {
            Some((leaf, slot)) => {
                self.load_leaf(tree, leaf)?;
                self.position = Position::At { leaf, slot };
                Ok(true)
            }
            None => {
                self.reset();
                Ok(false)
            }
        }
    }

    /// 0-based rank of the current entry, or `None` if not on an entry.
    pub fn rank(&self, tree: &BTree) -> Result<Option<u64>, BTreeError> {
        self.key().map(|key| tree.rank_of(key)).transpose()
    }

    /// Park the cursor so that the next forward move yields the first entry
    /// whose key is `> target`, and the next backward move the last entry `<= target`.
    pub fn seek_after(&mut self, tree: &BTree, target: &[u8]) -> Result<(), BTreeError> {
        let (leaf, slot) = tree.locate_upper(target)?;
        self.load_leaf(tree, leaf)?;
        self.position = Position::Gap { leaf, slot };
        Ok(())
    }

    /// Park the cursor so that the next backward move yields the last entry
    /// whose key is `< target`, and the next forward move the first entry `>= target`.
    pub fn seek_before(&mut self, tree: &BTree, target: &[u8]) -> Result<(), BTreeError> {
        let (leaf, slot) = tree.locate_lower(target)?;
        self.load_leaf(tree, leaf)?;
        self.position = Position::Gap { leaf, slot };
        Ok(())
    }

    /// Capture the current position, or `None` before the first move and
    /// after running off an end.
    #[must_use]
    pub const fn bookmark(&self, tree: &BTree) -> Option<Bookmark> {
        match self.position {
            Position::Unstarted | Position::Exhausted => None,
            position => Some(Bookmark {
                position,
                generation: tree.generation(),
            }),
        }
    }

    /// Return to a bookmarked position.
    ///
    /// Returns false (and resets) if the bookmarked leaf no longer exists or
    /// no longer has the bookmarked slot.
    pub fn restore(&mut self, tree: &BTree, bookmark: Bookmark) -> Result<bool, BTreeError> {
        let (Position::At { leaf, slot } | Position::Gap { leaf, slot }) = bookmark.position else {
            self.reset();
            return Ok(false);
        };

        if bookmark.generation != tree.generation() {
            tracing::debug!(
                "restoring bookmark from generation {} at generation {}",
                bookmark.generation,
                tree.generation()
            );
        }

        if leaf == 0 || leaf >= tree.file().total_pages() {
            self.reset();
            return Ok(false);
        }
        let page = tree.file().read_page(leaf)?;
        if page.page_type_byte() != PageType::BTreeLeaf as u8 {
            self.reset();
            return Ok(false);
        }

        let len = self.load_leaf(tree, leaf)?.len();
        let in_bounds = match bookmark.position {
            Position::At { .. } => slot < len,
            _ => slot <= len,
        };
        if in_bounds {
            self.position = bookmark.position;
        } else {
            self.reset();
        }
        Ok(in_bounds)
    }

    fn entry(&self) -> Option<&LeafEntry> {
        let Position::At { leaf, slot } = self.position else {
            return None;
        };
        self.leaf
            .as_ref()
            .filter(|loaded| loaded.page_id == leaf)
            .and_then(|loaded| loaded.node.entries.get(slot))
    }

    /// Walk forward from `slot` of `leaf` to the first existing entry.
    fn forward_from(
        &mut self,
        tree: &BTree,
        mut leaf: PageId,
        mut slot: usize,
    ) -> Result<bool, BTreeError> {
        for _ in 0..=tree.file().total_pages() {
            let node = self.load_leaf(tree, leaf)?;
            let (len, next) = (node.len(), node.next_leaf);
            if slot < len {
                self.position = Position::At { leaf, slot };
                return Ok(true);
            }
            if next == 0 {
                self.position = Position::Exhausted;
                self.leaf = None;
                return Ok(false);
            }
            leaf = next;
            slot = 0;
        }
        Err(chain_cycle())
    }

    /// Walk backward from `slot` of `leaf` (`None`: before the leaf's first
    /// entry) to the last existing entry at or before it.
    fn backward_from(
        &mut self,
        tree: &BTree,
        mut leaf: PageId,
        mut slot: Option<usize>,
    ) -> Result<bool, BTreeError> {
        for _ in 0..=tree.file().total_pages() {
            let node = self.load_leaf(tree, leaf)?;
            let (len, prev) = (node.len(), node.prev_leaf);
            if let Some(s) = slot
                && len > 0
            {
                self.position = Position::At {
                    leaf,
                    slot: s.min(len - 1),
                };
                return Ok(true);
            }
            if prev == 0 {
                self.position = Position::Exhausted;
                self.leaf = None;
                return Ok(false);
            }
            leaf = prev;
            slot = Some(usize::MAX);
        }
        Err(chain_cycle())
    }

    /// Make `page_id` the loaded leaf, re-decoding only if the cached block changed.
    fn load_leaf(&mut self, tree: &BTree, page_id: PageId) -> Result<&LeafNode, BTreeError> {
        let page = tree.file().read_page(page_id)?;
        let fresh = matches!(
            &self.leaf,
            Some(loaded) if loaded.page_id == page_id && Arc::ptr_eq(&loaded.page, &page)
        );
        if !fresh {
            let node = LeafNode::from_page(&page)?;
            self.leaf = Some(LoadedLeaf {
                page_id,
                page,
                node,
            });
        }
        self.leaf
            .as_ref()
            .map(|loaded| &loaded.node)
            .ok_or_else(|| BTreeError::Corrupt(format!("leaf {page_id} was not loaded")))
    }
}

impl std::fmt::Debug for RawCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawCursor")
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

fn chain_cycle() -> BTreeError {
    BTreeError::Corrupt("leaf chain longer than the file (cycle?)".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::header::FileKind;
    use tempfile::tempdir;

    fn key(i: u32) -> Vec<u8> {
        i.to_be_bytes().to_vec()
    }

    fn tree_with(count: u32) -> (tempfile::TempDir, BTree) {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("cursor.btree");
        let mut tree = BTree::create(&path, FileKind::Objects, Vec::new(), 128).expect("create");
        for i in 0..count {
            tree.insert(&key(i * 10), &[7u8; 60]).expect("insert");
        }
        (dir, tree)
    }

    fn current(cursor: &RawCursor) -> u32 {
        let bytes: [u8; 4] = cursor.key().expect("positioned").try_into().expect("4 bytes");
        u32::from_be_bytes(bytes)
    }

    #[test]
    fn test_forward_and_backward_scan() {
        let (_dir, tree) = tree_with(1000);
        let mut cursor = RawCursor::new();

        let mut seen = Vec::new();
        while cursor.move_next(&tree).expect("next") {
            seen.push(current(&cursor));
        }
        assert_eq!(seen, (0..1000).map(|i| i * 10).collect::<Vec<_>>());
        assert!(cursor.is_exhausted());
        assert!(!cursor.move_next(&tree).expect("sticky"));
        assert!(!cursor.move_previous(&tree).expect("sticky"));

        cursor.reset();
        let mut seen = Vec::new();
        while cursor.move_previous(&tree).expect("prev") {
            seen.push(current(&cursor));
        }
        assert_eq!(seen, (0..1000).rev().map(|i| i * 10).collect::<Vec<_>>());
    }

    #[test]
    fn test_empty_tree() {
        let (_dir, tree) = tree_with(0);
        let mut cursor = RawCursor::new();
        assert!(!cursor.go_to_first(&tree).expect("first"));
        assert!(!cursor.go_to_last(&tree).expect("last"));
        assert!(!cursor.go_to_rank(&tree, 0).expect("rank"));
        assert_eq!(cursor.key(), None);
    }

    #[test]
    fn test_rank_positioning() {
        let (_dir, tree) = tree_with(2000);
        let mut cursor = RawCursor::new();

        assert!(cursor.go_to_rank(&tree, 1234).expect("go"));
        assert_eq!(current(&cursor), 12340);
        assert_eq!(cursor.rank(&tree).expect("rank"), Some(1234));

        assert!(cursor.move_previous(&tree).expect("prev"));
        assert_eq!(cursor.rank(&tree).expect("rank"), Some(1233));

        assert!(!cursor.go_to_rank(&tree, 2000).expect("out of range"));
        assert!(!cursor.is_positioned());
    }

    #[test]
    fn test_seek_gaps() {
        let (_dir, tree) = tree_with(500);
        let mut cursor = RawCursor::new();

        cursor.seek_after(&tree, &key(50)).expect("seek");
        assert!(cursor.move_next(&tree).expect("next"));
        assert_eq!(current(&cursor), 60);

        cursor.seek_after(&tree, &key(55)).expect("seek");
        assert!(cursor.move_previous(&tree).expect("prev"));
        assert_eq!(current(&cursor), 50);

        cursor.seek_before(&tree, &key(50)).expect("seek");
        assert!(cursor.move_previous(&tree).expect("prev"));
        assert_eq!(current(&cursor), 40);

        cursor.seek_before(&tree, &key(50)).expect("seek");
        assert!(cursor.move_next(&tree).expect("next"));
        assert_eq!(current(&cursor), 50);

        cursor.seek_after(&tree, &key(4990)).expect("seek past end");
        assert!(!cursor.move_next(&tree).expect("next"));
    }

    #[test]
    fn test_bookmark_restore() {
        let (_dir, tree) = tree_with(800);
        let mut cursor = RawCursor::new();
        assert!(cursor.bookmark(&tree).is_none());

        assert!(cursor.go_to_rank(&tree, 400).expect("go"));
        let bookmark = cursor.bookmark(&tree).expect("bookmark");
        assert_eq!(bookmark.generation(), tree.generation());

        for _ in 0..100 {
            cursor.move_next(&tree).expect("next");
        }
        assert!(cursor.restore(&tree, bookmark).expect("restore"));
        assert_eq!(current(&cursor), 4000);
        assert!(cursor.move_next(&tree).expect("next"));
        assert_eq!(current(&cursor), 4010);
    }

    #[test]
    fn test_cached_leaf_refreshed_after_write() {
        let (_dir, mut tree) = tree_with(3);
        let mut cursor = RawCursor::new();
        assert!(cursor.go_to_first(&tree).expect("first"));
        assert_eq!(current(&cursor), 0);

        tree.insert(&key(5), b"").expect("insert");
        assert!(cursor.move_next(&tree).expect("next"));
        assert_eq!(current(&cursor), 5);
    }
}
