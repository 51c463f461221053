//! Cursors over a collection's primary file or one of its indexes.
//!
//! A `FileCursor` walks keys in order and loads the object each key refers
//! to. Index entries whose object is gone or has another type are reported
//! as `Loaded::Stale` and `Loaded::TypeMismatch` and the walk continues;
//! only structural damage, I/O and serializer failures are errors.
//!
//! Every operation takes the collection's lock guard. The cursor itself
//! holds no lock, so it can be driven under successive guards, but
//! positions taken under one guard are only meaningful under another if the
//! collection was not mutated in between (see `bookmark`).

use std::sync::Arc;

use crate::codec::{self, MissingFieldAction};
use crate::collection::CollectionState;
use crate::error::StoreError;
use crate::lock::Locked;
use crate::objects::ObjectBTreeFile;
use crate::serializer::{Loaded, ObjectSerializer};
use crate::storage::btree::{BTree, Bookmark, RawCursor};
use crate::types::ObjectId;

/// Which file a cursor walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Source {
    Objects,
    Index(usize),
}

/// A saved cursor position. Valid while the collection is not structurally
/// modified; restoring after a mutation may land on another entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorBookmark {
    collection_id: u64,
    source: Source,
    raw: Bookmark,
}

struct Current<T> {
    object_id: ObjectId,
    loaded: Loaded<T>,
}

/// Ordered, bidirectional traversal yielding objects of type `T`.
pub struct FileCursor<T, S: ObjectSerializer> {
    collection_id: u64,
    source: Source,
    raw: RawCursor,
    serializer: Arc<S>,
    current: Option<Current<T>>,
}

impl<T, S> FileCursor<T, S>
where
    S: ObjectSerializer,
    T: TryFrom<S::Object>,
{
    pub(crate) fn new(collection_id: u64, index: Option<usize>, serializer: Arc<S>) -> Self {
        Self {
            collection_id,
            source: index.map_or(Source::Objects, Source::Index),
            raw: RawCursor::new(),
            serializer,
            current: None,
        }
    }

    /// True if this cursor walks an index rather than the primary file.
    #[must_use]
    pub const fn is_index_cursor(&self) -> bool {
        matches!(self.source, Source::Index(_))
    }

    /// Advance to the next entry. Returns false at the end.
    pub fn move_next(&mut self, guard: &impl Locked<S>) -> Result<bool, StoreError> {
        let state = self.checked_state(guard)?;
        let tree = source_tree(self.source, state)?;
        let moved = self.raw.move_next(tree)?;
        self.load_current(state, tree, moved)
    }

    /// Step back to the previous entry. Returns false at the start.
    pub fn move_previous(&mut self, guard: &impl Locked<S>) -> Result<bool, StoreError> {
        let state = self.checked_state(guard)?;
        let tree = source_tree(self.source, state)?;
        let moved = self.raw.move_previous(tree)?;
        self.load_current(state, tree, moved)
    }

    /// Position on the first entry. Returns false if there are none.
    pub fn go_to_first(&mut self, guard: &impl Locked<S>) -> Result<bool, StoreError> {
        let state = self.checked_state(guard)?;
        let tree = source_tree(self.source, state)?;
        let moved = self.raw.go_to_first(tree)?;
        self.load_current(state, tree, moved)
    }

    /// Position on the last entry. Returns false if there are none.
    pub fn go_to_last(&mut self, guard: &impl Locked<S>) -> Result<bool, StoreError> {
        let state = self.checked_state(guard)?;
        let tree = source_tree(self.source, state)?;
        let moved = self.raw.go_to_last(tree)?;
        self.load_current(state, tree, moved)
    }

    /// Position on the entry with 0-based `rank`.
    ///
    /// Out of range resets the cursor and returns false.
    pub fn go_to_object(&mut self, guard: &impl Locked<S>, rank: u64) -> Result<bool, StoreError> {
        let state = self.checked_state(guard)?;
        let tree = source_tree(self.source, state)?;
        let moved = self.raw.go_to_rank(tree, rank)?;
        self.load_current(state, tree, moved)
    }

    /// 0-based rank of the current entry.
    ///
    /// # Errors
    ///
    /// Returns `NotStarted` if the cursor is not on an entry.
    pub fn current_rank(&self, guard: &impl Locked<S>) -> Result<u64, StoreError> {
        let state = self.checked_state(guard)?;
        let tree = source_tree(self.source, state)?;
        self.raw.rank(tree)?.ok_or(StoreError::NotStarted)
    }

    /// Move `n` entries (backward when negative).
    ///
    /// From an unstarted cursor a forward skip counts from before the first
    /// entry, so `skip(1)` lands on the first; a backward skip counts from
    /// after the last. If the target is out of range the cursor is reset
    /// and false returned.
    pub fn skip(&mut self, guard: &impl Locked<S>, n: i64) -> Result<bool, StoreError> {
        let state = self.checked_state(guard)?;
        let tree = source_tree(self.source, state)?;

        if n == 0 {
            return Ok(self.raw.is_positioned());
        }

        let mut remaining = n;
        if !self.raw.is_positioned() {
            if self.raw.is_exhausted() {
                self.raw.reset();
            }
            let stepped = if n > 0 {
                self.raw.move_next(tree)?
            } else {
                self.raw.move_previous(tree)?
            };
            if !stepped {
                self.raw.reset();
                return self.load_current(state, tree, false);
            }
            remaining -= n.signum();
        }

        if remaining != 0 {
            let rank = self.raw.rank(tree)?.ok_or(StoreError::NotStarted)?;
            let target = i128::from(rank) + i128::from(remaining);
            let moved = match u64::try_from(target) {
                Ok(target) => self.raw.go_to_rank(tree, target)?,
                Err(_) => {
                    self.raw.reset();
                    false
                }
            };
            return self.load_current(state, tree, moved);
        }
        self.load_current(state, tree, true)
    }

    /// The current object, or `None` for a stale or mismatched entry.
    ///
    /// # Errors
    ///
    /// Returns `NotStarted` if the cursor is not on an entry.
    pub fn current(&self) -> Result<Option<&T>, StoreError> {
        Ok(self.current_loaded()?.as_found())
    }

    /// Object id of the current entry.
    pub fn current_object_id(&self) -> Result<ObjectId, StoreError> {
        self.current
            .as_ref()
            .map(|c| c.object_id)
            .ok_or(StoreError::NotStarted)
    }

    /// True if the current entry loaded as a `T`.
    pub fn current_type_compatible(&self) -> Result<bool, StoreError> {
        Ok(self.current_loaded()?.is_found())
    }

    /// Outcome of loading the current entry.
    pub fn current_loaded(&self) -> Result<&Loaded<T>, StoreError> {
        self.current
            .as_ref()
            .map(|c| &c.loaded)
            .ok_or(StoreError::NotStarted)
    }

    /// Save the position, or `None` if the cursor is unstarted or exhausted.
    pub fn bookmark(&self, guard: &impl Locked<S>) -> Result<Option<CursorBookmark>, StoreError> {
        let state = self.checked_state(guard)?;
        let tree = source_tree(self.source, state)?;
        Ok(self.raw.bookmark(tree).map(|raw| CursorBookmark {
            collection_id: self.collection_id,
            source: self.source,
            raw,
        }))
    }

    /// Return to a saved position. Returns false (and resets) if the
    /// position no longer exists or was taken by a cursor over another file.
    pub fn reset_to(
        &mut self,
        guard: &impl Locked<S>,
        bookmark: CursorBookmark,
    ) -> Result<bool, StoreError> {
        let state = self.checked_state(guard)?;
        if bookmark.collection_id != self.collection_id {
            return Err(StoreError::WrongCollection);
        }
        let tree = source_tree(self.source, state)?;
        if bookmark.source != self.source {
            tracing::debug!("bookmark taken over another file of the collection");
            self.reset();
            return Ok(false);
        }

        if !self.raw.restore(tree, bookmark.raw)? {
            self.current = None;
            return Ok(false);
        }
        if self.raw.is_positioned() {
            self.load_current(state, tree, true)
        } else {
            self.current = None;
            Ok(true)
        }
    }

    /// Return to the unstarted state.
    pub fn reset(&mut self) {
        self.raw.reset();
        self.current = None;
    }

    /// Park the cursor so that `move_next` yields the first entry after
    /// `item` in this cursor's order.
    ///
    /// With an object id the boundary is the entry `item` itself is stored
    /// under, so entries with equal field values continue without a gap.
    /// Without one every entry with `item`'s field values is skipped.
    pub fn continue_after(
        &mut self,
        guard: &impl Locked<S>,
        item: &S::Object,
    ) -> Result<(), StoreError> {
        let state = self.checked_state(guard)?;
        let tree = source_tree(self.source, state)?;
        let boundary =
            self.boundary_key(state, item, ObjectId::MAX, MissingFieldAction::Last)?;
        self.raw.seek_after(tree, &boundary)?;
        self.current = None;
        Ok(())
    }

    /// Park the cursor so that `move_previous` yields the last entry before
    /// `item` in this cursor's order.
    pub fn continue_before(
        &mut self,
        guard: &impl Locked<S>,
        item: &S::Object,
    ) -> Result<(), StoreError> {
        let state = self.checked_state(guard)?;
        let tree = source_tree(self.source, state)?;
        let boundary =
            self.boundary_key(state, item, ObjectId::MIN, MissingFieldAction::First)?;
        self.raw.seek_before(tree, &boundary)?;
        self.current = None;
        Ok(())
    }

    /// Key to seek around when continuing from `item`. `sentinel` and
    /// `missing` apply only when the item carries no object id.
    fn boundary_key(
        &self,
        state: &CollectionState<S>,
        item: &S::Object,
        sentinel: ObjectId,
        missing: MissingFieldAction,
    ) -> Result<Vec<u8>, StoreError> {
        let object_id = self.serializer.object_id(item);
        match self.source {
            Source::Objects => Ok(object_id.unwrap_or(sentinel).as_bytes().to_vec()),
            Source::Index(position) => {
                let index = state.index_at(position)?;
                match object_id {
                    Some(id) => index.key_for(id, item, &*self.serializer),
                    None => Ok(codec::encode_key(
                        index.definition(),
                        sentinel,
                        item,
                        &*self.serializer,
                        missing,
                    )?),
                }
            }
        }
    }

    fn checked_state<'g>(
        &self,
        guard: &'g impl Locked<S>,
    ) -> Result<&'g CollectionState<S>, StoreError> {
        let state = guard.state();
        if state.id() == self.collection_id {
            Ok(state)
        } else {
            Err(StoreError::WrongCollection)
        }
    }

    /// Load the object under the raw cursor, or clear it if `moved` is false.
    fn load_current(
        &mut self,
        state: &CollectionState<S>,
        tree: &BTree,
        moved: bool,
    ) -> Result<bool, StoreError> {
        self.current = None;
        if !moved {
            return Ok(false);
        }
        let key = self.raw.key().ok_or(StoreError::NotStarted)?;

        let (object_id, payload) = match self.source {
            Source::Objects => (
                ObjectBTreeFile::object_id_of(key)?,
                self.raw.value(tree).map_err(StoreError::from),
            ),
            Source::Index(position) => {
                let object_id = state.index_at(position)?.object_id_of(key)?;
                (object_id, state.objects().load(object_id))
            }
        };
        let object = payload.and_then(|payload| {
            payload
                .map(|bytes| self.serializer.deserialize(&bytes))
                .transpose()
                .map_err(StoreError::from)
        });

        let loaded = match object {
            Ok(None) => {
                tracing::debug!(
                    "Index entry for {} in '{}' is stale",
                    object_id,
                    state.name()
                );
                Loaded::Stale
            }
            Ok(object) => Loaded::from_object(object),
            Err(e) if e.is_structural() => return Err(e),
            Err(e) => {
                tracing::debug!(
                    "Object {} in '{}' could not be loaded ({}); reported as a type mismatch",
                    object_id,
                    state.name(),
                    e
                );
                Loaded::TypeMismatch
            }
        };

        self.current = Some(Current { object_id, loaded });
        Ok(true)
    }
}

fn source_tree<S: ObjectSerializer>(
    source: Source,
    state: &CollectionState<S>,
) -> Result<&BTree, StoreError> {
    match source {
        Source::Objects => Ok(state.objects().tree()),
        Source::Index(position) => Ok(state.index_at(position)?.tree()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::ObjectFile;
    use crate::index::IndexDefinition;
    use crate::testing::{Device, Person, TestObject, TestSerializer, device, person, test_config};
    use tempfile::tempdir;

    async fn populated(dir: &std::path::Path) -> ObjectFile<TestSerializer> {
        let collection = ObjectFile::open(
            &test_config(dir),
            "things",
            vec![IndexDefinition::new("by-name", &["Name"]).expect("valid index")],
            Arc::new(TestSerializer),
        )
        .expect("open collection");
        let mut guard = collection.begin_write().await.expect("write lock");
        for i in 0..10u128 {
            let object = if i % 3 == 0 {
                device(i, &format!("n{i}"), 100 + i64::try_from(i).expect("small"))
            } else {
                person(i, &format!("n{i}"), Some(20))
            };
            guard.insert(ObjectId::from_u128(i), &object).expect("insert");
        }
        drop(guard);
        collection
    }

    #[tokio::test]
    async fn test_type_mismatch_is_reported_and_skipped_over() {
        let dir = tempdir().expect("create temp dir");
        let collection = populated(dir.path()).await;
        let guard = collection.begin_read().await.expect("read lock");

        let mut people = guard.cursor::<Person>(Some("by-name")).expect("cursor");
        let mut found = 0;
        let mut mismatched = 0;
        while people.move_next(&guard).expect("move") {
            match people.current_loaded().expect("loaded") {
                Loaded::Found(_) => found += 1,
                Loaded::TypeMismatch => mismatched += 1,
                Loaded::Stale => panic!("no stale entries expected"),
            }
        }
        assert_eq!((found, mismatched), (6, 4));

        let mut devices = guard.cursor::<Device>(None).expect("cursor");
        assert!(devices.go_to_first(&guard).expect("first"));
        assert!(devices.current_type_compatible().expect("current"));
        assert_eq!(devices.current().expect("current").map(|d| d.serial), Some(100));
        assert!(devices.move_next(&guard).expect("next"));
        assert_eq!(devices.current().expect("current"), None);
        assert_eq!(devices.current_object_id().expect("id"), ObjectId::from_u128(1));
    }

    #[tokio::test]
    async fn test_not_started_before_positioning() {
        let dir = tempdir().expect("create temp dir");
        let collection = populated(dir.path()).await;
        let guard = collection.begin_read().await.expect("read lock");
        let cursor = guard.cursor::<TestObject>(None).expect("cursor");

        assert!(matches!(cursor.current(), Err(StoreError::NotStarted)));
        assert!(matches!(cursor.current_rank(&guard), Err(StoreError::NotStarted)));
        assert_eq!(cursor.bookmark(&guard).expect("bookmark"), None);
    }

    #[tokio::test]
    async fn test_skip_semantics() {
        let dir = tempdir().expect("create temp dir");
        let collection = populated(dir.path()).await;
        let guard = collection.begin_read().await.expect("read lock");
        let mut cursor = guard.cursor::<TestObject>(Some("by-name")).expect("cursor");

        assert!(cursor.skip(&guard, 1).expect("skip"));
        assert_eq!(cursor.current_rank(&guard).expect("rank"), 0);
        assert!(cursor.skip(&guard, 4).expect("skip"));
        assert_eq!(cursor.current_rank(&guard).expect("rank"), 4);
        assert!(cursor.skip(&guard, -2).expect("skip"));
        assert_eq!(cursor.current_rank(&guard).expect("rank"), 2);
        assert!(cursor.skip(&guard, 0).expect("skip"));
        assert_eq!(cursor.current_rank(&guard).expect("rank"), 2);

        assert!(!cursor.skip(&guard, 8).expect("skip past end"));
        assert!(matches!(cursor.current(), Err(StoreError::NotStarted)));

        assert!(cursor.skip(&guard, -1).expect("skip from end"));
        assert_eq!(cursor.current_rank(&guard).expect("rank"), 9);
        cursor.reset();
        assert!(cursor.skip(&guard, -10).expect("skip from end"));
        assert_eq!(cursor.current_rank(&guard).expect("rank"), 0);
        cursor.reset();
        assert!(!cursor.skip(&guard, 11).expect("skip past end"));
        assert!(!cursor.skip(&guard, -11).expect("skip before start"));
    }

    #[tokio::test]
    async fn test_wrong_collection_rejected() {
        let dir = tempdir().expect("create temp dir");
        let first = populated(&dir.path().join("a")).await;
        let second = populated(&dir.path().join("b")).await;
        let first_guard = first.begin_read().await.expect("read lock");
        let second_guard = second.begin_read().await.expect("read lock");

        let mut cursor = first_guard.cursor::<TestObject>(None).expect("cursor");
        assert!(matches!(
            cursor.move_next(&second_guard),
            Err(StoreError::WrongCollection)
        ));
        assert!(cursor.move_next(&first_guard).expect("own guard"));

        let bookmark = cursor.bookmark(&first_guard).expect("bookmark").expect("positioned");
        let mut other = second_guard.cursor::<TestObject>(None).expect("cursor");
        assert!(matches!(
            other.reset_to(&second_guard, bookmark),
            Err(StoreError::WrongCollection)
        ));
    }

    #[tokio::test]
    async fn test_bookmark_from_other_source_resets() {
        let dir = tempdir().expect("create temp dir");
        let collection = populated(dir.path()).await;
        let guard = collection.begin_read().await.expect("read lock");

        let mut by_id = guard.cursor::<TestObject>(None).expect("cursor");
        assert!(by_id.go_to_last(&guard).expect("last"));
        let bookmark = by_id.bookmark(&guard).expect("bookmark").expect("positioned");

        let mut by_name = guard.cursor::<TestObject>(Some("by-name")).expect("cursor");
        assert!(!by_name.reset_to(&guard, bookmark).expect("restore"));
        assert!(matches!(by_name.current(), Err(StoreError::NotStarted)));
    }
}
