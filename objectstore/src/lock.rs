//! Lock tokens for a collection.
//!
//! Every state access goes through one of these guards. Cursor operations
//! take `&impl Locked<S>`, so they cannot run without the collection lock.

use std::ops::{Deref, DerefMut};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};

use crate::collection::CollectionState;
use crate::serializer::ObjectSerializer;

mod sealed {
    pub trait Sealed {}
}

/// Proof that the caller holds a collection lock, shared or exclusive.
pub trait Locked<S: ObjectSerializer>: sealed::Sealed {
    fn state(&self) -> &CollectionState<S>;
}

/// Shared access to a collection. Released on drop.
pub struct ReadGuard<S: ObjectSerializer> {
    inner: OwnedRwLockReadGuard<CollectionState<S>>,
}

/// Exclusive access to a collection. Released on drop.
pub struct WriteGuard<S: ObjectSerializer> {
    inner: OwnedRwLockWriteGuard<CollectionState<S>>,
}

impl<S: ObjectSerializer> ReadGuard<S> {
    pub(crate) const fn new(inner: OwnedRwLockReadGuard<CollectionState<S>>) -> Self {
        Self { inner }
    }
}

impl<S: ObjectSerializer> WriteGuard<S> {
    pub(crate) const fn new(inner: OwnedRwLockWriteGuard<CollectionState<S>>) -> Self {
        Self { inner }
    }
}

impl<S: ObjectSerializer> Deref for ReadGuard<S> {
    type Target = CollectionState<S>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<S: ObjectSerializer> Deref for WriteGuard<S> {
    type Target = CollectionState<S>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<S: ObjectSerializer> DerefMut for WriteGuard<S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl<S: ObjectSerializer> sealed::Sealed for ReadGuard<S> {}
impl<S: ObjectSerializer> sealed::Sealed for WriteGuard<S> {}

impl<S: ObjectSerializer> Locked<S> for ReadGuard<S> {
    fn state(&self) -> &CollectionState<S> {
        &self.inner
    }
}

impl<S: ObjectSerializer> Locked<S> for WriteGuard<S> {
    fn state(&self) -> &CollectionState<S> {
        &self.inner
    }
}
