//! Object identifiers.
//!
//! An `ObjectId` is the 128-bit primary key of the primary object file and
//! the mandatory suffix of every index key. Ids compare as unsigned
//! big-endian integers, which is also the byte order of their raw form.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A unique identifier for a stored object.
///
/// # Invariants
///
/// - The ID is exactly 16 bytes.
/// - Ordering of ids equals the unsigned lexicographic order of their bytes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ObjectId(pub [u8; 16]);

impl ObjectId {
    /// Length of the raw form.
    pub const LEN: usize = 16;

    /// Smallest id; used as the suffix of "continue before" boundary keys.
    pub const MIN: Self = Self([0u8; 16]);

    /// Largest id; used as the suffix of "continue after" boundary keys.
    pub const MAX: Self = Self([0xFFu8; 16]);

    /// Create an id from an integer, stored big-endian so that id order
    /// equals integer order.
    #[must_use]
    pub const fn from_u128(n: u128) -> Self {
        Self(n.to_be_bytes())
    }

    /// The id as an integer.
    #[must_use]
    pub const fn as_u128(&self) -> u128 {
        u128::from_be_bytes(self.0)
    }

    /// Create a random id.
    #[must_use]
    pub fn new_random() -> Self {
        Self(rand::random())
    }

    /// Read an id from exactly 16 bytes.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Get the underlying byte array.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 16]> for ObjectId {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl From<ObjectId> for [u8; 16] {
    fn from(id: ObjectId) -> Self {
        id.0
    }
}

impl From<u128> for ObjectId {
    fn from(n: u128) -> Self {
        Self::from_u128(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_order_matches_integers() {
        let ids: Vec<ObjectId> = [0u128, 1, 255, 256, u128::from(u64::MAX) + 1]
            .into_iter()
            .map(ObjectId::from_u128)
            .collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert!(ids.windows(2).all(|w| w[0].as_bytes() < w[1].as_bytes()));
    }

    #[test]
    fn test_object_id_sentinels() {
        assert!(ObjectId::MIN <= ObjectId::from_u128(0));
        assert!(ObjectId::MAX >= ObjectId::from_u128(u128::MAX));
        assert_eq!(ObjectId::MAX.as_u128(), u128::MAX);
    }

    #[test]
    fn test_object_id_display_hex() {
        let id = ObjectId::from_u128(0xAB);
        assert_eq!(format!("{id}"), "000000000000000000000000000000ab");
    }

    #[test]
    fn test_object_id_from_slice() {
        let id = ObjectId::from_u128(42);
        assert_eq!(ObjectId::from_slice(id.as_bytes()), Some(id));
        assert_eq!(ObjectId::from_slice(&[0u8; 15]), None);
    }

    #[test]
    fn test_random_ids_differ() {
        assert_ne!(ObjectId::new_random(), ObjectId::new_random());
    }
}
