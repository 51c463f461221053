//! The object serialization capability consumed by the store.
//!
//! The store never interprets payloads itself. It asks the serializer to
//! turn objects into bytes and back, and to extract the field values that
//! indexes are declared over.

use crate::types::{FieldValue, ObjectId};

/// Converts application objects to and from stored payloads.
///
/// `Object` is the serializer's own object model (typically an enum over
/// every type stored in a collection). Cursors narrow it to a requested
/// element type through `TryFrom`.
pub trait ObjectSerializer: Send + Sync + 'static {
    type Object: Send + Sync + 'static;

    /// Serialize an object to its payload.
    fn serialize(&self, object: &Self::Object) -> Result<Vec<u8>, SerializerError>;

    /// Deserialize a payload.
    fn deserialize(&self, bytes: &[u8]) -> Result<Self::Object, SerializerError>;

    /// Value of a named field, or `None` if the object has no such field.
    fn field_value(&self, name: &str, object: &Self::Object) -> Option<FieldValue>;

    /// The object's own id, if it carries one.
    fn object_id(&self, object: &Self::Object) -> Option<ObjectId>;
}

/// Outcome of loading the object an entry refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded<T> {
    /// The object exists and has the requested type.
    Found(T),
    /// The id no longer resolves to an object.
    Stale,
    /// The object exists but is not of the requested type.
    TypeMismatch,
}

impl<T> Loaded<T> {
    /// Convert a loaded object into the requested type.
    pub fn from_object<O>(object: Option<O>) -> Self
    where
        T: TryFrom<O>,
    {
        match object {
            None => Self::Stale,
            Some(object) => T::try_from(object).map_or(Self::TypeMismatch, Self::Found),
        }
    }

    /// True for `Found`.
    #[must_use]
    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    /// The object, if found.
    #[must_use]
    pub const fn as_found(&self) -> Option<&T> {
        match self {
            Self::Found(value) => Some(value),
            Self::Stale | Self::TypeMismatch => None,
        }
    }
}

/// A serializer failed to encode or decode a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializerError {
    message: String,
}

impl SerializerError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SerializerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "serializer error: {}", self.message)
    }
}

impl std::error::Error for SerializerError {}
