//! Typed field values extracted from objects for indexing.

use serde::{Deserialize, Serialize};

use crate::types::ObjectId;

/// Type tags, in the order values of different types sort in an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ValueType {
    Null = 0x01,
    Boolean = 0x02,
    Integer = 0x03,
    Double = 0x04,
    DateTime = 0x05,
    String = 0x06,
    CaseInsensitiveString = 0x07,
    Bytes = 0x08,
    Id = 0x09,
}

impl TryFrom<u8> for ValueType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Null),
            0x02 => Ok(Self::Boolean),
            0x03 => Ok(Self::Integer),
            0x04 => Ok(Self::Double),
            0x05 => Ok(Self::DateTime),
            0x06 => Ok(Self::String),
            0x07 => Ok(Self::CaseInsensitiveString),
            0x08 => Ok(Self::Bytes),
            0x09 => Ok(Self::Id),
            _ => Err(value),
        }
    }
}

/// A field value as seen by an index.
///
/// Values of different types never compare equal; they sort by type tag
/// first (see `ValueType`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    /// Milliseconds since the Unix epoch.
    DateTime(i64),
    String(String),
    /// Compared after lowercasing.
    CaseInsensitiveString(String),
    Bytes(Vec<u8>),
    Id(ObjectId),
}

impl FieldValue {
    /// Get the value type discriminant.
    #[must_use]
    pub const fn value_type(&self) -> ValueType {
        match self {
            Self::Null => ValueType::Null,
            Self::Boolean(_) => ValueType::Boolean,
            Self::Integer(_) => ValueType::Integer,
            Self::Double(_) => ValueType::Double,
            Self::DateTime(_) => ValueType::DateTime,
            Self::String(_) => ValueType::String,
            Self::CaseInsensitiveString(_) => ValueType::CaseInsensitiveString,
            Self::Bytes(_) => ValueType::Bytes,
            Self::Id(_) => ValueType::Id,
        }
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<i32> for FieldValue {
    fn from(n: i32) -> Self {
        Self::Integer(i64::from(n))
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Double(n)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<ObjectId> for FieldValue {
    fn from(id: ObjectId) -> Self {
        Self::Id(id)
    }
}

impl<T: Into<Self>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_roundtrip() {
        for tag in 0x01..=0x09u8 {
            let value_type = ValueType::try_from(tag).expect("known tag");
            assert_eq!(value_type as u8, tag);
        }
        assert_eq!(ValueType::try_from(0x00), Err(0x00));
        assert_eq!(ValueType::try_from(0x0A), Err(0x0A));
    }

    #[test]
    fn test_from_conversions() {
        assert_eq!(FieldValue::from(3), FieldValue::Integer(3));
        assert_eq!(FieldValue::from("x"), FieldValue::String("x".to_string()));
        assert_eq!(FieldValue::from(None::<i64>), FieldValue::Null);
        assert_eq!(FieldValue::from(Some(true)), FieldValue::Boolean(true));
    }
}
