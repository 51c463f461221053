//! Order-preserving binary key codec.
//!
//! An index key is the concatenation of one encoded value per declared
//! field followed by the raw 16-byte object id:
//!
//! ```text
//! +---------+---------+-----+------------------+
//! | field 0 | field 1 | ... | object id (16 B) |
//! +---------+---------+-----+------------------+
//! ```
//!
//! Each field is a type tag followed by a payload chosen so that unsigned
//! byte-wise comparison of keys matches the declared sort order:
//!
//! - Null: tag only
//! - Boolean: one byte, 0 or 1
//! - Integer, date-time: big-endian `i64` with the sign bit flipped
//! - Double: big-endian IEEE-754 bits, sign-flipped for positives and
//!   fully inverted for negatives
//! - String, case-insensitive string, bytes: content with `0x00` escaped as
//!   `0x00 0xFF`, terminated by `0x00 0x01`
//! - Object id: 16 raw bytes
//!
//! Every encoding is prefix free, so a descending field is encoded by
//! complementing its bytes. Boundary markers (`0x00` before everything, `0xFF`
//! after everything) are never complemented.

use crate::index::IndexDefinition;
use crate::serializer::ObjectSerializer;
use crate::storage::btree::MAX_KEY_SIZE;
use crate::types::field_value::ValueType;
use crate::types::{FieldValue, ObjectId};

/// Marker sorting before every encoded value.
const FIRST_MARKER: u8 = 0x00;

/// Marker sorting after every encoded value.
const LAST_MARKER: u8 = 0xFF;

const ESCAPE: u8 = 0x00;
const ESCAPED_ZERO: u8 = 0xFF;
const TERMINATOR: u8 = 0x01;

const SIGN_BIT: u64 = 1 << 63;

/// How to encode a declared field the object does not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingFieldAction {
    /// Encode as null. Used for stored index keys.
    Null,
    /// Encode a marker sorting before every real value.
    First,
    /// Encode a marker sorting after every real value.
    Last,
}

/// A key split back into its parts.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedKey {
    pub object_id: ObjectId,
    /// One entry per declared field; `None` for a boundary marker.
    pub fields: Vec<Option<FieldValue>>,
}

/// Encode the index key of an object.
pub fn encode_key<S: ObjectSerializer>(
    definition: &IndexDefinition,
    object_id: ObjectId,
    object: &S::Object,
    serializer: &S,
    missing: MissingFieldAction,
) -> Result<Vec<u8>, CodecError> {
    let values: Vec<Option<FieldValue>> = definition
        .fields
        .iter()
        .map(|field| serializer.field_value(&field.name, object))
        .collect();
    encode_fields(definition, object_id, &values, missing)
}

/// Encode explicit field values (one per declared field) and an object id.
pub fn encode_fields(
    definition: &IndexDefinition,
    object_id: ObjectId,
    values: &[Option<FieldValue>],
    missing: MissingFieldAction,
) -> Result<Vec<u8>, CodecError> {
    if values.len() != definition.fields.len() {
        return Err(CodecError::FieldCountMismatch {
            expected: definition.fields.len(),
            actual: values.len(),
        });
    }

    let mut key = Vec::with_capacity(32);
    for (field, value) in definition.fields.iter().zip(values) {
        match (value, missing) {
            (Some(value), _) => encode_field(&mut key, value, field.descending),
            (None, MissingFieldAction::Null) => {
                encode_field(&mut key, &FieldValue::Null, field.descending);
            }
            (None, MissingFieldAction::First) => key.push(FIRST_MARKER),
            (None, MissingFieldAction::Last) => key.push(LAST_MARKER),
        }
    }
    key.extend_from_slice(object_id.as_bytes());

    if key.len() > MAX_KEY_SIZE {
        return Err(CodecError::KeyTooLarge(key.len()));
    }
    Ok(key)
}

/// Append one field, complemented when descending.
fn encode_field(out: &mut Vec<u8>, value: &FieldValue, descending: bool) {
    let start = out.len();
    encode_value(out, value);
    if descending {
        for byte in &mut out[start..] {
            *byte = !*byte;
        }
    }
}

/// Append the ascending encoding of a value.
pub fn encode_value(out: &mut Vec<u8>, value: &FieldValue) {
    out.push(value.value_type() as u8);
    match value {
        FieldValue::Null => {}
        FieldValue::Boolean(b) => out.push(u8::from(*b)),
        FieldValue::Integer(n) | FieldValue::DateTime(n) => {
            out.extend_from_slice(&(n.cast_unsigned() ^ SIGN_BIT).to_be_bytes());
        }
        FieldValue::Double(d) => out.extend_from_slice(&order_double(*d).to_be_bytes()),
        FieldValue::String(s) => encode_escaped(out, s.as_bytes()),
        FieldValue::CaseInsensitiveString(s) => encode_escaped(out, s.to_lowercase().as_bytes()),
        FieldValue::Bytes(b) => encode_escaped(out, b),
        FieldValue::Id(id) => out.extend_from_slice(id.as_bytes()),
    }
}

/// Map a double to an integer with the same total order.
///
/// `-0.0` is folded into `0.0` and every NaN into one NaN sorting after
/// positive infinity.
fn order_double(d: f64) -> u64 {
    let d = if d == 0.0 {
        0.0
    } else if d.is_nan() {
        f64::NAN
    } else {
        d
    };
    let bits = d.to_bits();
    if bits & SIGN_BIT == 0 {
        bits ^ SIGN_BIT
    } else {
        !bits
    }
}

fn unorder_double(bits: u64) -> f64 {
    if bits & SIGN_BIT == 0 {
        f64::from_bits(!bits)
    } else {
        f64::from_bits(bits ^ SIGN_BIT)
    }
}

fn encode_escaped(out: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        out.push(b);
        if b == ESCAPE {
            out.push(ESCAPED_ZERO);
        }
    }
    out.push(ESCAPE);
    out.push(TERMINATOR);
}

/// Sequential reader over an encoded key.
pub struct KeyReader<'a> {
    key: &'a [u8],
    offset: usize,
}

impl<'a> KeyReader<'a> {
    #[must_use]
    pub const fn new(key: &'a [u8]) -> Self {
        Self { key, offset: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.key[self.offset..]
    }

    fn malformed(&self, reason: &'static str) -> CodecError {
        CodecError::Malformed {
            offset: self.offset,
            reason,
        }
    }

    fn byte(&mut self, mask: u8) -> Result<u8, CodecError> {
        let b = *self
            .key
            .get(self.offset)
            .ok_or_else(|| self.malformed("unexpected end of key"))?;
        self.offset += 1;
        Ok(b ^ mask)
    }

    fn array<const N: usize>(&mut self, mask: u8) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        for b in &mut out {
            *b = self.byte(mask)?;
        }
        Ok(out)
    }

    fn escaped(&mut self, mask: u8) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        loop {
            let b = self.byte(mask)?;
            if b != ESCAPE {
                out.push(b);
                continue;
            }
            match self.byte(mask)? {
                ESCAPED_ZERO => out.push(ESCAPE),
                TERMINATOR => return Ok(out),
                _ => return Err(self.malformed("invalid escape sequence")),
            }
        }
    }

    /// Read one field. Returns `None` for a boundary marker.
    pub fn read_field(&mut self, descending: bool) -> Result<Option<FieldValue>, CodecError> {
        let raw = self.byte(0)?;
        if raw == FIRST_MARKER || raw == LAST_MARKER {
            return Ok(None);
        }
        let mask = if descending { 0xFF } else { 0x00 };
        let tag = ValueType::try_from(raw ^ mask).map_err(|_| self.malformed("unknown type tag"))?;

        let value = match tag {
            ValueType::Null => FieldValue::Null,
            ValueType::Boolean => match self.byte(mask)? {
                0 => FieldValue::Boolean(false),
                1 => FieldValue::Boolean(true),
                _ => return Err(self.malformed("invalid boolean")),
            },
            ValueType::Integer => {
                let bits = u64::from_be_bytes(self.array(mask)?) ^ SIGN_BIT;
                FieldValue::Integer(bits.cast_signed())
            }
            ValueType::DateTime => {
                let bits = u64::from_be_bytes(self.array(mask)?) ^ SIGN_BIT;
                FieldValue::DateTime(bits.cast_signed())
            }
            ValueType::Double => {
                let bits = u64::from_be_bytes(self.array(mask)?);
                FieldValue::Double(unorder_double(bits))
            }
            ValueType::String | ValueType::CaseInsensitiveString => {
                let bytes = self.escaped(mask)?;
                let s = String::from_utf8(bytes).map_err(|_| self.malformed("invalid UTF-8"))?;
                if tag == ValueType::String {
                    FieldValue::String(s)
                } else {
                    FieldValue::CaseInsensitiveString(s)
                }
            }
            ValueType::Bytes => FieldValue::Bytes(self.escaped(mask)?),
            ValueType::Id => FieldValue::Id(ObjectId(self.array(mask)?)),
        };
        Ok(Some(value))
    }

    /// Advance past one field without building its value.
    pub fn skip_field(&mut self, descending: bool) -> Result<(), CodecError> {
        let raw = self.byte(0)?;
        if raw == FIRST_MARKER || raw == LAST_MARKER {
            return Ok(());
        }
        let mask = if descending { 0xFF } else { 0x00 };
        let tag = ValueType::try_from(raw ^ mask).map_err(|_| self.malformed("unknown type tag"))?;

        let fixed = match tag {
            ValueType::Null => 0,
            ValueType::Boolean => 1,
            ValueType::Integer | ValueType::DateTime | ValueType::Double => 8,
            ValueType::Id => ObjectId::LEN,
            ValueType::String | ValueType::CaseInsensitiveString | ValueType::Bytes => {
                loop {
                    if self.byte(mask)? == ESCAPE {
                        match self.byte(mask)? {
                            ESCAPED_ZERO => {}
                            TERMINATOR => return Ok(()),
                            _ => return Err(self.malformed("invalid escape sequence")),
                        }
                    }
                }
            }
        };
        if self.remaining().len() < fixed {
            return Err(self.malformed("unexpected end of key"));
        }
        self.offset += fixed;
        Ok(())
    }

    /// Read the trailing object id, which must end the key.
    pub fn read_object_id(&mut self) -> Result<ObjectId, CodecError> {
        let id = ObjectId::from_slice(self.remaining())
            .ok_or_else(|| self.malformed("object id suffix must be the last 16 bytes"))?;
        self.offset = self.key.len();
        Ok(id)
    }
}

/// Walk past the encoded fields of a key and return its object id.
pub fn skip_key(key: &[u8], definition: &IndexDefinition) -> Result<ObjectId, CodecError> {
    let mut reader = KeyReader::new(key);
    for field in &definition.fields {
        reader.skip_field(field.descending)?;
    }
    reader.read_object_id()
}

/// Decode every field and the object id of a key.
pub fn decode_key(key: &[u8], definition: &IndexDefinition) -> Result<DecodedKey, CodecError> {
    let mut reader = KeyReader::new(key);
    let fields = definition
        .fields
        .iter()
        .map(|field| reader.read_field(field.descending))
        .collect::<Result<Vec<_>, _>>()?;
    let object_id = reader.read_object_id()?;
    Ok(DecodedKey { object_id, fields })
}

/// Errors from encoding or decoding keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The stored key does not follow the encoding.
    Malformed { offset: usize, reason: &'static str },
    /// Number of values differs from the number of declared fields.
    FieldCountMismatch { expected: usize, actual: usize },
    /// Encoded key exceeds `MAX_KEY_SIZE`.
    KeyTooLarge(usize),
}

impl CodecError {
    /// True if the error means stored data is damaged.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed { offset, reason } => {
                write!(f, "malformed key at byte {offset}: {reason}")
            }
            Self::FieldCountMismatch { expected, actual } => {
                write!(f, "expected {expected} field values, got {actual}")
            }
            Self::KeyTooLarge(len) => write!(f, "key of {len} bytes exceeds {MAX_KEY_SIZE}"),
        }
    }
}

impl std::error::Error for CodecError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(fields: &[&str]) -> IndexDefinition {
        IndexDefinition::new("test", fields).expect("valid definition")
    }

    fn single(value: FieldValue, descending: bool, id: u128) -> Vec<u8> {
        let definition = definition(&[if descending { "-A" } else { "A" }]);
        encode_fields(
            &definition,
            ObjectId::from_u128(id),
            &[Some(value)],
            MissingFieldAction::Null,
        )
        .expect("encode")
    }

    fn assert_ascending(values: &[FieldValue]) {
        let asc: Vec<Vec<u8>> = values.iter().map(|v| single(v.clone(), false, 0)).collect();
        assert!(
            asc.windows(2).all(|w| w[0] < w[1]),
            "ascending order violated for {values:?}"
        );
        let desc: Vec<Vec<u8>> = values.iter().map(|v| single(v.clone(), true, 0)).collect();
        assert!(
            desc.windows(2).all(|w| w[0] > w[1]),
            "descending order violated for {values:?}"
        );
    }

    #[test]
    fn test_integer_order() {
        assert_ascending(
            &[i64::MIN, -1_000_000, -1, 0, 1, 255, 256, i64::MAX].map(FieldValue::Integer),
        );
    }

    #[test]
    fn test_double_order() {
        assert_ascending(
            &[
                f64::NEG_INFINITY,
                -1e300,
                -1.5,
                -f64::MIN_POSITIVE,
                0.0,
                f64::MIN_POSITIVE,
                1.0,
                1.5,
                1e300,
                f64::INFINITY,
                f64::NAN,
            ]
            .map(FieldValue::Double),
        );
        assert_eq!(
            single(FieldValue::Double(-0.0), false, 0),
            single(FieldValue::Double(0.0), false, 0)
        );
    }

    #[test]
    fn test_string_order_with_embedded_zero() {
        assert_ascending(
            &["", "\0", "\0\0", "a", "a\0", "a\0b", "ab", "b", "ba"]
                .map(|s| FieldValue::String(s.to_string())),
        );
    }

    #[test]
    fn test_bytes_order() {
        assert_ascending(
            &[vec![], vec![0], vec![0, 0], vec![0, 1], vec![1], vec![0xFF], vec![0xFF, 0]]
                .map(FieldValue::Bytes),
        );
    }

    #[test]
    fn test_case_insensitive_strings_collapse() {
        assert_eq!(
            single(FieldValue::CaseInsensitiveString("Hello".into()), false, 1),
            single(FieldValue::CaseInsensitiveString("hELLO".into()), false, 1)
        );
    }

    #[test]
    fn test_types_sort_by_tag() {
        assert_ascending(&[
            FieldValue::Null,
            FieldValue::Boolean(false),
            FieldValue::Boolean(true),
            FieldValue::Integer(i64::MAX),
            FieldValue::Double(f64::NEG_INFINITY),
            FieldValue::DateTime(0),
            FieldValue::String("z".into()),
            FieldValue::CaseInsensitiveString("a".into()),
            FieldValue::Bytes(vec![]),
            FieldValue::Id(ObjectId::MIN),
        ]);
    }

    #[test]
    fn test_ties_order_by_object_id() {
        let a = single(FieldValue::Integer(5), false, 1);
        let b = single(FieldValue::Integer(5), false, 2);
        let c = single(FieldValue::Integer(6), false, 0);
        assert!(a < b && b < c);

        // Descending fields still break ties by ascending id.
        let a = single(FieldValue::Integer(5), true, 1);
        let b = single(FieldValue::Integer(5), true, 2);
        assert!(a < b);
    }

    #[test]
    fn test_composite_key_order() {
        let definition = definition(&["A", "-B"]);
        let key = |a: i64, b: &str, id: u128| {
            encode_fields(
                &definition,
                ObjectId::from_u128(id),
                &[Some(FieldValue::Integer(a)), Some(FieldValue::String(b.into()))],
                MissingFieldAction::Null,
            )
            .expect("encode")
        };
        let keys = [key(1, "z", 9), key(1, "b", 3), key(1, "a", 1), key(2, "zz", 0)];
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_missing_field_markers() {
        let definition = definition(&["A", "-B"]);
        let values = [Some(FieldValue::Integer(3)), None];
        let id = ObjectId::from_u128(7);

        let stored = encode_fields(
            &definition,
            id,
            &[Some(FieldValue::Integer(3)), Some(FieldValue::String("x".into()))],
            MissingFieldAction::Null,
        )
        .expect("encode");
        let first = encode_fields(&definition, ObjectId::MIN, &values, MissingFieldAction::First)
            .expect("encode");
        let last = encode_fields(&definition, ObjectId::MAX, &values, MissingFieldAction::Last)
            .expect("encode");
        let null = encode_fields(&definition, id, &values, MissingFieldAction::Null)
            .expect("encode");

        assert!(first < stored && stored < last);
        assert!(first < null && null < last);
    }

    #[test]
    fn test_skip_and_decode_roundtrip() {
        let definition = definition(&["A", "-B", "C", "D"]);
        let values = vec![
            Some(FieldValue::String("name\0with zero".into())),
            Some(FieldValue::Double(-2.5)),
            Some(FieldValue::Bytes(vec![0, 0xFF, 0])),
            Some(FieldValue::Id(ObjectId::from_u128(99))),
        ];
        let id = ObjectId::from_u128(0x1234);
        let key = encode_fields(&definition, id, &values, MissingFieldAction::Null)
            .expect("encode");

        assert_eq!(skip_key(&key, &definition).expect("skip"), id);
        let decoded = decode_key(&key, &definition).expect("decode");
        assert_eq!(decoded.object_id, id);
        assert_eq!(decoded.fields, values);
    }

    #[test]
    fn test_malformed_keys_are_structural() {
        let definition = definition(&["A"]);
        let key = single(FieldValue::String("abc".into()), false, 1);

        let truncated = &key[..key.len() - 3];
        let err = skip_key(truncated, &definition).expect_err("truncated");
        assert!(err.is_structural());

        let mut bad_tag = key.clone();
        bad_tag[0] = 0x42;
        assert!(skip_key(&bad_tag, &definition).expect_err("bad tag").is_structural());

        let mut bad_escape = key;
        bad_escape[4] = 0x00;
        bad_escape[5] = 0x07;
        assert!(decode_key(&bad_escape, &definition).is_err());
    }

    #[test]
    fn test_key_too_large() {
        let definition = definition(&["A"]);
        let err = encode_fields(
            &definition,
            ObjectId::MIN,
            &[Some(FieldValue::Bytes(vec![1u8; MAX_KEY_SIZE]))],
            MissingFieldAction::Null,
        )
        .expect_err("too large");
        assert!(matches!(err, CodecError::KeyTooLarge(_)));
    }

    #[test]
    fn test_field_count_mismatch() {
        let definition = definition(&["A", "B"]);
        let err = encode_fields(&definition, ObjectId::MIN, &[None], MissingFieldAction::Null)
            .expect_err("mismatch");
        assert_eq!(
            err,
            CodecError::FieldCountMismatch {
                expected: 2,
                actual: 1
            }
        );
    }
}
