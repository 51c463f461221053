//! Index declarations.
//!
//! An index is declared as a name and an ordered list of field declarations.
//! A declaration is a field name, optionally prefixed by `+` (ascending, the
//! default) or `-` (descending):
//!
//! ```text
//! IndexDefinition::new("by-name", &["LastName", "FirstName", "-Born"])
//! ```
//!
//! The definition is persisted in the index file header so that a reopened
//! index can be checked against the declaration it is opened with.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Maximum length of an index name (it becomes part of a file name).
const MAX_INDEX_NAME_LENGTH: usize = 64;

/// Descriptor format version.
const DESCRIPTOR_VERSION: u8 = 1;

/// Descriptor field flag: descending.
const FLAG_DESCENDING: u8 = 0x01;

/// One field of an index, with its direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexField {
    pub name: String,
    pub descending: bool,
}

impl IndexField {
    /// Parse a field declaration (`"A"`, `"+A"` or `"-A"`).
    pub fn parse(declared: &str) -> Result<Self, IndexError> {
        let (name, descending) = if let Some(rest) = declared.strip_prefix('-') {
            (rest, true)
        } else {
            (declared.strip_prefix('+').unwrap_or(declared), false)
        };
        if name.is_empty() {
            return Err(IndexError::EmptyFieldName);
        }
        Ok(Self {
            name: name.to_string(),
            descending,
        })
    }
}

impl std::fmt::Display for IndexField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.descending {
            write!(f, "-{}", self.name)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

/// Which way to walk an index to produce a requested order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Forward,
    Backward,
}

/// A named, ordered list of index fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub fields: Vec<IndexField>,
}

impl IndexDefinition {
    /// Build a definition from field declarations.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, too long or not file-name
    /// safe, if there are no fields, or if a field appears twice.
    pub fn new(name: &str, field_declarations: &[&str]) -> Result<Self, IndexError> {
        let fields = field_declarations
            .iter()
            .map(|declared| IndexField::parse(declared))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_fields(name, fields)
    }

    fn from_fields(name: &str, fields: Vec<IndexField>) -> Result<Self, IndexError> {
        validate_index_name(name)?;
        if fields.is_empty() {
            return Err(IndexError::NoFields);
        }

        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(IndexError::DuplicateField(field.name.clone()));
            }
        }

        Ok(Self {
            name: name.to_string(),
            fields,
        })
    }

    /// Field specs in declaration order.
    #[must_use]
    pub fn field_declarations(&self) -> Vec<String> {
        self.fields.iter().map(ToString::to_string).collect()
    }

    /// True if scanning this index forward yields `sort_order`, given that
    /// `constant_fields` hold a single value during the scan.
    #[must_use]
    pub fn same_sort_order(&self, constant_fields: &[&str], sort_order: &[&str]) -> bool {
        self.matches_sort_order(constant_fields, sort_order, false)
    }

    /// True if scanning this index backward yields `sort_order`, given that
    /// `constant_fields` hold a single value during the scan.
    #[must_use]
    pub fn reverse_sort_order(&self, constant_fields: &[&str], sort_order: &[&str]) -> bool {
        self.matches_sort_order(constant_fields, sort_order, true)
    }

    /// Direction in which this index satisfies `sort_order`, if any.
    #[must_use]
    pub fn scan_direction(
        &self,
        constant_fields: &[&str],
        sort_order: &[&str],
    ) -> Option<ScanDirection> {
        if self.same_sort_order(constant_fields, sort_order) {
            Some(ScanDirection::Forward)
        } else if self.reverse_sort_order(constant_fields, sort_order) {
            Some(ScanDirection::Backward)
        } else {
            None
        }
    }

    /// Every requested field that is not constant must match the next
    /// non-constant index field by name, and the directions must all agree
    /// (`reversed == false`) or all disagree (`reversed == true`). Trailing
    /// index fields beyond the request are allowed.
    fn matches_sort_order(
        &self,
        constant_fields: &[&str],
        sort_order: &[&str],
        reversed: bool,
    ) -> bool {
        let constant: HashSet<&str> = constant_fields
            .iter()
            .map(|c| c.trim_start_matches(['+', '-']))
            .collect();
        let mut index_fields = self
            .fields
            .iter()
            .filter(|f| !constant.contains(f.name.as_str()));

        for declared in sort_order {
            let Ok(requested) = IndexField::parse(declared) else {
                return false;
            };
            if constant.contains(requested.name.as_str()) {
                continue;
            }
            let Some(field) = index_fields.next() else {
                return false;
            };
            if field.name != requested.name {
                return false;
            }
            if (field.descending != requested.descending) != reversed {
                return false;
            }
        }
        true
    }

    /// Serialize for the index file header.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // lengths are validated to fit in u16
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(64);
        bytes.push(DESCRIPTOR_VERSION);
        bytes.extend_from_slice(&(self.name.len() as u16).to_le_bytes());
        bytes.extend_from_slice(self.name.as_bytes());
        bytes.extend_from_slice(&(self.fields.len() as u16).to_le_bytes());
        for field in &self.fields {
            bytes.push(if field.descending { FLAG_DESCENDING } else { 0 });
            bytes.extend_from_slice(&(field.name.len() as u16).to_le_bytes());
            bytes.extend_from_slice(field.name.as_bytes());
        }
        bytes
    }

    /// Deserialize from an index file header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexError> {
        let mut reader = DescriptorReader { bytes, offset: 0 };

        let version = reader.u8()?;
        if version != DESCRIPTOR_VERSION {
            return Err(IndexError::InvalidDescriptor("unsupported descriptor version"));
        }
        let name = reader.string()?;
        let count = reader.u16()?;
        let mut fields = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let flags = reader.u8()?;
            let name = reader.string()?;
            if name.is_empty() {
                return Err(IndexError::EmptyFieldName);
            }
            fields.push(IndexField {
                name,
                descending: flags & FLAG_DESCENDING != 0,
            });
        }
        if reader.offset != bytes.len() {
            return Err(IndexError::InvalidDescriptor("trailing bytes"));
        }

        Self::from_fields(&name, fields)
    }
}

impl std::fmt::Display for IndexDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.field_declarations().join(", "))
    }
}

struct DescriptorReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl DescriptorReader<'_> {
    fn take(&mut self, len: usize) -> Result<&[u8], IndexError> {
        let end = self.offset + len;
        let slice = self
            .bytes
            .get(self.offset..end)
            .ok_or(IndexError::InvalidDescriptor("truncated descriptor"))?;
        self.offset = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, IndexError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, IndexError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn string(&mut self) -> Result<String, IndexError> {
        let len = usize::from(self.u16()?);
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| IndexError::InvalidDescriptor("field name is not UTF-8"))
    }
}

/// Validate that an index name is usable as part of a file name.
pub fn validate_index_name(name: &str) -> Result<(), IndexError> {
    if name.is_empty() {
        return Err(IndexError::EmptyName);
    }
    if name.len() > MAX_INDEX_NAME_LENGTH
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(IndexError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Errors in index declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    EmptyName,
    InvalidName(String),
    NoFields,
    EmptyFieldName,
    DuplicateField(String),
    /// Two indexes of one collection share a name.
    DuplicateIndex(String),
    /// A collection was reopened with a different set of indexes.
    DefinitionConflict(String),
    InvalidDescriptor(&'static str),
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "index name must not be empty"),
            Self::InvalidName(name) => write!(
                f,
                "invalid index name '{name}'; only alphanumeric, hyphens, and underscores are allowed (max {MAX_INDEX_NAME_LENGTH})"
            ),
            Self::NoFields => write!(f, "an index needs at least one field"),
            Self::EmptyFieldName => write!(f, "field name must not be empty"),
            Self::DuplicateField(name) => write!(f, "field '{name}' appears twice"),
            Self::DuplicateIndex(name) => write!(f, "index '{name}' declared twice"),
            Self::DefinitionConflict(collection) => write!(
                f,
                "collection '{collection}' is already open with different indexes"
            ),
            Self::InvalidDescriptor(reason) => write!(f, "invalid index descriptor: {reason}"),
        }
    }
}

impl std::error::Error for IndexError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn a_asc_b_desc() -> IndexDefinition {
        IndexDefinition::new("ab", &["A", "-B"]).expect("valid")
    }

    #[test]
    fn test_parse_field_declarations() {
        let definition = IndexDefinition::new("idx", &["A", "+B", "-C"]).expect("valid");
        assert!(!definition.fields[0].descending);
        assert!(!definition.fields[1].descending);
        assert_eq!(definition.fields[1].name, "B");
        assert!(definition.fields[2].descending);
        assert_eq!(definition.field_declarations(), vec!["A", "B", "-C"]);
    }

    #[test]
    fn test_invalid_definitions() {
        assert_eq!(IndexDefinition::new("", &["A"]), Err(IndexError::EmptyName));
        assert!(matches!(
            IndexDefinition::new("../evil", &["A"]),
            Err(IndexError::InvalidName(_))
        ));
        assert_eq!(IndexDefinition::new("idx", &[]), Err(IndexError::NoFields));
        assert_eq!(
            IndexDefinition::new("idx", &["-"]),
            Err(IndexError::EmptyFieldName)
        );
        assert_eq!(
            IndexDefinition::new("idx", &["A", "-A"]),
            Err(IndexError::DuplicateField("A".to_string()))
        );
    }

    #[test]
    fn test_same_sort_order() {
        let index = a_asc_b_desc();
        assert!(index.same_sort_order(&[], &["A", "-B"]));
        assert!(index.same_sort_order(&[], &["+A", "-B"]));
        assert!(index.same_sort_order(&[], &["A"]));
        assert!(index.same_sort_order(&[], &[]));
        assert!(!index.same_sort_order(&[], &["B", "A"]));
        assert!(!index.same_sort_order(&[], &["A", "B"]));
        assert!(!index.same_sort_order(&[], &["A", "-B", "C"]));
    }

    #[test]
    fn test_reverse_sort_order() {
        let index = a_asc_b_desc();
        assert!(index.reverse_sort_order(&[], &["-A", "B"]));
        assert!(index.reverse_sort_order(&[], &["-A"]));
        assert!(!index.reverse_sort_order(&[], &["A", "-B"]));
        assert!(!index.reverse_sort_order(&[], &["-A", "-B"]));
    }

    #[test]
    fn test_constant_fields_are_skipped() {
        let index = a_asc_b_desc();
        assert!(index.same_sort_order(&["A"], &["-B"]));
        assert!(index.reverse_sort_order(&["A"], &["B"]));
        // Holding A constant leaves B descending, so an ascending B is the
        // reverse order, never the same one. Direction is not dropped just
        // because an earlier field is constant.
        assert!(!index.same_sort_order(&["A"], &["B"]));
        // Constant fields in the request are ignored wherever they appear.
        assert!(index.same_sort_order(&["B"], &["A", "B"]));
        assert!(!index.same_sort_order(&["B", "A"], &["C"]));
        assert!(index.same_sort_order(&["B", "A"], &[]));
    }

    #[test]
    fn test_scan_direction() {
        let index = a_asc_b_desc();
        assert_eq!(
            index.scan_direction(&[], &["A"]),
            Some(ScanDirection::Forward)
        );
        assert_eq!(
            index.scan_direction(&[], &["-A", "B"]),
            Some(ScanDirection::Backward)
        );
        assert_eq!(index.scan_direction(&[], &["B"]), None);
    }

    #[test]
    fn test_descriptor_roundtrip() {
        let definition = IndexDefinition::new("by-name_2", &["Last", "-First", "+Born"])
            .expect("valid");
        let bytes = definition.to_bytes();
        assert_eq!(IndexDefinition::from_bytes(&bytes), Ok(definition));

        assert!(IndexDefinition::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        let mut trailing = bytes;
        trailing.push(0);
        assert!(IndexDefinition::from_bytes(&trailing).is_err());
    }
}
