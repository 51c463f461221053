//! Overflow blocks for large payloads.
//!
//! Payloads larger than `MAX_INLINE_VALUE_SIZE` are stored in a chain of
//! overflow blocks. The leaf entry is flagged as an overflow entry and
//! holds an `OverflowRef` instead of the payload.
//!
//! # Overflow Block Format
//!
//! ```text
//! +----------------+----------------+----------------+------------------+
//! | Block Header   | Next Block ID  | Data Length    | Data...          |
//! | (8 bytes)      | (8 bytes)      | (4 bytes)      | (variable)       |
//! +----------------+----------------+----------------+------------------+
//! ```
//!
//! # Overflow Reference Format
//!
//! ```text
//! +----------------+----------------+
//! | First Block ID | Total Length   |
//! | (8 bytes)      | (4 bytes)      |
//! +----------------+----------------+
//! ```

use crate::storage::file::{BlockFile, FileError};
use crate::storage::page::{PAGE_SIZE, Page, PageHeader, PageId, PageType};

/// Size of overflow block header (after block header).
/// - Next block ID: 8 bytes
/// - Data length in this block: 4 bytes
const OVERFLOW_HEADER_SIZE: usize = 12;

/// Offset where overflow data starts.
const OVERFLOW_DATA_OFFSET: usize = PageHeader::SIZE + OVERFLOW_HEADER_SIZE;

/// Maximum data per overflow block.
pub const OVERFLOW_DATA_PER_PAGE: usize = PAGE_SIZE - OVERFLOW_DATA_OFFSET;

/// Size of an overflow reference stored in leaf entries.
pub const OVERFLOW_REF_SIZE: usize = 12;

/// Location of a payload stored out of line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverflowRef {
    /// First block of the overflow chain.
    pub first_page: PageId,
    /// Total length of the payload.
    pub total_length: u32,
}

impl OverflowRef {
    /// Create a new overflow reference.
    #[must_use]
    pub const fn new(first_page: PageId, total_length: u32) -> Self {
        Self {
            first_page,
            total_length,
        }
    }

    /// Serialize the overflow reference to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; OVERFLOW_REF_SIZE] {
        let mut buf = [0u8; OVERFLOW_REF_SIZE];
        buf[0..8].copy_from_slice(&self.first_page.to_le_bytes());
        buf[8..12].copy_from_slice(&self.total_length.to_le_bytes());
        buf
    }

    /// Deserialize an overflow reference from bytes.
    ///
    /// Returns `None` if the slice has the wrong length.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != OVERFLOW_REF_SIZE {
            return None;
        }

        let mut page = [0u8; 8];
        page.copy_from_slice(&bytes[0..8]);
        let mut length = [0u8; 4];
        length.copy_from_slice(&bytes[8..12]);

        Some(Self {
            first_page: u64::from_le_bytes(page),
            total_length: u32::from_le_bytes(length),
        })
    }

    /// Number of blocks a payload of this length occupies.
    #[must_use]
    pub const fn page_count(&self) -> usize {
        (self.total_length as usize).div_ceil(OVERFLOW_DATA_PER_PAGE)
    }
}

/// Write a large payload to overflow blocks.
pub fn write_overflow(file: &mut BlockFile, value: &[u8]) -> Result<OverflowRef, OverflowError> {
    if value.is_empty() {
        return Err(OverflowError::EmptyValue);
    }
    let total_length =
        u32::try_from(value.len()).map_err(|_| OverflowError::ValueTooLarge(value.len()))?;

    let chunks: Vec<&[u8]> = value.chunks(OVERFLOW_DATA_PER_PAGE).collect();
    let mut page_ids = Vec::with_capacity(chunks.len());
    for _ in 0..chunks.len() {
        page_ids.push(file.allocate_page()?);
    }

    for (i, chunk) in chunks.iter().enumerate() {
        let next_page = page_ids.get(i + 1).copied().unwrap_or(0);

        let mut page = Page::formatted(PageType::Overflow);
        page.write_u64(PageHeader::SIZE, next_page);
        #[allow(clippy::cast_possible_truncation)] // chunk <= OVERFLOW_DATA_PER_PAGE
        page.write_u32(PageHeader::SIZE + 8, chunk.len() as u32);
        page.write_bytes(OVERFLOW_DATA_OFFSET, chunk);

        file.write_page(page_ids[i], page)?;
    }

    Ok(OverflowRef::new(page_ids[0], total_length))
}

/// Read a large payload from overflow blocks.
///
/// The chain must hold exactly `total_length` bytes in the expected number
/// of blocks; anything else is reported as corruption.
pub fn read_overflow(
    file: &BlockFile,
    overflow_ref: &OverflowRef,
) -> Result<Vec<u8>, OverflowError> {
    let expected = overflow_ref.total_length as usize;
    let max_pages = overflow_ref.page_count();
    let mut result = Vec::with_capacity(expected);
    let mut current_page_id = overflow_ref.first_page;
    let mut visited = 0usize;

    while current_page_id != 0 {
        visited += 1;
        if visited > max_pages {
            return Err(OverflowError::ChainTooLong {
                first_page: overflow_ref.first_page,
            });
        }

        let page = file.read_page(current_page_id)?;
        let page_type = page.page_type_byte();
        if page_type != PageType::Overflow as u8 {
            return Err(OverflowError::InvalidPageType(page_type));
        }

        let next_page = page.read_u64(PageHeader::SIZE);
        let data_length = page.read_u32(PageHeader::SIZE + 8) as usize;
        if data_length > OVERFLOW_DATA_PER_PAGE {
            return Err(OverflowError::LengthMismatch {
                expected: OVERFLOW_DATA_PER_PAGE,
                actual: data_length,
            });
        }

        result.extend_from_slice(page.read_bytes(OVERFLOW_DATA_OFFSET, data_length));
        current_page_id = next_page;
    }

    if result.len() != expected {
        return Err(OverflowError::LengthMismatch {
            expected,
            actual: result.len(),
        });
    }

    Ok(result)
}

/// Return the blocks of an overflow chain to the free list.
///
/// Returns the number of blocks freed.
pub fn free_overflow(
    file: &mut BlockFile,
    overflow_ref: &OverflowRef,
) -> Result<u64, OverflowError> {
    let max_pages = overflow_ref.page_count();
    let mut current_page_id = overflow_ref.first_page;
    let mut pages_freed = 0u64;

    while current_page_id != 0 {
        if pages_freed as usize >= max_pages {
            return Err(OverflowError::ChainTooLong {
                first_page: overflow_ref.first_page,
            });
        }

        let page = file.read_page(current_page_id)?;
        let page_type = page.page_type_byte();
        if page_type != PageType::Overflow as u8 {
            return Err(OverflowError::InvalidPageType(page_type));
        }
        let next_page = page.read_u64(PageHeader::SIZE);

        file.free_page(current_page_id)?;
        pages_freed += 1;
        current_page_id = next_page;
    }

    Ok(pages_freed)
}

/// Errors that can occur during overflow operations.
#[derive(Debug)]
pub enum OverflowError {
    /// File operation failed.
    File(FileError),
    /// Empty value (overflow not needed).
    EmptyValue,
    /// Payload longer than an overflow reference can describe.
    ValueTooLarge(usize),
    /// Invalid block type encountered.
    InvalidPageType(u8),
    /// Length mismatch when reading.
    LengthMismatch { expected: usize, actual: usize },
    /// The chain has more blocks than its length allows (cycle or corruption).
    ChainTooLong { first_page: PageId },
}

impl OverflowError {
    /// True if the error means the chain on disk is damaged.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        match self {
            Self::File(e) => e.is_structural(),
            Self::EmptyValue | Self::ValueTooLarge(_) => false,
            Self::InvalidPageType(_) | Self::LengthMismatch { .. } | Self::ChainTooLong { .. } => {
                true
            }
        }
    }
}

impl std::fmt::Display for OverflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(e) => write!(f, "file error: {e}"),
            Self::EmptyValue => write!(f, "empty value cannot use overflow"),
            Self::ValueTooLarge(n) => write!(f, "payload of {n} bytes is too large"),
            Self::InvalidPageType(t) => {
                write!(f, "invalid block type in overflow chain: 0x{t:02x}")
            }
            Self::LengthMismatch { expected, actual } => {
                write!(
                    f,
                    "overflow length mismatch: expected {expected}, got {actual}"
                )
            }
            Self::ChainTooLong { first_page } => {
                write!(f, "overflow chain starting at block {first_page} is too long")
            }
        }
    }
}

impl std::error::Error for OverflowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::File(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FileError> for OverflowError {
    fn from(e: FileError) -> Self {
        Self::File(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::header::FileKind;
    use tempfile::tempdir;

    fn create_test_file() -> (tempfile::TempDir, BlockFile) {
        let dir = tempdir().expect("create temp dir");
        let path = dir.path().join("test.btree");
        let file = BlockFile::create(&path, FileKind::Objects, Vec::new(), 64).expect("create");
        (dir, file)
    }

    #[test]
    fn test_overflow_ref_roundtrip() {
        let overflow_ref = OverflowRef::new(12345, 67890);
        let bytes = overflow_ref.to_bytes();

        let restored = OverflowRef::from_bytes(&bytes).expect("should parse");
        assert_eq!(restored, overflow_ref);
        assert!(OverflowRef::from_bytes(&bytes[..11]).is_none());
    }

    #[test]
    fn test_overflow_multiple_pages() {
        let (_dir, mut file) = create_test_file();

        let value: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let overflow_ref = write_overflow(&mut file, &value).expect("write overflow");

        assert_eq!(overflow_ref.total_length, 20_000);
        assert_eq!(overflow_ref.page_count(), 3);

        let restored = read_overflow(&file, &overflow_ref).expect("read overflow");
        assert_eq!(restored, value);
    }

    #[test]
    fn test_overflow_exact_page_boundary() {
        let (_dir, mut file) = create_test_file();

        let value = vec![0x11u8; OVERFLOW_DATA_PER_PAGE];
        let overflow_ref = write_overflow(&mut file, &value).expect("write overflow");
        assert_eq!(overflow_ref.page_count(), 1);

        let restored = read_overflow(&file, &overflow_ref).expect("read overflow");
        assert_eq!(restored, value);
    }

    #[test]
    fn test_overflow_free_returns_pages() {
        let (_dir, mut file) = create_test_file();

        let value = vec![0xEFu8; 20_000];
        let overflow_ref = write_overflow(&mut file, &value).expect("write overflow");
        let total_before = file.total_pages();

        let pages_freed = free_overflow(&mut file, &overflow_ref).expect("free overflow");
        assert_eq!(pages_freed, 3);

        // The freed blocks are reused before the file grows.
        let again = write_overflow(&mut file, &value).expect("write again");
        assert_eq!(file.total_pages(), total_before);
        assert_eq!(read_overflow(&file, &again).expect("read"), value);
    }

    #[test]
    fn test_overflow_length_mismatch_is_structural() {
        let (_dir, mut file) = create_test_file();

        let value = vec![0xAAu8; 5000];
        let overflow_ref = write_overflow(&mut file, &value).expect("write overflow");
        let lying = OverflowRef::new(overflow_ref.first_page, 4000);

        let err = read_overflow(&file, &lying).expect_err("length mismatch");
        assert!(err.is_structural());
    }

    #[test]
    fn test_overflow_empty_value_rejected() {
        let (_dir, mut file) = create_test_file();
        assert!(matches!(
            write_overflow(&mut file, &[]),
            Err(OverflowError::EmptyValue)
        ));
    }
}
