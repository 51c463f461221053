//! File header structure and serialization.
//!
//! The header occupies block 0 and identifies the file, its block size,
//! the root of its B+Tree and the free-list head. Index files also keep
//! their field declaration in the descriptor area so that a reopened index
//! can be checked against the declaration it is opened with.

// PAGE_SIZE and descriptor lengths are compile-time bounded and fit in u32/u16.
#![allow(clippy::cast_possible_truncation)]

use crate::storage::page::{PAGE_SIZE, Page, PageId, PageType};

/// Magic number identifying a collection file: "OBJBTREE"
pub const MAGIC: [u8; 8] = *b"OBJBTREE";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Block size as u32 for storage in the header.
const PAGE_SIZE_U32: u32 = PAGE_SIZE as u32;

/// Header field offsets (after the 8-byte block header).
mod offsets {
    pub const MAGIC: usize = 8;
    pub const FORMAT_VERSION: usize = 16;
    pub const PAGE_SIZE: usize = 20;
    pub const KIND: usize = 24;
    pub const ROOT_PAGE: usize = 32;
    pub const TOTAL_PAGE_COUNT: usize = 40;
    pub const FREE_LIST_HEAD: usize = 48;
    pub const GENERATION: usize = 56;
    pub const DESCRIPTOR_LEN: usize = 1024;
    pub const DESCRIPTOR: usize = 1026;
    // 64-1023: reserved
}

/// Largest descriptor the header can hold.
pub const MAX_DESCRIPTOR_SIZE: usize = PAGE_SIZE - offsets::DESCRIPTOR;

/// What a collection file stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FileKind {
    /// Primary object file: object id -> serialized payload.
    Objects = 1,
    /// Secondary index file: encoded key -> nothing.
    Index = 2,
}

impl TryFrom<u8> for FileKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Objects),
            2 => Ok(Self::Index),
            _ => Err(value),
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Objects => write!(f, "objects"),
            Self::Index => write!(f, "index"),
        }
    }
}

/// Metadata stored in block 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Format version number.
    pub format_version: u32,
    /// Block size in bytes (always `PAGE_SIZE`).
    pub page_size: u32,
    /// What the tree in this file stores.
    pub kind: FileKind,
    /// Root block of the B+Tree (0 until the tree is created).
    pub root_page: PageId,
    /// Total number of blocks in the file, header included.
    pub total_page_count: u64,
    /// Head of the free block list (0 if empty).
    pub free_list_head: PageId,
    /// Incremented on every structural mutation of the tree.
    pub generation: u64,
    /// Opaque descriptor (index files store their definition here).
    pub descriptor: Vec<u8>,
}

impl FileHeader {
    /// Create a header for a fresh file.
    #[must_use]
    pub const fn new(kind: FileKind, descriptor: Vec<u8>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            page_size: PAGE_SIZE_U32,
            kind,
            root_page: 0,
            total_page_count: 1,
            free_list_head: 0,
            generation: 0,
            descriptor,
        }
    }

    /// Serialize the header to a block.
    pub fn to_page(&self) -> Result<Page, HeaderError> {
        if self.descriptor.len() > MAX_DESCRIPTOR_SIZE {
            return Err(HeaderError::DescriptorTooLarge(self.descriptor.len()));
        }

        let mut page = Page::formatted(PageType::Header);
        page.write_bytes(offsets::MAGIC, &MAGIC);
        page.write_u32(offsets::FORMAT_VERSION, self.format_version);
        page.write_u32(offsets::PAGE_SIZE, self.page_size);
        page.write_u8(offsets::KIND, self.kind as u8);
        page.write_u64(offsets::ROOT_PAGE, self.root_page);
        page.write_u64(offsets::TOTAL_PAGE_COUNT, self.total_page_count);
        page.write_u64(offsets::FREE_LIST_HEAD, self.free_list_head);
        page.write_u64(offsets::GENERATION, self.generation);
        page.write_u16(offsets::DESCRIPTOR_LEN, self.descriptor.len() as u16);
        page.write_bytes(offsets::DESCRIPTOR, &self.descriptor);
        page.seal();

        Ok(page)
    }

    /// Deserialize a header from block 0.
    pub fn from_page(page: &Page) -> Result<Self, HeaderError> {
        let header = page.verify().map_err(HeaderError::Page)?;
        if header.page_type != PageType::Header {
            return Err(HeaderError::NotAHeader(header.page_type as u8));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(page.read_bytes(offsets::MAGIC, 8));
        if magic != MAGIC {
            return Err(HeaderError::InvalidMagic(magic));
        }

        let format_version = page.read_u32(offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(HeaderError::UnsupportedVersion(format_version));
        }

        let page_size = page.read_u32(offsets::PAGE_SIZE);
        if page_size != PAGE_SIZE_U32 {
            return Err(HeaderError::InvalidPageSize(page_size));
        }

        let kind = FileKind::try_from(page.read_u8(offsets::KIND))
            .map_err(HeaderError::InvalidKind)?;

        let descriptor_len = page.read_u16(offsets::DESCRIPTOR_LEN) as usize;
        if descriptor_len > MAX_DESCRIPTOR_SIZE {
            return Err(HeaderError::DescriptorTooLarge(descriptor_len));
        }

        Ok(Self {
            format_version,
            page_size,
            kind,
            root_page: page.read_u64(offsets::ROOT_PAGE),
            total_page_count: page.read_u64(offsets::TOTAL_PAGE_COUNT),
            free_list_head: page.read_u64(offsets::FREE_LIST_HEAD),
            generation: page.read_u64(offsets::GENERATION),
            descriptor: page
                .read_bytes(offsets::DESCRIPTOR, descriptor_len)
                .to_vec(),
        })
    }
}

/// Errors when reading or writing the file header.
#[derive(Debug)]
pub enum HeaderError {
    Page(crate::storage::page::PageError),
    NotAHeader(u8),
    InvalidMagic([u8; 8]),
    UnsupportedVersion(u32),
    InvalidPageSize(u32),
    InvalidKind(u8),
    DescriptorTooLarge(usize),
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Page(e) => write!(f, "header block: {e}"),
            Self::NotAHeader(t) => write!(f, "block 0 has type 0x{t:02x}, expected header"),
            Self::InvalidMagic(m) => write!(f, "invalid magic number: {m:?}"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::InvalidPageSize(s) => write!(f, "invalid block size: {s}"),
            Self::InvalidKind(k) => write!(f, "invalid file kind: {k}"),
            Self::DescriptorTooLarge(n) => {
                write!(f, "descriptor of {n} bytes exceeds {MAX_DESCRIPTOR_SIZE}")
            }
        }
    }
}

impl std::error::Error for HeaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Page(e) => Some(e),
            _ => None,
        }
    }
}
