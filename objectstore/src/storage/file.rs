//! Block file I/O.
//!
//! A `BlockFile` is an array of fixed-size blocks behind a shared
//! `BlockCache`. Reads go through `&self` with positional I/O so that
//! concurrent readers never contend on the file cursor; writes need
//! `&mut self` and are serialized by the collection's write lock.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::storage::cache::BlockCache;
use crate::storage::header::{FileHeader, FileKind, HeaderError};
use crate::storage::page::{PAGE_SIZE_U64, Page, PageError, PageHeader, PageId, PageType};

/// Offset of the next-free pointer inside a free block.
const FREE_NEXT_OFFSET: usize = PageHeader::SIZE;

/// A collection file with cached block I/O.
pub struct BlockFile {
    file: File,
    path: PathBuf,
    header: FileHeader,
    header_dirty: bool,
    cache: BlockCache,
}

impl BlockFile {
    /// Create a new file at the given path.
    ///
    /// Returns an error if the file already exists.
    pub fn create(
        path: &Path,
        kind: FileKind,
        descriptor: Vec<u8>,
        cache_blocks: usize,
    ) -> Result<Self, FileError> {
        if path.exists() {
            return Err(FileError::AlreadyExists(path.to_path_buf()));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(FileError::Io)?;

        let header = FileHeader::new(kind, descriptor);
        let page = header.to_page().map_err(FileError::Header)?;

        file.write_all(page.as_bytes()).map_err(FileError::Io)?;
        file.sync_all().map_err(FileError::Io)?;

        tracing::debug!("created {} file {}", kind, path.display());

        Ok(Self {
            file,
            path: path.to_path_buf(),
            header,
            header_dirty: false,
            cache: BlockCache::new(cache_blocks),
        })
    }

    /// Open an existing file.
    pub fn open(path: &Path, cache_blocks: usize) -> Result<Self, FileError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(FileError::Io)?;

        let mut page = Page::new();
        file.read_exact(page.as_bytes_mut()).map_err(FileError::Io)?;
        let header = FileHeader::from_page(&page).map_err(FileError::Header)?;

        let length = file.metadata().map_err(FileError::Io)?.len();
        if length < header.total_page_count * PAGE_SIZE_U64 {
            return Err(FileError::Truncated {
                expected_pages: header.total_page_count,
                actual_bytes: length,
            });
        }

        tracing::debug!(
            "opened {} file {} ({} blocks)",
            header.kind,
            path.display(),
            header.total_page_count
        );

        Ok(Self {
            file,
            path: path.to_path_buf(),
            header,
            header_dirty: false,
            cache: BlockCache::new(cache_blocks),
        })
    }

    /// Path of the file on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get a reference to the header.
    #[must_use]
    pub const fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Total number of blocks in the file.
    #[must_use]
    pub const fn total_pages(&self) -> u64 {
        self.header.total_page_count
    }

    /// Get a reference to the block cache.
    #[must_use]
    pub const fn cache(&self) -> &BlockCache {
        &self.cache
    }

    /// Set the root block and mark the header dirty.
    pub const fn set_root_page(&mut self, root: PageId) {
        self.header.root_page = root;
        self.header_dirty = true;
    }

    /// Record a structural mutation.
    pub const fn bump_generation(&mut self) {
        self.header.generation = self.header.generation.wrapping_add(1);
        self.header_dirty = true;
    }

    /// Read a block, verifying its checksum.
    ///
    /// Served from the cache when resident. The returned block is an
    /// immutable snapshot; later writes install a new one.
    #[allow(clippy::disallowed_methods)] // Arc::clone shares the block with the cache
    pub fn read_page(&self, page_id: PageId) -> Result<Arc<Page>, FileError> {
        self.check_bounds(page_id)?;

        if let Some(page) = self.cache.get(page_id) {
            return Ok(page);
        }

        let mut page = Page::new();
        read_exact_at(&self.file, page.as_bytes_mut(), page_id * PAGE_SIZE_U64)
            .map_err(FileError::Io)?;
        page.verify()
            .map_err(|source| FileError::Page { page_id, source })?;

        let page = Arc::new(page);
        self.cache.insert(page_id, Arc::clone(&page));
        Ok(page)
    }

    /// Write a block, sealing its checksum first.
    pub fn write_page(&mut self, page_id: PageId, mut page: Page) -> Result<(), FileError> {
        self.check_bounds(page_id)?;
        if page_id == 0 {
            return Err(FileError::HeaderOverwrite);
        }

        page.seal();
        self.file
            .seek(SeekFrom::Start(page_id * PAGE_SIZE_U64))
            .map_err(FileError::Io)?;
        self.file.write_all(page.as_bytes()).map_err(FileError::Io)?;

        self.cache.insert(page_id, Arc::new(page));
        Ok(())
    }

    /// Allocate a block, reusing the free list before growing the file.
    ///
    /// The returned block's contents are unspecified until it is written.
    pub fn allocate_page(&mut self) -> Result<PageId, FileError> {
        let head = self.header.free_list_head;
        if head != 0 {
            let page = self.read_page(head)?;
            if page.page_type_byte() != PageType::Free as u8 {
                return Err(FileError::FreeListCorrupt { page_id: head });
            }
            self.header.free_list_head = page.read_u64(FREE_NEXT_OFFSET);
            self.header_dirty = true;
            return Ok(head);
        }

        let page_id = self.header.total_page_count;
        self.header.total_page_count += 1;
        self.header_dirty = true;

        // Extend the file so that the new block is readable before its first write.
        self.file
            .set_len(self.header.total_page_count * PAGE_SIZE_U64)
            .map_err(FileError::Io)?;

        Ok(page_id)
    }

    /// Return a block to the free list.
    pub fn free_page(&mut self, page_id: PageId) -> Result<(), FileError> {
        let mut page = Page::formatted(PageType::Free);
        page.write_u64(FREE_NEXT_OFFSET, self.header.free_list_head);
        self.write_page(page_id, page)?;

        self.header.free_list_head = page_id;
        self.header_dirty = true;
        Ok(())
    }

    /// Write the header to block 0 if it changed since the last flush.
    pub fn flush_header(&mut self) -> Result<(), FileError> {
        if !self.header_dirty {
            return Ok(());
        }

        let page = self.header.to_page().map_err(FileError::Header)?;
        self.file.seek(SeekFrom::Start(0)).map_err(FileError::Io)?;
        self.file.write_all(page.as_bytes()).map_err(FileError::Io)?;
        self.header_dirty = false;
        Ok(())
    }

    /// Flush the header and sync all data to disk.
    pub fn sync(&mut self) -> Result<(), FileError> {
        self.flush_header()?;
        self.file.sync_all().map_err(FileError::Io)
    }

    fn check_bounds(&self, page_id: PageId) -> Result<(), FileError> {
        if page_id >= self.header.total_page_count {
            return Err(FileError::PageOutOfBounds {
                page_id,
                total_pages: self.header.total_page_count,
            });
        }
        Ok(())
    }
}

impl Drop for BlockFile {
    fn drop(&mut self) {
        if let Err(e) = self.flush_header() {
            tracing::warn!("failed to flush header of {}: {}", self.path.display(), e);
        }
    }
}

impl std::fmt::Debug for BlockFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockFile")
            .field("path", &self.path)
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.seek_read(&mut buf[filled..], offset + filled as u64)?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        filled += n;
    }
    Ok(())
}

/// Errors that can occur during file operations.
#[derive(Debug)]
pub enum FileError {
    /// I/O error.
    Io(std::io::Error),
    /// File already exists.
    AlreadyExists(PathBuf),
    /// Header error.
    Header(HeaderError),
    /// A block failed validation.
    Page { page_id: PageId, source: PageError },
    /// Block ID out of bounds.
    PageOutOfBounds { page_id: PageId, total_pages: u64 },
    /// The file is shorter than its header claims.
    Truncated { expected_pages: u64, actual_bytes: u64 },
    /// The free list points at a block that is not free.
    FreeListCorrupt { page_id: PageId },
    /// Block 0 may only be written through `flush_header`.
    HeaderOverwrite,
}

impl FileError {
    /// True if the error means the file contents violate an invariant, as
    /// opposed to the operating system failing the request.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::AlreadyExists(_))
    }
}

impl std::fmt::Display for FileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::AlreadyExists(path) => write!(f, "file already exists: {}", path.display()),
            Self::Header(e) => write!(f, "header error: {e}"),
            Self::Page { page_id, source } => write!(f, "block {page_id}: {source}"),
            Self::PageOutOfBounds {
                page_id,
                total_pages,
            } => {
                write!(
                    f,
                    "block {page_id} out of bounds (total blocks: {total_pages})"
                )
            }
            Self::Truncated {
                expected_pages,
                actual_bytes,
            } => write!(
                f,
                "file truncated: header claims {expected_pages} blocks but file has {actual_bytes} bytes"
            ),
            Self::FreeListCorrupt { page_id } => {
                write!(f, "free list references non-free block {page_id}")
            }
            Self::HeaderOverwrite => write!(f, "attempted to write block 0 as a data block"),
        }
    }
}

impl std::error::Error for FileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Header(e) => Some(e),
            Self::Page { source, .. } => Some(source),
            _ => None,
        }
    }
}
