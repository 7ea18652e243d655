mod blob_file;
mod buffer_manager;
mod error;
mod file_manager;
mod page;
mod paged_file;

use std::fmt;
use std::path::Path;

pub use blob_file::BlobFile;
pub use buffer_manager::{BufferManager, BufferStats, FrameSummary, PageHandle};
pub use error::{FileError, FileResult};
pub use file_manager::{FileKind, FileManager};
pub use page::{Page, PageHeader, RecordIter, RecordId};
pub use paged_file::{FileHeader, PageFile};

/// Page size in bytes (8KB)
pub const PAGE_SIZE: usize = 8192;

/// Number of frames in the buffer pool when nothing else is configured
pub const BUFFER_POOL_SIZE: usize = 100;

/// Page number within a file. Numbering starts at 1.
pub type PageId = u32;

/// Slot number within a page. Numbering starts at 1.
pub type SlotId = u16;

/// Index of a frame in the buffer pool
pub type FrameId = usize;

/// Sentinel for "no page"
pub const INVALID_PAGE: PageId = 0;

/// Handle to a file registered with a [`FileManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(u32);

impl FileId {
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

/// Operations shared by every on-disk file flavour.
///
/// A file is a header followed by `PAGE_SIZE` pages numbered from 1.
/// [`PageFile`] keeps used/free page lists; [`BlobFile`] hands out pages
/// densely and never reclaims them.
pub trait DbFile {
    /// Path the file was opened with
    fn path(&self) -> &Path;

    /// Allocate a page, returning its number and initial contents
    fn allocate_page(&mut self) -> FileResult<(PageId, Page)>;

    /// Read a page from disk
    fn read_page(&mut self, page_no: PageId) -> FileResult<Page>;

    /// Write a page to disk
    fn write_page(&mut self, page_no: PageId, page: &Page) -> FileResult<()>;

    /// Return a page to the file
    fn delete_page(&mut self, page_no: PageId) -> FileResult<()>;

    /// First page in file order, or `INVALID_PAGE` for an empty file
    fn first_page_no(&mut self) -> FileResult<PageId>;

    /// Page following `page_no` in file order, or `INVALID_PAGE`
    fn next_used_page(&mut self, page_no: PageId) -> FileResult<PageId>;

    /// Flush OS buffers for this file
    fn sync(&mut self) -> FileResult<()>;

    /// Collect every page number in file order
    fn used_pages(&mut self) -> FileResult<Vec<PageId>> {
        let mut pages = Vec::new();
        let mut page_no = self.first_page_no()?;
        while page_no != INVALID_PAGE {
            pages.push(page_no);
            page_no = self.next_used_page(page_no)?;
        }
        Ok(pages)
    }
}

/// Byte offset of page `page_no` in a file whose header is `header_size` bytes
pub(crate) fn page_position(header_size: usize, page_no: PageId) -> u64 {
    (header_size + (page_no as usize - 1) * PAGE_SIZE) as u64
}

pub(crate) fn path_string(path: &Path) -> String {
    path.display().to_string()
}
