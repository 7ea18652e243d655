use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::{FileError, FileResult};
use super::page::Page;
use super::{DbFile, INVALID_PAGE, PAGE_SIZE, PageId, page_position, path_string};

/// File header stored in the first bytes of every file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub num_pages: u32,       // 4 bytes - Next fresh page number (starts at 1)
    pub first_used_page: u32, // 4 bytes - Head of the used list
    pub num_free_pages: u32,  // 4 bytes - Length of the free list
    pub first_free_page: u32, // 4 bytes - Head of the free list
}

impl FileHeader {
    pub const SIZE: usize = 16;

    pub fn new() -> Self {
        Self {
            num_pages: 1,
            first_used_page: INVALID_PAGE,
            num_free_pages: 0,
            first_free_page: INVALID_PAGE,
        }
    }

    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let mut result = [0u8; Self::SIZE];
        result[0..4].copy_from_slice(&self.num_pages.to_le_bytes());
        result[4..8].copy_from_slice(&self.first_used_page.to_le_bytes());
        result[8..12].copy_from_slice(&self.num_free_pages.to_le_bytes());
        result[12..16].copy_from_slice(&self.first_free_page.to_le_bytes());
        result
    }

    pub fn deserialize(data: &[u8]) -> Self {
        let field = |i: usize| u32::from_le_bytes([data[i], data[i + 1], data[i + 2], data[i + 3]]);
        Self {
            num_pages: field(0),
            first_used_page: field(4),
            num_free_pages: field(8),
            first_free_page: field(12),
        }
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw positioned I/O over a header plus pages, shared by both file kinds
pub(crate) struct DiskFile {
    file: File,
    path: PathBuf,
}

impl DiskFile {
    /// Create a new file holding only a fresh header
    pub(crate) fn create(path: &Path) -> FileResult<(Self, FileHeader)> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => FileError::FileExists(path_string(path)),
                _ => FileError::Io(e),
            })?;

        let mut disk = Self {
            file,
            path: path.to_path_buf(),
        };
        let header = FileHeader::new();
        disk.write_header(&header)?;
        Ok((disk, header))
    }

    /// Open an existing file and read its header
    pub(crate) fn open(path: &Path) -> FileResult<(Self, FileHeader)> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => FileError::FileNotFound(path_string(path)),
                _ => FileError::Io(e),
            })?;

        let mut disk = Self {
            file,
            path: path.to_path_buf(),
        };
        let header = disk.read_header()?;
        Ok((disk, header))
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn read_header(&mut self) -> FileResult<FileHeader> {
        let mut buf = [0u8; FileHeader::SIZE];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut buf)?;
        Ok(FileHeader::deserialize(&buf))
    }

    pub(crate) fn write_header(&mut self, header: &FileHeader) -> FileResult<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&header.serialize())?;
        Ok(())
    }

    pub(crate) fn read_raw(&mut self, page_no: PageId) -> FileResult<Page> {
        let mut buf = vec![0u8; PAGE_SIZE];
        self.file
            .seek(SeekFrom::Start(page_position(FileHeader::SIZE, page_no)))?;
        self.file.read_exact(&mut buf)?;
        Ok(Page::from_bytes(buf))
    }

    pub(crate) fn write_raw(&mut self, page_no: PageId, page: &Page) -> FileResult<()> {
        self.file
            .seek(SeekFrom::Start(page_position(FileHeader::SIZE, page_no)))?;
        self.file.write_all(page.raw())?;
        Ok(())
    }

    pub(crate) fn sync(&mut self) -> FileResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    pub(crate) fn invalid_page(&self, page_no: PageId) -> FileError {
        FileError::InvalidPage {
            page_no,
            file: path_string(&self.path),
        }
    }
}

/// A file of slotted pages threaded onto a used list and a free list.
///
/// The used list is kept in ascending page order; the free list is a stack.
/// Both are linked through each page's `next_page_number`.
pub struct PageFile {
    disk: DiskFile,
    header: FileHeader,
}

impl PageFile {
    /// Create a new, empty file. Fails if the path already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> FileResult<Self> {
        let (disk, header) = DiskFile::create(path.as_ref())?;
        Ok(Self { disk, header })
    }

    /// Open an existing file
    pub fn open<P: AsRef<Path>>(path: P) -> FileResult<Self> {
        let (disk, header) = DiskFile::open(path.as_ref())?;
        Ok(Self { disk, header })
    }

    pub fn header(&self) -> FileHeader {
        self.header
    }

    pub fn num_pages(&self) -> u32 {
        self.header.num_pages
    }

    fn check_range(&self, page_no: PageId) -> FileResult<()> {
        if page_no == INVALID_PAGE || page_no >= self.header.num_pages {
            return Err(self.disk.invalid_page(page_no));
        }
        Ok(())
    }

    /// Read a page that must currently be on the used list
    fn read_used(&mut self, page_no: PageId) -> FileResult<Page> {
        self.check_range(page_no)?;
        let page = self.disk.read_raw(page_no)?;
        if !page.is_used() {
            return Err(self.disk.invalid_page(page_no));
        }
        Ok(page)
    }

    /// Link `page_no` into the used list in ascending position
    fn link_used(&mut self, page_no: PageId, page: &mut Page) -> FileResult<()> {
        let head = self.header.first_used_page;
        if head == INVALID_PAGE || head > page_no {
            page.set_next_page_number(head);
            self.header.first_used_page = page_no;
            return Ok(());
        }

        let mut prev_no = head;
        let mut prev = self.disk.read_raw(prev_no)?;
        while prev.next_page_number() != INVALID_PAGE && prev.next_page_number() < page_no {
            prev_no = prev.next_page_number();
            prev = self.disk.read_raw(prev_no)?;
        }
        page.set_next_page_number(prev.next_page_number());
        prev.set_next_page_number(page_no);
        self.disk.write_raw(prev_no, &prev)
    }
}

impl DbFile for PageFile {
    fn path(&self) -> &Path {
        self.disk.path()
    }

    fn allocate_page(&mut self) -> FileResult<(PageId, Page)> {
        let page_no = if self.header.num_free_pages > 0 {
            let page_no = self.header.first_free_page;
            let freed = self.disk.read_raw(page_no)?;
            self.header.first_free_page = freed.next_page_number();
            self.header.num_free_pages -= 1;
            page_no
        } else {
            let page_no = self.header.num_pages;
            self.header.num_pages += 1;
            page_no
        };

        let mut page = Page::new();
        page.set_page_number(page_no);
        page.set_used(true);
        self.link_used(page_no, &mut page)?;

        self.disk.write_raw(page_no, &page)?;
        self.disk.write_header(&self.header)?;
        debug!(file = %path_string(self.disk.path()), page_no, "allocated page");
        Ok((page_no, page))
    }

    fn read_page(&mut self, page_no: PageId) -> FileResult<Page> {
        self.read_used(page_no)
    }

    fn write_page(&mut self, page_no: PageId, page: &Page) -> FileResult<()> {
        let on_disk = self.read_used(page_no)?;
        let mut page = page.clone();
        page.set_page_number(page_no);
        page.set_used(true);
        page.set_next_page_number(on_disk.next_page_number());
        self.disk.write_raw(page_no, &page)
    }

    fn delete_page(&mut self, page_no: PageId) -> FileResult<()> {
        let page = self.read_used(page_no)?;
        let next = page.next_page_number();

        if self.header.first_used_page == page_no {
            self.header.first_used_page = next;
        } else {
            let mut prev_no = self.header.first_used_page;
            loop {
                if prev_no == INVALID_PAGE {
                    return Err(self.disk.invalid_page(page_no));
                }
                let mut prev = self.disk.read_raw(prev_no)?;
                if prev.next_page_number() == page_no {
                    prev.set_next_page_number(next);
                    self.disk.write_raw(prev_no, &prev)?;
                    break;
                }
                prev_no = prev.next_page_number();
            }
        }

        let mut cleared = Page::new();
        cleared.set_page_number(page_no);
        cleared.set_next_page_number(self.header.first_free_page);
        self.disk.write_raw(page_no, &cleared)?;

        self.header.first_free_page = page_no;
        self.header.num_free_pages += 1;
        self.disk.write_header(&self.header)?;
        debug!(file = %path_string(self.disk.path()), page_no, "deleted page");
        Ok(())
    }

    fn first_page_no(&mut self) -> FileResult<PageId> {
        Ok(self.header.first_used_page)
    }

    fn next_used_page(&mut self, page_no: PageId) -> FileResult<PageId> {
        Ok(self.read_used(page_no)?.next_page_number())
    }

    fn sync(&mut self) -> FileResult<()> {
        self.disk.sync()
    }
}
