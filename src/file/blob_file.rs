use std::path::Path;

use tracing::debug;

use super::error::FileResult;
use super::page::Page;
use super::paged_file::{DiskFile, FileHeader};
use super::{DbFile, INVALID_PAGE, PageId, path_string};

/// A file of raw pages with no list bookkeeping.
///
/// Pages are numbered densely from 1, always in use, and never reclaimed.
/// The whole page belongs to the caller; index nodes live here.
pub struct BlobFile {
    disk: DiskFile,
    header: FileHeader,
}

impl BlobFile {
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

    pub fn num_pages(&self) -> u32 {
        self.header.num_pages
    }

    fn check_range(&self, page_no: PageId) -> FileResult<()> {
        if page_no == INVALID_PAGE || page_no >= self.header.num_pages {
            return Err(self.disk.invalid_page(page_no));
        }
        Ok(())
    }
}

impl DbFile for BlobFile {
    fn path(&self) -> &Path {
        self.disk.path()
    }

    fn allocate_page(&mut self) -> FileResult<(PageId, Page)> {
        let page_no = self.header.num_pages;
        if self.header.first_used_page == INVALID_PAGE {
            self.header.first_used_page = page_no;
        }
        self.header.num_pages += 1;

        let page = Page::zeroed();
        self.disk.write_raw(page_no, &page)?;
        self.disk.write_header(&self.header)?;
        debug!(file = %path_string(self.disk.path()), page_no, "allocated blob page");
        Ok((page_no, page))
    }

    fn read_page(&mut self, page_no: PageId) -> FileResult<Page> {
        self.check_range(page_no)?;
        self.disk.read_raw(page_no)
    }

    fn write_page(&mut self, page_no: PageId, page: &Page) -> FileResult<()> {
        self.check_range(page_no)?;
        self.disk.write_raw(page_no, page)
    }

    fn delete_page(&mut self, page_no: PageId) -> FileResult<()> {
        Err(self.disk.invalid_page(page_no))
    }

    fn first_page_no(&mut self) -> FileResult<PageId> {
        Ok(self.header.first_used_page)
    }

    fn next_used_page(&mut self, page_no: PageId) -> FileResult<PageId> {
        self.check_range(page_no)?;
        if page_no + 1 < self.header.num_pages {
            Ok(page_no + 1)
        } else {
            Ok(INVALID_PAGE)
        }
    }

    fn sync(&mut self) -> FileResult<()> {
        self.disk.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileError;

    #[test]
    fn test_dense_allocation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut file = BlobFile::create(temp_dir.path().join("index.0")).unwrap();

        assert_eq!(file.first_page_no().unwrap(), INVALID_PAGE);
        for expected in 1..=3 {
            let (page_no, page) = file.allocate_page().unwrap();
            assert_eq!(page_no, expected);
            assert!(page.raw().iter().all(|&b| b == 0));
        }
        assert_eq!(file.used_pages().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_raw_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("index.0");
        {
            let mut file = BlobFile::create(&path).unwrap();
            let (page_no, mut page) = file.allocate_page().unwrap();
            page.raw_mut()[0..4].copy_from_slice(&0xDEADBEEFu32.to_le_bytes());
            page.raw_mut()[8191] = 7;
            file.write_page(page_no, &page).unwrap();
        }

        let mut file = BlobFile::open(&path).unwrap();
        assert_eq!(file.num_pages(), 2);
        let page = file.read_page(1).unwrap();
        assert_eq!(&page.raw()[0..4], &0xDEADBEEFu32.to_le_bytes());
        assert_eq!(page.raw()[8191], 7);
    }

    #[test]
    fn test_delete_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut file = BlobFile::create(temp_dir.path().join("index.0")).unwrap();
        file.allocate_page().unwrap();

        assert!(matches!(file.delete_page(1), Err(FileError::InvalidPage { .. })));
        assert!(file.read_page(1).is_ok());
    }

    #[test]
    fn test_out_of_range() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut file = BlobFile::create(temp_dir.path().join("index.0")).unwrap();
        file.allocate_page().unwrap();

        assert!(matches!(file.read_page(0), Err(FileError::InvalidPage { .. })));
        assert!(matches!(file.read_page(2), Err(FileError::InvalidPage { .. })));
        assert!(matches!(
            file.write_page(5, &Page::zeroed()),
            Err(FileError::InvalidPage { .. })
        ));
    }
}
