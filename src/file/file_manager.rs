use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::blob_file::BlobFile;
use super::error::{FileError, FileResult};
use super::paged_file::PageFile;
use super::{DbFile, FileId, path_string};

/// On-disk flavour of a registered file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Paged,
    Blob,
}

struct FileEntry {
    file: Box<dyn DbFile>,
    path: PathBuf,
    kind: FileKind,
    open_count: usize,
}

/// Registry of open files.
///
/// Opening a path that is already open hands back the same [`FileId`] and
/// bumps its open count; the descriptor is released when the last holder
/// closes it.
pub struct FileManager {
    /// Map from file ids to open files
    open_files: HashMap<FileId, FileEntry>,
    /// Map from canonical paths to ids (for checking if already open)
    path_to_id: HashMap<PathBuf, FileId>,
    /// Next id to hand out; ids are never reused
    next_id: u32,
}

impl FileManager {
    pub fn new() -> Self {
        Self {
            open_files: HashMap::new(),
            path_to_id: HashMap::new(),
            next_id: 0,
        }
    }

    /// Create a new paged file and open it
    pub fn create_page_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<FileId> {
        let file = PageFile::create(path.as_ref())?;
        self.register(path.as_ref(), Box::new(file), FileKind::Paged)
    }

    /// Open an existing paged file
    pub fn open_page_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<FileId> {
        self.open_with(path.as_ref(), FileKind::Paged)
    }

    /// Create a new blob file and open it
    pub fn create_blob_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<FileId> {
        let file = BlobFile::create(path.as_ref())?;
        self.register(path.as_ref(), Box::new(file), FileKind::Blob)
    }

    /// Open an existing blob file
    pub fn open_blob_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<FileId> {
        self.open_with(path.as_ref(), FileKind::Blob)
    }

    fn open_with(&mut self, path: &Path, kind: FileKind) -> FileResult<FileId> {
        let canonical = path
            .canonicalize()
            .map_err(|_| FileError::FileNotFound(path_string(path)))?;

        // Already open: share the descriptor
        if let Some(&id) = self.path_to_id.get(&canonical) {
            let entry = self
                .open_files
                .get_mut(&id)
                .ok_or(FileError::InvalidHandle(id))?;
            if entry.kind != kind {
                return Err(FileError::FileOpen(path_string(path)));
            }
            entry.open_count += 1;
            return Ok(id);
        }

        let file: Box<dyn DbFile> = match kind {
            FileKind::Paged => Box::new(PageFile::open(&canonical)?),
            FileKind::Blob => Box::new(BlobFile::open(&canonical)?),
        };
        self.register(&canonical, file, kind)
    }

    fn register(&mut self, path: &Path, file: Box<dyn DbFile>, kind: FileKind) -> FileResult<FileId> {
        let canonical = path
            .canonicalize()
            .map_err(|_| FileError::FileNotFound(path_string(path)))?;

        let id = FileId(self.next_id);
        self.next_id += 1;

        debug!(%id, path = %path_string(&canonical), ?kind, "opened file");
        self.open_files.insert(
            id,
            FileEntry {
                file,
                path: canonical.clone(),
                kind,
                open_count: 1,
            },
        );
        self.path_to_id.insert(canonical, id);
        Ok(id)
    }

    /// Drop one reference to a file, releasing it when none remain
    pub fn close(&mut self, id: FileId) -> FileResult<()> {
        let entry = self
            .open_files
            .get_mut(&id)
            .ok_or(FileError::InvalidHandle(id))?;

        entry.open_count -= 1;
        if entry.open_count == 0 {
            if let Some(mut entry) = self.open_files.remove(&id) {
                entry.file.sync()?;
                self.path_to_id.remove(&entry.path);
                debug!(%id, "closed file");
            }
        }
        Ok(())
    }

    /// Delete a file from disk. The file must exist and not be open.
    pub fn remove_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();
        let canonical = path
            .canonicalize()
            .map_err(|_| FileError::FileNotFound(path_string(path)))?;

        if self.path_to_id.contains_key(&canonical) {
            return Err(FileError::FileOpen(path_string(path)));
        }

        std::fs::remove_file(&canonical)?;
        Ok(())
    }

    pub fn exists<P: AsRef<Path>>(&self, path: P) -> bool {
        path.as_ref().exists()
    }

    /// Check if a path is currently open
    pub fn is_open<P: AsRef<Path>>(&self, path: P) -> bool {
        path.as_ref()
            .canonicalize()
            .map(|canonical| self.path_to_id.contains_key(&canonical))
            .unwrap_or(false)
    }

    pub fn file_mut(&mut self, id: FileId) -> FileResult<&mut dyn DbFile> {
        self.open_files
            .get_mut(&id)
            .map(|entry| entry.file.as_mut() as &mut dyn DbFile)
            .ok_or(FileError::InvalidHandle(id))
    }

    pub fn path(&self, id: FileId) -> FileResult<&Path> {
        self.open_files
            .get(&id)
            .map(|entry| entry.path.as_path())
            .ok_or(FileError::InvalidHandle(id))
    }

    pub fn kind(&self, id: FileId) -> FileResult<FileKind> {
        self.open_files
            .get(&id)
            .map(|entry| entry.kind)
            .ok_or(FileError::InvalidHandle(id))
    }

    pub fn open_count(&self, id: FileId) -> usize {
        self.open_files.get(&id).map_or(0, |entry| entry.open_count)
    }

    /// Get the number of currently open files
    pub fn open_file_count(&self) -> usize {
        self.open_files.len()
    }

    /// Sync all open files to disk
    pub fn sync_all(&mut self) -> FileResult<()> {
        for entry in self.open_files.values_mut() {
            entry.file.sync()?;
        }
        Ok(())
    }
}

impl Default for FileManager {
    fn default() -> Self {
        Self::new()
    }
}
