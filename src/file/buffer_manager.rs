use std::collections::HashMap;

use tracing::{debug, trace, warn};

use super::error::{FileError, FileResult};
use super::file_manager::FileManager;
use super::page::Page;
use super::{BUFFER_POOL_SIZE, FileId, FrameId, PageId};
use crate::config::StorageConfig;

/// A pinned page in the buffer pool.
///
/// The handle stays usable while the page is pinned; pass it to
/// [`BufferManager::page`] / [`BufferManager::page_mut`] for access and to
/// [`BufferManager::unpin`] when done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHandle {
    file: FileId,
    page_no: PageId,
    frame: FrameId,
}

impl PageHandle {
    pub fn file(&self) -> FileId {
        self.file
    }

    pub fn page_no(&self) -> PageId {
        self.page_no
    }

    pub fn frame(&self) -> FrameId {
        self.frame
    }
}

/// Bookkeeping for one frame
#[derive(Debug, Clone, Default)]
struct FrameDesc {
    file: Option<FileId>,
    page_no: PageId,
    pin_count: u32,
    dirty: bool,
    valid: bool,
    refbit: bool,
}

impl FrameDesc {
    fn clear(&mut self) {
        *self = FrameDesc::default();
    }

    /// Mark as holding a freshly loaded page, pinned once
    fn set(&mut self, file: FileId, page_no: PageId) {
        self.file = Some(file);
        self.page_no = page_no;
        self.pin_count = 1;
        self.dirty = false;
        self.valid = true;
        self.refbit = true;
    }
}

/// Snapshot of a frame, for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSummary {
    pub frame: FrameId,
    pub file: Option<FileId>,
    pub page_no: PageId,
    pub pin_count: u32,
    pub dirty: bool,
    pub valid: bool,
    pub refbit: bool,
}

/// Buffer pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Page requests served (hits and misses)
    pub accesses: u64,
    pub disk_reads: u64,
    pub disk_writes: u64,
}

/// Manages a fixed pool of frames with clock replacement
pub struct BufferManager {
    /// Underlying file registry
    files: FileManager,
    /// One descriptor per frame
    frames: Vec<FrameDesc>,
    /// Page contents, parallel to `frames`
    pool: Vec<Page>,
    /// (file, page) -> frame for every valid frame
    frame_table: HashMap<(FileId, PageId), FrameId, ahash::RandomState>,
    /// Frame the clock hand last pointed at
    clock_hand: FrameId,
    stats: BufferStats,
}

impl BufferManager {
    /// Create a new buffer manager
    pub fn new(files: FileManager) -> Self {
        Self::with_capacity(files, BUFFER_POOL_SIZE)
    }

    /// Create a new buffer manager with specified capacity
    pub fn with_capacity(files: FileManager, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            files,
            frames: vec![FrameDesc::default(); capacity],
            pool: (0..capacity).map(|_| Page::zeroed()).collect(),
            frame_table: HashMap::with_capacity_and_hasher(capacity, ahash::RandomState::new()),
            clock_hand: capacity - 1,
            stats: BufferStats::default(),
        }
    }

    /// Build an empty pool sized from configuration
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::with_capacity(FileManager::new(), config.pool_size)
    }

    pub fn files(&self) -> &FileManager {
        &self.files
    }

    pub fn files_mut(&mut self) -> &mut FileManager {
        &mut self.files
    }

    /// Number of frames in the pool
    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    fn advance_clock(&mut self) {
        self.clock_hand = (self.clock_hand + 1) % self.frames.len();
    }

    /// Pick a frame to hold a new page, evicting an unpinned one if needed.
    ///
    /// Two full sweeps are enough to clear every reference bit; failing after
    /// that means every frame is pinned.
    fn alloc_buf(&mut self) -> FileResult<FrameId> {
        for _ in 0..2 * self.frames.len() {
            self.advance_clock();
            let frame = self.clock_hand;
            let desc = &mut self.frames[frame];

            if !desc.valid {
                desc.clear();
                return Ok(frame);
            }
            if desc.refbit {
                desc.refbit = false;
                continue;
            }
            if desc.pin_count > 0 {
                continue;
            }

            if let Some(file) = desc.file {
                let page_no = desc.page_no;
                if desc.dirty {
                    self.files
                        .file_mut(file)?
                        .write_page(page_no, &self.pool[frame])?;
                    self.stats.disk_writes += 1;
                }
                self.frame_table.remove(&(file, page_no));
                debug!(%file, page_no, frame, "evicted page");
            }
            self.frames[frame].clear();
            return Ok(frame);
        }

        Err(FileError::BufferExceeded)
    }

    /// Pin a page, loading it from disk on a miss
    pub fn read_page(&mut self, file: FileId, page_no: PageId) -> FileResult<PageHandle> {
        self.stats.accesses += 1;

        if let Some(&frame) = self.frame_table.get(&(file, page_no)) {
            let desc = &mut self.frames[frame];
            desc.refbit = true;
            desc.pin_count += 1;
            trace!(%file, page_no, frame, pin_count = desc.pin_count, "buffer hit");
            return Ok(PageHandle {
                file,
                page_no,
                frame,
            });
        }

        let frame = self.alloc_buf()?;
        let page = self.files.file_mut(file)?.read_page(page_no)?;
        self.stats.disk_reads += 1;

        self.pool[frame] = page;
        self.frames[frame].set(file, page_no);
        self.frame_table.insert((file, page_no), frame);
        debug!(%file, page_no, frame, "buffer miss");

        Ok(PageHandle {
            file,
            page_no,
            frame,
        })
    }

    /// Allocate a new page in `file` and pin it. The frame starts dirty.
    pub fn alloc_page(&mut self, file: FileId) -> FileResult<(PageId, PageHandle)> {
        self.stats.accesses += 1;

        let frame = self.alloc_buf()?;
        let (page_no, page) = self.files.file_mut(file)?.allocate_page()?;

        self.pool[frame] = page;
        self.frames[frame].set(file, page_no);
        self.frames[frame].dirty = true;
        self.frame_table.insert((file, page_no), frame);
        debug!(%file, page_no, frame, "allocated page");

        Ok((
            page_no,
            PageHandle {
                file,
                page_no,
                frame,
            },
        ))
    }

    /// Drop one pin, optionally marking the page dirty
    pub fn unpin_page(&mut self, file: FileId, page_no: PageId, dirty: bool) -> FileResult<()> {
        let frame = *self
            .frame_table
            .get(&(file, page_no))
            .ok_or(FileError::HashNotFound { file, page_no })?;

        let desc = &mut self.frames[frame];
        if desc.pin_count == 0 {
            return Err(FileError::PageNotPinned {
                file,
                page_no,
                frame,
            });
        }
        if dirty {
            desc.dirty = true;
        }
        desc.pin_count -= 1;
        Ok(())
    }

    pub fn unpin(&mut self, handle: &PageHandle, dirty: bool) -> FileResult<()> {
        self.unpin_page(handle.file, handle.page_no, dirty)
    }

    /// Resolve a handle to its frame, checking the frame still holds that page
    fn pinned_frame(&self, handle: &PageHandle) -> FileResult<FrameId> {
        let desc = self
            .frames
            .get(handle.frame)
            .filter(|d| d.valid && d.file == Some(handle.file) && d.page_no == handle.page_no)
            .ok_or(FileError::HashNotFound {
                file: handle.file,
                page_no: handle.page_no,
            })?;
        if desc.pin_count == 0 {
            return Err(FileError::PageNotPinned {
                file: handle.file,
                page_no: handle.page_no,
                frame: handle.frame,
            });
        }
        Ok(handle.frame)
    }

    pub fn page(&self, handle: &PageHandle) -> FileResult<&Page> {
        let frame = self.pinned_frame(handle)?;
        Ok(&self.pool[frame])
    }

    /// Mutable access to a pinned page. This marks the page dirty.
    pub fn page_mut(&mut self, handle: &PageHandle) -> FileResult<&mut Page> {
        let frame = self.pinned_frame(handle)?;
        self.frames[frame].dirty = true;
        Ok(&mut self.pool[frame])
    }

    /// Drop a page from the pool and delete it from its file
    pub fn dispose_page(&mut self, file: FileId, page_no: PageId) -> FileResult<()> {
        let frame = *self
            .frame_table
            .get(&(file, page_no))
            .ok_or(FileError::HashNotFound { file, page_no })?;

        if self.frames[frame].pin_count > 0 {
            return Err(FileError::PagePinned {
                file,
                page_no,
                frame,
            });
        }

        // The frame stays resident if the file refuses the delete
        self.files.file_mut(file)?.delete_page(page_no)?;
        self.frames[frame].clear();
        self.frame_table.remove(&(file, page_no));
        debug!(%file, page_no, "disposed page");
        Ok(())
    }

    /// Write back every dirty page of `file` and evict all of its frames.
    ///
    /// Fails if any of the file's pages is still pinned.
    pub fn flush_file(&mut self, file: FileId) -> FileResult<()> {
        for frame in 0..self.frames.len() {
            let desc = &self.frames[frame];
            if desc.file != Some(file) {
                continue;
            }
            if !desc.valid {
                return Err(FileError::BadBuffer {
                    frame,
                    dirty: desc.dirty,
                    valid: desc.valid,
                    refbit: desc.refbit,
                });
            }
            let page_no = desc.page_no;
            if desc.pin_count > 0 {
                return Err(FileError::PagePinned {
                    file,
                    page_no,
                    frame,
                });
            }

            if desc.dirty {
                self.files
                    .file_mut(file)?
                    .write_page(page_no, &self.pool[frame])?;
                self.stats.disk_writes += 1;
            }
            self.frame_table.remove(&(file, page_no));
            self.frames[frame].clear();
        }

        self.files.file_mut(file)?.sync()
    }

    /// Drop one reference to a file.
    ///
    /// While other holders remain, dirty pages are written back and stay
    /// resident. The last closer flushes and evicts every page of the file;
    /// if that fails (a page is still pinned) the file stays open so the
    /// close can be retried.
    pub fn close_file(&mut self, file: FileId) -> FileResult<()> {
        if self.files.open_count(file) > 1 {
            let written = self.write_back_file(file);
            self.files.close(file)?;
            return written;
        }
        self.flush_file(file)?;
        self.files.close(file)
    }

    fn write_back_file(&mut self, file: FileId) -> FileResult<()> {
        for frame in 0..self.frames.len() {
            if self.frames[frame].file == Some(file) {
                self.write_back(frame)?;
            }
        }
        self.files.file_mut(file)?.sync()
    }

    /// Write back every dirty frame, keeping pages resident
    pub fn flush_all(&mut self) -> FileResult<()> {
        for frame in 0..self.frames.len() {
            self.write_back(frame)?;
        }
        self.files.sync_all()
    }

    fn write_back(&mut self, frame: FrameId) -> FileResult<()> {
        let desc = &self.frames[frame];
        if let (true, true, Some(file)) = (desc.valid, desc.dirty, desc.file) {
            self.files
                .file_mut(file)?
                .write_page(desc.page_no, &self.pool[frame])?;
            self.stats.disk_writes += 1;
            self.frames[frame].dirty = false;
        }
        Ok(())
    }

    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    pub fn clear_stats(&mut self) {
        self.stats = BufferStats::default();
    }

    pub fn frame_summaries(&self) -> Vec<FrameSummary> {
        self.frames
            .iter()
            .enumerate()
            .map(|(frame, desc)| FrameSummary {
                frame,
                file: desc.file,
                page_no: desc.page_no,
                pin_count: desc.pin_count,
                dirty: desc.dirty,
                valid: desc.valid,
                refbit: desc.refbit,
            })
            .collect()
    }

    pub fn valid_frame_count(&self) -> usize {
        self.frames.iter().filter(|d| d.valid).count()
    }

    /// Check if a page is in the buffer pool
    pub fn is_page_cached(&self, file: FileId, page_no: PageId) -> bool {
        self.frame_table.contains_key(&(file, page_no))
    }

    /// Pin count of a resident page
    pub fn pin_count(&self, file: FileId, page_no: PageId) -> Option<u32> {
        self.frame_table
            .get(&(file, page_no))
            .map(|&frame| self.frames[frame].pin_count)
    }

    /// Get the number of dirty pages in the buffer pool
    pub fn dirty_page_count(&self) -> usize {
        self.frames.iter().filter(|d| d.valid && d.dirty).count()
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        for frame in 0..self.frames.len() {
            if let Err(e) = self.write_back(frame) {
                warn!(frame, error = %e, "failed to flush frame on shutdown");
            }
        }
        if let Err(e) = self.files.sync_all() {
            warn!(error = %e, "failed to sync files on shutdown");
        }
    }
}
