use std::path::Path;

use crate::file::{BufferManager, FileId, INVALID_PAGE, PageHandle, PageId, RecordId, SlotId};

use super::error::{RecordError, RecordResult};

/// Sequential scan over every record of a paged file.
///
/// Pages are visited in used-list order and records in slot order. Only the
/// page under the cursor is pinned.
pub struct FileScan {
    file: FileId,
    /// Page under the cursor, or `INVALID_PAGE` before the first call
    page_no: PageId,
    handle: Option<PageHandle>,
    /// Last slot returned on the current page (0 = none yet)
    slot: SlotId,
    dirty: bool,
    exhausted: bool,
}

impl FileScan {
    /// Open `path` for scanning
    pub fn open<P: AsRef<Path>>(bm: &mut BufferManager, path: P) -> RecordResult<Self> {
        let file = bm.files_mut().open_page_file(path)?;
        Ok(Self {
            file,
            page_no: INVALID_PAGE,
            handle: None,
            slot: 0,
            dirty: false,
            exhausted: false,
        })
    }

    pub fn file_id(&self) -> FileId {
        self.file
    }

    /// Advance to the next record and return its id
    pub fn scan_next(&mut self, bm: &mut BufferManager) -> RecordResult<RecordId> {
        if self.exhausted {
            return Err(RecordError::EndOfFile);
        }

        loop {
            let handle = match self.handle {
                Some(handle) => handle,
                None => {
                    let file = bm.files_mut().file_mut(self.file)?;
                    let next = if self.page_no == INVALID_PAGE {
                        file.first_page_no()?
                    } else {
                        file.next_used_page(self.page_no)?
                    };
                    if next == INVALID_PAGE {
                        self.exhausted = true;
                        return Err(RecordError::EndOfFile);
                    }

                    let handle = bm.read_page(self.file, next)?;
                    self.page_no = next;
                    self.slot = 0;
                    self.handle = Some(handle);
                    handle
                }
            };

            let last = self.slot;
            let next_slot = bm
                .page(&handle)?
                .records()
                .map(|(rid, _)| rid.slot_number)
                .find(|&slot| slot > last);

            match next_slot {
                Some(slot) => {
                    self.slot = slot;
                    return Ok(RecordId::new(self.page_no, slot));
                }
                None => self.release(bm)?,
            }
        }
    }

    /// Bytes of the record under the cursor
    pub fn record(&self, bm: &BufferManager) -> RecordResult<Vec<u8>> {
        let handle = self.handle.ok_or(RecordError::NoCurrentRecord)?;
        if self.slot == 0 {
            return Err(RecordError::NoCurrentRecord);
        }
        Ok(bm.page(&handle)?.get_record(self.slot)?.to_vec())
    }

    /// Have the current page written back when it is released
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn release(&mut self, bm: &mut BufferManager) -> RecordResult<()> {
        if let Some(handle) = self.handle.take() {
            bm.unpin(&handle, self.dirty)?;
            self.dirty = false;
        }
        Ok(())
    }

    /// Release the current page, flush the file, and drop the file handle
    pub fn close(mut self, bm: &mut BufferManager) -> RecordResult<()> {
        self.release(bm)?;
        bm.close_file(self.file)?;
        Ok(())
    }
}
