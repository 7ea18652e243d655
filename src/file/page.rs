use super::error::{FileError, FileResult};
use super::{INVALID_PAGE, PAGE_SIZE, PageId, SlotId};

/// Physical identifier for a record (page + slot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct RecordId {
    pub page_number: PageId,
    pub slot_number: SlotId,
}

impl RecordId {
    pub fn new(page_number: PageId, slot_number: SlotId) -> Self {
        Self {
            page_number,
            slot_number,
        }
    }
}

/// Page header stored at the beginning of each page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    pub page_number: PageId,           // 4 bytes - This page's own number (0 = unassigned)
    pub next_page_number: PageId,      // 4 bytes - Link in the used or free list
    pub used: bool,                    // 2 bytes - Flag word, bit 0
    pub free_space_lower_bound: u16,   // 2 bytes - End of the record area
    pub free_space_upper_bound: u16,   // 2 bytes - Start of the slot directory
    pub num_slots: u16,                // 2 bytes - Slots in the directory
    pub num_free_slots: u16,           // 2 bytes - Tombstoned slots
}

impl PageHeader {
    pub const SIZE: usize = 24;

    const USED_FLAG: u16 = 0x0001;

    pub fn new() -> Self {
        Self {
            page_number: INVALID_PAGE,
            next_page_number: INVALID_PAGE,
            used: false,
            free_space_lower_bound: 0,
            free_space_upper_bound: Page::DATA_SIZE as u16,
            num_slots: 0,
            num_free_slots: 0,
        }
    }

    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let mut result = [0u8; Self::SIZE];
        let flags = if self.used { Self::USED_FLAG } else { 0 };
        result[0..4].copy_from_slice(&self.page_number.to_le_bytes());
        result[4..8].copy_from_slice(&self.next_page_number.to_le_bytes());
        result[8..10].copy_from_slice(&flags.to_le_bytes());
        result[10..12].copy_from_slice(&self.free_space_lower_bound.to_le_bytes());
        result[12..14].copy_from_slice(&self.free_space_upper_bound.to_le_bytes());
        result[14..16].copy_from_slice(&self.num_slots.to_le_bytes());
        result[16..18].copy_from_slice(&self.num_free_slots.to_le_bytes());
        result
    }

    pub fn deserialize(data: &[u8]) -> Self {
        let flags = u16::from_le_bytes([data[8], data[9]]);
        Self {
            page_number: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            next_page_number: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            used: flags & Self::USED_FLAG != 0,
            free_space_lower_bound: u16::from_le_bytes([data[10], data[11]]),
            free_space_upper_bound: u16::from_le_bytes([data[12], data[13]]),
            num_slots: u16::from_le_bytes([data[14], data[15]]),
            num_free_slots: u16::from_le_bytes([data[16], data[17]]),
        }
    }
}

impl Default for PageHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// Directory entry for one record
#[derive(Debug, Clone, Copy)]
struct Slot {
    used: bool,
    offset: u16,
    length: u16,
}

impl Slot {
    const SIZE: usize = 4;
    const USED_BIT: u16 = 0x8000;

    const EMPTY: Slot = Slot {
        used: false,
        offset: 0,
        length: 0,
    };
}

/// A fixed-size page: a header followed by a data region.
///
/// The data region holds variable-length records that grow upward from its
/// start, and a slot directory that grows downward from its end. Slot `n`
/// (1-based) is the `n`-th entry counting back from the end of the region.
///
/// Blob files ignore this layout and treat the whole page as raw bytes via
/// [`Page::raw`] / [`Page::raw_mut`].
#[derive(Clone, PartialEq, Eq)]
pub struct Page {
    buffer: Box<[u8]>,
}

impl Page {
    /// Bytes available for records and slots
    pub const DATA_SIZE: usize = PAGE_SIZE - PageHeader::SIZE;

    /// Create an empty, unassigned page
    pub fn new() -> Self {
        let mut page = Self {
            buffer: vec![0u8; PAGE_SIZE].into_boxed_slice(),
        };
        page.initialize();
        page
    }

    /// Page with every byte zeroed, header included
    pub fn zeroed() -> Self {
        Self {
            buffer: vec![0u8; PAGE_SIZE].into_boxed_slice(),
        }
    }

    /// Wrap bytes read from disk. Short buffers are zero-padded.
    pub fn from_bytes(mut bytes: Vec<u8>) -> Self {
        bytes.resize(PAGE_SIZE, 0);
        Self {
            buffer: bytes.into_boxed_slice(),
        }
    }

    /// Reset to an empty page, keeping the page number
    pub fn initialize(&mut self) {
        let page_number = self.page_number();
        self.buffer.fill(0);
        let mut header = PageHeader::new();
        header.page_number = page_number;
        self.set_header(header);
    }

    pub fn header(&self) -> PageHeader {
        PageHeader::deserialize(&self.buffer[..PageHeader::SIZE])
    }

    pub fn set_header(&mut self, header: PageHeader) {
        self.buffer[..PageHeader::SIZE].copy_from_slice(&header.serialize());
    }

    pub fn raw(&self) -> &[u8] {
        &self.buffer
    }

    pub fn raw_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn page_number(&self) -> PageId {
        u32::from_le_bytes([self.buffer[0], self.buffer[1], self.buffer[2], self.buffer[3]])
    }

    pub fn set_page_number(&mut self, page_number: PageId) {
        let mut header = self.header();
        header.page_number = page_number;
        self.set_header(header);
    }

    pub fn next_page_number(&self) -> PageId {
        u32::from_le_bytes([self.buffer[4], self.buffer[5], self.buffer[6], self.buffer[7]])
    }

    pub fn set_next_page_number(&mut self, next: PageId) {
        let mut header = self.header();
        header.next_page_number = next;
        self.set_header(header);
    }

    pub fn is_used(&self) -> bool {
        self.header().used
    }

    pub fn set_used(&mut self, used: bool) {
        let mut header = self.header();
        header.used = used;
        self.set_header(header);
    }

    /// Bytes between the record area and the slot directory
    pub fn free_space(&self) -> usize {
        let header = self.header();
        (header.free_space_upper_bound as usize)
            .saturating_sub(header.free_space_lower_bound as usize)
    }

    /// Whether a record of `len` bytes fits, counting a new slot if needed
    pub fn has_space_for(&self, len: usize) -> bool {
        let header = self.header();
        let needed = if header.num_free_slots > 0 {
            len
        } else {
            len + Slot::SIZE
        };
        needed <= self.free_space()
    }

    pub fn num_records(&self) -> usize {
        let header = self.header();
        (header.num_slots - header.num_free_slots) as usize
    }

    /// Insert a record, reusing a tombstoned slot when one exists
    pub fn insert_record(&mut self, data: &[u8]) -> FileResult<RecordId> {
        let mut header = self.header();
        if data.is_empty() {
            return Err(FileError::InvalidRecord {
                page_no: header.page_number,
                slot_no: 0,
            });
        }
        if !self.has_space_for(data.len()) {
            return Err(FileError::InsufficientSpace {
                page_no: header.page_number,
                requested: data.len(),
                available: self.free_space(),
            });
        }

        let slot_no = match (1..=header.num_slots).find(|&s| !self.slot(s).used) {
            Some(slot_no) => {
                header.num_free_slots -= 1;
                slot_no
            }
            None => {
                header.num_slots += 1;
                header.free_space_upper_bound -= Slot::SIZE as u16;
                header.num_slots
            }
        };

        let offset = header.free_space_lower_bound;
        let start = PageHeader::SIZE + offset as usize;
        self.buffer[start..start + data.len()].copy_from_slice(data);
        header.free_space_lower_bound += data.len() as u16;
        self.set_header(header);
        self.set_slot(
            slot_no,
            Slot {
                used: true,
                offset,
                length: data.len() as u16,
            },
        );

        Ok(RecordId::new(header.page_number, slot_no))
    }

    /// Get record bytes
    pub fn get_record(&self, slot_no: SlotId) -> FileResult<&[u8]> {
        let slot = self.used_slot(slot_no)?;
        let start = PageHeader::SIZE + slot.offset as usize;
        Ok(&self.buffer[start..start + slot.length as usize])
    }

    /// Replace a record's bytes, keeping its slot number
    pub fn update_record(&mut self, slot_no: SlotId, data: &[u8]) -> FileResult<()> {
        let slot = self.used_slot(slot_no)?;
        if data.is_empty() {
            return Err(FileError::InvalidRecord {
                page_no: self.page_number(),
                slot_no,
            });
        }
        let available = self.free_space() + slot.length as usize;
        if data.len() > available {
            return Err(FileError::InsufficientSpace {
                page_no: self.page_number(),
                requested: data.len(),
                available,
            });
        }

        self.remove_bytes(slot.offset, slot.length);
        let mut header = self.header();
        let offset = header.free_space_lower_bound;
        let start = PageHeader::SIZE + offset as usize;
        self.buffer[start..start + data.len()].copy_from_slice(data);
        header.free_space_lower_bound += data.len() as u16;
        self.set_header(header);
        self.set_slot(
            slot_no,
            Slot {
                used: true,
                offset,
                length: data.len() as u16,
            },
        );
        Ok(())
    }

    /// Delete a record, compacting the record area.
    ///
    /// Trailing tombstones are dropped from the directory so the space they
    /// occupied becomes free again.
    pub fn delete_record(&mut self, slot_no: SlotId) -> FileResult<()> {
        let slot = self.used_slot(slot_no)?;
        self.remove_bytes(slot.offset, slot.length);
        self.set_slot(slot_no, Slot::EMPTY);

        let mut header = self.header();
        header.num_free_slots += 1;
        while header.num_slots > 0 && !self.slot(header.num_slots).used {
            header.num_slots -= 1;
            header.num_free_slots -= 1;
            header.free_space_upper_bound += Slot::SIZE as u16;
        }
        self.set_header(header);
        Ok(())
    }

    /// Iterate over live records in slot order
    pub fn records(&self) -> RecordIter<'_> {
        RecordIter {
            page: self,
            next_slot: 1,
        }
    }

    fn slot_position(slot_no: SlotId) -> usize {
        PAGE_SIZE - slot_no as usize * Slot::SIZE
    }

    fn slot(&self, slot_no: SlotId) -> Slot {
        let pos = Self::slot_position(slot_no);
        let raw_offset = u16::from_le_bytes([self.buffer[pos], self.buffer[pos + 1]]);
        let length = u16::from_le_bytes([self.buffer[pos + 2], self.buffer[pos + 3]]);
        Slot {
            used: raw_offset & Slot::USED_BIT != 0,
            offset: raw_offset & !Slot::USED_BIT,
            length,
        }
    }

    fn set_slot(&mut self, slot_no: SlotId, slot: Slot) {
        let pos = Self::slot_position(slot_no);
        let raw_offset = if slot.used {
            slot.offset | Slot::USED_BIT
        } else {
            slot.offset
        };
        self.buffer[pos..pos + 2].copy_from_slice(&raw_offset.to_le_bytes());
        self.buffer[pos + 2..pos + 4].copy_from_slice(&slot.length.to_le_bytes());
    }

    fn used_slot(&self, slot_no: SlotId) -> FileResult<Slot> {
        let header = self.header();
        if slot_no == 0 || slot_no > header.num_slots {
            return Err(FileError::InvalidRecord {
                page_no: header.page_number,
                slot_no,
            });
        }
        let slot = self.slot(slot_no);
        if !slot.used {
            return Err(FileError::InvalidRecord {
                page_no: header.page_number,
                slot_no,
            });
        }
        Ok(slot)
    }

    /// Close the gap left by `length` bytes at `offset` in the record area
    fn remove_bytes(&mut self, offset: u16, length: u16) {
        let mut header = self.header();
        let start = PageHeader::SIZE + offset as usize;
        let end = start + length as usize;
        let tail_end = PageHeader::SIZE + header.free_space_lower_bound as usize;
        self.buffer.copy_within(end..tail_end, start);
        header.free_space_lower_bound -= length;

        for slot_no in 1..=header.num_slots {
            let mut slot = self.slot(slot_no);
            if slot.used && slot.offset > offset {
                slot.offset -= length;
                self.set_slot(slot_no, slot);
            }
        }
        self.set_header(header);
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page").field("header", &self.header()).finish()
    }
}

/// Iterator over the live records of a page
pub struct RecordIter<'a> {
    page: &'a Page,
    next_slot: SlotId,
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = (RecordId, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let num_slots = self.page.header().num_slots;
        while self.next_slot <= num_slots {
            let slot_no = self.next_slot;
            self.next_slot += 1;
            if let Ok(data) = self.page.get_record(slot_no) {
                return Some((RecordId::new(self.page.page_number(), slot_no), data));
            }
        }
        None
    }
}
