use std::io;
use thiserror::Error;

use super::{FileId, FrameId, PageId, SlotId};

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileExists(String),

    #[error("File is still open: {0}")]
    FileOpen(String),

    #[error("Invalid file handle: {0}")]
    InvalidHandle(FileId),

    #[error("Invalid page: page_no={page_no} in {file}")]
    InvalidPage { page_no: PageId, file: String },

    #[error("Invalid record: page_no={page_no}, slot_no={slot_no}")]
    InvalidRecord { page_no: PageId, slot_no: SlotId },

    #[error("Insufficient space in page {page_no}: requested {requested}, available {available}")]
    InsufficientSpace {
        page_no: PageId,
        requested: usize,
        available: usize,
    },

    #[error("Buffer pool exceeded: every frame is pinned or referenced")]
    BufferExceeded,

    #[error("Page not pinned: page_no={page_no} in {file}, frame={frame}")]
    PageNotPinned {
        file: FileId,
        page_no: PageId,
        frame: FrameId,
    },

    #[error("Page pinned: page_no={page_no} in {file}, frame={frame}")]
    PagePinned {
        file: FileId,
        page_no: PageId,
        frame: FrameId,
    },

    #[error("Bad buffer: frame={frame} dirty={dirty} valid={valid} refbit={refbit}")]
    BadBuffer {
        frame: FrameId,
        dirty: bool,
        valid: bool,
        refbit: bool,
    },

    #[error("Page not resident in buffer pool: page_no={page_no} in {file}")]
    HashNotFound { file: FileId, page_no: PageId },
}

pub type FileResult<T> = Result<T, FileError>;
