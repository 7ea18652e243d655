use crate::file::FileError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("End of file reached")]
    EndOfFile,

    #[error("No current record: call scan_next first")]
    NoCurrentRecord,

    #[error("Invalid tuple: expected {expected} bytes, got {actual}")]
    InvalidTuple { expected: usize, actual: usize },

    #[error("Key range of {size} keys from {start} overflows i32")]
    KeyRange { start: i32, size: usize },
}

pub type RecordResult<T> = Result<T, RecordError>;
