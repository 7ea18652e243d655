use thiserror::Error;

use crate::file::{FileError, PageId};
use crate::record::RecordError;

use super::meta::Datatype;

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors that can occur during index operations
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Index metadata does not match: {0}")]
    BadIndexInfo(String),

    #[error("Bad scan operators: low bound takes GT/GTE, high bound takes LT/LTE")]
    BadOpcodes,

    #[error("Bad scan range: low {low} is greater than high {high}")]
    BadScanrange { low: i32, high: i32 },

    #[error("No key satisfies the scan criteria")]
    NoSuchKeyFound,

    #[error("No scan has been started")]
    ScanNotInitialized,

    #[error("Index scan completed")]
    IndexScanCompleted,

    #[error("Corrupted node data at page {0}")]
    CorruptedNode(PageId),

    #[error("Unsupported key datatype: {0}")]
    UnsupportedDatatype(Datatype),

    #[error("Bad {kind} occupancy {requested}: must be between 2 and {max}")]
    BadOccupancy {
        kind: &'static str,
        requested: usize,
        max: usize,
    },
}
