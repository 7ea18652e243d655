//! Relation files: fixed-width tuples, sequential scans, and a builder for
//! test relations.

mod error;
mod file_scan;
mod relation;
mod tuple;

pub use error::{RecordError, RecordResult};
pub use file_scan::FileScan;
pub use relation::{KeyOrder, create_relation};
pub use tuple::Tuple;
