pub mod config;
pub mod file;
pub mod index;
pub mod record;

pub use config::{ConfigError, ConfigResult, StorageConfig};
pub use file::{
    BUFFER_POOL_SIZE, BlobFile, BufferManager, BufferStats, FileError, FileId, FileManager,
    FileResult, PAGE_SIZE, Page, PageFile, PageHandle, PageId, RecordId,
};
pub use index::{BTreeIndex, BTreeIndexBuilder, Datatype, IndexError, IndexResult, Operator};
pub use record::{FileScan, KeyOrder, RecordError, RecordResult, Tuple, create_relation};
