use std::fmt;
use std::path::Path;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::file::{FileError, FileManager, path_string};

use super::error::{RecordError, RecordResult};
use super::tuple::Tuple;

/// Order in which keys are written to a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOrder {
    Forward,
    Backward,
    Random,
}

impl KeyOrder {
    pub const ALL: [KeyOrder; 3] = [KeyOrder::Forward, KeyOrder::Backward, KeyOrder::Random];

    /// The keys `start..start + size` in this order. `seed` drives the
    /// random shuffle so runs are reproducible.
    ///
    /// Fails with `KeyRange` if the range does not fit in an `i32`.
    pub fn keys(self, start: i32, size: usize, seed: u64) -> RecordResult<Vec<i32>> {
        let end = i32::try_from(size)
            .ok()
            .and_then(|size| start.checked_add(size))
            .ok_or(RecordError::KeyRange { start, size })?;
        let mut keys: Vec<i32> = (start..end).collect();
        match self {
            KeyOrder::Forward => {}
            KeyOrder::Backward => keys.reverse(),
            KeyOrder::Random => {
                let mut rng = StdRng::seed_from_u64(seed);
                keys.shuffle(&mut rng);
            }
        }
        Ok(keys)
    }
}

impl fmt::Display for KeyOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyOrder::Forward => write!(f, "forward"),
            KeyOrder::Backward => write!(f, "backward"),
            KeyOrder::Random => write!(f, "random"),
        }
    }
}

/// Write a fresh relation holding one [`Tuple::for_key`] per key.
///
/// An existing file at `path` is replaced. Pages are filled in order; a new
/// page is started whenever the current one runs out of space. Returns the
/// number of tuples written.
pub fn create_relation<P, I>(files: &mut FileManager, path: P, keys: I) -> RecordResult<usize>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = i32>,
{
    let path = path.as_ref();
    match files.remove_file(path) {
        Ok(()) | Err(FileError::FileNotFound(_)) => {}
        Err(e) => return Err(e.into()),
    }

    let id = files.create_page_file(path)?;
    let file = files.file_mut(id)?;

    let (mut page_no, mut page) = file.allocate_page()?;
    let mut count = 0;
    for key in keys {
        let record = Tuple::for_key(key).serialize();
        match page.insert_record(&record) {
            Ok(_) => {}
            Err(FileError::InsufficientSpace { .. }) => {
                file.write_page(page_no, &page)?;
                (page_no, page) = file.allocate_page()?;
                page.insert_record(&record)?;
            }
            Err(e) => return Err(e.into()),
        }
        count += 1;
    }
    file.write_page(page_no, &page)?;

    files.close(id)?;
    debug!(path = %path_string(path), tuples = count, "created relation");
    Ok(count)
}
