use std::fmt;

use crate::file::{PageHandle, RecordId};

use super::error::{IndexError, IndexResult};
use super::node::{Key, LeafNode};

/// Comparison operator for a scan bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Lt,
    Lte,
    Gte,
    Gt,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Lt => write!(f, "LT"),
            Operator::Lte => write!(f, "LTE"),
            Operator::Gte => write!(f, "GTE"),
            Operator::Gt => write!(f, "GT"),
        }
    }
}

/// Validated range of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanBounds {
    pub low: Key,
    pub low_op: Operator,
    pub high: Key,
    pub high_op: Operator,
}

impl ScanBounds {
    pub fn new(low: Key, low_op: Operator, high: Key, high_op: Operator) -> IndexResult<Self> {
        if !matches!(low_op, Operator::Gt | Operator::Gte)
            || !matches!(high_op, Operator::Lt | Operator::Lte)
        {
            return Err(IndexError::BadOpcodes);
        }
        if low > high {
            return Err(IndexError::BadScanrange { low, high });
        }
        Ok(Self {
            low,
            low_op,
            high,
            high_op,
        })
    }

    pub fn above_low(&self, key: Key) -> bool {
        match self.low_op {
            Operator::Gte => key >= self.low,
            _ => key > self.low,
        }
    }

    pub fn below_high(&self, key: Key) -> bool {
        match self.high_op {
            Operator::Lte => key <= self.high,
            _ => key < self.high,
        }
    }

    pub fn contains(&self, key: Key) -> bool {
        self.above_low(key) && self.below_high(key)
    }

    /// First entry of `leaf` that satisfies the low bound
    pub fn first_entry(&self, leaf: &LeafNode) -> usize {
        leaf.keys.partition_point(|&k| !self.above_low(k))
    }
}

/// Position of an active scan. The leaf under the cursor stays pinned.
#[derive(Debug)]
pub struct ScanCursor {
    pub bounds: ScanBounds,
    pub handle: Option<PageHandle>,
    pub leaf: LeafNode,
    pub entry: usize,
}

impl ScanCursor {
    /// Entry under the cursor, if it is still inside the range
    pub fn current(&self) -> Option<RecordId> {
        let key = *self.leaf.keys.get(self.entry)?;
        if self.bounds.below_high(key) {
            self.leaf.rids.get(self.entry).copied()
        } else {
            None
        }
    }
}

#[derive(Debug, Default)]
pub enum ScanState {
    #[default]
    NotInitialized,
    Active(ScanCursor),
    Completed,
}
