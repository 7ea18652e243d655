//! On-page layout of B+ tree nodes
//!
//! Every node starts with an 8-byte header: kind tag (u16), entry count
//! (u16), then the right sibling (leaf) or level (internal) as a u32. Arrays
//! are laid out at fixed offsets sized for the maximum capacity, whatever
//! occupancy the tree is configured with.

use crate::file::{INVALID_PAGE, PAGE_SIZE, Page, PageId, RecordId};

use super::error::{IndexError, IndexResult};

/// Index keys are 32-bit integers
pub type Key = i32;

const NODE_HEADER_SIZE: usize = 8;
const KEY_SIZE: usize = 4;
const RID_SIZE: usize = 8;
const CHILD_SIZE: usize = 4;

const KIND_LEAF: u16 = 1;
const KIND_INTERNAL: u16 = 2;

/// Most entries a leaf page can hold
pub const LEAF_CAPACITY: usize = (PAGE_SIZE - NODE_HEADER_SIZE) / (KEY_SIZE + RID_SIZE);

/// Most keys an internal page can hold (it has one more child than keys)
pub const INTERNAL_CAPACITY: usize =
    (PAGE_SIZE - NODE_HEADER_SIZE - CHILD_SIZE) / (KEY_SIZE + CHILD_SIZE);

const LEAF_RIDS_OFFSET: usize = NODE_HEADER_SIZE + LEAF_CAPACITY * KEY_SIZE;
const INTERNAL_CHILDREN_OFFSET: usize = NODE_HEADER_SIZE + INTERNAL_CAPACITY * KEY_SIZE;

pub(super) fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

pub(super) fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

pub(super) fn read_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

pub(super) fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub(super) fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub(super) fn write_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Leaf node: sorted keys with their record ids
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LeafNode {
    pub keys: Vec<Key>,
    pub rids: Vec<RecordId>,
    pub right_sibling: PageId,
}

/// Internal node: `keys.len() + 1` children.
///
/// `keys[i]` is the smallest key reachable through `children[i + 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode {
    /// 1 when the children are leaves, 0 otherwise
    pub level: u32,
    pub keys: Vec<Key>,
    pub children: Vec<PageId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf(LeafNode),
    Internal(InternalNode),
}

impl Node {
    /// Decode the node stored on `page`, checking its kind tag
    pub fn decode(page_no: PageId, page: &Page) -> IndexResult<Self> {
        let buf = page.raw();
        let kind = read_u16(buf, 0);
        let count = read_u16(buf, 2) as usize;
        let extra = read_u32(buf, 4);

        match kind {
            KIND_LEAF => {
                if count > LEAF_CAPACITY {
                    return Err(IndexError::CorruptedNode(page_no));
                }
                let keys = (0..count)
                    .map(|i| read_i32(buf, NODE_HEADER_SIZE + i * KEY_SIZE))
                    .collect();
                let rids = (0..count)
                    .map(|i| {
                        let offset = LEAF_RIDS_OFFSET + i * RID_SIZE;
                        RecordId::new(read_u32(buf, offset), read_u16(buf, offset + 4))
                    })
                    .collect();
                Ok(Node::Leaf(LeafNode {
                    keys,
                    rids,
                    right_sibling: extra,
                }))
            }
            KIND_INTERNAL => {
                if count > INTERNAL_CAPACITY || extra > 1 {
                    return Err(IndexError::CorruptedNode(page_no));
                }
                let keys = (0..count)
                    .map(|i| read_i32(buf, NODE_HEADER_SIZE + i * KEY_SIZE))
                    .collect();
                let children = (0..=count)
                    .map(|i| read_u32(buf, INTERNAL_CHILDREN_OFFSET + i * CHILD_SIZE))
                    .collect();
                Ok(Node::Internal(InternalNode {
                    level: extra,
                    keys,
                    children,
                }))
            }
            _ => Err(IndexError::CorruptedNode(page_no)),
        }
    }

    pub fn encode(&self, page: &mut Page) {
        match self {
            Node::Leaf(leaf) => leaf.encode(page),
            Node::Internal(node) => node.encode(page),
        }
    }
}

impl LeafNode {
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            rids: Vec::new(),
            right_sibling: INVALID_PAGE,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn encode(&self, page: &mut Page) {
        let buf = page.raw_mut();
        buf.fill(0);
        write_u16(buf, 0, KIND_LEAF);
        write_u16(buf, 2, self.keys.len() as u16);
        write_u32(buf, 4, self.right_sibling);
        for (i, (&key, rid)) in self.keys.iter().zip(&self.rids).enumerate() {
            write_i32(buf, NODE_HEADER_SIZE + i * KEY_SIZE, key);
            let offset = LEAF_RIDS_OFFSET + i * RID_SIZE;
            write_u32(buf, offset, rid.page_number);
            write_u16(buf, offset + 4, rid.slot_number);
        }
    }

    /// Insert after any entries with an equal key
    pub fn insert(&mut self, key: Key, rid: RecordId) {
        let pos = self.keys.partition_point(|&k| k <= key);
        self.keys.insert(pos, key);
        self.rids.insert(pos, rid);
    }

    /// Split a full leaf and insert `(key, rid)` into the proper half.
    ///
    /// The upper half is returned as the new right sibling, inheriting this
    /// leaf's sibling link; the caller links this leaf to the new page.
    pub fn split_insert(&mut self, key: Key, rid: RecordId) -> LeafNode {
        let len = self.keys.len();
        let mut mid = len / 2;
        if len % 2 == 1 && key > self.keys[mid] {
            mid += 1;
        }

        let mut right = LeafNode {
            keys: self.keys.split_off(mid),
            rids: self.rids.split_off(mid),
            right_sibling: self.right_sibling,
        };
        if key > self.keys[mid - 1] {
            right.insert(key, rid);
        } else {
            self.insert(key, rid);
        }
        right
    }
}

impl InternalNode {
    pub fn encode(&self, page: &mut Page) {
        let buf = page.raw_mut();
        buf.fill(0);
        write_u16(buf, 0, KIND_INTERNAL);
        write_u16(buf, 2, self.keys.len() as u16);
        write_u32(buf, 4, self.level);
        for (i, &key) in self.keys.iter().enumerate() {
            write_i32(buf, NODE_HEADER_SIZE + i * KEY_SIZE, key);
        }
        for (i, &child) in self.children.iter().enumerate() {
            write_u32(buf, INTERNAL_CHILDREN_OFFSET + i * CHILD_SIZE, child);
        }
    }

    /// Child to descend into for `key`: the one after the last key <= `key`
    pub fn child_index(&self, key: Key) -> usize {
        self.keys.partition_point(|&k| k <= key)
    }

    /// Child to descend into when looking for the first key >= `key`
    pub fn child_index_at_least(&self, key: Key) -> usize {
        self.keys.partition_point(|&k| k < key)
    }

    /// Add a separator pushed up from `children[idx]`
    pub fn insert_at(&mut self, idx: usize, key: Key, page: PageId) {
        self.keys.insert(idx, key);
        self.children.insert(idx + 1, page);
    }

    /// Split a full node while adding a separator pushed up from
    /// `children[idx]`.
    ///
    /// The middle key of the combined node moves up: it is returned along
    /// with the new right node and appears in neither half.
    pub fn split_insert(&mut self, idx: usize, key: Key, page: PageId) -> (Key, InternalNode) {
        self.insert_at(idx, key, page);

        let mid = self.keys.len() / 2;
        let right = InternalNode {
            level: self.level,
            keys: self.keys.split_off(mid + 1),
            children: self.children.split_off(mid + 1),
        };
        let promoted = self.keys.pop().unwrap_or(key);
        (promoted, right)
    }
}
