//! Disk-resident B+ tree over an integer attribute of a relation

mod error;
mod meta;
mod node;
mod scan;
#[cfg(test)]
mod tests;

pub use error::{IndexError, IndexResult};
pub use meta::{Datatype, IndexMetaInfo, RELATION_NAME_LEN};
pub use node::{INTERNAL_CAPACITY, InternalNode, Key, LEAF_CAPACITY, LeafNode, Node};
pub use scan::{Operator, ScanBounds};

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::file::{BufferManager, FileId, INVALID_PAGE, PageHandle, PageId, RecordId};
use crate::record::{FileScan, RecordError};

use scan::{ScanCursor, ScanState};

/// The metadata page is always the first page of the index file
const META_PAGE: PageId = 1;

/// Pin a node page and decode it. The pin is dropped if decoding fails.
fn pin_node(bm: &mut BufferManager, file: FileId, page_no: PageId) -> IndexResult<(PageHandle, Node)> {
    let handle = bm.read_page(file, page_no)?;
    let decoded = bm
        .page(&handle)
        .map_err(IndexError::from)
        .and_then(|page| Node::decode(page_no, page));
    match decoded {
        Ok(node) => Ok((handle, node)),
        Err(e) => {
            bm.unpin(&handle, false)?;
            Err(e)
        }
    }
}

fn pin_leaf(bm: &mut BufferManager, file: FileId, page_no: PageId) -> IndexResult<(PageHandle, LeafNode)> {
    match pin_node(bm, file, page_no)? {
        (handle, Node::Leaf(leaf)) => Ok((handle, leaf)),
        (handle, Node::Internal(_)) => {
            bm.unpin(&handle, false)?;
            Err(IndexError::CorruptedNode(page_no))
        }
    }
}

/// Entry sent to the parent after a split
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PushUp {
    key: Key,
    page: PageId,
}

/// What happened to a subtree during insertion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InsertOutcome {
    Absorbed,
    Split(PushUp),
}

/// Options for opening or building an index
#[derive(Debug, Clone)]
pub struct BTreeIndexBuilder {
    leaf_occupancy: usize,
    internal_occupancy: usize,
}

impl Default for BTreeIndexBuilder {
    fn default() -> Self {
        Self {
            leaf_occupancy: LEAF_CAPACITY,
            internal_occupancy: INTERNAL_CAPACITY,
        }
    }
}

impl BTreeIndexBuilder {
    /// Entries per leaf for a newly built index
    pub fn leaf_occupancy(mut self, occupancy: usize) -> Self {
        self.leaf_occupancy = occupancy;
        self
    }

    /// Keys per internal node for a newly built index
    pub fn internal_occupancy(mut self, occupancy: usize) -> Self {
        self.internal_occupancy = occupancy;
        self
    }

    /// Open the index on `relation` at `attr_byte_offset`, building it from
    /// the relation if the index file does not exist yet.
    ///
    /// Occupancies set on the builder only apply to a new index; an existing
    /// one keeps the values it was built with.
    pub fn build<P: AsRef<Path>>(
        self,
        bm: &mut BufferManager,
        relation: P,
        attr_byte_offset: i32,
        attr_type: Datatype,
    ) -> IndexResult<BTreeIndex> {
        check_occupancy("leaf", self.leaf_occupancy, LEAF_CAPACITY)?;
        check_occupancy("internal", self.internal_occupancy, INTERNAL_CAPACITY)?;
        if attr_type != Datatype::Integer {
            return Err(IndexError::UnsupportedDatatype(attr_type));
        }

        let relation = relation.as_ref();
        let relation_name = relation
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let index_name = format!("{relation_name}.{attr_byte_offset}");
        let index_path = relation.with_file_name(&index_name);

        if bm.files().exists(&index_path) {
            BTreeIndex::open_existing(
                bm,
                index_name,
                &index_path,
                &relation_name,
                attr_byte_offset,
                attr_type,
            )
        } else {
            let meta = IndexMetaInfo {
                relation_name,
                attr_byte_offset,
                attr_type,
                root_page_no: INVALID_PAGE,
                leaf_occupancy: self.leaf_occupancy as u32,
                internal_occupancy: self.internal_occupancy as u32,
            };
            BTreeIndex::build_new(bm, index_name, &index_path, relation, meta)
        }
    }
}

fn check_occupancy(kind: &'static str, requested: usize, max: usize) -> IndexResult<()> {
    if requested < 2 || requested > max {
        return Err(IndexError::BadOccupancy {
            kind,
            requested,
            max,
        });
    }
    Ok(())
}

/// B+ tree index stored in a blob file.
///
/// Page 1 holds [`IndexMetaInfo`]; every other page is a node. Nodes are
/// only reached through the buffer pool, and every pin taken by an
/// operation is released before it returns, except for the leaf under an
/// active scan cursor.
pub struct BTreeIndex {
    file: FileId,
    index_name: String,
    path: PathBuf,
    attr_byte_offset: i32,
    root_page_no: PageId,
    leaf_occupancy: usize,
    internal_occupancy: usize,
    scan: ScanState,
}

impl BTreeIndex {
    pub fn builder() -> BTreeIndexBuilder {
        BTreeIndexBuilder::default()
    }

    /// Open or build the index with full-page occupancy
    pub fn new<P: AsRef<Path>>(
        bm: &mut BufferManager,
        relation: P,
        attr_byte_offset: i32,
        attr_type: Datatype,
    ) -> IndexResult<Self> {
        Self::builder().build(bm, relation, attr_byte_offset, attr_type)
    }

    fn open_existing(
        bm: &mut BufferManager,
        index_name: String,
        index_path: &Path,
        relation_name: &str,
        attr_byte_offset: i32,
        attr_type: Datatype,
    ) -> IndexResult<Self> {
        let file = bm.files_mut().open_blob_file(index_path)?;

        let meta = match Self::read_meta(bm, file).and_then(|meta| {
            meta.check_matches(relation_name, attr_byte_offset, attr_type)?;
            check_occupancy("leaf", meta.leaf_occupancy as usize, LEAF_CAPACITY)?;
            check_occupancy("internal", meta.internal_occupancy as usize, INTERNAL_CAPACITY)?;
            Ok(meta)
        }) {
            Ok(meta) => meta,
            Err(e) => {
                bm.close_file(file)?;
                return Err(e);
            }
        };

        info!(index = %index_name, root = meta.root_page_no, "opened index");
        Ok(Self {
            file,
            index_name,
            path: index_path.to_path_buf(),
            attr_byte_offset,
            root_page_no: meta.root_page_no,
            leaf_occupancy: meta.leaf_occupancy as usize,
            internal_occupancy: meta.internal_occupancy as usize,
            scan: ScanState::NotInitialized,
        })
    }

    fn build_new(
        bm: &mut BufferManager,
        index_name: String,
        index_path: &Path,
        relation: &Path,
        mut meta: IndexMetaInfo,
    ) -> IndexResult<Self> {
        let file = bm.files_mut().create_blob_file(index_path)?;

        let (_, meta_handle) = bm.alloc_page(file)?;
        let (root_page_no, root_handle) = bm.alloc_page(file)?;
        LeafNode::new().encode(bm.page_mut(&root_handle)?);
        bm.unpin(&root_handle, true)?;

        meta.root_page_no = root_page_no;
        meta.encode(bm.page_mut(&meta_handle)?);
        bm.unpin(&meta_handle, true)?;

        let mut index = Self {
            file,
            index_name,
            path: index_path.to_path_buf(),
            attr_byte_offset: meta.attr_byte_offset,
            root_page_no,
            leaf_occupancy: meta.leaf_occupancy as usize,
            internal_occupancy: meta.internal_occupancy as usize,
            scan: ScanState::NotInitialized,
        };

        let entries = match index.bulk_load(bm, relation) {
            Ok(entries) => entries,
            Err(e) => {
                // Leave no half-built index behind
                bm.close_file(file)?;
                bm.files_mut().remove_file(index_path)?;
                return Err(e);
            }
        };
        bm.flush_file(file)?;
        info!(index = %index.index_name, entries, "built index");
        Ok(index)
    }

    /// Insert every tuple of `relation`
    fn bulk_load(&mut self, bm: &mut BufferManager, relation: &Path) -> IndexResult<usize> {
        let mut scan = FileScan::open(bm, relation)?;
        let loaded = self.load_from(bm, &mut scan);
        scan.close(bm)?;
        loaded
    }

    fn load_from(&mut self, bm: &mut BufferManager, scan: &mut FileScan) -> IndexResult<usize> {
        let mut entries = 0;
        loop {
            let rid = match scan.scan_next(bm) {
                Ok(rid) => rid,
                Err(RecordError::EndOfFile) => return Ok(entries),
                Err(e) => return Err(e.into()),
            };
            let key = self.key_of(&scan.record(bm)?)?;
            self.insert_entry(bm, key, rid)?;
            entries += 1;
        }
    }

    fn key_of(&self, record: &[u8]) -> IndexResult<Key> {
        let offset = usize::try_from(self.attr_byte_offset).map_err(|_| {
            IndexError::BadIndexInfo(format!("negative attribute offset {}", self.attr_byte_offset))
        })?;
        let bytes = record
            .get(offset..offset + 4)
            .ok_or(RecordError::InvalidTuple {
                expected: offset + 4,
                actual: record.len(),
            })?;
        Ok(Key::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_meta(bm: &mut BufferManager, file: FileId) -> IndexResult<IndexMetaInfo> {
        let handle = bm.read_page(file, META_PAGE)?;
        let meta = bm.page(&handle).map_err(IndexError::from).and_then(IndexMetaInfo::decode);
        bm.unpin(&handle, false)?;
        meta
    }

    /// Name of the index file, `"<relation>.<offset>"`
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_id(&self) -> FileId {
        self.file
    }

    pub fn root_page(&self) -> PageId {
        self.root_page_no
    }

    pub fn leaf_occupancy(&self) -> usize {
        self.leaf_occupancy
    }

    pub fn internal_occupancy(&self) -> usize {
        self.internal_occupancy
    }

    /// Number of levels, counting the leaves
    pub fn height(&self, bm: &mut BufferManager) -> IndexResult<usize> {
        let mut height = 1;
        let mut page_no = self.root_page_no;
        loop {
            let (handle, node) = pin_node(bm, self.file, page_no)?;
            bm.unpin(&handle, false)?;
            match node {
                Node::Leaf(_) => return Ok(height),
                Node::Internal(internal) => {
                    height += 1;
                    page_no = internal.children[0];
                }
            }
        }
    }

    /// Insert a `(key, rid)` pair
    pub fn insert_entry(&mut self, bm: &mut BufferManager, key: Key, rid: RecordId) -> IndexResult<()> {
        let old_root = self.root_page_no;
        let InsertOutcome::Split(push) = self.insert_into(bm, old_root, key, rid)? else {
            return Ok(());
        };

        let (root_handle, root) = pin_node(bm, self.file, old_root)?;
        bm.unpin(&root_handle, false)?;
        let level = match root {
            Node::Leaf(_) => 1,
            Node::Internal(_) => 0,
        };

        let new_root = InternalNode {
            level,
            keys: vec![push.key],
            children: vec![old_root, push.page],
        };
        let (new_root_no, handle) = bm.alloc_page(self.file)?;
        new_root.encode(bm.page_mut(&handle)?);
        bm.unpin(&handle, true)?;

        let mut meta = Self::read_meta(bm, self.file)?;
        meta.root_page_no = new_root_no;
        let meta_handle = bm.read_page(self.file, META_PAGE)?;
        meta.encode(bm.page_mut(&meta_handle)?);
        bm.unpin(&meta_handle, true)?;

        self.root_page_no = new_root_no;
        info!(index = %self.index_name, old_root, new_root = new_root_no, "root split");
        Ok(())
    }

    /// Insert into the subtree rooted at `page_no`, keeping it pinned while
    /// its child is processed
    fn insert_into(
        &self,
        bm: &mut BufferManager,
        page_no: PageId,
        key: Key,
        rid: RecordId,
    ) -> IndexResult<InsertOutcome> {
        let (handle, node) = pin_node(bm, self.file, page_no)?;
        let result = match node {
            Node::Leaf(leaf) => self.insert_into_leaf(bm, &handle, leaf, key, rid),
            Node::Internal(internal) => self.insert_into_internal(bm, &handle, internal, key, rid),
        };
        let unpinned = bm.unpin(&handle, false);
        let outcome = result?;
        unpinned?;
        Ok(outcome)
    }

    fn insert_into_leaf(
        &self,
        bm: &mut BufferManager,
        handle: &PageHandle,
        mut leaf: LeafNode,
        key: Key,
        rid: RecordId,
    ) -> IndexResult<InsertOutcome> {
        if leaf.len() < self.leaf_occupancy {
            leaf.insert(key, rid);
            leaf.encode(bm.page_mut(handle)?);
            return Ok(InsertOutcome::Absorbed);
        }

        let right = leaf.split_insert(key, rid);
        let (right_no, right_handle) = bm.alloc_page(self.file)?;
        right.encode(bm.page_mut(&right_handle)?);
        bm.unpin(&right_handle, true)?;

        leaf.right_sibling = right_no;
        leaf.encode(bm.page_mut(handle)?);
        debug!(left = handle.page_no(), right = right_no, "split leaf");

        Ok(InsertOutcome::Split(PushUp {
            key: right.keys[0],
            page: right_no,
        }))
    }

    fn insert_into_internal(
        &self,
        bm: &mut BufferManager,
        handle: &PageHandle,
        mut node: InternalNode,
        key: Key,
        rid: RecordId,
    ) -> IndexResult<InsertOutcome> {
        let idx = node.child_index(key);
        let InsertOutcome::Split(push) = self.insert_into(bm, node.children[idx], key, rid)? else {
            return Ok(InsertOutcome::Absorbed);
        };

        if node.keys.len() < self.internal_occupancy {
            node.insert_at(idx, push.key, push.page);
            node.encode(bm.page_mut(handle)?);
            return Ok(InsertOutcome::Absorbed);
        }

        let (promoted, right) = node.split_insert(idx, push.key, push.page);
        let (right_no, right_handle) = bm.alloc_page(self.file)?;
        right.encode(bm.page_mut(&right_handle)?);
        bm.unpin(&right_handle, true)?;
        node.encode(bm.page_mut(handle)?);
        debug!(left = handle.page_no(), right = right_no, promoted, "split internal node");

        Ok(InsertOutcome::Split(PushUp {
            key: promoted,
            page: right_no,
        }))
    }

    /// Begin a range scan, ending any scan already in progress.
    ///
    /// Fails with `NoSuchKeyFound` when no key satisfies the low bound. When
    /// the first such key already fails the high bound the scan starts and
    /// the first `scan_next` reports completion.
    pub fn start_scan(
        &mut self,
        bm: &mut BufferManager,
        low: Key,
        low_op: Operator,
        high: Key,
        high_op: Operator,
    ) -> IndexResult<()> {
        let bounds = ScanBounds::new(low, low_op, high, high_op)?;
        self.release_scan(bm)?;

        // Descend to the leaf that may hold the first qualifying key
        let mut page_no = self.root_page_no;
        let (mut handle, mut leaf) = loop {
            let (handle, node) = pin_node(bm, self.file, page_no)?;
            match node {
                Node::Leaf(leaf) => break (handle, leaf),
                Node::Internal(internal) => {
                    bm.unpin(&handle, false)?;
                    let idx = match low_op {
                        Operator::Gte => internal.child_index_at_least(low),
                        _ => internal.child_index(low),
                    };
                    page_no = internal.children[idx];
                }
            }
        };

        let mut entry = bounds.first_entry(&leaf);
        while entry >= leaf.len() {
            let next = leaf.right_sibling;
            bm.unpin(&handle, false)?;
            if next == INVALID_PAGE {
                return Err(IndexError::NoSuchKeyFound);
            }
            (handle, leaf) = pin_leaf(bm, self.file, next)?;
            entry = bounds.first_entry(&leaf);
        }

        self.scan = ScanState::Active(ScanCursor {
            bounds,
            handle: Some(handle),
            leaf,
            entry,
        });
        Ok(())
    }

    /// Record id of the next entry in range
    pub fn scan_next(&mut self, bm: &mut BufferManager) -> IndexResult<RecordId> {
        let file = self.file;
        let cursor = match &mut self.scan {
            ScanState::NotInitialized => return Err(IndexError::ScanNotInitialized),
            ScanState::Completed => return Err(IndexError::IndexScanCompleted),
            ScanState::Active(cursor) => cursor,
        };

        loop {
            let Some(handle) = cursor.handle else {
                break;
            };

            if cursor.entry < cursor.leaf.len() {
                if let Some(rid) = cursor.current() {
                    cursor.entry += 1;
                    return Ok(rid);
                }
                // Past the high bound
                cursor.handle = None;
                bm.unpin(&handle, false)?;
                break;
            }

            // Leaf exhausted: move to the right sibling
            let next = cursor.leaf.right_sibling;
            cursor.handle = None;
            bm.unpin(&handle, false)?;
            if next == INVALID_PAGE {
                break;
            }
            let (next_handle, next_leaf) = pin_leaf(bm, file, next)?;
            cursor.handle = Some(next_handle);
            cursor.leaf = next_leaf;
            cursor.entry = 0;
        }

        self.scan = ScanState::Completed;
        Err(IndexError::IndexScanCompleted)
    }

    /// Finish the current scan and release its pinned page
    pub fn end_scan(&mut self, bm: &mut BufferManager) -> IndexResult<()> {
        match std::mem::take(&mut self.scan) {
            ScanState::NotInitialized => Err(IndexError::ScanNotInitialized),
            ScanState::Completed => Ok(()),
            ScanState::Active(cursor) => {
                if let Some(handle) = cursor.handle {
                    bm.unpin(&handle, false)?;
                }
                Ok(())
            }
        }
    }

    /// End the scan if one was started
    fn release_scan(&mut self, bm: &mut BufferManager) -> IndexResult<()> {
        match self.end_scan(bm) {
            Ok(()) | Err(IndexError::ScanNotInitialized) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Run a scan to completion and collect every record id in range
    pub fn range_scan(
        &mut self,
        bm: &mut BufferManager,
        low: Key,
        low_op: Operator,
        high: Key,
        high_op: Operator,
    ) -> IndexResult<Vec<RecordId>> {
        self.start_scan(bm, low, low_op, high, high_op)?;
        let mut rids = Vec::new();
        loop {
            match self.scan_next(bm) {
                Ok(rid) => rids.push(rid),
                Err(IndexError::IndexScanCompleted) => break,
                Err(e) => {
                    self.release_scan(bm)?;
                    return Err(e);
                }
            }
        }
        self.end_scan(bm)?;
        Ok(rids)
    }

    /// End any scan, write back the index, and release the file
    pub fn close(mut self, bm: &mut BufferManager) -> IndexResult<()> {
        self.release_scan(bm)?;
        bm.close_file(self.file)?;
        debug!(index = %self.index_name, "closed index");
        Ok(())
    }
}
