//! Integration tests for the index layer

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use crate::file::{BufferManager, FileId, FileManager, INVALID_PAGE, PageId, RecordId};
    use crate::index::node::{Key, Node};
    use crate::index::{BTreeIndex, Datatype, IndexError, Operator, pin_node};
    use crate::record::{KeyOrder, Tuple, create_relation};
    use tempfile::TempDir;

    const RELATION_SIZE: usize = 5000;
    const SEED: u64 = 0x5eed;

    /// (low, low_op, high, high_op, expected results over keys 0..5000)
    const REFERENCE: [(Key, Operator, Key, Operator, usize); 7] = [
        (25, Operator::Gt, 40, Operator::Lt, 14),
        (20, Operator::Gte, 35, Operator::Lte, 16),
        (-3, Operator::Gt, 3, Operator::Lt, 3),
        (996, Operator::Gt, 1001, Operator::Lt, 4),
        (0, Operator::Gt, 1, Operator::Lt, 0),
        (300, Operator::Gt, 400, Operator::Lt, 99),
        (3000, Operator::Gte, 4000, Operator::Lt, 1000),
    ];

    fn setup_relation(keys: &[Key], pool_size: usize) -> (TempDir, BufferManager, PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("relA");
        let mut bm = BufferManager::with_capacity(FileManager::new(), pool_size);
        create_relation(bm.files_mut(), &path, keys.iter().copied()).unwrap();
        (temp_dir, bm, path)
    }

    fn build_index(
        bm: &mut BufferManager,
        path: &Path,
        leaf_occupancy: usize,
        internal_occupancy: usize,
    ) -> BTreeIndex {
        BTreeIndex::builder()
            .leaf_occupancy(leaf_occupancy)
            .internal_occupancy(internal_occupancy)
            .build(bm, path, 0, Datatype::Integer)
            .unwrap()
    }

    /// Number of results, with `NoSuchKeyFound` counted as none
    fn count(
        index: &mut BTreeIndex,
        bm: &mut BufferManager,
        low: Key,
        low_op: Operator,
        high: Key,
        high_op: Operator,
    ) -> usize {
        match index.range_scan(bm, low, low_op, high, high_op) {
            Ok(rids) => rids.len(),
            Err(IndexError::NoSuchKeyFound) => 0,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    fn pinned_frames(bm: &BufferManager) -> u32 {
        bm.frame_summaries().iter().map(|f| f.pin_count).sum()
    }

    /// Key stored in the relation tuple at `rid`
    fn key_at(bm: &mut BufferManager, relation: FileId, rid: RecordId) -> Key {
        let handle = bm.read_page(relation, rid.page_number).unwrap();
        let record = bm.page(&handle).unwrap().get_record(rid.slot_number).unwrap().to_vec();
        bm.unpin(&handle, false).unwrap();
        Tuple::deserialize(&record).unwrap().i
    }

    #[derive(Default)]
    struct TreeShape {
        keys: Vec<Key>,
        leaves: Vec<PageId>,
        leaf_depth: Option<usize>,
    }

    /// Walk the whole tree checking ordering, separator, occupancy and level
    /// invariants. Returns every key in leaf order.
    fn check_invariants(index: &BTreeIndex, bm: &mut BufferManager) -> Vec<Key> {
        let mut shape = TreeShape::default();
        walk(index, bm, index.root_page_no, 1, None, None, &mut shape);

        // The sibling chain visits the same leaves in the same order
        let mut chain = Vec::new();
        let mut page_no = shape.leaves[0];
        while page_no != INVALID_PAGE {
            chain.push(page_no);
            let (handle, node) = pin_node(bm, index.file, page_no).unwrap();
            bm.unpin(&handle, false).unwrap();
            match node {
                Node::Leaf(leaf) => page_no = leaf.right_sibling,
                Node::Internal(_) => panic!("sibling link to internal page {page_no}"),
            }
        }
        assert_eq!(chain, shape.leaves);
        assert!(shape.keys.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(pinned_frames(bm), 0);
        shape.keys
    }

    /// Returns the smallest key in the subtree
    fn walk(
        index: &BTreeIndex,
        bm: &mut BufferManager,
        page_no: PageId,
        depth: usize,
        lower: Option<Key>,
        upper: Option<Key>,
        shape: &mut TreeShape,
    ) -> Option<Key> {
        let (handle, node) = pin_node(bm, index.file, page_no).unwrap();
        bm.unpin(&handle, false).unwrap();
        let is_root = page_no == index.root_page_no;

        match node {
            Node::Leaf(leaf) => {
                assert!(leaf.len() <= index.leaf_occupancy);
                assert_eq!(leaf.keys.len(), leaf.rids.len());
                assert!(is_root || !leaf.is_empty(), "empty leaf {page_no}");
                assert!(leaf.keys.windows(2).all(|w| w[0] <= w[1]));
                for &key in &leaf.keys {
                    assert!(lower.is_none_or(|l| key >= l), "key {key} below {lower:?}");
                    assert!(upper.is_none_or(|u| key <= u), "key {key} above {upper:?}");
                }
                match shape.leaf_depth {
                    Some(d) => assert_eq!(d, depth, "leaves at different depths"),
                    None => shape.leaf_depth = Some(depth),
                }
                shape.leaves.push(page_no);
                shape.keys.extend_from_slice(&leaf.keys);
                leaf.keys.first().copied()
            }
            Node::Internal(node) => {
                assert!(!node.keys.is_empty());
                assert!(node.keys.len() <= index.internal_occupancy);
                assert_eq!(node.children.len(), node.keys.len() + 1);
                assert!(node.keys.windows(2).all(|w| w[0] <= w[1]));

                let mut min = None;
                for (i, &child) in node.children.iter().enumerate() {
                    let child_lower = if i == 0 { lower } else { Some(node.keys[i - 1]) };
                    let child_upper = node.keys.get(i).copied().or(upper);

                    let (child_handle, child_node) = pin_node(bm, index.file, child).unwrap();
                    bm.unpin(&child_handle, false).unwrap();
                    let child_is_leaf = matches!(child_node, Node::Leaf(_));
                    assert_eq!(node.level == 1, child_is_leaf, "level flag on page {page_no}");

                    let child_min = walk(index, bm, child, depth + 1, child_lower, child_upper, shape);
                    if i == 0 {
                        min = child_min;
                    } else {
                        assert_eq!(child_min, Some(node.keys[i - 1]), "separator mismatch");
                    }
                }
                min
            }
        }
    }

    fn run_reference(order: KeyOrder, pool_size: usize) {
        let keys = order.keys(0, RELATION_SIZE, SEED).unwrap();
        let (_temp_dir, mut bm, path) = setup_relation(&keys, pool_size);
        let mut index = BTreeIndex::new(&mut bm, &path, 0, Datatype::Integer).unwrap();
        assert_eq!(index.index_name(), "relA.0");

        for (low, low_op, high, high_op, expected) in REFERENCE {
            assert_eq!(
                count(&mut index, &mut bm, low, low_op, high, high_op),
                expected,
                "{order}: ({low},{low_op},{high},{high_op})"
            );
        }
        assert_eq!(pinned_frames(&bm), 0);

        let keys = check_invariants(&index, &mut bm);
        assert_eq!(keys, (0..RELATION_SIZE as Key).collect::<Vec<_>>());
        index.close(&mut bm).unwrap();
    }

    #[test]
    fn test_reference_forward() {
        run_reference(KeyOrder::Forward, 100);
    }

    #[test]
    fn test_reference_backward() {
        run_reference(KeyOrder::Backward, 100);
    }

    #[test]
    fn test_reference_random() {
        run_reference(KeyOrder::Random, 100);
    }

    #[test]
    fn test_reference_small_pool() {
        run_reference(KeyOrder::Random, 8);
    }

    #[test]
    fn test_scan_returns_matching_tuples_in_order() {
        let keys = KeyOrder::Random.keys(0, RELATION_SIZE, SEED).unwrap();
        let (_temp_dir, mut bm, path) = setup_relation(&keys, 50);
        let mut index = BTreeIndex::new(&mut bm, &path, 0, Datatype::Integer).unwrap();

        let rids = index
            .range_scan(&mut bm, 3000, Operator::Gte, 4000, Operator::Lt)
            .unwrap();
        let relation = bm.files_mut().open_page_file(&path).unwrap();
        let found: Vec<Key> = rids.iter().map(|&rid| key_at(&mut bm, relation, rid)).collect();
        assert_eq!(found, (3000..4000).collect::<Vec<_>>());

        bm.close_file(relation).unwrap();
        index.close(&mut bm).unwrap();
    }

    #[test]
    fn test_insertion_order_independent() {
        let mut rid_sets = Vec::new();
        for order in KeyOrder::ALL {
            let keys = order.keys(0, RELATION_SIZE, SEED).unwrap();
            let (_temp_dir, mut bm, path) = setup_relation(&keys, 100);
            let mut index = BTreeIndex::new(&mut bm, &path, 0, Datatype::Integer).unwrap();

            let mut rids = index
                .range_scan(&mut bm, 300, Operator::Gt, 400, Operator::Lt)
                .unwrap();
            rids.sort();
            index.close(&mut bm).unwrap();
            rid_sets.push((order, rids));
        }

        // Every relation stores the same number of tuples per page, so the
        // full-range rid sets coincide; subranges hold the same count
        for (order, rids) in &rid_sets {
            assert_eq!(rids.len(), 99, "{order}");
        }

        let mut full_sets = Vec::new();
        for order in KeyOrder::ALL {
            let keys = order.keys(0, RELATION_SIZE, SEED).unwrap();
            let (_temp_dir, mut bm, path) = setup_relation(&keys, 100);
            let mut index = BTreeIndex::new(&mut bm, &path, 0, Datatype::Integer).unwrap();
            let mut rids = index
                .range_scan(&mut bm, i32::MIN, Operator::Gte, i32::MAX, Operator::Lte)
                .unwrap();
            rids.sort();
            index.close(&mut bm).unwrap();
            full_sets.push(rids);
        }
        assert_eq!(full_sets[0].len(), RELATION_SIZE);
        assert_eq!(full_sets[0], full_sets[1]);
        assert_eq!(full_sets[0], full_sets[2]);
    }

    #[test]
    fn test_empty_tree() {
        let (_temp_dir, mut bm, path) = setup_relation(&[], 30);
        let mut index = BTreeIndex::new(&mut bm, &path, 0, Datatype::Integer).unwrap();
        assert_eq!(index.height(&mut bm).unwrap(), 1);

        for (low, low_op, high, high_op, _) in REFERENCE {
            assert!(matches!(
                index.start_scan(&mut bm, low, low_op, high, high_op),
                Err(IndexError::NoSuchKeyFound)
            ));
        }
        assert!(matches!(
            index.scan_next(&mut bm),
            Err(IndexError::ScanNotInitialized)
        ));
        assert_eq!(pinned_frames(&bm), 0);
        index.close(&mut bm).unwrap();
    }

    #[test]
    fn test_scan_state_errors() {
        let keys = KeyOrder::Forward.keys(0, 100, 0).unwrap();
        let (_temp_dir, mut bm, path) = setup_relation(&keys, 10);
        let mut index = BTreeIndex::new(&mut bm, &path, 0, Datatype::Integer).unwrap();

        assert!(matches!(
            index.scan_next(&mut bm),
            Err(IndexError::ScanNotInitialized)
        ));
        assert!(matches!(
            index.end_scan(&mut bm),
            Err(IndexError::ScanNotInitialized)
        ));
        assert!(matches!(
            index.start_scan(&mut bm, 2, Operator::Lte, 5, Operator::Lt),
            Err(IndexError::BadOpcodes)
        ));
        assert!(matches!(
            index.start_scan(&mut bm, 2, Operator::Gt, 5, Operator::Gte),
            Err(IndexError::BadOpcodes)
        ));
        assert!(matches!(
            index.start_scan(&mut bm, 5, Operator::Gt, 2, Operator::Lt),
            Err(IndexError::BadScanrange { low: 5, high: 2 })
        ));

        index.start_scan(&mut bm, 10, Operator::Gte, 12, Operator::Lte).unwrap();
        assert_eq!(pinned_frames(&bm), 1);
        for _ in 0..3 {
            index.scan_next(&mut bm).unwrap();
        }
        assert!(matches!(
            index.scan_next(&mut bm),
            Err(IndexError::IndexScanCompleted)
        ));
        assert!(matches!(
            index.scan_next(&mut bm),
            Err(IndexError::IndexScanCompleted)
        ));
        assert_eq!(pinned_frames(&bm), 0);

        index.end_scan(&mut bm).unwrap();
        assert!(matches!(
            index.end_scan(&mut bm),
            Err(IndexError::ScanNotInitialized)
        ));
        index.close(&mut bm).unwrap();
    }

    #[test]
    fn test_no_such_key() {
        let keys = KeyOrder::Forward.keys(0, 100, 0).unwrap();
        let (_temp_dir, mut bm, path) = setup_relation(&keys, 10);
        let mut index = BTreeIndex::new(&mut bm, &path, 0, Datatype::Integer).unwrap();

        assert!(matches!(
            index.start_scan(&mut bm, 99, Operator::Gt, 200, Operator::Lt),
            Err(IndexError::NoSuchKeyFound)
        ));
        assert!(matches!(
            index.scan_next(&mut bm),
            Err(IndexError::ScanNotInitialized)
        ));

        // A lower bound hit that is past the upper bound completes immediately
        index.start_scan(&mut bm, 0, Operator::Gt, 1, Operator::Lt).unwrap();
        assert!(matches!(
            index.scan_next(&mut bm),
            Err(IndexError::IndexScanCompleted)
        ));
        index.end_scan(&mut bm).unwrap();
        index.close(&mut bm).unwrap();
    }

    #[test]
    fn test_restart_scan_releases_pin() {
        let keys = KeyOrder::Forward.keys(0, 2000, 0).unwrap();
        let (_temp_dir, mut bm, path) = setup_relation(&keys, 20);
        let mut index = BTreeIndex::new(&mut bm, &path, 0, Datatype::Integer).unwrap();

        index.start_scan(&mut bm, 0, Operator::Gte, 1999, Operator::Lte).unwrap();
        index.scan_next(&mut bm).unwrap();
        index.start_scan(&mut bm, 1500, Operator::Gte, 1999, Operator::Lte).unwrap();
        assert_eq!(pinned_frames(&bm), 1);

        // Crossing leaves keeps exactly one pin
        let mut seen = 0;
        while index.scan_next(&mut bm).is_ok() {
            seen += 1;
            assert!(pinned_frames(&bm) <= 1);
        }
        assert_eq!(seen, 500);
        index.end_scan(&mut bm).unwrap();
        assert_eq!(pinned_frames(&bm), 0);
        index.close(&mut bm).unwrap();
    }

    #[test]
    fn test_idempotent_rescan() {
        let keys = KeyOrder::Random.keys(0, 1000, SEED).unwrap();
        let (_temp_dir, mut bm, path) = setup_relation(&keys, 20);
        let mut index = build_index(&mut bm, &path, 8, 4);

        let first = index
            .range_scan(&mut bm, 100, Operator::Gt, 700, Operator::Lte)
            .unwrap();
        let second = index
            .range_scan(&mut bm, 100, Operator::Gt, 700, Operator::Lte)
            .unwrap();
        assert_eq!(first.len(), 600);
        assert_eq!(first, second);
        index.close(&mut bm).unwrap();
    }

    #[test]
    fn test_reopen_existing_index() {
        let keys = KeyOrder::Backward.keys(0, 1000, 0).unwrap();
        let (temp_dir, mut bm, path) = setup_relation(&keys, 20);

        let mut index = build_index(&mut bm, &path, 6, 5);
        let before = index
            .range_scan(&mut bm, 10, Operator::Gte, 900, Operator::Lt)
            .unwrap();
        let root = index.root_page();
        let index_path = index.path().to_path_buf();
        index.close(&mut bm).unwrap();
        assert!(!bm.files().is_open(&index_path));
        assert_eq!(index_path, temp_dir.path().join("relA.0"));

        // Builder occupancies do not apply to an existing index
        let mut index = BTreeIndex::new(&mut bm, &path, 0, Datatype::Integer).unwrap();
        assert_eq!(index.root_page(), root);
        assert_eq!(index.leaf_occupancy(), 6);
        assert_eq!(index.internal_occupancy(), 5);
        let after = index
            .range_scan(&mut bm, 10, Operator::Gte, 900, Operator::Lt)
            .unwrap();
        assert_eq!(before, after);

        // Inserting after a reopen keeps the tree valid
        index.insert_entry(&mut bm, 5000, RecordId::new(99, 1)).unwrap();
        assert_eq!(check_invariants(&index, &mut bm).len(), 1001);
        index.close(&mut bm).unwrap();
    }

    #[test]
    fn test_bad_index_info() {
        let keys = KeyOrder::Forward.keys(0, 10, 0).unwrap();
        let (temp_dir, mut bm, path) = setup_relation(&keys, 10);
        BTreeIndex::new(&mut bm, &path, 0, Datatype::Integer)
            .unwrap()
            .close(&mut bm)
            .unwrap();

        // An index file whose metadata names another relation
        let other = temp_dir.path().join("relB");
        create_relation(bm.files_mut(), &other, 0..10).unwrap();
        std::fs::copy(temp_dir.path().join("relA.0"), temp_dir.path().join("relB.0")).unwrap();
        assert!(matches!(
            BTreeIndex::new(&mut bm, &other, 0, Datatype::Integer),
            Err(IndexError::BadIndexInfo(_))
        ));

        // ... or another attribute offset
        std::fs::copy(temp_dir.path().join("relA.0"), temp_dir.path().join("relA.8")).unwrap();
        assert!(matches!(
            BTreeIndex::new(&mut bm, &path, 8, Datatype::Integer),
            Err(IndexError::BadIndexInfo(_))
        ));

        // Failed opens release the file
        assert!(!bm.files().is_open(temp_dir.path().join("relB.0")));
        assert!(!bm.files().is_open(temp_dir.path().join("relA.8")));
    }

    #[test]
    fn test_rejected_options() {
        let (_temp_dir, mut bm, path) = setup_relation(&[1, 2, 3], 10);

        assert!(matches!(
            BTreeIndex::new(&mut bm, &path, 8, Datatype::Double),
            Err(IndexError::UnsupportedDatatype(Datatype::Double))
        ));
        assert!(matches!(
            BTreeIndex::builder().leaf_occupancy(1).build(&mut bm, &path, 0, Datatype::Integer),
            Err(IndexError::BadOccupancy { kind: "leaf", .. })
        ));
        assert!(matches!(
            BTreeIndex::builder()
                .internal_occupancy(5000)
                .build(&mut bm, &path, 0, Datatype::Integer),
            Err(IndexError::BadOccupancy { kind: "internal", .. })
        ));
        assert!(!path.with_file_name("relA.0").exists());
    }

    #[test]
    fn test_small_occupancy_invariants_each_insert() {
        let (_temp_dir, mut bm, path) = setup_relation(&[], 30);
        let mut index = build_index(&mut bm, &path, 4, 3);

        let keys = KeyOrder::Random.keys(0, 300, SEED).unwrap();
        for (n, &key) in keys.iter().enumerate() {
            index
                .insert_entry(&mut bm, key, RecordId::new(key as u32 + 1, 1))
                .unwrap();
            assert_eq!(check_invariants(&index, &mut bm).len(), n + 1);
        }

        assert!(index.height(&mut bm).unwrap() >= 4);
        assert_eq!(
            count(&mut index, &mut bm, 100, Operator::Gte, 199, Operator::Lte),
            100
        );
        index.close(&mut bm).unwrap();
    }

    #[test]
    fn test_small_occupancy_all_orders() {
        for order in KeyOrder::ALL {
            let keys = order.keys(0, 500, SEED).unwrap();
            let (_temp_dir, mut bm, path) = setup_relation(&keys, 40);
            let mut index = build_index(&mut bm, &path, 3, 2);

            let all = check_invariants(&index, &mut bm);
            assert_eq!(all, (0..500).collect::<Vec<_>>(), "{order}");

            for (low, low_op, high, high_op) in [
                (-10, Operator::Gt, 0, Operator::Lte),
                (17, Operator::Gte, 17, Operator::Lte),
                (100, Operator::Gt, 250, Operator::Lt),
                (499, Operator::Gte, 1000, Operator::Lt),
                (0, Operator::Gte, 499, Operator::Lte),
            ] {
                let expected = (0..500)
                    .filter(|&k| {
                        let above = if low_op == Operator::Gte { k >= low } else { k > low };
                        let below = if high_op == Operator::Lte { k <= high } else { k < high };
                        above && below
                    })
                    .count();
                assert_eq!(
                    count(&mut index, &mut bm, low, low_op, high, high_op),
                    expected,
                    "{order}: ({low},{low_op},{high},{high_op})"
                );
            }
            index.close(&mut bm).unwrap();
        }
    }

    #[test]
    fn test_duplicate_keys() {
        let (_temp_dir, mut bm, path) = setup_relation(&[], 30);
        let mut index = build_index(&mut bm, &path, 4, 3);

        let mut slot = 1;
        for key in (0..40).chain(std::iter::repeat_n(7, 30)).chain(40..60) {
            index
                .insert_entry(&mut bm, key, RecordId::new(1, slot))
                .unwrap();
            slot += 1;
        }
        let all = check_invariants(&index, &mut bm);
        assert_eq!(all.len(), 90);

        assert_eq!(count(&mut index, &mut bm, 7, Operator::Gte, 7, Operator::Lte), 31);
        assert_eq!(count(&mut index, &mut bm, 6, Operator::Gt, 8, Operator::Lt), 31);
        assert_eq!(count(&mut index, &mut bm, 7, Operator::Gt, 9, Operator::Lte), 2);
        assert_eq!(count(&mut index, &mut bm, 0, Operator::Gte, 7, Operator::Lt), 7);
        index.close(&mut bm).unwrap();
    }

    #[test]
    fn test_build_while_relation_page_pinned() {
        let keys = KeyOrder::Forward.keys(0, 300, 0).unwrap();
        let (_temp_dir, mut bm, path) = setup_relation(&keys, 20);

        let relation = bm.files_mut().open_page_file(&path).unwrap();
        let handle = bm.read_page(relation, 1).unwrap();

        let mut index = BTreeIndex::new(&mut bm, &path, 0, Datatype::Integer).unwrap();
        assert!(bm.files().is_open(&path));
        assert_eq!(bm.files().open_count(relation), 1);
        assert_eq!(
            count(&mut index, &mut bm, 0, Operator::Gte, 299, Operator::Lte),
            300
        );

        bm.unpin(&handle, false).unwrap();
        bm.close_file(relation).unwrap();
        assert!(!bm.files().is_open(&path));
        index.close(&mut bm).unwrap();
    }
}
