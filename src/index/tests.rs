use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use super::*;
use crate::file::{BufferManager, PagedFileManager};
use crate::record::{AttrType, CompOp, Rid, Value};

fn setup_index(attr_type: AttrType, attr_length: usize) -> (TempDir, Arc<Mutex<BufferManager>>, IndexFile) {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("t.ix");
    let buffer = Arc::new(Mutex::new(BufferManager::new(PagedFileManager::new())));

    let mut bm = buffer.lock().unwrap();
    let index = IndexFile::create(&mut bm, &path, attr_type, attr_length).unwrap();
    drop(bm);

    (temp_dir, buffer, index)
}

fn int_key(v: i32) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

fn collect_rids(scan: IndexScan) -> Vec<Rid> {
    scan.map(|e| e.unwrap().1).collect()
}

#[test]
fn test_create_rejects_bad_attr() {
    let temp_dir = tempfile::tempdir().unwrap();
    let buffer = Arc::new(Mutex::new(BufferManager::new(PagedFileManager::new())));
    let mut bm = buffer.lock().unwrap();

    for (attr_type, len) in [
        (AttrType::Int, 8),
        (AttrType::Float, 2),
        (AttrType::String, 0),
        (AttrType::String, 256),
    ] {
        let result = IndexFile::create(&mut bm, temp_dir.path().join("bad.ix"), attr_type, len);
        assert!(matches!(result, Err(IndexError::InvalidAttr(_))));
    }
}

#[test]
fn test_insert_then_eq_scan_contains_rid() {
    let (_temp_dir, buffer, mut index) = setup_index(AttrType::Int, 4);

    {
        let mut bm = buffer.lock().unwrap();
        for i in 0..100 {
            index.insert_entry(&mut bm, &int_key(i), Rid::new(1, i)).unwrap();
        }
    }

    let key = int_key(42);
    let scan = IndexScan::open(&index, buffer.clone(), CompOp::Eq, Some(&key)).unwrap();
    let rids = collect_rids(scan);
    assert_eq!(rids, vec![Rid::new(1, 42)]);
}

#[test]
fn test_empty_tree_scans_empty() {
    let (_temp_dir, buffer, index) = setup_index(AttrType::Int, 4);
    let scan = IndexScan::open(&index, buffer.clone(), CompOp::No, None).unwrap();
    assert_eq!(scan.count(), 0);
}

#[test]
fn test_root_splits_exactly_at_capacity_plus_one() {
    let (_temp_dir, buffer, mut index) = setup_index(AttrType::Int, 4);
    let capacity = index.leaf_capacity();
    let mut bm = buffer.lock().unwrap();

    let first_root = {
        index.insert_entry(&mut bm, &int_key(0), Rid::new(1, 0)).unwrap();
        index.root_page()
    };

    for i in 1..capacity as i32 {
        index.insert_entry(&mut bm, &int_key(i), Rid::new(1, i)).unwrap();
    }
    // Fully packed single leaf, still the root
    assert_eq!(index.root_page(), first_root);

    index
        .insert_entry(&mut bm, &int_key(capacity as i32), Rid::new(1, capacity as i32))
        .unwrap();
    assert_ne!(index.root_page(), first_root);
}

#[test]
fn test_range_scan_after_splits_is_sorted() {
    let (_temp_dir, buffer, mut index) = setup_index(AttrType::Int, 4);

    {
        let mut bm = buffer.lock().unwrap();
        // Shuffled insert order across several leaves
        for i in (0..2000).rev().filter(|i| i % 2 == 0) {
            index.insert_entry(&mut bm, &int_key(i), Rid::new(1, i)).unwrap();
        }
        for i in (0..2000).filter(|i| i % 2 == 1) {
            index.insert_entry(&mut bm, &int_key(i), Rid::new(1, i)).unwrap();
        }
    }

    let key = int_key(100);
    let scan = IndexScan::open(&index, buffer.clone(), CompOp::Ge, Some(&key)).unwrap();
    let keys: Vec<i32> = scan
        .map(|e| i32::from_le_bytes(e.unwrap().0.try_into().unwrap()))
        .collect();

    assert_eq!(keys.len(), 1900);
    assert_eq!(keys[0], 100);
    assert_eq!(*keys.last().unwrap(), 1999);
    assert!(keys.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_string_scan_order_with_duplicates() {
    let (_temp_dir, buffer, mut index) = setup_index(AttrType::String, 10);

    let keys = ["apple", "ant", "apricot", "banana", "apple"];
    {
        let mut bm = buffer.lock().unwrap();
        for (i, k) in keys.iter().enumerate() {
            let encoded = Value::Str(k.to_string()).to_bytes(10).unwrap();
            index
                .insert_entry(&mut bm, &encoded, Rid::new(i as i32 + 1, 0))
                .unwrap();
        }
    }

    let probe = Value::Str("ap".to_string()).to_bytes(10).unwrap();
    let scan = IndexScan::open(&index, buffer.clone(), CompOp::Ge, Some(&probe)).unwrap();
    let rids = collect_rids(scan);

    // "ant" is excluded; the duplicate "apple" entries come in RID order
    assert_eq!(
        rids,
        vec![Rid::new(1, 0), Rid::new(5, 0), Rid::new(3, 0), Rid::new(4, 0)]
    );
}

#[test]
fn test_duplicate_keys_all_enumerated() {
    let (_temp_dir, buffer, mut index) = setup_index(AttrType::Int, 4);

    {
        let mut bm = buffer.lock().unwrap();
        for slot in 0..50 {
            index.insert_entry(&mut bm, &int_key(7), Rid::new(1, slot)).unwrap();
        }
        index.insert_entry(&mut bm, &int_key(6), Rid::new(2, 0)).unwrap();
        index.insert_entry(&mut bm, &int_key(8), Rid::new(3, 0)).unwrap();
    }

    let key = int_key(7);
    let scan = IndexScan::open(&index, buffer.clone(), CompOp::Eq, Some(&key)).unwrap();
    let rids = collect_rids(scan);
    assert_eq!(rids.len(), 50);
    assert!(rids.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_delete_entry_exact_pair() {
    let (_temp_dir, buffer, mut index) = setup_index(AttrType::Int, 4);
    let mut bm = buffer.lock().unwrap();

    index.insert_entry(&mut bm, &int_key(1), Rid::new(1, 0)).unwrap();
    index.insert_entry(&mut bm, &int_key(1), Rid::new(1, 1)).unwrap();

    // Wrong RID: nothing deleted
    let result = index.delete_entry(&mut bm, &int_key(1), Rid::new(9, 9));
    assert!(matches!(result, Err(IndexError::EntryNotFound(_))));

    index.delete_entry(&mut bm, &int_key(1), Rid::new(1, 0)).unwrap();
    drop(bm);

    let key = int_key(1);
    let scan = IndexScan::open(&index, buffer.clone(), CompOp::Eq, Some(&key)).unwrap();
    assert_eq!(collect_rids(scan), vec![Rid::new(1, 1)]);
}

#[test]
fn test_delete_from_empty_tree() {
    let (_temp_dir, buffer, mut index) = setup_index(AttrType::Int, 4);
    let mut bm = buffer.lock().unwrap();
    let result = index.delete_entry(&mut bm, &int_key(1), Rid::new(1, 0));
    assert!(matches!(result, Err(IndexError::EntryNotFound(_))));
}

#[test]
fn test_lt_le_scans_terminate_at_boundary() {
    let (_temp_dir, buffer, mut index) = setup_index(AttrType::Int, 4);

    {
        let mut bm = buffer.lock().unwrap();
        for i in 0..1000 {
            index.insert_entry(&mut bm, &int_key(i), Rid::new(1, i)).unwrap();
        }
    }

    let key = int_key(10);
    let scan = IndexScan::open(&index, buffer.clone(), CompOp::Lt, Some(&key)).unwrap();
    assert_eq!(collect_rids(scan).len(), 10);

    let scan = IndexScan::open(&index, buffer.clone(), CompOp::Le, Some(&key)).unwrap();
    assert_eq!(collect_rids(scan).len(), 11);
}

#[test]
fn test_ne_scan_filters_single_key() {
    let (_temp_dir, buffer, mut index) = setup_index(AttrType::Int, 4);

    {
        let mut bm = buffer.lock().unwrap();
        for i in 0..20 {
            index.insert_entry(&mut bm, &int_key(i % 5), Rid::new(1, i)).unwrap();
        }
    }

    let key = int_key(3);
    let scan = IndexScan::open(&index, buffer.clone(), CompOp::Ne, Some(&key)).unwrap();
    assert_eq!(collect_rids(scan).len(), 16);
}

#[test]
fn test_float_keys_order() {
    let (_temp_dir, buffer, mut index) = setup_index(AttrType::Float, 4);

    {
        let mut bm = buffer.lock().unwrap();
        for (i, v) in [2.5f32, -1.0, 0.25, 10.0, -3.5].iter().enumerate() {
            index
                .insert_entry(&mut bm, &v.to_le_bytes(), Rid::new(1, i as i32))
                .unwrap();
        }
    }

    let key = 0.0f32.to_le_bytes();
    let scan = IndexScan::open(&index, buffer.clone(), CompOp::Ge, Some(&key)).unwrap();
    let keys: Vec<f32> = scan
        .map(|e| f32::from_le_bytes(e.unwrap().0.try_into().unwrap()))
        .collect();
    assert_eq!(keys, vec![0.25, 2.5, 10.0]);
}

#[test]
fn test_persists_across_reopen() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("t.ix");
    let buffer = Arc::new(Mutex::new(BufferManager::new(PagedFileManager::new())));

    {
        let mut bm = buffer.lock().unwrap();
        let mut index = IndexFile::create(&mut bm, &path, AttrType::Int, 4).unwrap();
        for i in 0..500 {
            index.insert_entry(&mut bm, &int_key(i), Rid::new(1, i)).unwrap();
        }
        index.force_pages(&mut bm).unwrap();
        index.close(&mut bm).unwrap();
    }

    let mut bm = buffer.lock().unwrap();
    let index = IndexFile::open(&mut bm, &path).unwrap();
    assert_eq!(index.attr_type(), AttrType::Int);
    assert_eq!(index.attr_length(), 4);
    drop(bm);

    let scan = IndexScan::open(&index, buffer.clone(), CompOp::No, None).unwrap();
    assert_eq!(collect_rids(scan).len(), 500);
}

#[test]
fn test_leaf_sibling_links_consistent() {
    let (_temp_dir, buffer, mut index) = setup_index(AttrType::Int, 4);

    {
        let mut bm = buffer.lock().unwrap();
        for i in 0..1200 {
            index.insert_entry(&mut bm, &int_key(i), Rid::new(1, i)).unwrap();
        }
    }

    // Walk the leaf chain explicitly and check left/right symmetry plus
    // non-decreasing keys across the boundary
    let mut bm = buffer.lock().unwrap();
    let handle = index.handle();
    let attr_length = index.attr_length();

    let mut page = index.root_page();
    loop {
        bm.pin_page(handle, page).unwrap();
        let (is_leaf, child) = {
            let payload = &bm.page(handle, page).unwrap()[crate::file::PAGE_HEADER_SIZE..];
            let node = NodePage::new(payload, attr_length);
            (node.is_leaf(), if node.is_leaf() { -1 } else { node.child(0) })
        };
        bm.unpin_page(handle, page).unwrap();
        if is_leaf {
            break;
        }
        page = child;
    }

    let mut prev = crate::file::NO_PAGE;
    let mut prev_max: Option<i32> = None;
    let mut total = 0usize;
    while page != crate::file::NO_PAGE {
        bm.pin_page(handle, page).unwrap();
        let (left, right, first, last, n) = {
            let payload = &bm.page(handle, page).unwrap()[crate::file::PAGE_HEADER_SIZE..];
            let node = NodePage::new(payload, attr_length);
            let n = node.num_keys();
            let first = i32::from_le_bytes(node.leaf_key(0).try_into().unwrap());
            let last = i32::from_le_bytes(node.leaf_key(n - 1).try_into().unwrap());
            (node.left(), node.right(), first, last, n)
        };
        bm.unpin_page(handle, page).unwrap();

        assert_eq!(left, prev);
        if let Some(prev_max) = prev_max {
            assert!(prev_max <= first);
        }
        assert!(first <= last);
        total += n;

        prev = page;
        prev_max = Some(last);
        page = right;
    }
    assert_eq!(total, 1200);
}
