use std::cmp::Ordering;
use std::path::Path;

use log::debug;

use super::error::{IndexError, IndexResult};
use super::node::NodePage;
use crate::file::{BufferManager, FileHandle, PageId, PagedFile, NO_PAGE};
use crate::record::{compare_attrs, AttrType, Rid};

/// Index-file header, stored in the payload of page 0.
#[derive(Debug, Clone, Copy)]
pub struct IxFileHeader {
    pub attr_type: AttrType,
    pub attr_length: i32,
    pub root_page: PageId,
    pub num_pages: i32,
    pub first_free_page: PageId,
}

impl IxFileHeader {
    pub const SIZE: usize = 20;

    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.attr_type.code().to_le_bytes());
        buf[4..8].copy_from_slice(&self.attr_length.to_le_bytes());
        buf[8..12].copy_from_slice(&self.root_page.to_le_bytes());
        buf[12..16].copy_from_slice(&self.num_pages.to_le_bytes());
        buf[16..20].copy_from_slice(&self.first_free_page.to_le_bytes());
        buf
    }

    pub fn deserialize(data: &[u8]) -> IndexResult<Self> {
        let code = i32::from_le_bytes(data[0..4].try_into().unwrap());
        let attr_type = AttrType::from_code(code)
            .map_err(|_| IndexError::InvalidTree(format!("bad attribute type code {}", code)))?;
        Ok(Self {
            attr_type,
            attr_length: i32::from_le_bytes(data[4..8].try_into().unwrap()),
            root_page: i32::from_le_bytes(data[8..12].try_into().unwrap()),
            num_pages: i32::from_le_bytes(data[12..16].try_into().unwrap()),
            first_free_page: i32::from_le_bytes(data[16..20].try_into().unwrap()),
        })
    }
}

/// Outcome of a recursive insert: either the child absorbed the entry, or
/// it split and hands `(promoted key, new right page)` up to its parent.
enum SplitResult {
    None,
    Split { key: Vec<u8>, right: PageId },
}

/// A disk-resident B+tree keyed by one fixed-length attribute.
///
/// Page 0 carries the header; every other page is a node. Leaves hold
/// `(key, rid)` entries ordered by `(key, rid)` and are chained through
/// their sibling links for range scans. Deletes never merge nodes;
/// under-full and even empty leaves are tolerated.
pub struct IndexFile {
    pf: PagedFile,
    header: IxFileHeader,
    header_changed: bool,
}

impl IndexFile {
    /// Create an index file for keys of the given type and length.
    pub fn create<P: AsRef<Path>>(
        bm: &mut BufferManager,
        path: P,
        attr_type: AttrType,
        attr_length: usize,
    ) -> IndexResult<Self> {
        if !attr_type.valid_length(attr_length) {
            return Err(IndexError::InvalidAttr(format!(
                "{} keys of length {}",
                attr_type, attr_length
            )));
        }

        let path = path.as_ref();
        PagedFile::create(bm, path)?;
        let mut pf = match PagedFile::open(bm, path) {
            Ok(pf) => pf,
            Err(e) => {
                let _ = PagedFile::destroy(bm, path);
                return Err(e.into());
            }
        };

        let header = IxFileHeader {
            attr_type,
            attr_length: attr_length as i32,
            root_page: NO_PAGE,
            num_pages: 1,
            first_free_page: NO_PAGE,
        };

        let result = (|| -> IndexResult<()> {
            let page = pf.allocate_page(bm)?;
            debug_assert_eq!(page, 0);
            pf.page_mut(bm, page)?[..IxFileHeader::SIZE].copy_from_slice(&header.serialize());
            pf.unpin(bm, page)?;
            Ok(())
        })();
        if let Err(e) = result {
            let _ = pf.close(bm);
            let _ = PagedFile::destroy(bm, path);
            return Err(e);
        }

        debug!(
            "created index {} ({} keys, length {})",
            path.display(),
            attr_type,
            attr_length
        );
        Ok(Self {
            pf,
            header,
            header_changed: false,
        })
    }

    /// Open an existing index file and cache its header.
    pub fn open<P: AsRef<Path>>(bm: &mut BufferManager, path: P) -> IndexResult<Self> {
        let pf = PagedFile::open(bm, path)?;
        pf.fetch(bm, 0)
            .map_err(|_| IndexError::InvalidTree("index file has no header page".into()))?;
        let header = IxFileHeader::deserialize(pf.page(bm, 0)?)?;
        pf.unpin(bm, 0)?;

        if header.attr_length <= 0 || header.attr_length > 255 {
            return Err(IndexError::InvalidTree(format!(
                "bad key length {}",
                header.attr_length
            )));
        }
        Ok(Self {
            pf,
            header,
            header_changed: false,
        })
    }

    /// Remove an index file from disk.
    pub fn destroy<P: AsRef<Path>>(bm: &mut BufferManager, path: P) -> IndexResult<()> {
        PagedFile::destroy(bm, path)?;
        Ok(())
    }

    pub fn handle(&self) -> FileHandle {
        self.pf.handle()
    }

    pub fn attr_type(&self) -> AttrType {
        self.header.attr_type
    }

    pub fn attr_length(&self) -> usize {
        self.header.attr_length as usize
    }

    pub fn root_page(&self) -> PageId {
        self.header.root_page
    }

    pub fn leaf_capacity(&self) -> usize {
        NodePage::<&[u8]>::max_leaf_entries(self.attr_length())
    }

    pub fn internal_capacity(&self) -> usize {
        NodePage::<&[u8]>::max_internal_entries(self.attr_length())
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        compare_attrs(a, b, self.header.attr_type, self.attr_length())
    }

    /// Insert one `(key, rid)` entry. Duplicate keys with distinct RIDs are
    /// kept as separate entries.
    pub fn insert_entry(&mut self, bm: &mut BufferManager, key: &[u8], rid: Rid) -> IndexResult<()> {
        self.check_key(key)?;

        if self.header.root_page == NO_PAGE {
            let root = self.pf.allocate_page(bm)?;
            {
                let mut node = NodePage::init(self.pf.page_mut(bm, root)?, self.attr_length(), true);
                node.insert_leaf_entry(0, key, rid);
            }
            self.pf.unpin(bm, root)?;
            self.header.root_page = root;
            self.header.num_pages = self.pf.num_pages();
            self.header_changed = true;
            debug!("index grew its first leaf (page {})", root);
        } else if let SplitResult::Split { key: up_key, right } =
            self.insert_into(bm, self.header.root_page, key, rid)?
        {
            let old_root = self.header.root_page;
            let new_root = self.pf.allocate_page(bm)?;
            {
                let mut node =
                    NodePage::init(self.pf.page_mut(bm, new_root)?, self.attr_length(), false);
                node.set_child(0, old_root);
                node.insert_internal_entry(0, &up_key, right);
            }
            self.pf.unpin(bm, new_root)?;

            for child in [old_root, right] {
                self.pf.fetch(bm, child)?;
                {
                    let mut node =
                        NodePage::new(self.pf.page_mut(bm, child)?, self.attr_length());
                    node.set_parent(new_root);
                }
                self.pf.unpin(bm, child)?;
            }

            self.header.root_page = new_root;
            self.header.num_pages = self.pf.num_pages();
            self.header_changed = true;
            debug!("root split: new root page {}", new_root);
        }

        self.write_header_if_changed(bm)
    }

    /// Delete the exact `(key, rid)` entry from the leaf on the key's
    /// search path. No rebalancing happens.
    pub fn delete_entry(&mut self, bm: &mut BufferManager, key: &[u8], rid: Rid) -> IndexResult<()> {
        self.check_key(key)?;
        if self.header.root_page == NO_PAGE {
            return Err(IndexError::EntryNotFound(rid));
        }

        let mut page_id = self.header.root_page;
        loop {
            self.pf.fetch(bm, page_id)?;
            let (is_leaf, next) = {
                let node = NodePage::new(self.pf.page(bm, page_id)?, self.attr_length());
                if node.is_leaf() {
                    (true, NO_PAGE)
                } else {
                    (false, self.find_child(&node, key))
                }
            };
            if is_leaf {
                break;
            }
            self.pf.unpin(bm, page_id)?;
            page_id = next;
        }

        let found = {
            let node = NodePage::new(self.pf.page(bm, page_id)?, self.attr_length());
            (0..node.num_keys()).find(|&i| {
                self.compare(node.leaf_key(i), key) == Ordering::Equal && node.leaf_rid(i) == rid
            })
        };

        let result = match found {
            Some(index) => {
                let mut node = NodePage::new(self.pf.page_mut(bm, page_id)?, self.attr_length());
                node.remove_leaf_entry(index);
                Ok(())
            }
            None => Err(IndexError::EntryNotFound(rid)),
        };
        self.pf.unpin(bm, page_id)?;
        result
    }

    /// Write the cached header back and force all dirty pages to disk.
    pub fn force_pages(&mut self, bm: &mut BufferManager) -> IndexResult<()> {
        self.write_header_if_changed(bm)?;
        self.pf.force_pages(bm)?;
        Ok(())
    }

    /// Flush and close the underlying paged file.
    pub fn close(mut self, bm: &mut BufferManager) -> IndexResult<()> {
        self.write_header_if_changed(bm)?;
        self.pf.close(bm)?;
        Ok(())
    }

    fn insert_into(
        &mut self,
        bm: &mut BufferManager,
        page_id: PageId,
        key: &[u8],
        rid: Rid,
    ) -> IndexResult<SplitResult> {
        self.pf.fetch(bm, page_id)?;
        let (is_leaf, num_keys) = {
            let node = NodePage::new(self.pf.page(bm, page_id)?, self.attr_length());
            (node.is_leaf(), node.num_keys())
        };

        let result = if is_leaf {
            self.insert_into_leaf(bm, page_id, num_keys, key, rid)
        } else {
            self.insert_into_internal(bm, page_id, num_keys, key, rid)
        };
        self.pf.unpin(bm, page_id)?;
        result
    }

    fn insert_into_leaf(
        &mut self,
        bm: &mut BufferManager,
        page_id: PageId,
        num_keys: usize,
        key: &[u8],
        rid: Rid,
    ) -> IndexResult<SplitResult> {
        if num_keys < self.leaf_capacity() {
            let pos = {
                let node = NodePage::new(self.pf.page(bm, page_id)?, self.attr_length());
                self.leaf_position(&node, key, rid)
            };
            let mut node = NodePage::new(self.pf.page_mut(bm, page_id)?, self.attr_length());
            node.insert_leaf_entry(pos, key, rid);
            return Ok(SplitResult::None);
        }
        self.split_leaf(bm, page_id, key, rid)
    }

    fn split_leaf(
        &mut self,
        bm: &mut BufferManager,
        page_id: PageId,
        key: &[u8],
        rid: Rid,
    ) -> IndexResult<SplitResult> {
        // Materialize every entry plus the new one, in order
        let (mut entries, old_right, parent) = {
            let node = NodePage::new(self.pf.page(bm, page_id)?, self.attr_length());
            let entries: Vec<(Vec<u8>, Rid)> = (0..node.num_keys())
                .map(|i| (node.leaf_key(i).to_vec(), node.leaf_rid(i)))
                .collect();
            (entries, node.right(), node.parent())
        };
        let pos = entries
            .iter()
            .position(|(k, r)| {
                let ord = self.compare(k, key);
                ord == Ordering::Greater || (ord == Ordering::Equal && *r > rid)
            })
            .unwrap_or(entries.len());
        entries.insert(pos, (key.to_vec(), rid));

        let split = entries.len() / 2;
        let promoted = entries[split].0.clone();

        let new_page = self.pf.allocate_page(bm)?;
        self.header.num_pages = self.pf.num_pages();
        self.header_changed = true;

        {
            let mut node =
                NodePage::init(self.pf.page_mut(bm, new_page)?, self.attr_length(), true);
            for (i, (k, r)) in entries[split..].iter().enumerate() {
                node.set_leaf_entry(i, k, *r);
            }
            node.set_num_keys(entries.len() - split);
            node.set_left(page_id);
            node.set_right(old_right);
            node.set_parent(parent);
        }
        {
            let mut node = NodePage::new(self.pf.page_mut(bm, page_id)?, self.attr_length());
            for (i, (k, r)) in entries[..split].iter().enumerate() {
                node.set_leaf_entry(i, k, *r);
            }
            node.set_num_keys(split);
            node.set_right(new_page);
        }
        if old_right != NO_PAGE {
            self.pf.fetch(bm, old_right)?;
            {
                let mut node =
                    NodePage::new(self.pf.page_mut(bm, old_right)?, self.attr_length());
                node.set_left(new_page);
            }
            self.pf.unpin(bm, old_right)?;
        }
        self.pf.unpin(bm, new_page)?;

        debug!("leaf {} split, new right leaf {}", page_id, new_page);
        Ok(SplitResult::Split {
            key: promoted,
            right: new_page,
        })
    }

    fn insert_into_internal(
        &mut self,
        bm: &mut BufferManager,
        page_id: PageId,
        num_keys: usize,
        key: &[u8],
        rid: Rid,
    ) -> IndexResult<SplitResult> {
        let child = {
            let node = NodePage::new(self.pf.page(bm, page_id)?, self.attr_length());
            self.find_child(&node, key)
        };

        match self.insert_into(bm, child, key, rid)? {
            SplitResult::None => Ok(SplitResult::None),
            SplitResult::Split { key: up_key, right } => {
                if num_keys < self.internal_capacity() {
                    let pos = {
                        let node = NodePage::new(self.pf.page(bm, page_id)?, self.attr_length());
                        self.internal_position(&node, &up_key)
                    };
                    let mut node =
                        NodePage::new(self.pf.page_mut(bm, page_id)?, self.attr_length());
                    node.insert_internal_entry(pos, &up_key, right);
                    Ok(SplitResult::None)
                } else {
                    self.split_internal(bm, page_id, &up_key, right)
                }
            }
        }
    }

    fn split_internal(
        &mut self,
        bm: &mut BufferManager,
        page_id: PageId,
        up_key: &[u8],
        right_child: PageId,
    ) -> IndexResult<SplitResult> {
        let (mut keys, mut children, parent) = {
            let node = NodePage::new(self.pf.page(bm, page_id)?, self.attr_length());
            let n = node.num_keys();
            let keys: Vec<Vec<u8>> = (0..n).map(|i| node.internal_key(i).to_vec()).collect();
            let children: Vec<PageId> = (0..=n).map(|i| node.child(i)).collect();
            (keys, children, node.parent())
        };

        let pos = keys
            .iter()
            .position(|k| self.compare(up_key, k) == Ordering::Less)
            .unwrap_or(keys.len());
        keys.insert(pos, up_key.to_vec());
        // The new page is the right child of the inserted key
        children.insert(pos + 1, right_child);

        let total = keys.len();
        let split = total / 2;
        // The middle key moves up and appears in neither half
        let promoted = keys[split].clone();

        let new_page = self.pf.allocate_page(bm)?;
        self.header.num_pages = self.pf.num_pages();
        self.header_changed = true;

        {
            let mut node =
                NodePage::init(self.pf.page_mut(bm, new_page)?, self.attr_length(), false);
            let right_keys = &keys[split + 1..];
            node.set_child(0, children[split + 1]);
            for (i, k) in right_keys.iter().enumerate() {
                node.set_internal_key(i, k);
                node.set_child(i + 1, children[split + 2 + i]);
            }
            node.set_num_keys(right_keys.len());
            node.set_parent(parent);
        }
        {
            let mut node = NodePage::new(self.pf.page_mut(bm, page_id)?, self.attr_length());
            node.set_child(0, children[0]);
            for i in 0..split {
                node.set_internal_key(i, &keys[i]);
                node.set_child(i + 1, children[i + 1]);
            }
            node.set_num_keys(split);
        }
        self.pf.unpin(bm, new_page)?;

        debug!("internal {} split, new node {}", page_id, new_page);
        Ok(SplitResult::Split {
            key: promoted,
            right: new_page,
        })
    }

    /// Child subtree that covers `key`: equal keys descend right, per the
    /// `keys(child_i) < key_i <= keys(child_{i+1})` invariant.
    fn find_child<B: AsRef<[u8]>>(&self, node: &NodePage<B>, key: &[u8]) -> PageId {
        for i in 0..node.num_keys() {
            if self.compare(key, node.internal_key(i)) == Ordering::Less {
                return node.child(i);
            }
        }
        node.child(node.num_keys())
    }

    /// Insertion index in a leaf, ordering by `(key, rid)`.
    fn leaf_position<B: AsRef<[u8]>>(&self, node: &NodePage<B>, key: &[u8], rid: Rid) -> usize {
        (0..node.num_keys())
            .find(|&i| {
                let ord = self.compare(node.leaf_key(i), key);
                ord == Ordering::Greater || (ord == Ordering::Equal && node.leaf_rid(i) > rid)
            })
            .unwrap_or(node.num_keys())
    }

    /// Insertion index for a promoted key in an internal node.
    fn internal_position<B: AsRef<[u8]>>(&self, node: &NodePage<B>, key: &[u8]) -> usize {
        (0..node.num_keys())
            .find(|&i| self.compare(key, node.internal_key(i)) == Ordering::Less)
            .unwrap_or(node.num_keys())
    }

    fn check_key(&self, key: &[u8]) -> IndexResult<()> {
        if key.len() != self.attr_length() {
            return Err(IndexError::KeySize {
                expected: self.attr_length(),
                actual: key.len(),
            });
        }
        Ok(())
    }

    fn write_header_if_changed(&mut self, bm: &mut BufferManager) -> IndexResult<()> {
        if self.header_changed {
            self.pf.fetch(bm, 0)?;
            self.pf.page_mut(bm, 0)?[..IxFileHeader::SIZE]
                .copy_from_slice(&self.header.serialize());
            self.pf.unpin(bm, 0)?;
            self.header_changed = false;
        }
        Ok(())
    }
}
