use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use super::error::{IndexError, IndexResult};
use super::index_file::IndexFile;
use super::node::NodePage;
use crate::file::{BufferManager, FileHandle, PageId, NO_PAGE, PAGE_HEADER_SIZE};
use crate::record::{compare_attrs, AttrType, CompOp, Rid};

/// What `next` decided about one leaf entry
enum Step {
    Entry(Vec<u8>, Rid),
    Advance(PageId),
}

/// Bounded forward scan over a B+tree's leaf chain.
///
/// `Eq`/`Ge`/`Gt` position the cursor by descending to the value's leaf;
/// `Lt`/`Le`, `Ne` and valueless scans start at the leftmost leaf. The
/// scan crosses right-sibling links, filters each entry against the
/// operator and stops as soon as the ascending key order rules out further
/// matches. At most one leaf is pinned at a time, and only inside `next`.
pub struct IndexScan {
    buffer: Arc<Mutex<BufferManager>>,
    handle: FileHandle,
    attr_type: AttrType,
    attr_length: usize,
    op: CompOp,
    value: Option<Vec<u8>>,
    current_page: PageId,
    current_slot: usize,
    done: bool,
}

impl IndexScan {
    /// Open a scan; `value` is the encoded comparison key, absent for
    /// unbounded scans.
    pub fn open(
        file: &IndexFile,
        buffer: Arc<Mutex<BufferManager>>,
        op: CompOp,
        value: Option<&[u8]>,
    ) -> IndexResult<Self> {
        if let Some(v) = value {
            if v.len() != file.attr_length() {
                return Err(IndexError::KeySize {
                    expected: file.attr_length(),
                    actual: v.len(),
                });
            }
        }

        Self::open_with(
            buffer,
            file.handle(),
            file.attr_type(),
            file.attr_length(),
            file.root_page(),
            op,
            value,
        )
    }

    /// Open a scan from snapshot parts; lets executor operators restart
    /// scans without holding the index file itself.
    pub fn open_with(
        buffer: Arc<Mutex<BufferManager>>,
        handle: FileHandle,
        attr_type: AttrType,
        attr_length: usize,
        root_page: PageId,
        op: CompOp,
        value: Option<&[u8]>,
    ) -> IndexResult<Self> {
        if let Some(v) = value {
            if v.len() != attr_length {
                return Err(IndexError::KeySize {
                    expected: attr_length,
                    actual: v.len(),
                });
            }
        }

        let mut scan = Self {
            buffer,
            handle,
            attr_type,
            attr_length,
            op,
            value: value.map(|v| v.to_vec()),
            current_page: NO_PAGE,
            current_slot: 0,
            done: false,
        };
        scan.position(root_page)?;
        Ok(scan)
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        compare_attrs(a, b, self.attr_type, self.attr_length)
    }

    /// Descend from the root to the starting leaf and slot.
    fn position(&mut self, root: PageId) -> IndexResult<()> {
        if root == NO_PAGE {
            self.done = true;
            return Ok(());
        }

        // Only lower-bounded operators descend by value; everything else
        // starts at the leftmost leaf
        let by_value = matches!(self.op, CompOp::Eq | CompOp::Ge | CompOp::Gt)
            && self.value.is_some();

        let buffer = self.buffer.clone();
        let mut bm = buffer.lock().unwrap();

        let mut page = root;
        loop {
            bm.pin_page(self.handle, page)?;
            let (is_leaf, next) = {
                let node = self.node_at(&mut bm, page)?;
                if node.is_leaf() {
                    (true, NO_PAGE)
                } else if by_value {
                    let value = self.value.as_deref().unwrap();
                    let mut child = node.child(0);
                    for i in 0..node.num_keys() {
                        if self.compare(value, node.internal_key(i)) == Ordering::Less {
                            break;
                        }
                        child = node.child(i + 1);
                    }
                    (false, child)
                } else {
                    (false, node.child(0))
                }
            };
            bm.unpin_page(self.handle, page)?;
            if is_leaf {
                break;
            }
            page = next;
        }
        self.current_page = page;

        if by_value {
            bm.pin_page(self.handle, page)?;
            let slot = {
                let node = self.node_at(&mut bm, page)?;
                let value = self.value.as_deref().unwrap();
                (0..node.num_keys())
                    .find(|&i| {
                        let ord = self.compare(node.leaf_key(i), value);
                        match self.op {
                            CompOp::Gt => ord == Ordering::Greater,
                            _ => ord != Ordering::Less,
                        }
                    })
                    .unwrap_or(node.num_keys())
            };
            bm.unpin_page(self.handle, page)?;
            self.current_slot = slot;
        }
        Ok(())
    }

    fn node_at<'a>(
        &self,
        bm: &'a mut BufferManager,
        page: PageId,
    ) -> IndexResult<NodePage<&'a [u8]>> {
        let payload = &bm.page(self.handle, page)?[PAGE_HEADER_SIZE..];
        Ok(NodePage::new(payload, self.attr_length))
    }

    /// Whether to emit, skip, or stop at a key, given ascending key order.
    fn admit(&self, key: &[u8]) -> Option<bool> {
        let value = match &self.value {
            Some(v) if self.op != CompOp::No => v,
            _ => return Some(true),
        };
        let ord = self.compare(key, value);
        match self.op {
            CompOp::No => Some(true),
            CompOp::Eq => match ord {
                Ordering::Less => Some(false),
                Ordering::Equal => Some(true),
                Ordering::Greater => None,
            },
            CompOp::Ne => Some(ord != Ordering::Equal),
            CompOp::Ge => Some(ord != Ordering::Less),
            CompOp::Gt => Some(ord == Ordering::Greater),
            CompOp::Lt => match ord {
                Ordering::Less => Some(true),
                _ => None,
            },
            CompOp::Le => match ord {
                Ordering::Greater => None,
                _ => Some(true),
            },
        }
    }

    fn get_next(&mut self) -> IndexResult<Option<(Vec<u8>, Rid)>> {
        loop {
            if self.done {
                return Ok(None);
            }

            let buffer = self.buffer.clone();
            let mut bm = buffer.lock().unwrap();
            bm.pin_page(self.handle, self.current_page)?;
            let step = {
                let node = self.node_at(&mut bm, self.current_page)?;
                if self.current_slot >= node.num_keys() {
                    Step::Advance(node.right())
                } else {
                    Step::Entry(
                        node.leaf_key(self.current_slot).to_vec(),
                        node.leaf_rid(self.current_slot),
                    )
                }
            };
            bm.unpin_page(self.handle, self.current_page)?;
            drop(bm);

            match step {
                Step::Advance(NO_PAGE) => {
                    self.done = true;
                    return Ok(None);
                }
                Step::Advance(next) => {
                    self.current_page = next;
                    self.current_slot = 0;
                }
                Step::Entry(key, rid) => {
                    self.current_slot += 1;
                    match self.admit(&key) {
                        Some(true) => return Ok(Some((key, rid))),
                        Some(false) => continue,
                        None => {
                            // Keys only ascend from here on
                            self.done = true;
                            return Ok(None);
                        }
                    }
                }
            }
        }
    }
}

impl Iterator for IndexScan {
    type Item = IndexResult<(Vec<u8>, Rid)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.get_next() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
