//! Disk-resident B+tree indexes

mod error;
mod index_file;
mod node;
mod scan;
#[cfg(test)]
mod tests;

pub use error::{IndexError, IndexResult};
pub use index_file::{IndexFile, IxFileHeader};
pub use node::NodePage;
pub use scan::IndexScan;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::file::BufferManager;
use crate::record::{AttrType, CompOp, Rid};

/// On-disk name of the index numbered `index_no` on `rel`.
pub fn index_file_name(rel: &str, index_no: i32) -> String {
    format!("{}.{}", rel, index_no)
}

/// High-level owner of open index files, keyed by path.
pub struct IndexManager {
    buffer: Arc<Mutex<BufferManager>>,
    open_indexes: HashMap<String, IndexFile>,
}

impl IndexManager {
    pub fn new(buffer: Arc<Mutex<BufferManager>>) -> Self {
        Self {
            buffer,
            open_indexes: HashMap::new(),
        }
    }

    /// Create an index file and leave it open.
    pub fn create_index(
        &mut self,
        path: &str,
        attr_type: AttrType,
        attr_length: usize,
    ) -> IndexResult<()> {
        let mut bm = self.buffer.lock().unwrap();
        let index = IndexFile::create(&mut bm, path, attr_type, attr_length)?;
        drop(bm);
        self.open_indexes.insert(path.to_string(), index);
        Ok(())
    }

    /// Open an existing index; opening twice is a no-op.
    pub fn open_index(&mut self, path: &str) -> IndexResult<()> {
        if self.open_indexes.contains_key(path) {
            return Ok(());
        }
        let mut bm = self.buffer.lock().unwrap();
        let index = IndexFile::open(&mut bm, path)?;
        drop(bm);
        self.open_indexes.insert(path.to_string(), index);
        Ok(())
    }

    /// Flush and close one index.
    pub fn close_index(&mut self, path: &str) -> IndexResult<()> {
        if let Some(index) = self.open_indexes.remove(path) {
            let mut bm = self.buffer.lock().unwrap();
            index.close(&mut bm)?;
        }
        Ok(())
    }

    /// Destroy an index file, closing it first if open.
    pub fn destroy_index(&mut self, path: &str) -> IndexResult<()> {
        self.close_index(path)?;
        let mut bm = self.buffer.lock().unwrap();
        IndexFile::destroy(&mut bm, path)
    }

    pub fn is_open(&self, path: &str) -> bool {
        self.open_indexes.contains_key(path)
    }

    pub fn index(&self, path: &str) -> IndexResult<&IndexFile> {
        self.open_indexes
            .get(path)
            .ok_or_else(|| IndexError::IndexNotOpen(path.to_string()))
    }

    pub fn insert_entry(&mut self, path: &str, key: &[u8], rid: Rid) -> IndexResult<()> {
        let buffer = self.buffer.clone();
        let mut bm = buffer.lock().unwrap();
        let index = self.index_mut_internal(path)?;
        index.insert_entry(&mut bm, key, rid)
    }

    pub fn delete_entry(&mut self, path: &str, key: &[u8], rid: Rid) -> IndexResult<()> {
        let buffer = self.buffer.clone();
        let mut bm = buffer.lock().unwrap();
        let index = self.index_mut_internal(path)?;
        index.delete_entry(&mut bm, key, rid)
    }

    pub fn force_pages(&mut self, path: &str) -> IndexResult<()> {
        let buffer = self.buffer.clone();
        let mut bm = buffer.lock().unwrap();
        let index = self.index_mut_internal(path)?;
        index.force_pages(&mut bm)
    }

    /// Open a bounded scan over one index.
    pub fn scan(&self, path: &str, op: CompOp, value: Option<&[u8]>) -> IndexResult<IndexScan> {
        let index = self.index(path)?;
        IndexScan::open(index, self.buffer.clone(), op, value)
    }

    /// Flush and close every open index.
    pub fn close_all(&mut self) -> IndexResult<()> {
        let paths: Vec<String> = self.open_indexes.keys().cloned().collect();
        for path in paths {
            self.close_index(&path)?;
        }
        Ok(())
    }

    fn index_mut_internal(&mut self, path: &str) -> IndexResult<&mut IndexFile> {
        self.open_indexes
            .get_mut(path)
            .ok_or_else(|| IndexError::IndexNotOpen(path.to_string()))
    }
}
