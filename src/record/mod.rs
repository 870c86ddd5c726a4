mod error;
mod heap_file;
mod page;
mod record;
mod scan;
mod value;

pub use error::{RecordError, RecordResult};
pub use heap_file::{RecordFile, RecordReader, RmFileHeader, MAX_RECORD_SIZE};
pub use page::DataPage;
pub use record::{Record, Rid, SlotId};
pub use scan::{FileScan, Predicate};
pub use value::{compare_attrs, eval_comp, AttrType, CompOp, Value};

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::file::BufferManager;

/// High-level owner of open heap files, keyed by path.
pub struct RecordManager {
    buffer: Arc<Mutex<BufferManager>>,
    open_files: HashMap<String, RecordFile>,
}

impl RecordManager {
    pub fn new(buffer: Arc<Mutex<BufferManager>>) -> Self {
        Self {
            buffer,
            open_files: HashMap::new(),
        }
    }

    pub fn buffer(&self) -> Arc<Mutex<BufferManager>> {
        self.buffer.clone()
    }

    /// Create a heap file and leave it open.
    pub fn create_file(&mut self, path: &str, record_size: usize) -> RecordResult<()> {
        let mut bm = self.buffer.lock().unwrap();
        let file = RecordFile::create(&mut bm, path, record_size)?;
        drop(bm);
        self.open_files.insert(path.to_string(), file);
        Ok(())
    }

    /// Open an existing heap file; opening twice is a no-op.
    pub fn open_file(&mut self, path: &str) -> RecordResult<()> {
        if self.open_files.contains_key(path) {
            return Ok(());
        }
        let mut bm = self.buffer.lock().unwrap();
        let file = RecordFile::open(&mut bm, path)?;
        drop(bm);
        self.open_files.insert(path.to_string(), file);
        Ok(())
    }

    /// Flush and close one heap file.
    pub fn close_file(&mut self, path: &str) -> RecordResult<()> {
        if let Some(file) = self.open_files.remove(path) {
            let mut bm = self.buffer.lock().unwrap();
            file.close(&mut bm)?;
        }
        Ok(())
    }

    /// Destroy a heap file, closing it first if open.
    pub fn destroy_file(&mut self, path: &str) -> RecordResult<()> {
        self.close_file(path)?;
        let mut bm = self.buffer.lock().unwrap();
        RecordFile::destroy(&mut bm, path)
    }

    pub fn is_open(&self, path: &str) -> bool {
        self.open_files.contains_key(path)
    }

    pub fn file(&self, path: &str) -> RecordResult<&RecordFile> {
        self.open_files
            .get(path)
            .ok_or_else(|| RecordError::FileNotOpen(path.to_string()))
    }

    pub fn get_rec(&mut self, path: &str, rid: Rid) -> RecordResult<Record> {
        let buffer = self.buffer.clone();
        let mut bm = buffer.lock().unwrap();
        let file = self.file(path)?;
        file.get_rec(&mut bm, rid)
    }

    pub fn insert_rec(&mut self, path: &str, data: &[u8]) -> RecordResult<Rid> {
        let buffer = self.buffer.clone();
        let mut bm = buffer.lock().unwrap();
        let file = self.file_mut_internal(path)?;
        file.insert_rec(&mut bm, data)
    }

    pub fn delete_rec(&mut self, path: &str, rid: Rid) -> RecordResult<()> {
        let buffer = self.buffer.clone();
        let mut bm = buffer.lock().unwrap();
        let file = self.file_mut_internal(path)?;
        file.delete_rec(&mut bm, rid)
    }

    pub fn update_rec(&mut self, path: &str, rec: &Record) -> RecordResult<()> {
        let buffer = self.buffer.clone();
        let mut bm = buffer.lock().unwrap();
        let file = self.file_mut_internal(path)?;
        file.update_rec(&mut bm, rec)
    }

    pub fn force_pages(&mut self, path: &str) -> RecordResult<()> {
        let buffer = self.buffer.clone();
        let mut bm = buffer.lock().unwrap();
        let file = self.file_mut_internal(path)?;
        file.force_pages(&mut bm)
    }

    /// Open a predicate scan over one heap file.
    pub fn scan(&self, path: &str, predicate: Predicate) -> RecordResult<FileScan> {
        let file = self.file(path)?;
        FileScan::open(file, self.buffer.clone(), predicate)
    }

    /// Read-only record accessor for executor operators.
    pub fn reader(&self, path: &str) -> RecordResult<RecordReader> {
        let file = self.file(path)?;
        Ok(file.reader(self.buffer.clone()))
    }

    /// Flush and close every open heap file.
    pub fn close_all(&mut self) -> RecordResult<()> {
        let paths: Vec<String> = self.open_files.keys().cloned().collect();
        for path in paths {
            self.close_file(&path)?;
        }
        Ok(())
    }

    /// Whether a heap file exists on disk at `path`.
    pub fn file_exists(&self, path: &str) -> bool {
        Path::new(path).exists()
    }

    fn file_mut_internal(&mut self, path: &str) -> RecordResult<&mut RecordFile> {
        self.open_files
            .get_mut(path)
            .ok_or_else(|| RecordError::FileNotOpen(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::PagedFileManager;

    #[test]
    fn test_manager_lifecycle() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("t.rm");
        let path = path.to_str().unwrap();

        let buffer = Arc::new(Mutex::new(BufferManager::new(PagedFileManager::new())));
        let mut rm = RecordManager::new(buffer);

        rm.create_file(path, 8).unwrap();
        assert!(rm.is_open(path));

        let rid = rm.insert_rec(path, &[1; 8]).unwrap();
        assert_eq!(rm.get_rec(path, rid).unwrap().data, vec![1; 8]);

        rm.close_file(path).unwrap();
        assert!(!rm.is_open(path));
        assert!(matches!(
            rm.get_rec(path, rid),
            Err(RecordError::FileNotOpen(_))
        ));

        rm.open_file(path).unwrap();
        assert_eq!(rm.get_rec(path, rid).unwrap().data, vec![1; 8]);

        rm.destroy_file(path).unwrap();
        assert!(!rm.file_exists(path));
    }

    #[test]
    fn test_scan_through_manager() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("t.rm");
        let path = path.to_str().unwrap();

        let buffer = Arc::new(Mutex::new(BufferManager::new(PagedFileManager::new())));
        let mut rm = RecordManager::new(buffer);
        rm.create_file(path, 4).unwrap();

        for i in 0..10i32 {
            rm.insert_rec(path, &i.to_le_bytes()).unwrap();
        }

        let count = rm.scan(path, Predicate::all()).unwrap().count();
        assert_eq!(count, 10);
    }
}
