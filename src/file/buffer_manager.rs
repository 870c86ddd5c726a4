use log::warn;
use lru::LruCache;

use super::error::{FileError, FileResult};
use super::file_manager::{FileHandle, PagedFileManager};
use super::{PageId, BUFFER_POOL_SIZE, NO_PAGE, PAGE_STRIDE};

/// A key identifying a page in the buffer pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BufferKey {
    file: FileHandle,
    page_id: PageId,
}

/// One buffer frame: a full on-disk page plus its bookkeeping
struct Frame {
    /// Raw page bytes (page header + payload)
    data: Vec<u8>,
    /// Whether the frame has diverged from disk
    dirty: bool,
    /// Number of outstanding pins; pinned frames are never evicted
    pin_count: u32,
}

/// Buffer pool access counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub hits: u64,
    pub misses: u64,
    pub disk_reads: u64,
    pub disk_writes: u64,
}

/// Fixed-capacity buffer pool with LRU replacement and pin/dirty semantics.
///
/// Frames are held in a single `LruCache` that doubles as page table and
/// recency list. The eviction victim is the least recently used frame with
/// a zero pin count; when every frame is pinned, page faults fail with
/// `NoBuffer` rather than evicting.
pub struct BufferManager {
    file_manager: PagedFileManager,
    pool: LruCache<BufferKey, Frame>,
    capacity: usize,
    stats: BufferStats,
}

impl BufferManager {
    pub fn new(file_manager: PagedFileManager) -> Self {
        Self::with_capacity(file_manager, BUFFER_POOL_SIZE)
    }

    pub fn with_capacity(file_manager: PagedFileManager, capacity: usize) -> Self {
        Self {
            file_manager,
            // Capacity is enforced in load_page; the cache's own bound would
            // evict pinned frames on insert
            pool: LruCache::unbounded(),
            capacity: capacity.max(1),
            stats: BufferStats::default(),
        }
    }

    pub fn file_manager(&self) -> &PagedFileManager {
        &self.file_manager
    }

    pub fn file_manager_mut(&mut self) -> &mut PagedFileManager {
        &mut self.file_manager
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    /// Pin a page, reading it from disk if it is not resident.
    ///
    /// Every successful call must be matched by exactly one `unpin_page`.
    pub fn pin_page(&mut self, file: FileHandle, page_id: PageId) -> FileResult<()> {
        let key = BufferKey { file, page_id };

        if let Some(frame) = self.pool.get_mut(&key) {
            frame.pin_count += 1;
            self.stats.hits += 1;
            return Ok(());
        }

        self.stats.misses += 1;
        self.load_page(key)
    }

    /// Release one pin on a resident page.
    pub fn unpin_page(&mut self, file: FileHandle, page_id: PageId) -> FileResult<()> {
        let key = BufferKey { file, page_id };
        let frame = self
            .pool
            .peek_mut(&key)
            .ok_or(FileError::PageNotInBuf(page_id))?;

        if frame.pin_count == 0 {
            return Err(FileError::PageUnpinned(page_id));
        }
        frame.pin_count -= 1;
        Ok(())
    }

    /// Read access to a resident page's raw bytes.
    pub fn page(&mut self, file: FileHandle, page_id: PageId) -> FileResult<&[u8]> {
        let key = BufferKey { file, page_id };
        self.pool
            .get(&key)
            .map(|frame| frame.data.as_slice())
            .ok_or(FileError::PageNotInBuf(page_id))
    }

    /// Write access to a resident page's raw bytes; marks the frame dirty.
    pub fn page_mut(&mut self, file: FileHandle, page_id: PageId) -> FileResult<&mut [u8]> {
        let key = BufferKey { file, page_id };
        let frame = self
            .pool
            .get_mut(&key)
            .ok_or(FileError::PageNotInBuf(page_id))?;
        frame.dirty = true;
        Ok(frame.data.as_mut_slice())
    }

    /// Mark a resident page dirty without touching its bytes.
    pub fn mark_dirty(&mut self, file: FileHandle, page_id: PageId) -> FileResult<()> {
        let key = BufferKey { file, page_id };
        let frame = self
            .pool
            .peek_mut(&key)
            .ok_or(FileError::PageNotInBuf(page_id))?;
        frame.dirty = true;
        Ok(())
    }

    /// Current pin count of a page (zero when not resident).
    pub fn pin_count(&self, file: FileHandle, page_id: PageId) -> u32 {
        let key = BufferKey { file, page_id };
        self.pool.peek(&key).map_or(0, |frame| frame.pin_count)
    }

    /// Write one page to disk if dirty; the frame stays resident and pinned as-is.
    pub fn force_page(&mut self, file: FileHandle, page_id: PageId) -> FileResult<()> {
        let key = BufferKey { file, page_id };
        if let Some(frame) = self.pool.peek_mut(&key) {
            if frame.dirty {
                self.file_manager.write_page(file, page_id, &frame.data)?;
                frame.dirty = false;
                self.stats.disk_writes += 1;
            }
        }
        Ok(())
    }

    /// Write every dirty page of one file to disk without evicting.
    pub fn force_file_pages(&mut self, file: FileHandle) -> FileResult<()> {
        let dirty: Vec<BufferKey> = self
            .pool
            .iter()
            .filter(|(key, frame)| key.file == file && frame.dirty)
            .map(|(key, _)| *key)
            .collect();

        for key in dirty {
            if let Some(frame) = self.pool.peek_mut(&key) {
                self.file_manager.write_page(key.file, key.page_id, &frame.data)?;
                frame.dirty = false;
                self.stats.disk_writes += 1;
            }
        }
        Ok(())
    }

    /// Drop every unpinned frame of one file, writing back dirty ones.
    ///
    /// Called after `force_file_pages` on close. A frame that is still
    /// pinned is a leak upstream; it is skipped rather than treated as
    /// fatal.
    pub fn clear_file_pages(&mut self, file: FileHandle) -> FileResult<()> {
        let keys: Vec<BufferKey> = self
            .pool
            .iter()
            .filter(|(key, _)| key.file == file)
            .map(|(key, _)| *key)
            .collect();

        for key in keys {
            let pinned = self.pool.peek(&key).map_or(0, |f| f.pin_count);
            if pinned > 0 {
                warn!(
                    "leaking pinned frame on close: page {} of file {} (pin count {})",
                    key.page_id,
                    key.file.as_usize(),
                    pinned
                );
                continue;
            }
            if let Some(frame) = self.pool.peek(&key) {
                if frame.dirty {
                    self.file_manager.write_page(key.file, key.page_id, &frame.data)?;
                    self.stats.disk_writes += 1;
                }
            }
            self.pool.pop(&key);
        }
        Ok(())
    }

    /// Flush every dirty frame of every file and sync to disk.
    pub fn flush_all(&mut self) -> FileResult<()> {
        let dirty: Vec<BufferKey> = self
            .pool
            .iter()
            .filter(|(_, frame)| frame.dirty)
            .map(|(key, _)| *key)
            .collect();

        for key in dirty {
            if let Some(frame) = self.pool.peek_mut(&key) {
                self.file_manager.write_page(key.file, key.page_id, &frame.data)?;
                frame.dirty = false;
                self.stats.disk_writes += 1;
            }
        }

        self.file_manager.sync_all()?;
        Ok(())
    }

    /// Rebuild the pool at a new capacity, flushing all dirty frames first.
    pub fn resize(&mut self, capacity: usize) -> FileResult<()> {
        self.flush_all()?;
        self.pool.clear();
        self.capacity = capacity.max(1);
        Ok(())
    }

    pub fn buffer_pool_size(&self) -> usize {
        self.pool.len()
    }

    pub fn is_page_cached(&self, file: FileHandle, page_id: PageId) -> bool {
        self.pool.contains(&BufferKey { file, page_id })
    }

    pub fn dirty_page_count(&self) -> usize {
        self.pool.iter().filter(|(_, frame)| frame.dirty).count()
    }

    /// Read a page into a fresh frame, evicting if the pool is full.
    fn load_page(&mut self, key: BufferKey) -> FileResult<()> {
        while self.pool.len() >= self.capacity {
            self.evict_one()?;
        }

        let mut data = vec![0u8; PAGE_STRIDE];
        let read = self
            .file_manager
            .read_page(key.file, key.page_id, &mut data)?;
        self.stats.disk_reads += 1;

        // A short read means the page was never written: hand out a zeroed
        // page that is not on any free list
        if read < PAGE_STRIDE {
            data[0..4].copy_from_slice(&NO_PAGE.to_le_bytes());
        }

        self.pool.put(
            key,
            Frame {
                data,
                dirty: false,
                pin_count: 1,
            },
        );
        Ok(())
    }

    /// Evict the least recently used unpinned frame, writing it back first
    /// when dirty. Fails with `NoBuffer` when every frame is pinned.
    fn evict_one(&mut self) -> FileResult<()> {
        // `iter()` runs most- to least-recently-used, so the last unpinned
        // entry is the LRU victim
        let victim = self
            .pool
            .iter()
            .filter(|(_, frame)| frame.pin_count == 0)
            .map(|(key, _)| *key)
            .last()
            .ok_or(FileError::NoBuffer)?;

        if let Some(frame) = self.pool.peek(&victim) {
            if frame.dirty {
                self.file_manager
                    .write_page(victim.file, victim.page_id, &frame.data)?;
                self.stats.disk_writes += 1;
            }
        }
        self.pool.pop(&victim);
        Ok(())
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        let _ = self.flush_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_env() -> (TempDir, BufferManager, FileHandle) {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");

        let mut file_manager = PagedFileManager::new();
        file_manager.create_file(&test_file).unwrap();
        let handle = file_manager.open_file(&test_file).unwrap();

        (temp_dir, BufferManager::new(file_manager), handle)
    }

    #[test]
    fn test_pin_loads_page() {
        let (_temp_dir, mut bm, handle) = setup_test_env();

        bm.pin_page(handle, 0).unwrap();
        assert_eq!(bm.pin_count(handle, 0), 1);
        assert_eq!(bm.buffer_pool_size(), 1);

        let page = bm.page(handle, 0).unwrap();
        assert_eq!(page.len(), PAGE_STRIDE);
        bm.unpin_page(handle, 0).unwrap();
        assert_eq!(bm.pin_count(handle, 0), 0);
    }

    #[test]
    fn test_fresh_page_gets_free_list_sentinel() {
        let (_temp_dir, mut bm, handle) = setup_test_env();

        bm.pin_page(handle, 5).unwrap();
        let page = bm.page(handle, 5).unwrap();
        assert_eq!(&page[0..4], &NO_PAGE.to_le_bytes());
        bm.unpin_page(handle, 5).unwrap();
    }

    #[test]
    fn test_double_unpin_fails() {
        let (_temp_dir, mut bm, handle) = setup_test_env();

        bm.pin_page(handle, 0).unwrap();
        bm.unpin_page(handle, 0).unwrap();
        let result = bm.unpin_page(handle, 0);
        assert!(matches!(result, Err(FileError::PageUnpinned(0))));
    }

    #[test]
    fn test_mark_dirty_requires_residency() {
        let (_temp_dir, mut bm, handle) = setup_test_env();

        let result = bm.mark_dirty(handle, 9);
        assert!(matches!(result, Err(FileError::PageNotInBuf(9))));
    }

    #[test]
    fn test_page_mut_marks_dirty_and_persists() {
        let (_temp_dir, mut bm, handle) = setup_test_env();

        bm.pin_page(handle, 0).unwrap();
        bm.page_mut(handle, 0).unwrap()[100] = 55;
        assert_eq!(bm.dirty_page_count(), 1);
        bm.unpin_page(handle, 0).unwrap();

        bm.force_page(handle, 0).unwrap();
        assert_eq!(bm.dirty_page_count(), 0);

        bm.clear_file_pages(handle).unwrap();
        assert!(!bm.is_page_cached(handle, 0));

        bm.pin_page(handle, 0).unwrap();
        assert_eq!(bm.page(handle, 0).unwrap()[100], 55);
        bm.unpin_page(handle, 0).unwrap();
    }

    #[test]
    fn test_pinned_frames_not_evicted() {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");
        let mut file_manager = PagedFileManager::new();
        file_manager.create_file(&test_file).unwrap();
        let handle = file_manager.open_file(&test_file).unwrap();
        let mut bm = BufferManager::with_capacity(file_manager, 2);

        bm.pin_page(handle, 0).unwrap();
        bm.pin_page(handle, 1).unwrap();

        // Both frames pinned: a third page cannot be faulted in
        let result = bm.pin_page(handle, 2);
        assert!(matches!(result, Err(FileError::NoBuffer)));

        bm.unpin_page(handle, 0).unwrap();
        bm.pin_page(handle, 2).unwrap();
        assert!(!bm.is_page_cached(handle, 0));
        assert!(bm.is_page_cached(handle, 1));
        bm.unpin_page(handle, 1).unwrap();
        bm.unpin_page(handle, 2).unwrap();
    }

    #[test]
    fn test_lru_eviction_order() {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");
        let mut file_manager = PagedFileManager::new();
        file_manager.create_file(&test_file).unwrap();
        let handle = file_manager.open_file(&test_file).unwrap();
        let mut bm = BufferManager::with_capacity(file_manager, 3);

        for page_id in 0..3 {
            bm.pin_page(handle, page_id).unwrap();
            bm.unpin_page(handle, page_id).unwrap();
        }

        // Touch page 0 so page 1 becomes the LRU victim
        bm.page(handle, 0).unwrap();

        bm.pin_page(handle, 3).unwrap();
        bm.unpin_page(handle, 3).unwrap();
        assert!(bm.is_page_cached(handle, 0));
        assert!(!bm.is_page_cached(handle, 1));
        assert!(bm.is_page_cached(handle, 2));
        assert!(bm.is_page_cached(handle, 3));
    }

    #[test]
    fn test_dirty_page_written_back_on_eviction() {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");
        let mut file_manager = PagedFileManager::new();
        file_manager.create_file(&test_file).unwrap();
        let handle = file_manager.open_file(&test_file).unwrap();
        let mut bm = BufferManager::with_capacity(file_manager, 1);

        bm.pin_page(handle, 0).unwrap();
        bm.page_mut(handle, 0).unwrap()[10] = 77;
        bm.unpin_page(handle, 0).unwrap();

        // Capacity 1: faulting page 1 must evict and write back page 0
        bm.pin_page(handle, 1).unwrap();
        bm.unpin_page(handle, 1).unwrap();
        assert!(!bm.is_page_cached(handle, 0));

        bm.pin_page(handle, 0).unwrap();
        assert_eq!(bm.page(handle, 0).unwrap()[10], 77);
        bm.unpin_page(handle, 0).unwrap();
    }

    #[test]
    fn test_scan_with_pool_of_one() {
        let temp_dir = tempfile::tempdir().unwrap();
        let test_file = temp_dir.path().join("test.db");
        let mut file_manager = PagedFileManager::new();
        file_manager.create_file(&test_file).unwrap();
        let handle = file_manager.open_file(&test_file).unwrap();
        let mut bm = BufferManager::with_capacity(file_manager, 1);

        for page_id in 0..20 {
            bm.pin_page(handle, page_id).unwrap();
            bm.page_mut(handle, page_id).unwrap()[0] = page_id as u8;
            bm.unpin_page(handle, page_id).unwrap();
        }
        for page_id in 0..20 {
            bm.pin_page(handle, page_id).unwrap();
            assert_eq!(bm.page(handle, page_id).unwrap()[0], page_id as u8);
            bm.unpin_page(handle, page_id).unwrap();
        }
    }

    #[test]
    fn test_clear_skips_pinned_frames() {
        let (_temp_dir, mut bm, handle) = setup_test_env();

        bm.pin_page(handle, 0).unwrap();
        bm.pin_page(handle, 1).unwrap();
        bm.unpin_page(handle, 1).unwrap();

        bm.clear_file_pages(handle).unwrap();
        assert!(bm.is_page_cached(handle, 0));
        assert!(!bm.is_page_cached(handle, 1));

        bm.unpin_page(handle, 0).unwrap();
    }

    #[test]
    fn test_resize_flushes_and_clears() {
        let (_temp_dir, mut bm, handle) = setup_test_env();

        bm.pin_page(handle, 0).unwrap();
        bm.page_mut(handle, 0).unwrap()[0] = 9;
        bm.unpin_page(handle, 0).unwrap();

        bm.resize(8).unwrap();
        assert_eq!(bm.buffer_pool_size(), 0);
        assert_eq!(bm.capacity(), 8);

        bm.pin_page(handle, 0).unwrap();
        assert_eq!(bm.page(handle, 0).unwrap()[0], 9);
        bm.unpin_page(handle, 0).unwrap();
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let (_temp_dir, mut bm, handle) = setup_test_env();

        bm.pin_page(handle, 0).unwrap();
        bm.unpin_page(handle, 0).unwrap();
        bm.pin_page(handle, 0).unwrap();
        bm.unpin_page(handle, 0).unwrap();

        let stats = bm.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.disk_reads, 1);
    }
}
