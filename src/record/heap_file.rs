use std::path::Path;
use std::sync::{Arc, Mutex};

use log::debug;

use super::error::{RecordError, RecordResult};
use super::page::DataPage;
use super::record::{Record, Rid};
use crate::file::{BufferManager, FileHandle, PageId, PagedFile, NO_PAGE, PAGE_SIZE};

/// Largest accepted record size: a data page must hold the page header, at
/// least one bitmap byte and some slack besides the record itself.
pub const MAX_RECORD_SIZE: usize = PAGE_SIZE - DataPage::<&[u8]>::HEADER_SIZE - 11;

/// Heap-file header, stored in the payload of page 0.
#[derive(Debug, Clone, Copy)]
pub struct RmFileHeader {
    pub record_size: i32,
    pub max_slots: i32,
    pub num_pages: i32,
    pub first_free_page: PageId,
}

impl RmFileHeader {
    pub const SIZE: usize = 16;

    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.record_size.to_le_bytes());
        buf[4..8].copy_from_slice(&self.max_slots.to_le_bytes());
        buf[8..12].copy_from_slice(&self.num_pages.to_le_bytes());
        buf[12..16].copy_from_slice(&self.first_free_page.to_le_bytes());
        buf
    }

    pub fn deserialize(data: &[u8]) -> Self {
        Self {
            record_size: i32::from_le_bytes(data[0..4].try_into().unwrap()),
            max_slots: i32::from_le_bytes(data[4..8].try_into().unwrap()),
            num_pages: i32::from_le_bytes(data[8..12].try_into().unwrap()),
            first_free_page: i32::from_le_bytes(data[12..16].try_into().unwrap()),
        }
    }
}

/// A heap file of fixed-length records over a paged file.
///
/// Page 0 carries the `RmFileHeader`; pages `1..num_pages` are bitmap-slotted
/// data pages. Pages with at least one free slot are chained through
/// `first_free_page`/`next_free_page`; a page leaves the chain when it
/// fills and rejoins when a delete reopens a slot. Empty pages are kept.
pub struct RecordFile {
    pf: PagedFile,
    header: RmFileHeader,
    header_changed: bool,
}

impl RecordFile {
    /// Create a heap file for records of exactly `record_size` bytes.
    pub fn create<P: AsRef<Path>>(
        bm: &mut BufferManager,
        path: P,
        record_size: usize,
    ) -> RecordResult<Self> {
        if record_size == 0 || record_size > MAX_RECORD_SIZE {
            return Err(RecordError::RecordSizeTooBig {
                size: record_size,
                max: MAX_RECORD_SIZE,
            });
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

        let header = RmFileHeader {
            record_size: record_size as i32,
            max_slots: DataPage::<&[u8]>::max_slots_for(record_size) as i32,
            num_pages: 1,
            first_free_page: NO_PAGE,
        };

        // Page 0 holds the header
        let result = (|| -> RecordResult<()> {
            let page = pf.allocate_page(bm)?;
            debug_assert_eq!(page, 0);
            pf.page_mut(bm, page)?[..RmFileHeader::SIZE].copy_from_slice(&header.serialize());
            pf.unpin(bm, page)?;
            Ok(())
        })();
        if let Err(e) = result {
            let _ = pf.close(bm);
            let _ = PagedFile::destroy(bm, path);
            return Err(e);
        }

        debug!(
            "created heap file {} (record_size={}, max_slots={})",
            path.display(),
            header.record_size,
            header.max_slots
        );
        Ok(Self {
            pf,
            header,
            header_changed: false,
        })
    }

    /// Open an existing heap file and cache its header.
    pub fn open<P: AsRef<Path>>(bm: &mut BufferManager, path: P) -> RecordResult<Self> {
        let pf = PagedFile::open(bm, path)?;
        pf.fetch(bm, 0)
            .map_err(|_| RecordError::BadPage("heap file has no header page".into()))?;
        let header = RmFileHeader::deserialize(pf.page(bm, 0)?);
        pf.unpin(bm, 0)?;

        if header.record_size <= 0 || header.max_slots <= 0 {
            return Err(RecordError::BadPage("corrupt heap file header".into()));
        }
        Ok(Self {
            pf,
            header,
            header_changed: false,
        })
    }

    /// Remove a heap file from disk.
    pub fn destroy<P: AsRef<Path>>(bm: &mut BufferManager, path: P) -> RecordResult<()> {
        PagedFile::destroy(bm, path)?;
        Ok(())
    }

    pub fn handle(&self) -> FileHandle {
        self.pf.handle()
    }

    pub fn record_size(&self) -> usize {
        self.header.record_size as usize
    }

    pub fn max_slots(&self) -> usize {
        self.header.max_slots as usize
    }

    pub fn num_pages(&self) -> i32 {
        self.header.num_pages
    }

    pub fn first_free_page(&self) -> PageId {
        self.header.first_free_page
    }

    /// Fetch a record by RID, copying its bytes out of the page.
    pub fn get_rec(&self, bm: &mut BufferManager, rid: Rid) -> RecordResult<Record> {
        self.check_rid(rid)?;

        self.pf.fetch(bm, rid.page)?;
        let result: RecordResult<Record> = (|| {
            let page = DataPage::new(
                self.pf.page(bm, rid.page)?,
                self.record_size(),
                self.max_slots(),
            );
            if !page.slot_used(rid.slot as usize) {
                return Err(RecordError::RecordNotFound(rid));
            }
            Ok(Record::new(rid, page.record(rid.slot as usize).to_vec()))
        })();
        self.pf.unpin(bm, rid.page)?;
        result
    }

    /// Insert a record, reusing the first page with a free slot or
    /// allocating a fresh data page at the head of the free chain.
    pub fn insert_rec(&mut self, bm: &mut BufferManager, data: &[u8]) -> RecordResult<Rid> {
        if data.len() != self.record_size() {
            return Err(RecordError::InvalidRecord(format!(
                "record is {} bytes, file stores {}",
                data.len(),
                self.record_size()
            )));
        }

        let page_id = if self.header.first_free_page != NO_PAGE {
            let page_id = self.header.first_free_page;
            self.pf.fetch(bm, page_id)?;
            page_id
        } else {
            let page_id = self.pf.allocate_page(bm)?;
            let payload = self.pf.page_mut(bm, page_id)?;
            DataPage::init(payload, self.record_size(), self.max_slots());
            self.header.first_free_page = page_id;
            self.header.num_pages = self.pf.num_pages();
            self.header_changed = true;
            page_id
        };

        let result: RecordResult<usize> = (|| {
            let mut page = DataPage::new(
                self.pf.page_mut(bm, page_id)?,
                self.record_size(),
                self.max_slots(),
            );
            let slot = page
                .find_free_slot()
                .ok_or_else(|| RecordError::BadPage(format!("free-chain page {} is full", page_id)))?;

            page.record_mut(slot).copy_from_slice(data);
            page.set_slot_used(slot);
            page.set_num_records(page.num_records() + 1);

            if page.is_full() {
                let next = page.next_free_page();
                page.set_next_free_page(NO_PAGE);
                self.header.first_free_page = next;
                self.header_changed = true;
            }
            Ok(slot)
        })();
        self.pf.unpin(bm, page_id)?;

        let slot = result?;
        Ok(Rid::new(page_id, slot as i32))
    }

    /// Delete the record at `rid`; the page rejoins the free chain when it
    /// was full. Pages are never returned to the paged-file layer.
    pub fn delete_rec(&mut self, bm: &mut BufferManager, rid: Rid) -> RecordResult<()> {
        self.check_rid(rid)?;

        self.pf.fetch(bm, rid.page)?;
        let result: RecordResult<()> = (|| {
            let mut page = DataPage::new(
                self.pf.page_mut(bm, rid.page)?,
                self.record_size(),
                self.max_slots(),
            );
            if !page.slot_used(rid.slot as usize) {
                return Err(RecordError::RecordNotFound(rid));
            }

            let was_full = page.is_full();
            page.set_slot_free(rid.slot as usize);
            page.set_num_records(page.num_records() - 1);

            if was_full {
                page.set_next_free_page(self.header.first_free_page);
                self.header.first_free_page = rid.page;
                self.header_changed = true;
            }
            Ok(())
        })();
        self.pf.unpin(bm, rid.page)?;
        result
    }

    /// Overwrite a live record in place.
    pub fn update_rec(&mut self, bm: &mut BufferManager, rec: &Record) -> RecordResult<()> {
        self.check_rid(rec.rid)?;
        if rec.data.len() != self.record_size() {
            return Err(RecordError::InvalidRecord(format!(
                "record is {} bytes, file stores {}",
                rec.data.len(),
                self.record_size()
            )));
        }

        self.pf.fetch(bm, rec.rid.page)?;
        let result: RecordResult<()> = (|| {
            let mut page = DataPage::new(
                self.pf.page_mut(bm, rec.rid.page)?,
                self.record_size(),
                self.max_slots(),
            );
            if !page.slot_used(rec.rid.slot as usize) {
                return Err(RecordError::RecordNotFound(rec.rid));
            }
            page.record_mut(rec.rid.slot as usize).copy_from_slice(&rec.data);
            Ok(())
        })();
        self.pf.unpin(bm, rec.rid.page)?;
        result
    }

    /// Write the cached header back and force all dirty pages to disk.
    pub fn force_pages(&mut self, bm: &mut BufferManager) -> RecordResult<()> {
        self.write_header_if_changed(bm)?;
        self.pf.force_pages(bm)?;
        Ok(())
    }

    /// Flush and close the underlying paged file.
    pub fn close(mut self, bm: &mut BufferManager) -> RecordResult<()> {
        self.write_header_if_changed(bm)?;
        self.pf.close(bm)?;
        Ok(())
    }

    /// Snapshot used by scans and executor-side readers.
    pub fn reader(&self, buffer: Arc<Mutex<BufferManager>>) -> RecordReader {
        RecordReader {
            buffer,
            handle: self.pf.handle(),
            record_size: self.record_size(),
            max_slots: self.max_slots(),
            num_pages: self.header.num_pages,
        }
    }

    fn write_header_if_changed(&mut self, bm: &mut BufferManager) -> RecordResult<()> {
        if self.header_changed {
            self.pf.fetch(bm, 0)?;
            self.pf.page_mut(bm, 0)?[..RmFileHeader::SIZE]
                .copy_from_slice(&self.header.serialize());
            self.pf.unpin(bm, 0)?;
            self.header_changed = false;
        }
        Ok(())
    }

    fn check_rid(&self, rid: Rid) -> RecordResult<()> {
        if rid.page < 1
            || rid.page >= self.header.num_pages
            || rid.slot < 0
            || rid.slot >= self.header.max_slots
        {
            return Err(RecordError::InvalidRid(rid));
        }
        Ok(())
    }
}

/// Read-only view of a heap file that owns its buffer-manager reference,
/// so executor operators can fetch records without borrowing the file.
pub struct RecordReader {
    buffer: Arc<Mutex<BufferManager>>,
    handle: FileHandle,
    record_size: usize,
    max_slots: usize,
    num_pages: i32,
}

impl RecordReader {
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    pub fn num_pages(&self) -> i32 {
        self.num_pages
    }

    pub fn handle(&self) -> FileHandle {
        self.handle
    }

    pub fn buffer(&self) -> Arc<Mutex<BufferManager>> {
        self.buffer.clone()
    }

    pub fn get(&self, rid: Rid) -> RecordResult<Record> {
        if rid.page < 1
            || rid.page >= self.num_pages
            || rid.slot < 0
            || rid.slot >= self.max_slots as i32
        {
            return Err(RecordError::InvalidRid(rid));
        }

        let mut bm = self.buffer.lock().unwrap();
        bm.pin_page(self.handle, rid.page).map_err(RecordError::from)?;
        let result: RecordResult<Record> = (|| {
            let payload = &bm.page(self.handle, rid.page)?[crate::file::PAGE_HEADER_SIZE..];
            let page = DataPage::new(payload, self.record_size, self.max_slots);
            if !page.slot_used(rid.slot as usize) {
                return Err(RecordError::RecordNotFound(rid));
            }
            Ok(Record::new(rid, page.record(rid.slot as usize).to_vec()))
        })();
        bm.unpin_page(self.handle, rid.page)?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::PagedFileManager;
    use tempfile::TempDir;

    fn setup_test_env() -> (TempDir, BufferManager) {
        let temp_dir = tempfile::tempdir().unwrap();
        let bm = BufferManager::new(PagedFileManager::new());
        (temp_dir, bm)
    }

    #[test]
    fn test_create_computes_geometry() {
        let (temp_dir, mut bm) = setup_test_env();
        let path = temp_dir.path().join("t.rm");

        let file = RecordFile::create(&mut bm, &path, 8).unwrap();
        assert_eq!(file.record_size(), 8);
        assert_eq!(file.max_slots(), DataPage::<&[u8]>::max_slots_for(8));
        assert_eq!(file.num_pages(), 1);
        assert_eq!(file.first_free_page(), NO_PAGE);
    }

    #[test]
    fn test_record_size_bounds() {
        let (temp_dir, mut bm) = setup_test_env();

        // Largest legal size succeeds
        let ok = RecordFile::create(&mut bm, temp_dir.path().join("max.rm"), MAX_RECORD_SIZE);
        assert!(ok.is_ok());

        let too_big = RecordFile::create(
            &mut bm,
            temp_dir.path().join("big.rm"),
            MAX_RECORD_SIZE + 1,
        );
        assert!(matches!(
            too_big,
            Err(RecordError::RecordSizeTooBig { .. })
        ));

        let zero = RecordFile::create(&mut bm, temp_dir.path().join("zero.rm"), 0);
        assert!(matches!(zero, Err(RecordError::RecordSizeTooBig { .. })));
    }

    #[test]
    fn test_insert_get_round_trip() {
        let (temp_dir, mut bm) = setup_test_env();
        let path = temp_dir.path().join("t.rm");
        let mut file = RecordFile::create(&mut bm, &path, 8).unwrap();

        let data = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let rid = file.insert_rec(&mut bm, &data).unwrap();
        assert_eq!(rid.page, 1);
        assert_eq!(rid.slot, 0);

        let rec = file.get_rec(&mut bm, rid).unwrap();
        assert_eq!(rec.data, data);
        assert_eq!(rec.rid, rid);
    }

    #[test]
    fn test_update_round_trip() {
        let (temp_dir, mut bm) = setup_test_env();
        let path = temp_dir.path().join("t.rm");
        let mut file = RecordFile::create(&mut bm, &path, 4).unwrap();

        let rid = file.insert_rec(&mut bm, &[1, 2, 3, 4]).unwrap();
        let updated = Record::new(rid, vec![9, 8, 7, 6]);
        file.update_rec(&mut bm, &updated).unwrap();

        let rec = file.get_rec(&mut bm, rid).unwrap();
        assert_eq!(rec.data, vec![9, 8, 7, 6]);
    }

    #[test]
    fn test_delete_then_get_fails() {
        let (temp_dir, mut bm) = setup_test_env();
        let path = temp_dir.path().join("t.rm");
        let mut file = RecordFile::create(&mut bm, &path, 4).unwrap();

        let rid = file.insert_rec(&mut bm, &[1, 2, 3, 4]).unwrap();
        file.delete_rec(&mut bm, rid).unwrap();

        let result = file.get_rec(&mut bm, rid);
        assert!(matches!(result, Err(RecordError::RecordNotFound(_))));

        let result = file.delete_rec(&mut bm, rid);
        assert!(matches!(result, Err(RecordError::RecordNotFound(_))));
    }

    #[test]
    fn test_invalid_rid_rejected() {
        let (temp_dir, mut bm) = setup_test_env();
        let path = temp_dir.path().join("t.rm");
        let mut file = RecordFile::create(&mut bm, &path, 4).unwrap();
        file.insert_rec(&mut bm, &[0; 4]).unwrap();

        for rid in [Rid::new(0, 0), Rid::new(2, 0), Rid::new(1, -1), Rid::new(1, 1 << 20)] {
            assert!(matches!(
                file.get_rec(&mut bm, rid),
                Err(RecordError::InvalidRid(_))
            ));
        }
    }

    #[test]
    fn test_deleted_slot_reused() {
        let (temp_dir, mut bm) = setup_test_env();
        let path = temp_dir.path().join("t.rm");
        let mut file = RecordFile::create(&mut bm, &path, 4).unwrap();

        let r0 = file.insert_rec(&mut bm, &[0; 4]).unwrap();
        let _r1 = file.insert_rec(&mut bm, &[1; 4]).unwrap();
        file.delete_rec(&mut bm, r0).unwrap();

        // Lowest free slot first
        let r2 = file.insert_rec(&mut bm, &[2; 4]).unwrap();
        assert_eq!(r2, r0);
    }

    #[test]
    fn test_page_fills_and_chains() {
        let (temp_dir, mut bm) = setup_test_env();
        let path = temp_dir.path().join("t.rm");

        // Big records keep the per-page slot count small
        let record_size = 1000;
        let mut file = RecordFile::create(&mut bm, &path, record_size).unwrap();
        let per_page = file.max_slots();

        let mut rids = Vec::new();
        for i in 0..(per_page * 2 + 1) {
            let data = vec![i as u8; record_size];
            rids.push(file.insert_rec(&mut bm, &data).unwrap());
        }

        assert_eq!(file.num_pages(), 4); // header + 3 data pages
        assert_eq!(rids[0].page, 1);
        assert_eq!(rids[per_page].page, 2);
        assert_eq!(rids[2 * per_page].page, 3);

        // Page 1 is full and off the chain; deleting from it puts it back
        assert_eq!(file.first_free_page(), 3);
        file.delete_rec(&mut bm, rids[0]).unwrap();
        assert_eq!(file.first_free_page(), 1);

        let rid = file.insert_rec(&mut bm, &vec![0xEE; record_size]).unwrap();
        assert_eq!(rid, rids[0]);
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("t.rm");
        let mut bm = BufferManager::new(PagedFileManager::new());

        let rid;
        {
            let mut file = RecordFile::create(&mut bm, &path, 8).unwrap();
            rid = file.insert_rec(&mut bm, &[5; 8]).unwrap();
            file.force_pages(&mut bm).unwrap();
            file.close(&mut bm).unwrap();
        }

        let file = RecordFile::open(&mut bm, &path).unwrap();
        assert_eq!(file.record_size(), 8);
        assert_eq!(file.num_pages(), 2);
        let rec = file.get_rec(&mut bm, rid).unwrap();
        assert_eq!(rec.data, vec![5; 8]);
    }

    #[test]
    fn test_all_pins_released_after_operations() {
        let (temp_dir, mut bm) = setup_test_env();
        let path = temp_dir.path().join("t.rm");
        let mut file = RecordFile::create(&mut bm, &path, 1000).unwrap();

        let mut rids = Vec::new();
        for i in 0..20u8 {
            rids.push(file.insert_rec(&mut bm, &[i; 1000]).unwrap());
        }
        file.get_rec(&mut bm, rids[3]).unwrap();
        file.update_rec(&mut bm, &Record::new(rids[5], vec![0xCC; 1000])).unwrap();
        file.delete_rec(&mut bm, rids[7]).unwrap();
        let _ = file.get_rec(&mut bm, rids[7]);
        file.force_pages(&mut bm).unwrap();

        for page in 0..file.num_pages() {
            assert_eq!(bm.pin_count(file.handle(), page), 0, "page {}", page);
        }
    }

    #[test]
    fn test_bitmap_matches_record_count() {
        let (temp_dir, mut bm) = setup_test_env();
        let path = temp_dir.path().join("t.rm");
        let mut file = RecordFile::create(&mut bm, &path, 16).unwrap();

        let mut rids = Vec::new();
        for i in 0..50u8 {
            rids.push(file.insert_rec(&mut bm, &[i; 16]).unwrap());
        }
        for rid in rids.iter().step_by(3) {
            file.delete_rec(&mut bm, *rid).unwrap();
        }

        file.pf.fetch(&mut bm, 1).unwrap();
        let page = DataPage::new(
            file.pf.page(&mut bm, 1).unwrap(),
            file.record_size(),
            file.max_slots(),
        );
        assert_eq!(page.num_records() as usize, page.popcount());
        file.pf.unpin(&mut bm, 1).unwrap();
    }
}
