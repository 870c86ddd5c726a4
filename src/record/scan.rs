use std::sync::{Arc, Mutex};

use super::error::{RecordError, RecordResult};
use super::heap_file::RecordFile;
use super::page::DataPage;
use super::record::{Record, Rid};
use super::value::{eval_comp, AttrType, CompOp};
use crate::file::{BufferManager, FileHandle, PageId, PAGE_HEADER_SIZE};

/// Pushed-down scan predicate over one fixed-width attribute.
#[derive(Debug, Clone)]
pub struct Predicate {
    pub attr_type: AttrType,
    pub attr_length: usize,
    pub attr_offset: usize,
    pub op: CompOp,
    /// Encoded comparison value; `None` (like `CompOp::No`) matches everything
    pub value: Option<Vec<u8>>,
}

impl Predicate {
    /// Predicate that matches every live record.
    pub fn all() -> Self {
        Self {
            attr_type: AttrType::Int,
            attr_length: 4,
            attr_offset: 0,
            op: CompOp::No,
            value: None,
        }
    }

    fn matches(&self, record: &[u8]) -> bool {
        let value = match (&self.value, self.op) {
            (_, CompOp::No) | (None, _) => return true,
            (Some(v), _) => v,
        };
        let field = &record[self.attr_offset..self.attr_offset + self.attr_length];
        eval_comp(field, value, self.attr_type, self.attr_length, self.op)
    }
}

/// Forward-only scan over the live records of a heap file.
///
/// The scan owns its cursor and a handle on the shared buffer manager; each
/// `next` call pins at most one page and unpins it before returning, so any
/// number of scans can run against the same file. Records inserted or
/// deleted mid-scan may or may not be observed.
pub struct FileScan {
    buffer: Arc<Mutex<BufferManager>>,
    handle: FileHandle,
    record_size: usize,
    max_slots: usize,
    num_pages: i32,
    predicate: Predicate,
    current_page: PageId,
    current_slot: usize,
    done: bool,
}

impl FileScan {
    /// Open a scan over `file` with the given predicate.
    pub fn open(
        file: &RecordFile,
        buffer: Arc<Mutex<BufferManager>>,
        predicate: Predicate,
    ) -> RecordResult<Self> {
        if predicate.op != CompOp::No && predicate.value.is_some() {
            if predicate.attr_length == 0
                || predicate.attr_offset + predicate.attr_length > file.record_size()
            {
                return Err(RecordError::InvalidRecord(format!(
                    "predicate slice {}..{} outside record of {} bytes",
                    predicate.attr_offset,
                    predicate.attr_offset + predicate.attr_length,
                    file.record_size()
                )));
            }
        }

        Ok(Self {
            buffer,
            handle: file.handle(),
            record_size: file.record_size(),
            max_slots: file.max_slots(),
            num_pages: file.num_pages(),
            predicate,
            current_page: 1,
            current_slot: 0,
            done: false,
        })
    }

    /// Open a scan from a `RecordReader` snapshot; lets executor operators
    /// restart scans without holding the heap file itself.
    pub fn over_reader(
        reader: &super::heap_file::RecordReader,
        predicate: Predicate,
    ) -> RecordResult<Self> {
        if predicate.op != CompOp::No && predicate.value.is_some() {
            if predicate.attr_length == 0
                || predicate.attr_offset + predicate.attr_length > reader.record_size()
            {
                return Err(RecordError::InvalidRecord(format!(
                    "predicate slice {}..{} outside record of {} bytes",
                    predicate.attr_offset,
                    predicate.attr_offset + predicate.attr_length,
                    reader.record_size()
                )));
            }
        }

        Ok(Self {
            buffer: reader.buffer(),
            handle: reader.handle(),
            record_size: reader.record_size(),
            max_slots: reader.max_slots(),
            num_pages: reader.num_pages(),
            predicate,
            current_page: 1,
            current_slot: 0,
            done: false,
        })
    }

    /// Advance to the next matching record.
    fn get_next(&mut self) -> RecordResult<Option<Record>> {
        if self.done {
            return Ok(None);
        }

        while self.current_page < self.num_pages {
            let mut bm = self.buffer.lock().unwrap();
            bm.pin_page(self.handle, self.current_page)?;

            let found = (|| -> RecordResult<Option<Record>> {
                let payload = &bm.page(self.handle, self.current_page)?[PAGE_HEADER_SIZE..];
                let page = DataPage::new(payload, self.record_size, self.max_slots);

                while self.current_slot < self.max_slots {
                    let slot = self.current_slot;
                    self.current_slot += 1;

                    if page.slot_used(slot) && self.predicate.matches(page.record(slot)) {
                        let rid = Rid::new(self.current_page, slot as i32);
                        return Ok(Some(Record::new(rid, page.record(slot).to_vec())));
                    }
                }
                Ok(None)
            })();
            bm.unpin_page(self.handle, self.current_page)?;

            match found? {
                Some(rec) => return Ok(Some(rec)),
                None => {
                    self.current_page += 1;
                    self.current_slot = 0;
                }
            }
        }

        self.done = true;
        Ok(None)
    }
}

impl Iterator for FileScan {
    type Item = RecordResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.get_next() {
            Ok(Some(rec)) => Some(Ok(rec)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
