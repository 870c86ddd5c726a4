use std::path::Path;

use log::debug;

use super::buffer_manager::BufferManager;
use super::error::{FileError, FileResult};
use super::file_manager::FileHandle;
use super::{PageId, NO_PAGE, PAGE_HEADER_SIZE};

/// Paged-file header stored in the first 8 bytes of the file
#[derive(Debug, Clone, Copy)]
pub struct FileHeader {
    /// Head of the disposed-page chain (`NO_PAGE` when empty)
    pub first_free: PageId,
    /// Number of pages in the file
    pub num_pages: i32,
}

impl FileHeader {
    pub fn new() -> Self {
        Self {
            first_free: NO_PAGE,
            num_pages: 0,
        }
    }

    pub fn serialize(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&self.first_free.to_le_bytes());
        buf[4..8].copy_from_slice(&self.num_pages.to_le_bytes());
        buf
    }

    pub fn deserialize(data: &[u8]) -> Self {
        Self {
            first_free: i32::from_le_bytes(data[0..4].try_into().unwrap()),
            num_pages: i32::from_le_bytes(data[4..8].try_into().unwrap()),
        }
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// An open paged file: the cached file header plus the page operations.
///
/// All methods take the buffer manager explicitly; the handle owns no
/// buffer state of its own beyond the header copy, which is written back
/// by `force_pages` and `close`.
///
/// Pin contract: `fetch`, `allocate_page` and the navigation methods
/// return with the target page pinned; the caller must `unpin` exactly
/// once on every path, after any mutation has been flagged via `page_mut`
/// or `mark_dirty`.
pub struct PagedFile {
    handle: FileHandle,
    header: FileHeader,
    header_changed: bool,
}

impl PagedFile {
    /// Create a new paged file on disk (it is not opened).
    pub fn create<P: AsRef<Path>>(bm: &mut BufferManager, path: P) -> FileResult<()> {
        bm.file_manager_mut().create_file(path)
    }

    /// Open an existing paged file and cache its header.
    pub fn open<P: AsRef<Path>>(bm: &mut BufferManager, path: P) -> FileResult<Self> {
        let handle = bm.file_manager_mut().open_file(path)?;
        let header = bm.file_manager_mut().read_file_header(handle)?;
        Ok(Self {
            handle,
            header,
            header_changed: false,
        })
    }

    /// Remove a paged file from disk, crediting the quota.
    pub fn destroy<P: AsRef<Path>>(bm: &mut BufferManager, path: P) -> FileResult<()> {
        bm.file_manager_mut().destroy_file(path)
    }

    pub fn handle(&self) -> FileHandle {
        self.handle
    }

    pub fn num_pages(&self) -> i32 {
        self.header.num_pages
    }

    /// Pin a page of this file. Fails with `InvalidPage` outside
    /// `0..num_pages`.
    pub fn fetch(&self, bm: &mut BufferManager, page: PageId) -> FileResult<()> {
        if page < 0 || page >= self.header.num_pages {
            return Err(FileError::InvalidPage(page));
        }
        bm.pin_page(self.handle, page)
    }

    /// Payload bytes of a resident page.
    pub fn page<'a>(&self, bm: &'a mut BufferManager, page: PageId) -> FileResult<&'a [u8]> {
        Ok(&bm.page(self.handle, page)?[PAGE_HEADER_SIZE..])
    }

    /// Mutable payload bytes of a resident page; marks it dirty.
    pub fn page_mut<'a>(
        &self,
        bm: &'a mut BufferManager,
        page: PageId,
    ) -> FileResult<&'a mut [u8]> {
        Ok(&mut bm.page_mut(self.handle, page)?[PAGE_HEADER_SIZE..])
    }

    pub fn mark_dirty(&self, bm: &mut BufferManager, page: PageId) -> FileResult<()> {
        bm.mark_dirty(self.handle, page)
    }

    pub fn unpin(&self, bm: &mut BufferManager, page: PageId) -> FileResult<()> {
        bm.unpin_page(self.handle, page)
    }

    /// Allocate a page, preferring the free list over extending the file.
    ///
    /// The page comes back pinned, zeroed and dirty, with its free-list
    /// link cleared. One quota page is charged up front; the charge is
    /// returned on any subsequent failure.
    pub fn allocate_page(&mut self, bm: &mut BufferManager) -> FileResult<PageId> {
        bm.file_manager_mut().quota_mut().charge(1)?;

        let result = self.allocate_page_inner(bm);
        if result.is_err() {
            let _ = bm.file_manager_mut().quota_mut().release(1);
        }
        result
    }

    fn allocate_page_inner(&mut self, bm: &mut BufferManager) -> FileResult<PageId> {
        let page = if self.header.first_free != NO_PAGE {
            let page = self.header.first_free;
            self.fetch(bm, page)?;
            let raw = match bm.page_mut(self.handle, page) {
                Ok(raw) => raw,
                Err(e) => {
                    let _ = bm.unpin_page(self.handle, page);
                    return Err(e);
                }
            };
            self.header.first_free = i32::from_le_bytes(raw[0..4].try_into().unwrap());
            raw.fill(0);
            raw[0..4].copy_from_slice(&NO_PAGE.to_le_bytes());
            page
        } else {
            let page = self.header.num_pages;
            self.header.num_pages += 1;
            if let Err(e) = bm.pin_page(self.handle, page) {
                self.header.num_pages -= 1;
                return Err(e);
            }
            let raw = match bm.page_mut(self.handle, page) {
                Ok(raw) => raw,
                Err(e) => {
                    let _ = bm.unpin_page(self.handle, page);
                    self.header.num_pages -= 1;
                    return Err(e);
                }
            };
            raw.fill(0);
            raw[0..4].copy_from_slice(&NO_PAGE.to_le_bytes());
            page
        };

        self.header_changed = true;
        Ok(page)
    }

    /// Thread a page onto the free list and release its quota charge.
    ///
    /// The file never shrinks; disposed pages are recycled by later
    /// allocations.
    pub fn dispose_page(&mut self, bm: &mut BufferManager, page: PageId) -> FileResult<()> {
        if page < 0 || page >= self.header.num_pages {
            return Err(FileError::InvalidPage(page));
        }

        self.fetch(bm, page)?;
        let raw = match bm.page_mut(self.handle, page) {
            Ok(raw) => raw,
            Err(e) => {
                let _ = bm.unpin_page(self.handle, page);
                return Err(e);
            }
        };
        raw[0..4].copy_from_slice(&self.header.first_free.to_le_bytes());
        self.header.first_free = page;
        self.header_changed = true;
        bm.unpin_page(self.handle, page)?;

        bm.file_manager_mut().quota_mut().release(1)?;
        debug!(
            "disposed page {} of file {}",
            page,
            self.handle.as_usize()
        );
        Ok(())
    }

    /// First page of the file, pinned; `None` when the file is empty.
    pub fn first_page(&self, bm: &mut BufferManager) -> FileResult<Option<PageId>> {
        if self.header.num_pages == 0 {
            return Ok(None);
        }
        self.fetch(bm, 0)?;
        Ok(Some(0))
    }

    /// Last page of the file, pinned; `None` when the file is empty.
    pub fn last_page(&self, bm: &mut BufferManager) -> FileResult<Option<PageId>> {
        if self.header.num_pages == 0 {
            return Ok(None);
        }
        let page = self.header.num_pages - 1;
        self.fetch(bm, page)?;
        Ok(Some(page))
    }

    /// Page after `current`, pinned; `None` at the end of the file.
    pub fn next_page(&self, bm: &mut BufferManager, current: PageId) -> FileResult<Option<PageId>> {
        if current < 0 || current >= self.header.num_pages {
            return Err(FileError::InvalidPage(current));
        }
        if current + 1 >= self.header.num_pages {
            return Ok(None);
        }
        self.fetch(bm, current + 1)?;
        Ok(Some(current + 1))
    }

    /// Page before `current`, pinned; `None` at the start of the file.
    pub fn prev_page(&self, bm: &mut BufferManager, current: PageId) -> FileResult<Option<PageId>> {
        if current < 0 || current >= self.header.num_pages {
            return Err(FileError::InvalidPage(current));
        }
        if current == 0 {
            return Ok(None);
        }
        self.fetch(bm, current - 1)?;
        Ok(Some(current - 1))
    }

    /// Force one dirty page of this file to disk.
    pub fn force_page(&mut self, bm: &mut BufferManager, page: PageId) -> FileResult<()> {
        if page < 0 || page >= self.header.num_pages {
            return Err(FileError::InvalidPage(page));
        }
        self.write_header_if_changed(bm)?;
        bm.force_page(self.handle, page)
    }

    /// Write the header (if changed) and every dirty page of this file.
    pub fn force_pages(&mut self, bm: &mut BufferManager) -> FileResult<()> {
        self.write_header_if_changed(bm)?;
        bm.force_file_pages(self.handle)
    }

    /// Flush everything, drop the file's frames and close the descriptor.
    pub fn close(mut self, bm: &mut BufferManager) -> FileResult<()> {
        self.force_pages(bm)?;
        bm.clear_file_pages(self.handle)?;
        bm.file_manager_mut().close_file(self.handle)
    }

    fn write_header_if_changed(&mut self, bm: &mut BufferManager) -> FileResult<()> {
        if self.header_changed {
            bm.file_manager_mut()
                .write_file_header(self.handle, &self.header)?;
            self.header_changed = false;
        }
        Ok(())
    }
}
