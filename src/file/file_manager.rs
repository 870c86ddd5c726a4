use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;

use super::error::{FileError, FileResult};
use super::paged_file::FileHeader;
use super::quota::DiskQuota;
use super::{PageId, FILE_HEADER_SIZE, MAX_OPEN_FILES, PAGE_STRIDE};

/// Handle to an open paged file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(usize);

impl FileHandle {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

struct FileEntry {
    file: File,
    path: PathBuf,
}

/// Owns the process's file descriptors and performs raw page I/O.
///
/// Every page transfer goes through here at a uniform stride: the file
/// header occupies the first 8 bytes, page `p` starts at `8 + p * 4096`.
/// The disk quota is enforced at this layer for file creation and charged
/// by `PagedFile` for page allocation.
pub struct PagedFileManager {
    open_files: HashMap<FileHandle, FileEntry>,
    path_to_handle: HashMap<PathBuf, FileHandle>,
    next_handle: usize,
    max_open_files: usize,
    quota: DiskQuota,
}

impl PagedFileManager {
    pub fn new() -> Self {
        Self::with_max_files(MAX_OPEN_FILES)
    }

    pub fn with_max_files(max_open_files: usize) -> Self {
        Self {
            open_files: HashMap::new(),
            path_to_handle: HashMap::new(),
            next_handle: 0,
            max_open_files,
            quota: DiskQuota::new(),
        }
    }

    pub fn quota(&self) -> &DiskQuota {
        &self.quota
    }

    pub fn quota_mut(&mut self) -> &mut DiskQuota {
        &mut self.quota
    }

    /// Create a new paged file with an empty header.
    ///
    /// The header page counts against the disk quota; creation fails with
    /// `NoMemory` before touching the filesystem when the budget is spent.
    pub fn create_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();

        if path.as_os_str().is_empty() {
            return Err(FileError::InvalidName(path.display().to_string()));
        }
        if path.exists() {
            return Err(FileError::FileAlreadyExists(path.display().to_string()));
        }
        if !self.quota.can_charge(1) {
            return Err(FileError::NoMemory {
                used: self.quota.used_pages(),
                limit: self.quota.limit_pages(),
            });
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = File::create(path)?;
        let header = FileHeader::new();
        let written = file.write(&header.serialize())?;
        if written != FILE_HEADER_SIZE {
            drop(file);
            let _ = std::fs::remove_file(path);
            return Err(FileError::HeaderWrite);
        }

        self.quota.charge(1)?;
        debug!("created paged file {}", path.display());
        Ok(())
    }

    /// Remove a paged file, returning its pages to the disk quota.
    pub fn destroy_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<()> {
        let path = path.as_ref();

        // Page count is read before the unlink so the quota can be credited
        let pages_to_release = match self.read_header_at(path) {
            Ok(header) => header.num_pages.max(0) as usize + 1,
            Err(_) => 0,
        };

        if let Ok(canonical) = path.canonicalize() {
            if let Some(&handle) = self.path_to_handle.get(&canonical) {
                self.close_file(handle)?;
            }
        }

        std::fs::remove_file(path)
            .map_err(|_| FileError::FileNotFound(path.display().to_string()))?;

        if pages_to_release > 0 {
            self.quota.release(pages_to_release)?;
        }
        debug!("destroyed paged file {}", path.display());
        Ok(())
    }

    /// Open an existing file; opening the same path twice yields the same handle.
    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> FileResult<FileHandle> {
        let path_ref = path.as_ref();
        let path = path_ref
            .canonicalize()
            .map_err(|_| FileError::FileNotFound(path_ref.display().to_string()))?;

        if let Some(&handle) = self.path_to_handle.get(&path) {
            return Ok(handle);
        }

        if self.open_files.len() >= self.max_open_files {
            return Err(FileError::TooManyOpenFiles);
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let handle = FileHandle(self.next_handle);
        self.next_handle += 1;

        self.open_files.insert(
            handle,
            FileEntry {
                file,
                path: path.clone(),
            },
        );
        self.path_to_handle.insert(path, handle);

        Ok(handle)
    }

    pub fn close_file(&mut self, handle: FileHandle) -> FileResult<()> {
        let entry = self
            .open_files
            .remove(&handle)
            .ok_or(FileError::InvalidHandle(handle.0))?;

        self.path_to_handle.remove(&entry.path);
        Ok(())
    }

    /// Read the file header of an open file.
    pub fn read_file_header(&mut self, handle: FileHandle) -> FileResult<FileHeader> {
        let entry = self.entry_mut(handle)?;
        entry.file.seek(SeekFrom::Start(0))?;

        let mut buf = [0u8; FILE_HEADER_SIZE];
        let read = entry.file.read(&mut buf)?;
        if read != FILE_HEADER_SIZE {
            return Err(FileError::HeaderRead);
        }
        Ok(FileHeader::deserialize(&buf))
    }

    /// Write the file header of an open file.
    pub fn write_file_header(&mut self, handle: FileHandle, header: &FileHeader) -> FileResult<()> {
        let entry = self.entry_mut(handle)?;
        entry.file.seek(SeekFrom::Start(0))?;

        let written = entry.file.write(&header.serialize())?;
        if written != FILE_HEADER_SIZE {
            return Err(FileError::HeaderWrite);
        }
        Ok(())
    }

    /// Read a full page (header + payload) into `buffer`.
    ///
    /// A short read at the tail of the file zero-fills the remainder and
    /// reports the number of bytes actually read, so callers can recognize
    /// a fresh page.
    pub fn read_page(
        &mut self,
        handle: FileHandle,
        page_id: PageId,
        buffer: &mut [u8],
    ) -> FileResult<usize> {
        debug_assert_eq!(buffer.len(), PAGE_STRIDE);
        if page_id < 0 {
            return Err(FileError::InvalidPage(page_id));
        }

        let entry = self.entry_mut(handle)?;
        let offset = (FILE_HEADER_SIZE + page_id as usize * PAGE_STRIDE) as u64;
        entry.file.seek(SeekFrom::Start(offset))?;

        let mut total = 0;
        while total < buffer.len() {
            let n = entry.file.read(&mut buffer[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        if total < buffer.len() {
            buffer[total..].fill(0);
        }
        Ok(total)
    }

    /// Write a full page (header + payload) from `buffer`.
    pub fn write_page(
        &mut self,
        handle: FileHandle,
        page_id: PageId,
        buffer: &[u8],
    ) -> FileResult<()> {
        debug_assert_eq!(buffer.len(), PAGE_STRIDE);
        if page_id < 0 {
            return Err(FileError::InvalidPage(page_id));
        }

        let entry = self.entry_mut(handle)?;
        let offset = (FILE_HEADER_SIZE + page_id as usize * PAGE_STRIDE) as u64;

        let required = offset + PAGE_STRIDE as u64;
        let current = entry.file.metadata()?.len();
        if current < required {
            entry.file.set_len(required)?;
        }

        entry.file.seek(SeekFrom::Start(offset))?;
        entry
            .file
            .write_all(buffer)
            .map_err(|_| FileError::IncompleteWrite {
                expected: PAGE_STRIDE,
                actual: 0,
            })?;
        Ok(())
    }

    pub fn sync_file(&mut self, handle: FileHandle) -> FileResult<()> {
        let entry = self.entry_mut(handle)?;
        entry.file.sync_data()?;
        Ok(())
    }

    pub fn sync_all(&mut self) -> FileResult<()> {
        for entry in self.open_files.values_mut() {
            entry.file.sync_data()?;
        }
        Ok(())
    }

    pub fn is_file_open(&self, handle: FileHandle) -> bool {
        self.open_files.contains_key(&handle)
    }

    pub fn open_file_count(&self) -> usize {
        self.open_files.len()
    }

    fn entry_mut(&mut self, handle: FileHandle) -> FileResult<&mut FileEntry> {
        self.open_files
            .get_mut(&handle)
            .ok_or(FileError::InvalidHandle(handle.0))
    }

    /// Read the header of a possibly unopened file straight from disk.
    fn read_header_at(&self, path: &Path) -> FileResult<FileHeader> {
        let mut file = File::open(path)?;
        let mut buf = [0u8; FILE_HEADER_SIZE];
        let read = file.read(&mut buf)?;
        if read != FILE_HEADER_SIZE {
            return Err(FileError::HeaderRead);
        }
        Ok(FileHeader::deserialize(&buf))
    }
}

impl Default for PagedFileManager {
    fn default() -> Self {
        Self::new()
    }
}
