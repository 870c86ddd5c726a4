use std::io;
use thiserror::Error;

use super::PageId;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("Invalid file name: {0}")]
    InvalidName(String),

    #[error("Invalid file handle: {0}")]
    InvalidHandle(usize),

    #[error("File handle limit reached")]
    TooManyOpenFiles,

    #[error("Invalid page number: {0}")]
    InvalidPage(PageId),

    #[error("Page not in buffer: page_id={0}")]
    PageNotInBuf(PageId),

    #[error("Page already unpinned: page_id={0}")]
    PageUnpinned(PageId),

    #[error("Page still pinned: page_id={0}")]
    PagePinned(PageId),

    #[error("No unpinned frame available in buffer pool")]
    NoBuffer,

    #[error("Disk quota exhausted: {used}/{limit} pages in use")]
    NoMemory { used: usize, limit: usize },

    #[error("Incomplete page read: expected {expected} bytes, got {actual}")]
    IncompleteRead { expected: usize, actual: usize },

    #[error("Incomplete page write: expected {expected} bytes, got {actual}")]
    IncompleteWrite { expected: usize, actual: usize },

    #[error("Failed to read file header")]
    HeaderRead,

    #[error("Failed to write file header")]
    HeaderWrite,
}

pub type FileResult<T> = Result<T, FileError>;
