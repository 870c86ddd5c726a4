use thiserror::Error;

use crate::file::FileError;
use crate::record::Rid;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Index not open: {0}")]
    IndexNotOpen(String),

    #[error("Entry not found: rid {0}")]
    EntryNotFound(Rid),

    #[error("Invalid index attribute: {0}")]
    InvalidAttr(String),

    #[error("Key is {actual} bytes, index stores {expected}")]
    KeySize { expected: usize, actual: usize },

    #[error("Corrupt B+tree: {0}")]
    InvalidTree(String),
}

pub type IndexResult<T> = Result<T, IndexError>;
