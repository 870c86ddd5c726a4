use thiserror::Error;

use super::Rid;
use crate::file::FileError;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Record file not open: {0}")]
    FileNotOpen(String),

    #[error("Record not found at {0}")]
    RecordNotFound(Rid),

    #[error("Invalid record identifier {0}")]
    InvalidRid(Rid),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Record size {size} too big for a page (max {max})")]
    RecordSizeTooBig { size: usize, max: usize },

    #[error("Malformed record page: {0}")]
    BadPage(String),
}

pub type RecordResult<T> = Result<T, RecordError>;
