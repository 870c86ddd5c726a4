use thiserror::Error;

use crate::file::FileError;
use crate::index::IndexError;
use crate::record::RecordError;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database {0} already exists")]
    DatabaseExists(String),

    #[error("Database {0} not found")]
    DatabaseNotFound(String),

    #[error("No database open")]
    NoDatabaseOpen,

    #[error("Relation {0} already exists")]
    RelationExists(String),

    #[error("Relation {0} not found")]
    RelationNotFound(String),

    #[error("Attribute {1} not found in relation {0}")]
    AttrNotFound(String, String),

    #[error("Duplicate attribute name {0}")]
    DuplicateAttr(String),

    #[error("Attribute {0} is already indexed")]
    IndexExists(String),

    #[error("Attribute {0} is not indexed")]
    IndexNotFound(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid attribute length {length} for type {attr_type}")]
    BadAttrLength { attr_type: String, length: usize },

    #[error("Too many attributes: {0} (limit {1})")]
    TooManyAttrs(usize, usize),

    #[error("Cannot modify system catalog {0}")]
    SystemCatalog(String),

    #[error("Cannot parse {value:?} as {attr_type}")]
    BadValue { value: String, attr_type: String },
}

pub type CatalogResult<T> = Result<T, CatalogError>;
