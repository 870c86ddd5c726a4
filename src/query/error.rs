use thiserror::Error;

use crate::catalog::CatalogError;
use crate::index::IndexError;
use crate::record::{RecordError, Rid};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Record error: {0}")]
    Record(#[from] RecordError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Unknown relation: {0}")]
    UnknownRelation(String),

    #[error("Relation {0} named more than once")]
    DuplicateRelation(String),

    #[error("Unknown attribute: {0}")]
    UnknownAttr(String),

    #[error("Ambiguous attribute {0}: qualify it with a relation name")]
    AmbiguousAttr(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Expected {expected} values, got {actual}")]
    InvalidValueCount { expected: usize, actual: usize },

    #[error("Cannot modify system catalog {0}")]
    SystemCatalog(String),

    #[error("Index update failed after inserting record at {rid}: {source}")]
    PartialInsert {
        rid: Rid,
        #[source]
        source: IndexError,
    },
}

pub type QueryResult<T> = Result<T, QueryError>;
