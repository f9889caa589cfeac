//! Error types and result types for data-access operations.
//!
//! Every fallible operation in this crate returns [`DataAccessResult<T>`].
//! Lenient cases (unresolvable field paths, identifiers that cannot become an
//! `ObjectId`, projections against a missing collection) are not errors and
//! never surface here.

use bson::error::Error as BsonError;
use thiserror::Error;

/// Represents all possible errors raised by the data-access layer.
#[derive(Error, Debug)]
pub enum DataAccessError {
    /// Converting between a typed entity and a BSON document failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// The backend could not be built or connected.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A query document could not be interpreted, e.g. an operator document
    /// with more than one key where a single keyword was expected.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// A stored or supplied document has an unexpected shape.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// A document with the given id already exists in the collection.
    /// The first argument is the document id, the second the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// The backend does not provide the requested primitive.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
    /// The underlying store reported a failure.
    #[error("Backend error: {0}")]
    Backend(String),
}

/// A specialized `Result` type for data-access operations.
pub type DataAccessResult<T> = Result<T, DataAccessError>;

impl From<BsonError> for DataAccessError {
    fn from(err: BsonError) -> Self {
        DataAccessError::Serialization(err.to_string())
    }
}
