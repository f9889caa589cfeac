//! Storage backend abstraction.
//!
//! A [`StoreBackend`] executes already-mapped native documents against one
//! handle of the document store. Everything above this trait speaks logical
//! field names; everything below it speaks physical ones.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Examples
//!
//! ```ignore
//! use docmapper::backend::{NativeQuery, StoreBackend};
//! use bson::doc;
//!
//! let backend = MyBackendImpl::new();
//!
//! backend.insert("users", vec![doc! { "_id": 1, "name": "Alice" }]).await?;
//! let found = backend
//!     .find("users", NativeQuery::new(doc! { "name": "Alice" }).with_limit(1))
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::Document;
use std::fmt::Debug;

use crate::{
    error::DataAccessResult,
    group::GroupBy,
    update::{UpdateMode, WriteOutcome},
};

/// A fully mapped query as the store receives it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeQuery {
    /// The native criteria document.
    pub filter: Document,
    /// The native sort document, in directive order.
    pub sort: Option<Document>,
    /// Number of matching documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of documents to return.
    pub limit: Option<i64>,
    /// Fields to include (`1`) or exclude (`0`).
    pub projection: Option<Document>,
}

impl NativeQuery {
    pub fn new(filter: Document) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn with_sort(mut self, sort: Option<Document>) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_projection(mut self, projection: Document) -> Self {
        self.projection = Some(projection);
        self
    }
}

/// Abstract interface for document store handles.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from
/// multiple async tasks. A repository holds two handles of the same backend
/// type, one per read preference.
///
/// # Error Handling
///
/// Store failures surface as
/// [`DataAccessError::Backend`](crate::error::DataAccessError::Backend) and
/// are never retried at this level.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Returns the documents matching `query`, sorted, skipped, limited and
    /// projected as requested.
    async fn find(&self, collection: &str, query: NativeQuery) -> DataAccessResult<Vec<Document>>;

    /// Counts the documents matching `query`, honoring its skip and limit.
    async fn count(&self, collection: &str, query: NativeQuery) -> DataAccessResult<u64>;

    /// Inserts new documents into a collection, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns
    /// [`DataAccessError::DocumentAlreadyExists`](crate::error::DataAccessError::DocumentAlreadyExists)
    /// when a document with the same `_id` is already stored.
    async fn insert(&self, collection: &str, documents: Vec<Document>) -> DataAccessResult<()>;

    /// Replaces the first document matching `filter`.
    ///
    /// With `upsert`, the replacement is inserted when nothing matches.
    async fn replace(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
        upsert: bool,
    ) -> DataAccessResult<WriteOutcome>;

    /// Applies an update document to the documents selected by `mode`.
    async fn update(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        mode: UpdateMode,
    ) -> DataAccessResult<WriteOutcome>;

    /// Removes every document matching `filter` and returns how many were removed.
    async fn remove(&self, collection: &str, filter: Document) -> DataAccessResult<u64>;

    /// Removes the first document matching `query` (in its sort order) and
    /// returns it.
    async fn find_and_remove(
        &self,
        collection: &str,
        query: NativeQuery,
    ) -> DataAccessResult<Option<Document>>;

    /// Updates the first document matching `query` (in its sort order) and
    /// returns it as it was before the update, or after it with `return_new`.
    async fn find_and_modify(
        &self,
        collection: &str,
        query: NativeQuery,
        update: Document,
        return_new: bool,
    ) -> DataAccessResult<Option<Document>>;

    /// Whether the collection exists in the store.
    async fn collection_exists(&self, collection: &str) -> DataAccessResult<bool>;

    /// Runs the store's map-reduce primitive over the documents matching
    /// `filter` and returns the inline results.
    async fn map_reduce(
        &self,
        collection: &str,
        filter: Document,
        map: &str,
        reduce: &str,
    ) -> DataAccessResult<Vec<Document>>;

    /// Groups the documents matching `filter` by the given physical keys.
    async fn group(
        &self,
        collection: &str,
        filter: Document,
        group: &GroupBy,
    ) -> DataAccessResult<Vec<Document>>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op, but backends with external
    /// connections should override this.
    async fn shutdown(self) -> DataAccessResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Factory trait for creating backend instances.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DataAccessResult<Self::Backend>;
}
