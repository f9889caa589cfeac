//! Fluent, single-owner query building bound to a repository.
//!
//! ```ignore
//! let open = repository
//!     .chain()
//!     .not_equal("status", "closed")
//!     .greater_than("votes", 10)
//!     .sort_desc("created_at")
//!     .page_at(2, 20)
//!     .list()
//!     .await?;
//! ```
//!
//! Every step consumes the builder and returns it; the terminal operations
//! [`ChainQuery::list`], [`ChainQuery::one`] and [`ChainQuery::count`]
//! consume it for good.

use bson::Bson;
use std::fmt;

use crate::{
    backend::StoreBackend,
    entity::{ByExample, Entity},
    error::DataAccessResult,
    page::PageRequest,
    query::{Criteria, Expr, Query, Sort},
    repository::Repository,
};

pub struct ChainQuery<'r, E: Entity, B: StoreBackend> {
    repository: &'r Repository<E, B>,
    query: Query,
}

impl<E: Entity, B: StoreBackend> Clone for ChainQuery<'_, E, B> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository,
            query: self.query.clone(),
        }
    }
}

impl<E: Entity, B: StoreBackend> fmt::Debug for ChainQuery<'_, E, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainQuery")
            .field("collection", &E::collection_name())
            .field("query", &self.query)
            .finish()
    }
}

impl<'r, E: Entity, B: StoreBackend> ChainQuery<'r, E, B> {
    /// Starts an empty chain against `repository`.
    pub fn attach(repository: &'r Repository<E, B>) -> Self {
        Self {
            repository,
            query: Query::new(),
        }
    }

    /// The query accumulated so far.
    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn into_query(self) -> Query {
        self.query
    }

    /// Adds one equality criterion per populated field of `example`.
    ///
    /// # Errors
    ///
    /// Fails when a field value cannot be serialized.
    pub fn by_example(mut self, example: &E) -> DataAccessResult<Self>
    where
        E: ByExample,
    {
        for (field, value) in example.example_criteria()? {
            self.query.add_criteria(Criteria::eq(field, value));
        }

        Ok(self)
    }

    /// Applies a page request: offset, size and its sort directives.
    pub fn page(mut self, request: &PageRequest) -> Self {
        self.query.with_page(request);
        self
    }

    /// Selects the 1-indexed page `page` of `size` entities.
    pub fn page_at(self, page: usize, size: usize) -> Self {
        self.page(&PageRequest::new(page, size))
    }

    pub fn sort_asc(mut self, field: impl Into<String>) -> Self {
        self.query.with_sort(Sort::asc(field));
        self
    }

    pub fn sort_desc(mut self, field: impl Into<String>) -> Self {
        self.query.with_sort(Sort::desc(field));
        self
    }

    pub fn not_in<V: Into<Bson>>(mut self, field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        self.query.add_criteria(Criteria::not_in(field, values));
        self
    }

    pub fn not_equal(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.query.add_criteria(Criteria::ne(field, value));
        self
    }

    pub fn less_than(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.query.add_criteria(Criteria::lt(field, value));
        self
    }

    pub fn greater_than(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.query.add_criteria(Criteria::gt(field, value));
        self
    }

    pub fn regex_match(mut self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.query.add_criteria(Criteria::regex(field, pattern));
        self
    }

    /// Adds an arbitrary criteria expression.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.query.add_criteria(expr);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query.set_limit(limit);
        self
    }

    pub async fn list(self) -> DataAccessResult<Vec<E>> {
        self.repository.find_list(&self.query).await
    }

    /// The first matching entity, read from the primary handle.
    pub async fn one(self) -> DataAccessResult<Option<E>> {
        self.repository.find_one(&self.query).await
    }

    /// Counts the matching entities with the accumulated sort, offset and
    /// limit applied, so `.limit(5).count()` never exceeds 5.
    pub async fn count(self) -> DataAccessResult<u64> {
        self.repository.count(&self.query).await
    }
}
