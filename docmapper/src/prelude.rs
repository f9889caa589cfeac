//! Convenient re-exports of commonly used types from docmapper.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docmapper::prelude::*;
//! ```
//!
//! This provides access to:
//! - Entity traits and metadata
//! - Store backends, builders and read routing
//! - Query, update and paging construction
//! - The repository and its chain query
//! - Error types

pub use docmapper_core::{
    backend::{NativeQuery, StoreBackend, StoreBackendBuilder},
    chain::ChainQuery,
    entity::{ByExample, Entity, EntityExt, Mapped},
    error::{DataAccessError, DataAccessResult},
    group::{Accumulator, GroupBy},
    identifier::{IdPolicy, Identifier},
    mapper::{QueryMapper, StandardConverter, ValueConverter},
    metadata::{Association, EntityMetadata, MetadataRegistry},
    page::{Page, PageRequest},
    query::{Criteria, Expr, FieldOp, Query, QueryBuilder, Sort, SortDirection},
    repository::Repository,
    router::{ReadHandles, ReadMode},
    update::{Update, UpdateMode, WriteOutcome},
};

pub use docmapper_macros::ByExample;
