//! Main docmapper crate providing a typed data-access layer over a document store.
//!
//! This crate is the primary entry point for users of the docmapper project.
//! It re-exports the core types from the sub-crates and provides access to
//! the available storage backends.
//!
//! # Features
//!
//! - **Logical field names** - Queries, sorts and updates are written against entity fields
//!   and mapped to stored paths, with identifiers coerced to `ObjectId` where possible
//! - **Legacy collections** - Entities with string identifiers opt out of coercion entirely
//! - **Generic repository** - Finds, counts, paging, updates, upserts and removals per entity
//! - **Read routing** - Point lookups read from the primary, everything else may read from a replica
//! - **Multiple backends** - In-memory and MongoDB storage behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docmapper::{prelude::*, memory::InMemoryStore};
//! use bson::oid::ObjectId;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, ByExample)]
//! pub struct Answer {
//!     #[serde(rename = "_id")]
//!     pub id: ObjectId,
//!     pub question_id: String,
//!     pub votes: i32,
//! }
//!
//! impl Mapped for Answer {
//!     fn collection_name() -> &'static str { "answers" }
//! }
//!
//! impl Entity for Answer {
//!     type Id = ObjectId;
//!
//!     fn id(&self) -> &ObjectId { &self.id }
//! }
//!
//! #[tokio::main]
//! async fn main() -> DataAccessResult<()> {
//!     let store = InMemoryStore::new();
//!     let answers = Repository::<Answer, _>::new(store.handles());
//!
//!     let answer = Answer { id: ObjectId::new(), question_id: "q-1".into(), votes: 3 };
//!     answers.insert(&answer).await?;
//!
//!     // the id may be given as its hex string, it is coerced on the way down
//!     let found = answers.find_by_id(answer.id.to_hex()).await?;
//!
//!     let top = answers
//!         .chain()
//!         .greater_than("votes", 1)
//!         .sort_desc("votes")
//!         .page_at(1, 20)
//!         .list()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - [`mongodb`] - MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use docmapper_core::{
    backend, chain, entity, error, group, identifier, mapper, metadata, page, query, repository,
    router, update,
};
pub use docmapper_macros::ByExample;

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docmapper_memory::{InMemoryStore, InMemoryStoreBuilder, JournalEntry};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmapper_mongodb::{MongoDbStore, MongoDbStoreBuilder};
}
