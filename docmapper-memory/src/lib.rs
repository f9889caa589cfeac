//! In-memory document storage backend for docmapper.
//!
//! This crate provides a thread-safe, in-memory implementation of the
//! `StoreBackend` trait. Native criteria, sort, projection and update
//! documents are evaluated in process, so repositories behave the same way
//! they would against a real document store, minus server-side scripting.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Native query evaluation** - Comparison, set, regex and logical operators on dot paths
//! - **Update operators** - `$set`, `$setOnInsert`, `$unset`, `$inc` and `$push`, with upserts
//! - **Handle journal** - Labelled primary and replica handles record every operation
//!
//! # Quick Start
//!
//! ```ignore
//! use docmapper::prelude::*;
//! use docmapper_memory::InMemoryStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = InMemoryStore::new();
//!     let users = Repository::<User, _>::new(store.handles());
//!
//!     users.insert(&User { id: ObjectId::new(), name: "Alice".into() }).await?;
//!
//!     // the point lookup ran on the primary handle
//!     let journal = store.journal().await;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmapper_memory;

mod evaluator;
mod update;

pub mod store;

pub use store::{DEFAULT_JOURNAL_CAPACITY, InMemoryStore, InMemoryStoreBuilder, JournalEntry};
