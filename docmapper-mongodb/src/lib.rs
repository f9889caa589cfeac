//! MongoDB backend implementation for docmapper.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend`
//! trait. Native documents produced by the query mapper are handed to the
//! driver unchanged, so the full MongoDB query language is available.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docmapper = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Read routing** - A primary handle and a secondary-preferred handle sharing one client
//! - **Native passthroughs** - Inline map-reduce and grouping through the aggregation pipeline
//! - **Async/await** - Fully asynchronous API built on MongoDB's async driver
//!
//! # Example
//!
//! ```ignore
//! use docmapper::{prelude::*, mongodb::MongoDbStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handles = MongoDbStore::builder("mongodb://localhost:27017", "forum")
//!         .build_handles()
//!         .await?;
//!     let answers = Repository::<Answer, _>::new(handles);
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmapper_mongodb;

pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
