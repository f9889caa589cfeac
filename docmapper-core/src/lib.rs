//! A typed data-access layer over a document store.
//!
//! This crate is the core of the docmapper project and provides:
//!
//! - **Entity traits** ([`entity`]) - Typed entities and their BSON conversion
//! - **Entity metadata** ([`metadata`]) - Logical to physical field mapping, cached per type
//! - **Identifiers** ([`identifier`]) - Canonical and legacy identifier handling
//! - **Query model** ([`query`], [`update`], [`group`]) - Criteria, sorts, updates and grouping
//! - **Query mapping** ([`mapper`]) - Translation of logical criteria into native documents
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing storage backends
//! - **Read routing** ([`router`]) - Primary and replica-preferred handle selection
//! - **Repository** ([`repository`], [`chain`]) - Generic CRUD and the fluent chain query
//! - **Paging** ([`page`]) - Page requests and result pages
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docmapper::prelude::*;
//! use bson::oid::ObjectId;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     #[serde(rename = "_id")]
//!     pub id: ObjectId,
//!     pub name: String,
//! }
//!
//! impl Mapped for User {
//!     fn collection_name() -> &'static str {
//!         "users"
//!     }
//! }
//!
//! impl Entity for User {
//!     type Id = ObjectId;
//!
//!     fn id(&self) -> &ObjectId {
//!         &self.id
//!     }
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmapper_core;

pub use bson;

pub mod backend;
pub mod chain;
pub mod entity;
pub mod error;
pub mod group;
pub mod identifier;
pub mod mapper;
pub mod metadata;
pub mod page;
pub mod query;
pub mod repository;
pub mod router;
pub mod update;
