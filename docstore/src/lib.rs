//! Main docstore crate: a typed access layer over document databases.
//!
//! This crate is the primary entry point. It re-exports the core types from `docstore-core`,
//! the `#[derive(Document)]` macro and the bundled backends.
//!
//! # Features
//!
//! - **Cached connections** - One primary and one secondary-preferred store per logical key,
//!   established lazily and shared
//! - **Query descriptors** - Single-use builders for finds, updates, deletes, aggregations and counts
//! - **Cancellation** - Every call races the caller's context; cursors are always closed
//! - **Indexes** - Validated index definitions created in one request per collection
//! - **Multiple backends** - In-memory and MongoDB engines behind one trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docstore::{prelude::*, memory::InMemoryServer, bson::oid::ObjectId};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize, Document)]
//! #[document(collection = "users")]
//! pub struct User {
//!     #[document(id)]
//!     #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
//!     pub id: Option<ObjectId>,
//!     pub name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let factory = ConnectionFactory::new(InMemoryServer::new().connector());
//!     factory
//!         .register("app", ConnectionConfig::new(vec!["localhost:27017".into()], "app"))
//!         .await?;
//!
//!     let store = factory.get_store("app", ReadMode::Primary).await?;
//!     let ctx = store.context();
//!
//!     let mut alice = User { id: None, name: "Alice".into() };
//!     store.insert_one(&ctx, &mut alice).await?;
//!
//!     let mut users = Vec::new();
//!     store
//!         .find_many(&ctx, Finder::<User>::new().filter(Field::new("name").eq("Alice")).records(&mut users))
//!         .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-process engine for development and testing
//! - [`mongodb`] - MongoDB backend (requires `mongodb` feature)

#[allow(unused_extern_crates)]
extern crate self as docstore;

pub mod prelude;

pub use docstore_core::{
    backend, config, context, descriptor, document, error, factory, index, logging, options,
    pipeline, query, store,
};
pub use docstore_macros::Document;

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docstore_memory::{InMemoryBackend, InMemoryConnector, InMemoryServer};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docstore_mongodb::{MongoDbBackend, MongoDbConnector};
}
