//! MongoDB backend for docstore.
//!
//! This crate implements the [`Backend`](docstore_core::backend::Backend) and
//! [`Connector`](docstore_core::backend::Connector) traits on top of the official async
//! MongoDB driver. Filters and typed pipeline stages are translated into MongoDB's query
//! language; [`Stage::Raw`](docstore_core::pipeline::Stage::Raw) stages are sent unchanged.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docstore = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use docstore::{prelude::*, mongodb::MongoDbConnector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let factory = ConnectionFactory::new(MongoDbConnector::new());
//!     factory
//!         .register(
//!             "orders",
//!             ConnectionConfig::new(vec!["db-1:27017".into(), "db-2:27017".into()], "orders")
//!                 .credentials("svc", "secret")
//!                 .replica_set("rs0")
//!                 .max_pool_size(100),
//!         )
//!         .await?;
//!
//!     let reports = factory.get_store("orders", ReadMode::SecondaryPreferred).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docstore_mongodb;

pub mod query;
pub mod store;

pub use store::{MongoDbBackend, MongoDbConnector};
