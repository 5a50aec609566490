//! In-memory document engine for docstore.
//!
//! This crate implements the [`Backend`](docstore_core::backend::Backend) and
//! [`Connector`](docstore_core::backend::Connector) traits entirely in process. It evaluates
//! filters, updates and the typed aggregation stages itself, which makes it suitable for
//! development and tests.
//!
//! # Features
//!
//! - **Shared deployment** - Every handle opened from one [`InMemoryServer`] sees the same data
//! - **Traffic inspection** - Connection attempts, operations, index requests and open cursors are counted
//! - **Fault injection** - Refused connections, connection delay and operation latency
//! - **Unique indexes** - Inserts and updates are rejected on duplicate keys
//!
//! # Quick Start
//!
//! ```ignore
//! use docstore::prelude::*;
//! use docstore::memory::InMemoryServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = InMemoryServer::new();
//!     let factory = ConnectionFactory::new(server.connector());
//!     factory
//!         .register("app", ConnectionConfig::new(vec!["localhost:27017".into()], "app"))
//!         .await?;
//!
//!     let store = factory.get_store("app", ReadMode::Primary).await?;
//!     let mut user = User { id: None, name: "Alice".into() };
//!     store.insert_one(&store.context(), &mut user).await?;
//!     assert!(user.id.is_some());
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docstore_memory;

pub mod evaluator;
pub mod pipeline;
pub mod store;

pub use store::{InMemoryBackend, InMemoryConnector, InMemoryServer};
