//! Core of the docstore project: a typed access layer over document databases.
//!
//! This crate provides:
//!
//! - **Documents** ([`document`]) - The trait persisted types implement
//! - **Filters** ([`query`]) - Backend-neutral filter expressions
//! - **Pipelines** ([`pipeline`]) - Typed aggregation stages
//! - **Query descriptors** ([`descriptor`]) - Single-use descriptions of one operation each
//! - **Store** ([`store`]) - Executes descriptors against one database
//! - **Connection factory** ([`factory`]) - Lazily established, cached stores per logical key
//! - **Indexes** ([`index`]) - Index definitions and batched creation
//! - **Backend abstraction** ([`backend`]) - Traits a document engine implements
//! - **Configuration** ([`config`]) - Connection settings and connection strings
//! - **Contexts** ([`context`]) - Cancellation and deadlines per call
//! - **Logging** ([`logging`]) - Injectable `tracing` sink
//! - **Errors** ([`error`]) - The shared error taxonomy
//!
//! # Example
//!
//! ```ignore
//! use docstore_core::{config::{ConnectionConfig, ReadMode}, descriptor::Finder, factory::ConnectionFactory};
//!
//! let factory = ConnectionFactory::new(connector);
//! factory
//!     .register("orders", ConnectionConfig::new(vec!["db:27017".into()], "orders"))
//!     .await?;
//!
//! let store = factory.get_store("orders", ReadMode::SecondaryPreferred).await?;
//! let mut open = Vec::new();
//! store
//!     .find_many(&store.context(), Finder::<Order>::new().filter(Field::new("status").eq("open")).records(&mut open))
//!     .await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docstore_core;

pub mod backend;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod document;
pub mod error;
pub mod factory;
pub mod index;
pub mod logging;
pub mod options;
pub mod pipeline;
pub mod query;
pub mod store;
