//! Convenient re-exports of commonly used types from docstore.
//!
//! ```ignore
//! use docstore::prelude::*;
//! ```
//!
//! This provides access to:
//! - The document trait and its derive macro
//! - The connection factory, configuration and store
//! - Query descriptors, filters, pipeline stages and options
//! - Contexts, logging and error types

pub use docstore_core::{
    backend::{Backend, Connector},
    config::{ConnectionConfig, FactoryConfig, ReadMode},
    context::OpContext,
    descriptor::{Aggregator, Counter, Deleter, EstimateCounter, Filter, Finder, OneFinder, Updater},
    document::{Document, DocumentExt},
    error::{DocumentStoreError, DocumentStoreResult},
    factory::ConnectionFactory,
    index::{IndexDefinition, IndexDirection},
    logging::Logger,
    options::{
        AggregateOptions, CountOptions, DeleteOptions, EstimateCountOptions, FindOneOptions,
        FindOptions, UpdateOptions,
    },
    pipeline::{Accumulator, Stage},
    query::{Expr, Field, FieldOp, Sort, SortDirection},
    store::Store,
};
pub use docstore_macros::Document;
