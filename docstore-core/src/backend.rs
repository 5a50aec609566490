//! Storage backend abstraction for the document store.
//!
//! This module defines the primitives a document engine must expose for the
//! [`Store`](crate::store::Store) to run query descriptors against it:
//!
//! - [`Connector`]: opens a [`Backend`] handle from a connection string
//! - [`Backend`]: find / insert / update / delete / aggregate / count / index primitives
//! - [`DocumentCursor`]: a server-side result iterator that must be closed explicitly
//!
//! Backends receive filters as [`Expr`] trees and pipelines as [`Stage`] lists and either
//! translate them into their native language or evaluate them directly.
//!
//! # Cancellation
//!
//! The store drops backend futures when the caller's context is cancelled or expires.
//! Implementations must leave the handle usable after any of their futures is dropped
//! part-way through.

use std::{fmt::Debug, time::Duration};

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument};

use crate::{
    error::DocumentStoreResult,
    index::IndexModel,
    options::{
        AggregateOptions, CountOptions, DeleteOptions, EstimateCountOptions, FindOneOptions,
        FindOptions, UpdateOptions,
    },
    pipeline::Stage,
    query::Expr,
};

/// Counts reported by an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Documents the filter matched.
    pub matched: u64,
    /// Documents whose content actually changed.
    pub modified: u64,
    /// Identifier of the document created by an upsert, if any.
    pub upserted_id: Option<Bson>,
}

/// A server-side iteration handle over a multi-document result.
///
/// The caller owns the cursor and must call [`close`](DocumentCursor::close) exactly once when
/// done, whether iteration succeeded or not.
#[async_trait]
pub trait DocumentCursor: Send {
    /// Returns the next document, or `None` once the result set is exhausted.
    async fn next_document(&mut self) -> DocumentStoreResult<Option<BsonDocument>>;

    /// Releases the server-side resources held by the cursor.
    async fn close(self: Box<Self>) -> DocumentStoreResult<()>;
}

pub type BoxCursor = Box<dyn DocumentCursor>;

/// Document engine primitives over one connection handle.
///
/// A single handle is shared by every caller of a [`Store`](crate::store::Store), so
/// implementations must be internally synchronized. `filter` is `None` when the descriptor
/// carried no clauses, which matches every document.
#[async_trait]
pub trait Backend: Send + Sync + Debug {
    /// Verifies the deployment is reachable and the credentials are accepted.
    async fn ping(&self, timeout: Duration) -> DocumentStoreResult<()>;

    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        options: &FindOneOptions,
    ) -> DocumentStoreResult<Option<BsonDocument>>;

    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        options: &FindOptions,
    ) -> DocumentStoreResult<BoxCursor>;

    /// Inserts one document and returns its identifier (assigned by the backend when the
    /// document carried no `_id`).
    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        document: BsonDocument,
    ) -> DocumentStoreResult<Bson>;

    /// Inserts documents in order and returns their identifiers by position.
    async fn insert_many(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<BsonDocument>,
    ) -> DocumentStoreResult<Vec<Bson>>;

    /// Applies `set` as a field-level set to the first matching document.
    async fn update_one(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        set: &BsonDocument,
        options: &UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Applies `set` as a field-level set to every matching document.
    async fn update_many(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        set: &BsonDocument,
        options: &UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome>;

    /// Deletes the first matching document and returns how many were deleted (0 or 1).
    async fn delete_one(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        options: &DeleteOptions,
    ) -> DocumentStoreResult<u64>;

    /// Deletes every matching document and returns how many were deleted.
    async fn delete_many(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        options: &DeleteOptions,
    ) -> DocumentStoreResult<u64>;

    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: &[Stage],
        options: &AggregateOptions,
    ) -> DocumentStoreResult<BoxCursor>;

    /// Counts matching documents exactly.
    async fn count_documents(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        options: &CountOptions,
    ) -> DocumentStoreResult<u64>;

    /// Reports the backend's cached size of the collection without scanning it.
    async fn estimated_document_count(
        &self,
        database: &str,
        collection: &str,
        options: &EstimateCountOptions,
    ) -> DocumentStoreResult<u64>;

    /// Creates all `indexes` on one collection in a single request and returns their names.
    async fn create_indexes(
        &self,
        database: &str,
        collection: &str,
        indexes: Vec<IndexModel>,
    ) -> DocumentStoreResult<Vec<String>>;
}

/// Opens backend handles from connection strings.
#[async_trait]
pub trait Connector: Send + Sync + Debug {
    type Backend: Backend;

    /// Opens a handle for `uri` with at most `max_pool_size` pooled connections.
    ///
    /// Returning a handle does not imply the deployment is reachable; callers ping it.
    async fn connect(
        &self,
        uri: &str,
        max_pool_size: Option<u32>,
    ) -> DocumentStoreResult<Self::Backend>;
}
