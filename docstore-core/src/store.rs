//! Executes query descriptors against one backend handle.
//!
//! A [`Store`] binds a [`Backend`] handle to one database. It validates descriptors before any
//! I/O, races every backend call against the caller's [`OpContext`], decodes results into the
//! caller's values and closes every cursor it opens before returning.
//!
//! # Example
//!
//! ```ignore
//! use docstore::prelude::*;
//!
//! let store = factory.get_store("orders", ReadMode::Primary).await?;
//! let ctx = store.context();
//!
//! let mut order = Order::new("sku-1", 3);
//! store.insert_one(&ctx, &mut order).await?;
//!
//! let mut found = Order::default();
//! let hit = store
//!     .find_one(&ctx, OneFinder::new(&mut found).filter(Field::new("_id").eq(order.id.unwrap())))
//!     .await?;
//! ```

use std::time::Duration;

use bson::{Bson, de::deserialize_from_document};
use serde::de::DeserializeOwned;

use crate::{
    backend::{Backend, BoxCursor},
    context::OpContext,
    descriptor::{Aggregator, Counter, Deleter, EstimateCounter, Finder, OneFinder, Updater},
    document::{Document, DocumentExt, ID_FIELD},
    error::{DocumentStoreError, DocumentStoreResult},
    index::IndexManager,
    logging::Logger,
    options::{DeleteOptions, merged},
    query::Field,
};

/// Upper bound on releasing a cursor, so cleanup cannot stall the caller.
const CURSOR_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// One database on one backend connection.
///
/// A store is shared between tasks through an `Arc` (the
/// [`ConnectionFactory`](crate::factory::ConnectionFactory) hands out `Arc<Store<_>>`); the
/// descriptors passed to it are not, since each is consumed by the call that executes it.
#[derive(Debug)]
pub struct Store<B: Backend> {
    backend: B,
    database: String,
    logger: Logger,
    default_timeout: Duration,
}

impl<B: Backend> Store<B> {
    pub fn new(backend: B, database: impl Into<String>) -> Self {
        Store {
            backend,
            database: database.into(),
            logger: Logger::default(),
            default_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Sets the deadline used by [`context`](Self::context).
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// A fresh context whose deadline is this store's default operation timeout.
    pub fn context(&self) -> OpContext {
        OpContext::with_timeout(self.default_timeout)
    }

    /// Index creation against this store's database.
    pub fn indexes(&self) -> IndexManager<'_, B> {
        IndexManager::new(self)
    }

    fn trace(&self, operation: &'static str, collection: &str) {
        self.logger.scope(|| {
            tracing::debug!(database = self.database.as_str(), collection, operation, "executing")
        });
    }

    /// Fetches the first document matching the finder into its target.
    ///
    /// Returns `Ok(false)` and leaves the target untouched when nothing matches.
    pub async fn find_one<D: Document>(
        &self,
        ctx: &OpContext,
        finder: OneFinder<'_, D>,
    ) -> DocumentStoreResult<bool> {
        let collection = D::collection_name();
        let OneFinder { target, filter, options } = finder;
        let filter = filter.to_expr();
        let options = merged(&options);

        self.trace("find_one", collection);
        let found = ctx
            .run(self.backend.find_one(&self.database, collection, filter.as_ref(), &options))
            .await
            .map_err(|e| e.context("find_one", collection))?;

        match found {
            Some(document) => {
                *target = D::from_bson_document(document)
                    .map_err(|e| e.context("find_one", collection))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Fetches every matching document into the finder's destination.
    ///
    /// The destination is replaced only when every document decoded; on error it keeps its
    /// previous contents.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::InvalidDescriptor`] if the finder has no destination.
    pub async fn find_many<D: Document>(
        &self,
        ctx: &OpContext,
        finder: Finder<'_, D>,
    ) -> DocumentStoreResult<()> {
        let collection = D::collection_name();
        let Finder { filter, records, options } = finder;
        let Some(records) = records else {
            return Err(DocumentStoreError::InvalidDescriptor(format!(
                "finder on {collection} has no records destination"
            )));
        };
        let filter = filter.to_expr();
        let options = merged(&options);

        self.trace("find_many", collection);
        let cursor = ctx
            .run(self.backend.find(&self.database, collection, filter.as_ref(), &options))
            .await
            .map_err(|e| e.context("find_many", collection))?;

        *records = self.collect_cursor(ctx, cursor, "find_many", collection).await?;

        Ok(())
    }

    /// Inserts a document and writes the backend-assigned identifier back into it.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::InvalidDocument`] if the document does not serialize to a map.
    pub async fn insert_one<D: Document>(
        &self,
        ctx: &OpContext,
        document: &mut D,
    ) -> DocumentStoreResult<()> {
        let collection = D::collection_name();
        let raw = document.to_bson_document()?;

        self.trace("insert_one", collection);
        let id = ctx
            .run(self.backend.insert_one(&self.database, collection, raw))
            .await
            .map_err(|e| e.context("insert_one", collection))?;

        assign_id(document, id);

        Ok(())
    }

    /// Inserts all documents into `D`'s collection and writes each assigned identifier back
    /// to the document at the same position.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::InvalidDocument`] if `documents` is empty or any element does not
    /// serialize to a map.
    pub async fn insert_many<D: Document>(
        &self,
        ctx: &OpContext,
        documents: &mut [D],
    ) -> DocumentStoreResult<()> {
        let collection = D::collection_name();
        if documents.is_empty() {
            return Err(DocumentStoreError::InvalidDocument(format!(
                "insert_many on {collection} requires at least one document"
            )));
        }

        let raw = documents
            .iter()
            .map(DocumentExt::to_bson_document)
            .collect::<DocumentStoreResult<Vec<_>>>()?;

        self.trace("insert_many", collection);
        let ids = ctx
            .run(self.backend.insert_many(&self.database, collection, raw))
            .await
            .map_err(|e| e.context("insert_many", collection))?;

        for (document, id) in documents.iter_mut().zip(ids) {
            assign_id(document, id);
        }

        Ok(())
    }

    /// Sets the updater's fields on the first matching document and returns how many
    /// documents changed (0 or 1).
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::InvalidDescriptor`] if the filter or the payload is empty.
    pub async fn update_one<D: Document>(
        &self,
        ctx: &OpContext,
        updater: Updater<D>,
    ) -> DocumentStoreResult<u64> {
        let collection = D::collection_name();
        if updater.filter.is_empty() {
            return Err(DocumentStoreError::InvalidDescriptor(format!(
                "update_one on {collection} requires a filter"
            )));
        }

        self.update("update_one", ctx, updater, false).await
    }

    /// Sets the updater's fields on every matching document and returns how many changed.
    ///
    /// An empty filter updates the whole collection.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::InvalidDescriptor`] if the payload is empty.
    pub async fn update_many<D: Document>(
        &self,
        ctx: &OpContext,
        updater: Updater<D>,
    ) -> DocumentStoreResult<u64> {
        self.update("update_many", ctx, updater, true).await
    }

    async fn update<D: Document>(
        &self,
        operation: &'static str,
        ctx: &OpContext,
        updater: Updater<D>,
        multi: bool,
    ) -> DocumentStoreResult<u64> {
        let collection = D::collection_name();
        let Updater { filter, update, options } = updater;
        if update.is_empty() {
            return Err(DocumentStoreError::InvalidDescriptor(format!(
                "{operation} on {collection} requires a non-empty update"
            )));
        }
        let filter = filter.to_expr();
        let options = merged(&options);

        self.trace(operation, collection);
        let outcome = if multi {
            ctx.run(self.backend.update_many(
                &self.database,
                collection,
                filter.as_ref(),
                &update,
                &options,
            ))
            .await
        } else {
            ctx.run(self.backend.update_one(
                &self.database,
                collection,
                filter.as_ref(),
                &update,
                &options,
            ))
            .await
        }
        .map_err(|e| e.context(operation, collection))?;

        Ok(outcome.modified)
    }

    /// Deletes the document with this document's identifier and returns how many were
    /// deleted (0 or 1).
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::InvalidDocument`] if the document has no identifier.
    pub async fn delete_one<D: Document>(
        &self,
        ctx: &OpContext,
        document: &D,
    ) -> DocumentStoreResult<u64> {
        let collection = D::collection_name();
        let Some(id) = document.id() else {
            return Err(DocumentStoreError::InvalidDocument(format!(
                "delete_one on {collection} requires a document with an identifier"
            )));
        };
        let filter = Field::new(ID_FIELD).eq(id);

        self.trace("delete_one", collection);
        ctx.run(self.backend.delete_one(
            &self.database,
            collection,
            Some(&filter),
            &DeleteOptions::default(),
        ))
        .await
        .map_err(|e| e.context("delete_one", collection))
    }

    /// Deletes every matching document and returns how many were deleted.
    ///
    /// An empty filter deletes the entire collection; guarding against that is the caller's job.
    pub async fn delete_many<D: Document>(
        &self,
        ctx: &OpContext,
        deleter: Deleter<D>,
    ) -> DocumentStoreResult<u64> {
        let collection = D::collection_name();
        let Deleter { filter, options } = deleter;
        let filter = filter.to_expr();
        let options = merged(&options);

        self.trace("delete_many", collection);
        ctx.run(self.backend.delete_many(&self.database, collection, filter.as_ref(), &options))
            .await
            .map_err(|e| e.context("delete_many", collection))
    }

    /// Runs the aggregator's pipeline and decodes every output document into its destination.
    ///
    /// # Errors
    ///
    /// [`DocumentStoreError::InvalidDescriptor`] if the pipeline is empty or there is no
    /// destination.
    pub async fn aggregate<D, R>(
        &self,
        ctx: &OpContext,
        aggregator: Aggregator<'_, D, R>,
    ) -> DocumentStoreResult<()>
    where
        D: Document,
        R: DeserializeOwned + Send,
    {
        let collection = D::collection_name();
        let Aggregator { pipeline, records, options, .. } = aggregator;
        if pipeline.is_empty() {
            return Err(DocumentStoreError::InvalidDescriptor(format!(
                "aggregator on {collection} has an empty pipeline"
            )));
        }
        let Some(records) = records else {
            return Err(DocumentStoreError::InvalidDescriptor(format!(
                "aggregator on {collection} has no records destination"
            )));
        };
        let options = merged(&options);

        self.trace("aggregate", collection);
        let cursor = ctx
            .run(self.backend.aggregate(&self.database, collection, &pipeline, &options))
            .await
            .map_err(|e| e.context("aggregate", collection))?;

        *records = self.collect_cursor(ctx, cursor, "aggregate", collection).await?;

        Ok(())
    }

    /// Counts matching documents exactly.
    pub async fn count_documents<D: Document>(
        &self,
        ctx: &OpContext,
        counter: Counter<D>,
    ) -> DocumentStoreResult<u64> {
        let collection = D::collection_name();
        let Counter { filter, options } = counter;
        let filter = filter.to_expr();
        let options = merged(&options);

        self.trace("count_documents", collection);
        ctx.run(self.backend.count_documents(&self.database, collection, filter.as_ref(), &options))
            .await
            .map_err(|e| e.context("count_documents", collection))
    }

    /// Reports the backend's cached size of the whole collection.
    pub async fn estimated_document_count<D: Document>(
        &self,
        ctx: &OpContext,
        counter: EstimateCounter<D>,
    ) -> DocumentStoreResult<u64> {
        let collection = D::collection_name();
        let options = merged(&counter.options);

        self.trace("estimated_document_count", collection);
        ctx.run(self.backend.estimated_document_count(&self.database, collection, &options))
            .await
            .map_err(|e| e.context("estimated_document_count", collection))
    }

    /// Decodes every document of `cursor`, then closes it whatever the outcome.
    async fn collect_cursor<T>(
        &self,
        ctx: &OpContext,
        mut cursor: BoxCursor,
        operation: &'static str,
        collection: &str,
    ) -> DocumentStoreResult<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        let drained = ctx.run(drain::<T>(&mut cursor)).await;
        self.close_cursor(cursor, operation, collection).await;

        drained.map_err(|e| e.context(operation, collection))
    }

    async fn close_cursor(&self, cursor: BoxCursor, operation: &'static str, collection: &str) {
        let closed = match tokio::time::timeout(CURSOR_CLOSE_TIMEOUT, cursor.close()).await {
            Ok(result) => result,
            Err(_) => Err(DocumentStoreError::TimedOut),
        };

        if let Err(err) = closed {
            self.logger.scope(|| {
                tracing::warn!(
                    database = self.database.as_str(),
                    collection,
                    operation,
                    error = %err,
                    "failed to close cursor"
                )
            });
        }
    }
}

async fn drain<T: DeserializeOwned>(cursor: &mut BoxCursor) -> DocumentStoreResult<Vec<T>> {
    let mut records = Vec::new();
    while let Some(document) = cursor.next_document().await? {
        records.push(deserialize_from_document(document)?);
    }
    Ok(records)
}

/// Writes a backend-assigned object id back into the document if it is new.
fn assign_id<D: Document>(document: &mut D, id: Bson) {
    if let Bson::ObjectId(oid) = id {
        if document.id() != Some(oid) {
            document.set_id(oid);
        }
    }
}
