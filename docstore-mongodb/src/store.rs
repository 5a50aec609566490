use std::{future::IntoFuture, time::Duration};

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection, Cursor, IndexModel as MongoIndexModel,
    options::{
        AggregateOptions as MongoAggregateOptions, ClientOptions,
        CountOptions as MongoCountOptions, DeleteOptions as MongoDeleteOptions,
        EstimatedDocumentCountOptions, FindOneOptions as MongoFindOneOptions,
        FindOptions as MongoFindOptions, IndexOptions, UpdateOptions as MongoUpdateOptions,
    },
};

use docstore_core::{
    backend::{Backend, BoxCursor, Connector, DocumentCursor, UpdateOutcome},
    error::{DocumentStoreError, DocumentStoreResult},
    index::IndexModel,
    options::{
        AggregateOptions, CountOptions, DeleteOptions, EstimateCountOptions, FindOneOptions,
        FindOptions, UpdateOptions,
    },
    pipeline::Stage,
    query::Expr,
};

use crate::query::{MongoQueryTranslator, pipeline, projection_document, sort_document};

fn backend_error(err: mongodb::error::Error) -> DocumentStoreError {
    DocumentStoreError::Backend(err.to_string())
}

/// A MongoDB client handle. Cloning shares the underlying connection pool.
#[derive(Debug, Clone)]
pub struct MongoDbBackend {
    client: Client,
}

impl MongoDbBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn get_collection(&self, database: &str, collection: &str) -> MongoCollection<Document> {
        self.client.database(database).collection(collection)
    }

    /// Disconnects every pooled connection.
    pub async fn shutdown(self) {
        self.client.shutdown().await;
    }
}

fn find_options(options: &FindOptions) -> MongoFindOptions {
    let mut native = MongoFindOptions::default();
    native.sort = options.sort.as_deref().map(sort_document);
    native.skip = options.skip;
    native.limit = options.limit;
    native.projection = options.projection.as_deref().map(projection_document);
    native.batch_size = options.batch_size;
    native
}

fn find_one_options(options: &FindOneOptions) -> MongoFindOneOptions {
    let mut native = MongoFindOneOptions::default();
    native.sort = options.sort.as_deref().map(sort_document);
    native.skip = options.skip;
    native.projection = options.projection.as_deref().map(projection_document);
    native
}

fn update_options(options: &UpdateOptions) -> MongoUpdateOptions {
    let mut native = MongoUpdateOptions::default();
    native.upsert = options.upsert;
    native
}

fn delete_options(options: &DeleteOptions) -> MongoDeleteOptions {
    let mut native = MongoDeleteOptions::default();
    native.comment = options.comment.clone().map(Bson::String);
    native
}

fn aggregate_options(options: &AggregateOptions) -> MongoAggregateOptions {
    let mut native = MongoAggregateOptions::default();
    native.allow_disk_use = options.allow_disk_use;
    native.batch_size = options.batch_size;
    native.max_time = options.max_time;
    native
}

fn count_options(options: &CountOptions) -> MongoCountOptions {
    let mut native = MongoCountOptions::default();
    native.skip = options.skip;
    native.limit = options.limit;
    native.max_time = options.max_time;
    native
}

/// `background` is still forwarded for pre-4.2 servers; newer servers ignore it.
#[allow(deprecated)]
fn index_model(model: IndexModel) -> MongoIndexModel {
    let keys: Document = model
        .keys
        .iter()
        .map(|(field, direction)| (field.clone(), Bson::Int32(direction.as_i32())))
        .collect();

    MongoIndexModel::builder()
        .keys(keys)
        .options(
            IndexOptions::builder()
                .name(model.name)
                .unique(model.unique)
                .background(model.background)
                .expire_after(model.expire_after)
                .build(),
        )
        .build()
}

#[async_trait]
impl Backend for MongoDbBackend {
    async fn ping(&self, timeout: Duration) -> DocumentStoreResult<()> {
        let admin = self.client.database("admin");
        let ping = admin.run_command(doc! { "ping": 1 }).into_future();

        match tokio::time::timeout(timeout, ping).await {
            Ok(result) => result.map(|_| ()).map_err(backend_error),
            Err(_) => Err(DocumentStoreError::Backend(format!(
                "ping did not complete within {}s",
                timeout.as_secs()
            ))),
        }
    }

    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        options: &FindOneOptions,
    ) -> DocumentStoreResult<Option<Document>> {
        self.get_collection(database, collection)
            .find_one(MongoQueryTranslator::filter(filter)?)
            .with_options(find_one_options(options))
            .await
            .map_err(backend_error)
    }

    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        options: &FindOptions,
    ) -> DocumentStoreResult<BoxCursor> {
        let cursor = self
            .get_collection(database, collection)
            .find(MongoQueryTranslator::filter(filter)?)
            .with_options(find_options(options))
            .await
            .map_err(backend_error)?;

        Ok(Box::new(MongoDbCursor { cursor }))
    }

    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        document: Document,
    ) -> DocumentStoreResult<Bson> {
        Ok(self
            .get_collection(database, collection)
            .insert_one(document)
            .await
            .map_err(backend_error)?
            .inserted_id)
    }

    async fn insert_many(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        let count = documents.len();
        let mut inserted = self
            .get_collection(database, collection)
            .insert_many(documents)
            .await
            .map_err(backend_error)?
            .inserted_ids;

        (0..count)
            .map(|position| {
                inserted.remove(&position).ok_or_else(|| {
                    DocumentStoreError::Backend(format!(
                        "insert_many acknowledged no id for document {position}"
                    ))
                })
            })
            .collect()
    }

    async fn update_one(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        set: &Document,
        options: &UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let result = self
            .get_collection(database, collection)
            .update_one(MongoQueryTranslator::filter(filter)?, doc! { "$set": set.clone() })
            .with_options(update_options(options))
            .await
            .map_err(backend_error)?;

        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn update_many(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        set: &Document,
        options: &UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let result = self
            .get_collection(database, collection)
            .update_many(MongoQueryTranslator::filter(filter)?, doc! { "$set": set.clone() })
            .with_options(update_options(options))
            .await
            .map_err(backend_error)?;

        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_one(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        options: &DeleteOptions,
    ) -> DocumentStoreResult<u64> {
        Ok(self
            .get_collection(database, collection)
            .delete_one(MongoQueryTranslator::filter(filter)?)
            .with_options(delete_options(options))
            .await
            .map_err(backend_error)?
            .deleted_count)
    }

    async fn delete_many(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        options: &DeleteOptions,
    ) -> DocumentStoreResult<u64> {
        Ok(self
            .get_collection(database, collection)
            .delete_many(MongoQueryTranslator::filter(filter)?)
            .with_options(delete_options(options))
            .await
            .map_err(backend_error)?
            .deleted_count)
    }

    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        stages: &[Stage],
        options: &AggregateOptions,
    ) -> DocumentStoreResult<BoxCursor> {
        let cursor = self
            .get_collection(database, collection)
            .aggregate(pipeline(stages)?)
            .with_options(aggregate_options(options))
            .await
            .map_err(backend_error)?;

        Ok(Box::new(MongoDbCursor { cursor }))
    }

    async fn count_documents(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        options: &CountOptions,
    ) -> DocumentStoreResult<u64> {
        self.get_collection(database, collection)
            .count_documents(MongoQueryTranslator::filter(filter)?)
            .with_options(count_options(options))
            .await
            .map_err(backend_error)
    }

    async fn estimated_document_count(
        &self,
        database: &str,
        collection: &str,
        options: &EstimateCountOptions,
    ) -> DocumentStoreResult<u64> {
        let mut native = EstimatedDocumentCountOptions::default();
        native.max_time = options.max_time;

        self.get_collection(database, collection)
            .estimated_document_count()
            .with_options(native)
            .await
            .map_err(backend_error)
    }

    async fn create_indexes(
        &self,
        database: &str,
        collection: &str,
        indexes: Vec<IndexModel>,
    ) -> DocumentStoreResult<Vec<String>> {
        Ok(self
            .get_collection(database, collection)
            .create_indexes(indexes.into_iter().map(index_model))
            .await
            .map_err(backend_error)?
            .index_names)
    }
}

/// Server-side cursor over a find or aggregate result.
struct MongoDbCursor {
    cursor: Cursor<Document>,
}

#[async_trait]
impl DocumentCursor for MongoDbCursor {
    async fn next_document(&mut self) -> DocumentStoreResult<Option<Document>> {
        self.cursor.try_next().await.map_err(backend_error)
    }

    async fn close(self: Box<Self>) -> DocumentStoreResult<()> {
        // Dropping an unexhausted cursor makes the driver kill it on the server.
        drop(self.cursor);
        Ok(())
    }
}

/// Opens [`MongoDbBackend`] handles from `mongodb://` connection strings.
#[derive(Debug, Clone, Default)]
pub struct MongoDbConnector;

impl MongoDbConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for MongoDbConnector {
    type Backend = MongoDbBackend;

    async fn connect(
        &self,
        uri: &str,
        max_pool_size: Option<u32>,
    ) -> DocumentStoreResult<Self::Backend> {
        let mut options = ClientOptions::parse(uri).await.map_err(backend_error)?;
        if max_pool_size.is_some() {
            options.max_pool_size = max_pool_size;
        }

        tracing::debug!(
            hosts = options.hosts.len(),
            max_pool_size = ?options.max_pool_size,
            "opening mongodb client"
        );

        Ok(MongoDbBackend::new(Client::with_options(options).map_err(backend_error)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore_core::{
        index::{IndexDefinition, IndexDirection},
        query::{Sort, SortDirection},
    };

    #[test]
    fn find_options_map_every_field() {
        let native = find_options(
            &FindOptions::default()
                .sort(Sort::new("created_at", SortDirection::Desc))
                .skip(5)
                .limit(10)
                .projection(["sku"])
                .batch_size(100),
        );

        assert_eq!(native.sort, Some(doc! { "created_at": -1 }));
        assert_eq!(native.skip, Some(5));
        assert_eq!(native.limit, Some(10));
        assert_eq!(native.projection, Some(doc! { "sku": 1 }));
        assert_eq!(native.batch_size, Some(100));
    }

    #[test]
    fn index_model_carries_ttl_and_uniqueness() {
        let native = index_model(
            IndexDefinition::new("sessions")
                .key("user", IndexDirection::Asc)
                .key("created_at", IndexDirection::Desc)
                .unique(true)
                .expire_after_seconds(60)
                .to_model(),
        );

        assert_eq!(native.keys, doc! { "user": 1, "created_at": -1 });
        let options = native.options.unwrap();
        assert_eq!(options.unique, Some(true));
        assert_eq!(options.expire_after, Some(Duration::from_secs(60)));
        assert_eq!(options.name, None);
    }

    #[tokio::test]
    async fn ping_against_unreachable_deployment_fails_within_timeout() {
        let backend = MongoDbConnector::new()
            .connect("mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=200", None)
            .await
            .unwrap();

        let started = std::time::Instant::now();
        let err = backend.ping(Duration::from_millis(100)).await.unwrap_err();

        assert!(matches!(err, DocumentStoreError::Backend(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn delete_comment_is_a_string() {
        let native = delete_options(&DeleteOptions::default().comment("cleanup"));
        assert_eq!(native.comment, Some(Bson::String("cleanup".into())));
    }
}
