//! In-memory document engine.
//!
//! An [`InMemoryServer`] plays the role of a deployment: it owns every database and collection
//! and records what clients do to it. [`InMemoryConnector`] opens [`InMemoryBackend`] handles
//! onto a server, the way a driver opens a client onto a cluster. Clones of a server share the
//! same state, so a test can keep one clone to seed data, inject faults and inspect traffic
//! while the factory connects through another.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bson::{Bson, Document as BsonDocument, oid::ObjectId};
use mea::rwlock::RwLock;

use docstore_core::{
    backend::{Backend, BoxCursor, Connector, DocumentCursor, UpdateOutcome},
    document::ID_FIELD,
    error::{DocumentStoreError, DocumentStoreResult},
    index::IndexModel,
    options::{
        AggregateOptions, CountOptions, DeleteOptions, EstimateCountOptions, FindOneOptions,
        FindOptions, UpdateOptions,
    },
    pipeline::Stage,
    query::{Expr, FieldOp},
};

use crate::{
    evaluator::{DocumentEvaluator, lookup},
    pipeline::{self, project, sort_documents},
};

#[derive(Debug, Default)]
struct Collection {
    /// Documents in insertion order.
    documents: Vec<BsonDocument>,
    indexes: Vec<IndexModel>,
}

type Databases = HashMap<String, HashMap<String, Collection>>;

#[derive(Debug)]
struct ServerState {
    databases: RwLock<Databases>,
    connected_uris: RwLock<Vec<String>>,
    failing_index_collections: RwLock<Vec<String>>,
    connect_attempts: AtomicUsize,
    failing_cursor_closes: AtomicUsize,
    failing_connects: AtomicUsize,
    operations: AtomicUsize,
    index_requests: AtomicUsize,
    open_cursors: AtomicUsize,
    latency_ms: AtomicU64,
    connect_delay_ms: AtomicU64,
}

/// A shared in-memory deployment.
///
/// # Example
///
/// ```ignore
/// use docstore::memory::InMemoryServer;
/// use docstore::factory::ConnectionFactory;
///
/// let server = InMemoryServer::new();
/// let factory = ConnectionFactory::new(server.connector());
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryServer {
    state: Arc<ServerState>,
}

impl Default for InMemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryServer {
    pub fn new() -> Self {
        InMemoryServer {
            state: Arc::new(ServerState {
                databases: RwLock::new(Databases::new()),
                connected_uris: RwLock::new(Vec::new()),
                failing_index_collections: RwLock::new(Vec::new()),
                connect_attempts: AtomicUsize::new(0),
                failing_cursor_closes: AtomicUsize::new(0),
                failing_connects: AtomicUsize::new(0),
                operations: AtomicUsize::new(0),
                index_requests: AtomicUsize::new(0),
                open_cursors: AtomicUsize::new(0),
                latency_ms: AtomicU64::new(0),
                connect_delay_ms: AtomicU64::new(0),
            }),
        }
    }

    pub fn connector(&self) -> InMemoryConnector {
        InMemoryConnector { server: self.clone() }
    }

    /// A handle that skips connection establishment.
    pub fn backend(&self) -> InMemoryBackend {
        InMemoryBackend { server: self.clone(), uri: None }
    }

    /// Makes the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.state.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` cursor closes fail. A cursor whose close failed stays counted
    /// in [`open_cursors`](Self::open_cursors).
    pub fn fail_cursor_closes(&self, count: usize) {
        self.state.failing_cursor_closes.store(count, Ordering::SeqCst);
    }

    /// Makes every `create_indexes` request on `collection` fail, in any database.
    pub async fn fail_index_requests_on(&self, collection: &str) {
        self.state
            .failing_index_collections
            .write()
            .await
            .push(collection.to_string());
    }

    /// Delays every data operation by `latency` before it touches any state, and every
    /// document a cursor yields.
    pub fn set_latency(&self, latency: Duration) {
        self.state.latency_ms.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Delays every connection attempt by `delay`.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.connect_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    /// Data operations received, including ones that later failed.
    pub fn operations(&self) -> usize {
        self.state.operations.load(Ordering::SeqCst)
    }

    /// `create_indexes` requests received.
    pub fn index_requests(&self) -> usize {
        self.state.index_requests.load(Ordering::SeqCst)
    }

    /// Cursors opened and not yet closed.
    pub fn open_cursors(&self) -> usize {
        self.state.open_cursors.load(Ordering::SeqCst)
    }

    /// Connection strings of successful connections, in order.
    pub async fn connected_uris(&self) -> Vec<String> {
        self.state.connected_uris.read().await.clone()
    }

    /// Copies of every document in a collection, in insertion order.
    pub async fn documents(&self, database: &str, collection: &str) -> Vec<BsonDocument> {
        self.state
            .databases
            .read()
            .await
            .get(database)
            .and_then(|collections| collections.get(collection))
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    /// Indexes defined on a collection.
    pub async fn indexes(&self, database: &str, collection: &str) -> Vec<IndexModel> {
        self.state
            .databases
            .read()
            .await
            .get(database)
            .and_then(|collections| collections.get(collection))
            .map(|c| c.indexes.clone())
            .unwrap_or_default()
    }

    /// Inserts raw documents directly, bypassing traffic accounting and index checks.
    pub async fn seed(&self, database: &str, collection: &str, documents: Vec<BsonDocument>) {
        let mut databases = self.state.databases.write().await;
        databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default()
            .documents
            .extend(documents);
    }
}

/// Opens [`InMemoryBackend`] handles onto an [`InMemoryServer`].
#[derive(Debug, Clone)]
pub struct InMemoryConnector {
    server: InMemoryServer,
}

#[async_trait]
impl Connector for InMemoryConnector {
    type Backend = InMemoryBackend;

    async fn connect(
        &self,
        uri: &str,
        _max_pool_size: Option<u32>,
    ) -> DocumentStoreResult<Self::Backend> {
        let state = &self.server.state;
        state.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = state.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let refused = state
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(DocumentStoreError::Backend(format!("connection refused: {uri}")));
        }

        state.connected_uris.write().await.push(uri.to_string());

        Ok(InMemoryBackend { server: self.server.clone(), uri: Some(uri.to_string()) })
    }
}

/// One client handle onto an [`InMemoryServer`].
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    server: InMemoryServer,
    uri: Option<String>,
}

impl InMemoryBackend {
    /// The connection string this handle was opened with, if it came from a connector.
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn server(&self) -> &InMemoryServer {
        &self.server
    }

    /// Accounts for one data operation and applies the configured latency.
    async fn begin(&self) {
        let state = &self.server.state;
        state.operations.fetch_add(1, Ordering::SeqCst);

        let latency = state.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
    }

    async fn matching(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
    ) -> DocumentStoreResult<Vec<BsonDocument>> {
        let databases = self.server.state.databases.read().await;
        match databases.get(database).and_then(|c| c.get(collection)) {
            Some(collection) => DocumentEvaluator::filter_documents(collection.documents.iter(), filter),
            None => Ok(Vec::new()),
        }
    }

    fn cursor(&self, documents: Vec<BsonDocument>) -> BoxCursor {
        self.server.state.open_cursors.fetch_add(1, Ordering::SeqCst);
        Box::new(InMemoryCursor {
            documents: documents.into(),
            server: self.server.clone(),
        })
    }

    async fn insert(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<BsonDocument>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        let mut databases = self.server.state.databases.write().await;
        let target = databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();

        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            let document = with_id(document);
            check_unique(database, collection, target, &document, None)?;
            ids.push(document.get(ID_FIELD).cloned().unwrap_or(Bson::Null));
            target.documents.push(document);
        }

        Ok(ids)
    }

    async fn update(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        set: &BsonDocument,
        options: &UpdateOptions,
        multi: bool,
    ) -> DocumentStoreResult<UpdateOutcome> {
        let mut databases = self.server.state.databases.write().await;
        let target = databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();

        let mut outcome = UpdateOutcome::default();
        for position in 0..target.documents.len() {
            if !DocumentEvaluator::matches(&target.documents[position], filter)? {
                continue;
            }
            outcome.matched += 1;

            let mut updated = target.documents[position].clone();
            let mut changed = false;
            for (path, value) in set {
                changed |= set_path(&mut updated, path, value.clone());
            }
            if changed {
                check_unique(database, collection, target, &updated, Some(position))?;
                target.documents[position] = updated;
                outcome.modified += 1;
            }

            if !multi {
                break;
            }
        }

        if outcome.matched == 0 && options.upsert.unwrap_or(false) {
            let mut created = equality_seed(filter);
            for (path, value) in set {
                set_path(&mut created, path, value.clone());
            }
            let created = with_id(created);
            check_unique(database, collection, target, &created, None)?;
            outcome.upserted_id = created.get(ID_FIELD).cloned();
            target.documents.push(created);
        }

        Ok(outcome)
    }

    async fn delete(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        multi: bool,
    ) -> DocumentStoreResult<u64> {
        let mut databases = self.server.state.databases.write().await;
        let Some(target) = databases.get_mut(database).and_then(|c| c.get_mut(collection)) else {
            return Ok(0);
        };

        let mut doomed = Vec::new();
        for (position, document) in target.documents.iter().enumerate() {
            if DocumentEvaluator::matches(document, filter)? {
                doomed.push(position);
                if !multi {
                    break;
                }
            }
        }
        for position in doomed.iter().rev() {
            target.documents.remove(*position);
        }

        Ok(doomed.len() as u64)
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn ping(&self, _timeout: Duration) -> DocumentStoreResult<()> {
        Ok(())
    }

    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        options: &FindOneOptions,
    ) -> DocumentStoreResult<Option<BsonDocument>> {
        self.begin().await;
        let mut documents = self.matching(database, collection, filter).await?;

        if let Some(sort) = &options.sort {
            sort_documents(&mut documents, sort);
        }

        Ok(documents
            .into_iter()
            .nth(options.skip.unwrap_or(0) as usize)
            .map(|document| match &options.projection {
                Some(fields) => project(&document, fields),
                None => document,
            }))
    }

    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        options: &FindOptions,
    ) -> DocumentStoreResult<BoxCursor> {
        self.begin().await;
        let mut documents = self.matching(database, collection, filter).await?;

        if let Some(sort) = &options.sort {
            sort_documents(&mut documents, sort);
        }

        // A negative limit means "at most |n|", as for the wire protocol.
        let limit = match options.limit {
            Some(0) | None => usize::MAX,
            Some(n) => n.unsigned_abs() as usize,
        };
        let documents = documents
            .into_iter()
            .skip(options.skip.unwrap_or(0) as usize)
            .take(limit)
            .map(|document| match &options.projection {
                Some(fields) => project(&document, fields),
                None => document,
            })
            .collect();

        Ok(self.cursor(documents))
    }

    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        document: BsonDocument,
    ) -> DocumentStoreResult<Bson> {
        self.begin().await;
        let mut ids = self.insert(database, collection, vec![document]).await?;
        ids.pop()
            .ok_or_else(|| DocumentStoreError::Backend("insert acknowledged no document".into()))
    }

    async fn insert_many(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<BsonDocument>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        self.begin().await;
        self.insert(database, collection, documents).await
    }

    async fn update_one(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        set: &BsonDocument,
        options: &UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.begin().await;
        self.update(database, collection, filter, set, options, false).await
    }

    async fn update_many(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        set: &BsonDocument,
        options: &UpdateOptions,
    ) -> DocumentStoreResult<UpdateOutcome> {
        self.begin().await;
        self.update(database, collection, filter, set, options, true).await
    }

    async fn delete_one(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        _options: &DeleteOptions,
    ) -> DocumentStoreResult<u64> {
        self.begin().await;
        self.delete(database, collection, filter, false).await
    }

    async fn delete_many(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        _options: &DeleteOptions,
    ) -> DocumentStoreResult<u64> {
        self.begin().await;
        self.delete(database, collection, filter, true).await
    }

    async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        stages: &[Stage],
        _options: &AggregateOptions,
    ) -> DocumentStoreResult<BoxCursor> {
        self.begin().await;
        let documents = self.matching(database, collection, None).await?;
        let output = pipeline::run(documents, stages)?;

        Ok(self.cursor(output))
    }

    async fn count_documents(
        &self,
        database: &str,
        collection: &str,
        filter: Option<&Expr>,
        options: &CountOptions,
    ) -> DocumentStoreResult<u64> {
        self.begin().await;
        let matched = self.matching(database, collection, filter).await?.len() as u64;
        let remaining = matched.saturating_sub(options.skip.unwrap_or(0));

        Ok(match options.limit {
            Some(limit) if limit > 0 => remaining.min(limit),
            _ => remaining,
        })
    }

    async fn estimated_document_count(
        &self,
        database: &str,
        collection: &str,
        _options: &EstimateCountOptions,
    ) -> DocumentStoreResult<u64> {
        self.begin().await;
        Ok(self.matching(database, collection, None).await?.len() as u64)
    }

    async fn create_indexes(
        &self,
        database: &str,
        collection: &str,
        indexes: Vec<IndexModel>,
    ) -> DocumentStoreResult<Vec<String>> {
        self.begin().await;
        self.server.state.index_requests.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .server
            .state
            .failing_index_collections
            .read()
            .await
            .iter()
            .any(|name| name == collection);
        if refused {
            return Err(DocumentStoreError::Backend(format!(
                "index build failed on {database}.{collection}"
            )));
        }

        let mut databases = self.server.state.databases.write().await;
        let target = databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();

        let mut names = Vec::with_capacity(indexes.len());
        for index in indexes {
            let name = index.resolved_name();
            match target.indexes.iter().position(|existing| existing.resolved_name() == name) {
                Some(existing) if target.indexes[existing].keys != index.keys => {
                    return Err(DocumentStoreError::Backend(format!(
                        "index {name} already exists on {database}.{collection} with different keys"
                    )));
                }
                Some(existing) => target.indexes[existing] = index,
                None => target.indexes.push(index),
            }
            names.push(name);
        }

        Ok(names)
    }
}

struct InMemoryCursor {
    documents: VecDeque<BsonDocument>,
    server: InMemoryServer,
}

#[async_trait]
impl DocumentCursor for InMemoryCursor {
    async fn next_document(&mut self) -> DocumentStoreResult<Option<BsonDocument>> {
        let latency = self.server.state.latency_ms.load(Ordering::SeqCst);
        if latency > 0 && !self.documents.is_empty() {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        Ok(self.documents.pop_front())
    }

    async fn close(self: Box<Self>) -> DocumentStoreResult<()> {
        let state = &self.server.state;
        let refused = state
            .failing_cursor_closes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(DocumentStoreError::Backend("killCursors failed".into()));
        }

        state.open_cursors.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Puts a generated `_id` first when the document has none.
fn with_id(document: BsonDocument) -> BsonDocument {
    if document.contains_key(ID_FIELD) {
        return document;
    }

    let mut identified = BsonDocument::new();
    identified.insert(ID_FIELD, ObjectId::new());
    for (key, value) in document {
        identified.insert(key, value);
    }
    identified
}

/// Sets `value` at a dotted path, creating intermediate documents. Returns whether anything
/// changed.
fn set_path(document: &mut BsonDocument, path: &str, value: Bson) -> bool {
    match path.split_once('.') {
        None => {
            let changed = document.get(path) != Some(&value);
            document.insert(path, value);
            changed
        }
        Some((head, rest)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, BsonDocument::new());
            }
            match document.get_mut(head) {
                Some(Bson::Document(nested)) => set_path(nested, rest, value),
                _ => false,
            }
        }
    }
}

/// Fields pinned by top-level equality clauses, used as the base of an upserted document.
fn equality_seed(filter: Option<&Expr>) -> BsonDocument {
    fn collect(expr: &Expr, seed: &mut BsonDocument) {
        match expr {
            Expr::Field { field, op: FieldOp::Eq, value } => {
                set_path(seed, field, value.clone());
            }
            Expr::And(exprs) => exprs.iter().for_each(|e| collect(e, seed)),
            _ => {}
        }
    }

    let mut seed = BsonDocument::new();
    if let Some(expr) = filter {
        collect(expr, &mut seed);
    }
    seed
}

/// Rejects `candidate` if it collides with another document on `_id` or any unique index.
/// `skip` is the candidate's own position when it replaces an existing document.
fn check_unique(
    database: &str,
    collection: &str,
    target: &Collection,
    candidate: &BsonDocument,
    skip: Option<usize>,
) -> DocumentStoreResult<()> {
    let mut unique_keys = vec![("_id_".to_string(), vec![ID_FIELD.to_string()])];
    unique_keys.extend(target.indexes.iter().filter(|index| index.unique).map(|index| {
        let fields = index.keys.iter().map(|(field, _)| field.clone()).collect();
        (index.resolved_name(), fields)
    }));

    for (name, fields) in &unique_keys {
        let key = |document: &BsonDocument| -> Vec<Bson> {
            fields
                .iter()
                .map(|field| lookup(document, field).cloned().unwrap_or(Bson::Null))
                .collect()
        };
        let wanted = key(candidate);

        let collides = target
            .documents
            .iter()
            .enumerate()
            .any(|(position, document)| Some(position) != skip && key(document) == wanted);
        if collides {
            return Err(DocumentStoreError::Backend(format!(
                "E11000 duplicate key error collection: {database}.{collection} index: {name}"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn set_path_creates_nested_documents() {
        let mut document = doc! { "name": "Ada" };

        assert!(set_path(&mut document, "address.city", Bson::from("Paris")));
        assert!(!set_path(&mut document, "name", Bson::from("Ada")));
        assert_eq!(document, doc! { "name": "Ada", "address": { "city": "Paris" } });
    }

    #[test]
    fn generated_id_goes_first() {
        let document = with_id(doc! { "name": "Ada" });
        assert_eq!(document.keys().next().map(String::as_str), Some(ID_FIELD));
        assert!(document.get_object_id(ID_FIELD).is_ok());
    }

    #[test]
    fn upsert_seed_takes_equality_clauses_only() {
        use docstore_core::query::Field;

        let filter = Field::new("sku").eq("A-1").and(Field::new("qty").gt(3));
        assert_eq!(equality_seed(Some(&filter)), doc! { "sku": "A-1" });
    }
}
