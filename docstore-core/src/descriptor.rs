//! Query descriptors: builder values describing one pending query or command.
//!
//! A descriptor only accumulates state. It performs no I/O and no validation; the
//! [`Store`](crate::store::Store) operation that consumes it checks that everything it needs
//! is present. Descriptors are consumed by value, so each one executes at most once, and the
//! ones that carry a destination hold it as a `&mut` borrow, so two callers can never run the
//! same descriptor concurrently.
//!
//! # Example
//!
//! ```ignore
//! use docstore::{descriptor::Finder, query::{Field, Sort, SortDirection}, options::FindOptions};
//!
//! let mut orders: Vec<Order> = Vec::new();
//! let finder = Finder::<Order>::new()
//!     .filter(Field::new("status").eq("paid"))
//!     .filter(Field::new("total").gt(100))
//!     .options(FindOptions::default().sort(Sort::new("_id", SortDirection::Desc)))
//!     .records(&mut orders);
//!
//! store.find_many(&ctx, finder).await?;
//! ```

use std::marker::PhantomData;

use bson::{Bson, Document as BsonDocument};

use crate::{
    document::Document,
    options::{
        AggregateOptions, CountOptions, DeleteOptions, EstimateCountOptions, FindOneOptions,
        FindOptions, UpdateOptions,
    },
    pipeline::Stage,
    query::Expr,
};

/// A conjunction of filter clauses against the collection of `D`.
///
/// Clauses keep their insertion order. Every other descriptor embeds one; a `Filter` built
/// separately can be handed to any of them with `with_filter`.
#[derive(Debug, Clone)]
pub struct Filter<D> {
    clauses: Vec<Expr>,
    _marker: PhantomData<fn() -> D>,
}

impl<D> Default for Filter<D> {
    fn default() -> Self {
        Filter { clauses: Vec::new(), _marker: PhantomData }
    }
}

impl<D: Document> Filter<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a clause; all clauses must match.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.clauses.push(expr);
        self
    }

    /// Appends every clause of another filter.
    pub fn extend(mut self, other: Filter<D>) -> Self {
        self.clauses.extend(other.clauses);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[Expr] {
        &self.clauses
    }

    pub fn collection_name(&self) -> &'static str {
        D::collection_name()
    }

    /// The combined expression, or `None` when there are no clauses (match everything).
    pub fn to_expr(&self) -> Option<Expr> {
        match self.clauses.as_slice() {
            [] => None,
            [single] => Some(single.clone()),
            many => Some(Expr::And(many.to_vec())),
        }
    }
}

/// Fetches at most one document and decodes it into a caller-supplied value.
#[derive(Debug)]
pub struct OneFinder<'a, D> {
    pub(crate) target: &'a mut D,
    pub(crate) filter: Filter<D>,
    pub(crate) options: Vec<FindOneOptions>,
}

impl<'a, D: Document> OneFinder<'a, D> {
    /// The matched document, if any, is decoded into `target`.
    pub fn new(target: &'a mut D) -> Self {
        OneFinder { target, filter: Filter::new(), options: Vec::new() }
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = self.filter.filter(expr);
        self
    }

    pub fn with_filter(mut self, filter: Filter<D>) -> Self {
        self.filter = self.filter.extend(filter);
        self
    }

    pub fn options(mut self, options: FindOneOptions) -> Self {
        self.options.push(options);
        self
    }
}

/// Fetches every matching document into a caller-supplied vector.
#[derive(Debug)]
pub struct Finder<'a, D> {
    pub(crate) filter: Filter<D>,
    pub(crate) records: Option<&'a mut Vec<D>>,
    pub(crate) options: Vec<FindOptions>,
}

impl<'a, D: Document> Finder<'a, D> {
    pub fn new() -> Self {
        Finder { filter: Filter::new(), records: None, options: Vec::new() }
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = self.filter.filter(expr);
        self
    }

    pub fn with_filter(mut self, filter: Filter<D>) -> Self {
        self.filter = self.filter.extend(filter);
        self
    }

    /// Sets the destination. Its previous contents are replaced on success.
    pub fn records(mut self, records: &'a mut Vec<D>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn options(mut self, options: FindOptions) -> Self {
        self.options.push(options);
        self
    }
}

impl<'a, D: Document> Default for Finder<'a, D> {
    fn default() -> Self {
        Self::new()
    }
}

/// Sets fields on matching documents. Never replaces whole documents.
#[derive(Debug, Clone)]
pub struct Updater<D> {
    pub(crate) filter: Filter<D>,
    pub(crate) update: BsonDocument,
    pub(crate) options: Vec<UpdateOptions>,
}

impl<D: Document> Updater<D> {
    pub fn new() -> Self {
        Updater { filter: Filter::new(), update: BsonDocument::new(), options: Vec::new() }
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = self.filter.filter(expr);
        self
    }

    pub fn with_filter(mut self, filter: Filter<D>) -> Self {
        self.filter = self.filter.extend(filter);
        self
    }

    /// Adds one field to the set payload.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.update.insert(field.into(), value.into());
        self
    }

    /// Adds every field of `update` to the set payload.
    pub fn update(mut self, update: BsonDocument) -> Self {
        for (field, value) in update {
            self.update.insert(field, value);
        }
        self
    }

    pub fn options(mut self, options: UpdateOptions) -> Self {
        self.options.push(options);
        self
    }

    pub fn payload(&self) -> &BsonDocument {
        &self.update
    }
}

impl<D: Document> Default for Updater<D> {
    fn default() -> Self {
        Self::new()
    }
}

/// Deletes every matching document. An empty filter matches the whole collection.
#[derive(Debug, Clone)]
pub struct Deleter<D> {
    pub(crate) filter: Filter<D>,
    pub(crate) options: Vec<DeleteOptions>,
}

impl<D: Document> Deleter<D> {
    pub fn new() -> Self {
        Deleter { filter: Filter::new(), options: Vec::new() }
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = self.filter.filter(expr);
        self
    }

    pub fn with_filter(mut self, filter: Filter<D>) -> Self {
        self.filter = self.filter.extend(filter);
        self
    }

    pub fn options(mut self, options: DeleteOptions) -> Self {
        self.options.push(options);
        self
    }
}

impl<D: Document> Default for Deleter<D> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a pipeline over the collection of `D`, decoding the output as `R`.
#[derive(Debug)]
pub struct Aggregator<'a, D, R = D> {
    pub(crate) pipeline: Vec<Stage>,
    pub(crate) records: Option<&'a mut Vec<R>>,
    pub(crate) options: Vec<AggregateOptions>,
    _marker: PhantomData<fn() -> D>,
}

impl<'a, D: Document, R> Aggregator<'a, D, R> {
    pub fn new() -> Self {
        Aggregator { pipeline: Vec::new(), records: None, options: Vec::new(), _marker: PhantomData }
    }

    /// Appends a stage to the end of the pipeline.
    pub fn stage(mut self, stage: Stage) -> Self {
        self.pipeline.push(stage);
        self
    }

    /// Sets the destination. Its previous contents are replaced on success.
    pub fn records(mut self, records: &'a mut Vec<R>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn options(mut self, options: AggregateOptions) -> Self {
        self.options.push(options);
        self
    }

    pub fn pipeline(&self) -> &[Stage] {
        &self.pipeline
    }
}

impl<'a, D: Document, R> Default for Aggregator<'a, D, R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts matching documents exactly.
#[derive(Debug, Clone)]
pub struct Counter<D> {
    pub(crate) filter: Filter<D>,
    pub(crate) options: Vec<CountOptions>,
}

impl<D: Document> Counter<D> {
    pub fn new() -> Self {
        Counter { filter: Filter::new(), options: Vec::new() }
    }

    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = self.filter.filter(expr);
        self
    }

    pub fn with_filter(mut self, filter: Filter<D>) -> Self {
        self.filter = self.filter.extend(filter);
        self
    }

    pub fn options(mut self, options: CountOptions) -> Self {
        self.options.push(options);
        self
    }
}

impl<D: Document> Default for Counter<D> {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads the backend's cached size of the whole collection. Takes no filter.
#[derive(Debug, Clone)]
pub struct EstimateCounter<D> {
    pub(crate) options: Vec<EstimateCountOptions>,
    _marker: PhantomData<fn() -> D>,
}

impl<D: Document> EstimateCounter<D> {
    pub fn new() -> Self {
        EstimateCounter { options: Vec::new(), _marker: PhantomData }
    }

    pub fn options(mut self, options: EstimateCountOptions) -> Self {
        self.options.push(options);
        self
    }
}

impl<D: Document> Default for EstimateCounter<D> {
    fn default() -> Self {
        Self::new()
    }
}
