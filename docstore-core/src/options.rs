//! Backend-neutral option objects attached to query descriptors.
//!
//! A descriptor may receive any number of option objects. They are merged in the order they
//! were added when the descriptor executes: a later object's `Some` field overrides an
//! earlier one, `None` fields leave the earlier value in place.

use std::time::Duration;

use crate::query::Sort;

/// Folds option objects into one, later values winning.
pub trait MergeOptions: Default + Clone {
    fn merge(self, later: &Self) -> Self;
}

/// Merges every option object of a descriptor into the effective options.
pub fn merged<O: MergeOptions>(options: &[O]) -> O {
    options
        .iter()
        .fold(O::default(), |acc, next| acc.merge(next))
}

/// Options for multi-document finds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<Vec<Sort>>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    /// Only return these fields (plus `_id`).
    pub projection: Option<Vec<String>>,
    pub batch_size: Option<u32>,
}

impl FindOptions {
    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort.get_or_insert_with(Vec::new).push(sort);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn projection<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}

impl MergeOptions for FindOptions {
    fn merge(self, later: &Self) -> Self {
        FindOptions {
            sort: later.sort.clone().or(self.sort),
            skip: later.skip.or(self.skip),
            limit: later.limit.or(self.limit),
            projection: later.projection.clone().or(self.projection),
            batch_size: later.batch_size.or(self.batch_size),
        }
    }
}

/// Options for single-document finds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOneOptions {
    pub sort: Option<Vec<Sort>>,
    pub skip: Option<u64>,
    pub projection: Option<Vec<String>>,
}

impl FindOneOptions {
    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort.get_or_insert_with(Vec::new).push(sort);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn projection<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}

impl MergeOptions for FindOneOptions {
    fn merge(self, later: &Self) -> Self {
        FindOneOptions {
            sort: later.sort.clone().or(self.sort),
            skip: later.skip.or(self.skip),
            projection: later.projection.clone().or(self.projection),
        }
    }
}

/// Options for updates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOptions {
    /// Insert a new document built from the set payload when nothing matches.
    pub upsert: Option<bool>,
}

impl UpdateOptions {
    pub fn upsert(mut self, upsert: bool) -> Self {
        self.upsert = Some(upsert);
        self
    }
}

impl MergeOptions for UpdateOptions {
    fn merge(self, later: &Self) -> Self {
        UpdateOptions { upsert: later.upsert.or(self.upsert) }
    }
}

/// Options for deletes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteOptions {
    /// Free-form comment attached to the command for server-side logs.
    pub comment: Option<String>,
}

impl DeleteOptions {
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

impl MergeOptions for DeleteOptions {
    fn merge(self, later: &Self) -> Self {
        DeleteOptions { comment: later.comment.clone().or(self.comment) }
    }
}

/// Options for aggregation pipelines.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOptions {
    pub allow_disk_use: Option<bool>,
    pub batch_size: Option<u32>,
    pub max_time: Option<Duration>,
}

impl AggregateOptions {
    pub fn allow_disk_use(mut self, allow: bool) -> Self {
        self.allow_disk_use = Some(allow);
        self
    }

    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }
}

impl MergeOptions for AggregateOptions {
    fn merge(self, later: &Self) -> Self {
        AggregateOptions {
            allow_disk_use: later.allow_disk_use.or(self.allow_disk_use),
            batch_size: later.batch_size.or(self.batch_size),
            max_time: later.max_time.or(self.max_time),
        }
    }
}

/// Options for exact counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountOptions {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub max_time: Option<Duration>,
}

impl CountOptions {
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }
}

impl MergeOptions for CountOptions {
    fn merge(self, later: &Self) -> Self {
        CountOptions {
            skip: later.skip.or(self.skip),
            limit: later.limit.or(self.limit),
            max_time: later.max_time.or(self.max_time),
        }
    }
}

/// Options for estimated counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EstimateCountOptions {
    pub max_time: Option<Duration>,
}

impl EstimateCountOptions {
    pub fn max_time(mut self, max_time: Duration) -> Self {
        self.max_time = Some(max_time);
        self
    }
}

impl MergeOptions for EstimateCountOptions {
    fn merge(self, later: &Self) -> Self {
        EstimateCountOptions { max_time: later.max_time.or(self.max_time) }
    }
}
