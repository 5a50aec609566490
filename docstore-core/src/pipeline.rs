//! Aggregation pipeline stages.
//!
//! An [`Aggregator`](crate::descriptor::Aggregator) holds an ordered list of [`Stage`]s. The
//! typed stages cover what the bundled backends can evaluate; [`Stage::Raw`] passes a
//! backend-native stage through untouched for backends that understand it.

use bson::Document as BsonDocument;

use crate::query::{Expr, Sort, SortDirection};

/// Group accumulator applied to every document of a group.
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    /// Sum of a numeric field.
    Sum(String),
    /// Average of a numeric field.
    Avg(String),
    /// Smallest value of a field.
    Min(String),
    /// Largest value of a field.
    Max(String),
    /// Number of documents in the group.
    Count,
}

/// One step of an aggregation pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Keeps documents matching the expression.
    Match(Expr),
    /// Groups documents by a field (or all documents into one group when `by` is `None`).
    /// Output documents carry the group key as `_id` plus one field per accumulator.
    Group {
        by: Option<String>,
        accumulators: Vec<(String, Accumulator)>,
    },
    /// Orders documents by the given keys, first key most significant.
    Sort(Vec<Sort>),
    /// Drops the first `n` documents.
    Skip(u64),
    /// Keeps at most `n` documents.
    Limit(u64),
    /// Keeps only the listed fields (and `_id`).
    Project(Vec<String>),
    /// Replaces the stream with a single `{ <field>: <count> }` document.
    Count(String),
    /// A backend-native stage passed through verbatim.
    Raw(BsonDocument),
}

impl Stage {
    pub fn match_expr(expr: Expr) -> Self {
        Stage::Match(expr)
    }

    /// Starts a group stage keyed by `by`.
    pub fn group_by(by: Option<&str>) -> Self {
        Stage::Group { by: by.map(str::to_string), accumulators: Vec::new() }
    }

    /// Adds an accumulator to a group stage; no-op on any other stage.
    pub fn accumulate(mut self, output: impl Into<String>, accumulator: Accumulator) -> Self {
        if let Stage::Group { accumulators, .. } = &mut self {
            accumulators.push((output.into(), accumulator));
        }
        self
    }

    pub fn sort(field: impl Into<String>, direction: SortDirection) -> Self {
        Stage::Sort(vec![Sort::new(field, direction)])
    }

    pub fn project<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Stage::Project(fields.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulate_only_touches_group_stages() {
        let group = Stage::group_by(None)
            .accumulate("total", Accumulator::Sum("status".into()))
            .accumulate("count", Accumulator::Count);

        match group {
            Stage::Group { by, accumulators } => {
                assert_eq!(by, None);
                assert_eq!(accumulators.len(), 2);
                assert_eq!(accumulators[1], ("count".to_string(), Accumulator::Count));
            }
            other => panic!("expected group, got {other:?}"),
        }

        assert_eq!(Stage::Limit(3).accumulate("x", Accumulator::Count), Stage::Limit(3));
    }
}
