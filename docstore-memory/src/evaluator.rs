//! Filter evaluation and value ordering over in-memory documents.
//!
//! [`DocumentEvaluator`] walks an [`Expr`] against one document. [`Comparable`] gives BSON
//! values the comparison semantics filters and sorts need: numbers compare across widths and
//! values of different types order by a fixed type rank.

use std::{cmp::Ordering, collections::HashMap};

use bson::{Bson, Document as BsonDocument, datetime::DateTime, oid::ObjectId};

use docstore_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp, QueryVisitor},
};

/// Resolves a dotted path (`"address.city"`) inside a document.
pub(crate) fn lookup<'a>(document: &'a BsonDocument, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }

    Some(current)
}

/// Comparable view of a BSON value.
///
/// All integer and float widths normalize to `f64`. Types without a meaningful ordering
/// (binary, regex, ...) collapse to `Null`.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    ObjectId(ObjectId),
    String(&'a str),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> Comparable<'a> {
    /// Cross-type sort rank: null < numbers < strings < maps < arrays < ids < bools < dates.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::ObjectId(_) => 5,
            Comparable::Bool(_) => 6,
            Comparable::DateTime(_) => 7,
        }
    }

    /// Total order used for sorting. Values of different types order by rank.
    pub(crate) fn total_cmp(&self, other: &Self) -> Ordering {
        self.partial_cmp(other)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            _ => Comparable::Null,
        }
    }
}

impl<'a> From<Option<&'a Bson>> for Comparable<'a> {
    fn from(bson: Option<&'a Bson>) -> Self {
        bson.map(Comparable::from).unwrap_or(Comparable::Null)
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.bytes().partial_cmp(&b.bytes()),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Evaluates filter expressions against one document.
pub(crate) struct DocumentEvaluator<'a> {
    document: &'a BsonDocument,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a BsonDocument) -> Self {
        Self { document }
    }

    /// `None` matches every document.
    pub fn matches(document: &'a BsonDocument, expr: Option<&Expr>) -> DocumentStoreResult<bool> {
        match expr {
            Some(expr) => DocumentEvaluator::new(document).visit_expr(expr),
            None => Ok(true),
        }
    }

    /// Keeps the documents matching `expr`, in order.
    pub fn filter_documents<I>(documents: I, expr: Option<&Expr>) -> DocumentStoreResult<Vec<BsonDocument>>
    where
        I: IntoIterator<Item = &'a BsonDocument>,
    {
        let mut matched = Vec::new();
        for document in documents {
            if Self::matches(document, expr)? {
                matched.push(document.clone());
            }
        }
        Ok(matched)
    }
}

fn contains(haystack: &Comparable<'_>, needle: &Comparable<'_>) -> bool {
    match (haystack, needle) {
        (Comparable::Array(items), needle) => items.iter().any(|item| item == needle),
        (Comparable::String(left), Comparable::String(right)) => left.contains(right),
        _ => false,
    }
}

fn any_of(field_value: &Comparable<'_>, candidates: &Comparable<'_>) -> bool {
    match (field_value, candidates) {
        (Comparable::Array(items), Comparable::Array(values)) => {
            values.iter().any(|value| items.contains(value))
        }
        (Comparable::Array(items), single) => items.contains(single),
        (single, Comparable::Array(values)) => values.contains(single),
        (left, right) => left == right,
    }
}

impl<'a> QueryVisitor for DocumentEvaluator<'a> {
    type Output = bool;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(lookup(self.document, field).is_some() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let Some(field_value) = lookup(self.document, field) else {
            // A missing field only satisfies the negative operators.
            return Ok(matches!(op, FieldOp::Ne | FieldOp::NotContains | FieldOp::NoneOf));
        };

        let left = Comparable::from(field_value);
        let right = Comparable::from(value);

        Ok(match op {
            FieldOp::Eq => left == right,
            FieldOp::Ne => left != right,
            FieldOp::Gt => left.partial_cmp(&right) == Some(Ordering::Greater),
            FieldOp::Gte => matches!(left.partial_cmp(&right), Some(Ordering::Greater | Ordering::Equal)),
            FieldOp::Lt => left.partial_cmp(&right) == Some(Ordering::Less),
            FieldOp::Lte => matches!(left.partial_cmp(&right), Some(Ordering::Less | Ordering::Equal)),
            FieldOp::Contains => contains(&left, &right),
            FieldOp::NotContains => !contains(&left, &right),
            FieldOp::StartsWith => match (&left, &right) {
                (Comparable::String(l), Comparable::String(r)) => l.starts_with(r),
                _ => false,
            },
            FieldOp::EndsWith => match (&left, &right) {
                (Comparable::String(l), Comparable::String(r)) => l.ends_with(r),
                _ => false,
            },
            FieldOp::AnyOf => any_of(&left, &right),
            FieldOp::NoneOf => !any_of(&left, &right),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docstore_core::query::Field;

    fn order() -> BsonDocument {
        doc! {
            "_id": ObjectId::new(),
            "status": "paid",
            "total": 120,
            "tags": ["gift", "express"],
            "address": { "city": "Lyon" },
        }
    }

    fn eval(expr: Expr) -> bool {
        DocumentEvaluator::matches(&order(), Some(&expr)).unwrap()
    }

    #[test]
    fn numbers_compare_across_widths() {
        assert!(eval(Field::new("total").eq(120.0)));
        assert!(eval(Field::new("total").gt(100_i64)));
        assert!(!eval(Field::new("total").lt(120)));
    }

    #[test]
    fn dotted_paths_reach_nested_fields() {
        assert!(eval(Field::new("address.city").eq("Lyon")));
        assert!(eval(Field::new("address.zip").not_exists()));
    }

    #[test]
    fn missing_field_only_matches_negative_ops() {
        assert!(eval(Field::new("coupon").ne("SPRING")));
        assert!(!eval(Field::new("coupon").eq("SPRING")));
    }

    #[test]
    fn array_membership() {
        assert!(eval(Field::new("tags").contains("gift")));
        assert!(eval(Field::new("status").any_of(vec!["paid", "shipped"])));
        assert!(eval(Field::new("tags").none_of(vec!["fragile"])));
    }

    #[test]
    fn object_ids_compare_by_value() {
        let id = ObjectId::new();
        let document = doc! { "_id": id };

        assert!(DocumentEvaluator::matches(&document, Some(&Field::new("_id").eq(id))).unwrap());
        assert!(!DocumentEvaluator::matches(&document, Some(&Field::new("_id").eq(ObjectId::new()))).unwrap());
    }

    #[test]
    fn no_filter_matches_everything() {
        assert!(DocumentEvaluator::matches(&order(), None).unwrap());
    }

    #[test]
    fn mixed_types_order_by_rank() {
        let number = Bson::Int32(5);
        let text = Bson::String("a".into());

        assert_eq!(
            Comparable::from(&number).total_cmp(&Comparable::from(&text)),
            Ordering::Less
        );
        assert_eq!(
            Comparable::from(None).total_cmp(&Comparable::from(&number)),
            Ordering::Less
        );
    }
}
