//! Translation of docstore filters and pipelines into MongoDB syntax.

use bson::{Bson, Document, doc};

use docstore_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    pipeline::{Accumulator, Stage},
    query::{Expr, FieldOp, QueryVisitor, Sort},
};

/// Translates filter expressions into MongoDB query documents.
pub(crate) struct MongoQueryTranslator;

impl MongoQueryTranslator {
    /// `None` translates to the empty filter, which matches every document.
    pub fn filter(expr: Option<&Expr>) -> DocumentStoreResult<Document> {
        match expr {
            Some(expr) => MongoQueryTranslator.visit_expr(expr),
            None => Ok(Document::new()),
        }
    }
}

fn escape_regex(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        if exprs.is_empty() {
            return Ok(Document::new());
        }

        Ok(doc! {
            "$and": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$or": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        // $not is only valid per field; $nor negates a whole expression.
        Ok(doc! {
            "$nor": [self.visit_expr(expr)?],
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: match op {
                FieldOp::Eq => doc! { "$eq": value },
                FieldOp::Ne => doc! { "$ne": value },
                FieldOp::Gt => doc! { "$gt": value },
                FieldOp::Gte => doc! { "$gte": value },
                FieldOp::Lt => doc! { "$lt": value },
                FieldOp::Lte => doc! { "$lte": value },
                FieldOp::Contains => match value {
                    Bson::String(s) => doc! { "$regex": escape_regex(s) },
                    Bson::Array(arr) => doc! { "$all": arr },
                    other => doc! { "$elemMatch": { "$eq": other } },
                },
                FieldOp::NotContains => match value {
                    Bson::String(s) => doc! { "$not": { "$regex": escape_regex(s) } },
                    Bson::Array(arr) => doc! { "$nin": arr },
                    other => doc! { "$ne": other },
                },
                FieldOp::StartsWith => match value {
                    Bson::String(s) => doc! { "$regex": format!("^{}", escape_regex(s)) },
                    _ => return Err(DocumentStoreError::InvalidDescriptor(format!("starts_with on {field} requires a string value"))),
                },
                FieldOp::EndsWith => match value {
                    Bson::String(s) => doc! { "$regex": format!("{}$", escape_regex(s)) },
                    _ => return Err(DocumentStoreError::InvalidDescriptor(format!("ends_with on {field} requires a string value"))),
                },
                FieldOp::AnyOf => match value {
                    Bson::Array(_) => doc! { "$in": value },
                    single => doc! { "$in": [single] },
                },
                FieldOp::NoneOf => match value {
                    Bson::Array(_) => doc! { "$nin": value },
                    single => doc! { "$nin": [single] },
                },
            }
        })
    }
}

/// `{ field: 1 | -1, ... }` in key order.
pub(crate) fn sort_document(keys: &[Sort]) -> Document {
    keys.iter()
        .map(|key| (key.field.clone(), Bson::Int32(key.direction.as_i32())))
        .collect()
}

/// `{ field: 1, ... }` inclusion projection.
pub(crate) fn projection_document(fields: &[String]) -> Document {
    fields.iter().map(|field| (field.clone(), Bson::Int32(1))).collect()
}

fn accumulator(accumulator: &Accumulator) -> Document {
    match accumulator {
        Accumulator::Sum(field) => doc! { "$sum": format!("${field}") },
        Accumulator::Avg(field) => doc! { "$avg": format!("${field}") },
        Accumulator::Min(field) => doc! { "$min": format!("${field}") },
        Accumulator::Max(field) => doc! { "$max": format!("${field}") },
        Accumulator::Count => doc! { "$sum": 1 },
    }
}

fn stage_count(stage: &str, n: u64) -> DocumentStoreResult<i64> {
    i64::try_from(n).map_err(|_| {
        DocumentStoreError::InvalidDescriptor(format!("{stage} of {n} exceeds the 64-bit signed range"))
    })
}

/// Translates typed stages into an aggregation pipeline. Raw stages pass through unchanged.
pub(crate) fn pipeline(stages: &[Stage]) -> DocumentStoreResult<Vec<Document>> {
    stages
        .iter()
        .map(|stage| -> DocumentStoreResult<Document> {
            Ok(match stage {
                Stage::Match(expr) => doc! { "$match": MongoQueryTranslator.visit_expr(expr)? },
                Stage::Group { by, accumulators } => {
                    let mut group = doc! {
                        "_id": by.as_ref().map(|field| Bson::String(format!("${field}"))).unwrap_or(Bson::Null),
                    };
                    for (name, acc) in accumulators {
                        group.insert(name.as_str(), accumulator(acc));
                    }
                    doc! { "$group": group }
                }
                Stage::Sort(keys) => doc! { "$sort": sort_document(keys) },
                Stage::Skip(n) => doc! { "$skip": stage_count("$skip", *n)? },
                Stage::Limit(n) => doc! { "$limit": stage_count("$limit", *n)? },
                Stage::Project(fields) => doc! { "$project": projection_document(fields) },
                Stage::Count(field) => doc! { "$count": field.as_str() },
                Stage::Raw(raw) => raw.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore_core::query::{Field, SortDirection};

    #[test]
    fn empty_filter_is_empty_document() {
        assert_eq!(MongoQueryTranslator::filter(None).unwrap(), doc! {});
        assert_eq!(MongoQueryTranslator::filter(Some(&Expr::And(vec![]))).unwrap(), doc! {});
    }

    #[test]
    fn conjunction_of_fields() {
        let expr = Field::new("status").eq("paid").and(Field::new("total").gte(100));

        assert_eq!(
            MongoQueryTranslator::filter(Some(&expr)).unwrap(),
            doc! { "$and": [ { "status": { "$eq": "paid" } }, { "total": { "$gte": 100 } } ] }
        );
    }

    #[test]
    fn negation_uses_nor() {
        let expr = Field::new("status").eq("void").not();

        assert_eq!(
            MongoQueryTranslator::filter(Some(&expr)).unwrap(),
            doc! { "$nor": [ { "status": { "$eq": "void" } } ] }
        );
    }

    #[test]
    fn string_patterns_are_escaped() {
        let expr = Field::new("sku").starts_with("A.1");

        assert_eq!(
            MongoQueryTranslator::filter(Some(&expr)).unwrap(),
            doc! { "sku": { "$regex": "^A\\.1" } }
        );
    }

    #[test]
    fn starts_with_rejects_non_strings() {
        let expr = Field::new("qty").starts_with(1);
        assert!(MongoQueryTranslator::filter(Some(&expr)).is_err());
    }

    #[test]
    fn typed_stages_translate() {
        let stages = vec![
            Stage::match_expr(Field::new("status").eq("paid")),
            Stage::group_by(Some("sku"))
                .accumulate("units", Accumulator::Sum("qty".into()))
                .accumulate("orders", Accumulator::Count),
            Stage::Sort(vec![Sort::new("units", SortDirection::Desc)]),
            Stage::Limit(10),
            Stage::Raw(doc! { "$sample": { "size": 3 } }),
        ];

        assert_eq!(
            pipeline(&stages).unwrap(),
            vec![
                doc! { "$match": { "status": { "$eq": "paid" } } },
                doc! { "$group": { "_id": "$sku", "units": { "$sum": "$qty" }, "orders": { "$sum": 1 } } },
                doc! { "$sort": { "units": -1 } },
                doc! { "$limit": 10_i64 },
                doc! { "$sample": { "size": 3 } },
            ]
        );
    }

    #[test]
    fn oversized_skip_is_rejected() {
        let err = pipeline(&[Stage::Skip(u64::MAX)]).unwrap_err();
        assert!(matches!(err, DocumentStoreError::InvalidDescriptor(_)));

        assert_eq!(pipeline(&[Stage::Skip(5)]).unwrap(), vec![doc! { "$skip": 5_i64 }]);
    }

    #[test]
    fn group_without_key_uses_null_id() {
        let stages = vec![Stage::group_by(None).accumulate("n", Accumulator::Count)];

        assert_eq!(
            pipeline(&stages).unwrap(),
            vec![doc! { "$group": { "_id": null, "n": { "$sum": 1 } } }]
        );
    }
}
