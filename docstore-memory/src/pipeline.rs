//! In-memory evaluation of aggregation stages.

use std::cmp::Ordering;

use bson::{Bson, Document as BsonDocument};

use docstore_core::{
    document::ID_FIELD,
    error::{DocumentStoreError, DocumentStoreResult},
    pipeline::{Accumulator, Stage},
    query::{Sort, SortDirection},
};

use crate::evaluator::{Comparable, DocumentEvaluator, lookup};

/// Runs `stages` over `documents` in order.
pub(crate) fn run(
    mut documents: Vec<BsonDocument>,
    stages: &[Stage],
) -> DocumentStoreResult<Vec<BsonDocument>> {
    for stage in stages {
        documents = match stage {
            Stage::Match(expr) => DocumentEvaluator::filter_documents(documents.iter(), Some(expr))?,
            Stage::Group { by, accumulators } => group(&documents, by.as_deref(), accumulators),
            Stage::Sort(keys) => {
                sort_documents(&mut documents, keys);
                documents
            }
            Stage::Skip(n) => documents.into_iter().skip(*n as usize).collect(),
            Stage::Limit(n) => documents.into_iter().take(*n as usize).collect(),
            Stage::Project(fields) => documents.iter().map(|d| project(d, fields)).collect(),
            Stage::Count(field) => match documents.len() {
                // An empty input produces no count document.
                0 => Vec::new(),
                n => {
                    let mut counted = BsonDocument::new();
                    counted.insert(field.as_str(), n as i64);
                    vec![counted]
                }
            },
            Stage::Raw(raw) => {
                let name = raw.keys().next().map(String::as_str).unwrap_or("<empty>");
                return Err(DocumentStoreError::Backend(format!(
                    "in-memory backend cannot evaluate native stage {name}"
                )));
            }
        };
    }

    Ok(documents)
}

/// Stable multi-key sort, first key most significant.
pub(crate) fn sort_documents(documents: &mut [BsonDocument], keys: &[Sort]) {
    documents.sort_by(|a, b| {
        keys.iter()
            .map(|key| {
                let left = Comparable::from(lookup(a, &key.field));
                let right = Comparable::from(lookup(b, &key.field));
                match key.direction {
                    SortDirection::Asc => left.total_cmp(&right),
                    SortDirection::Desc => right.total_cmp(&left),
                }
            })
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

/// Keeps `_id` and the listed fields. Dotted fields keep their top-level parent.
pub(crate) fn project(document: &BsonDocument, fields: &[String]) -> BsonDocument {
    let mut projected = BsonDocument::new();

    if let Some(id) = document.get(ID_FIELD) {
        projected.insert(ID_FIELD, id.clone());
    }
    for field in fields {
        let top = field.split('.').next().unwrap_or(field);
        if let Some(value) = document.get(top) {
            projected.insert(top, value.clone());
        }
    }

    projected
}

fn group(
    documents: &[BsonDocument],
    by: Option<&str>,
    accumulators: &[(String, Accumulator)],
) -> Vec<BsonDocument> {
    // Groups keep first-seen order.
    let mut groups: Vec<(Bson, Vec<&BsonDocument>)> = Vec::new();

    for document in documents {
        let key = by
            .and_then(|field| lookup(document, field))
            .cloned()
            .unwrap_or(Bson::Null);

        match groups.iter_mut().find(|(existing, _)| same_group_key(existing, &key)) {
            Some((_, members)) => members.push(document),
            None => groups.push((key, vec![document])),
        }
    }

    groups
        .into_iter()
        .map(|(key, members)| {
            let mut output = BsonDocument::new();
            output.insert(ID_FIELD, key);
            for (name, accumulator) in accumulators {
                output.insert(name.as_str(), accumulate(&members, accumulator));
            }
            output
        })
        .collect()
}

/// Numeric keys group by value across widths. Values without a comparable form fall back to
/// exact equality.
fn same_group_key(a: &Bson, b: &Bson) -> bool {
    match (Comparable::from(a), Comparable::from(b)) {
        (Comparable::Null, Comparable::Null) => a == b,
        (left, right) => left == right,
    }
}

fn numbers<'a>(members: &'a [&BsonDocument], field: &'a str) -> impl Iterator<Item = &'a Bson> + 'a {
    members
        .iter()
        .filter_map(move |document| lookup(document, field))
        .filter(|value| matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)))
}

fn accumulate(members: &[&BsonDocument], accumulator: &Accumulator) -> Bson {
    match accumulator {
        Accumulator::Count => Bson::Int64(members.len() as i64),
        Accumulator::Sum(field) => {
            let mut int_total: i64 = 0;
            let mut float_total: f64 = 0.0;
            // Any double, or an integer overflow, promotes the result to a double.
            let mut promoted = false;

            for value in numbers(members, field) {
                let integer = match value {
                    Bson::Int32(v) => i64::from(*v),
                    Bson::Int64(v) => *v,
                    Bson::Double(v) => {
                        promoted = true;
                        float_total += *v;
                        continue;
                    }
                    _ => continue,
                };

                float_total += integer as f64;
                match int_total.checked_add(integer) {
                    Some(total) => int_total = total,
                    None => promoted = true,
                }
            }

            if promoted {
                Bson::Double(float_total)
            } else {
                Bson::Int64(int_total)
            }
        }
        Accumulator::Avg(field) => {
            let values: Vec<f64> = numbers(members, field)
                .filter_map(|value| match value {
                    Bson::Int32(v) => Some(f64::from(*v)),
                    Bson::Int64(v) => Some(*v as f64),
                    Bson::Double(v) => Some(*v),
                    _ => None,
                })
                .collect();

            if values.is_empty() {
                Bson::Null
            } else {
                Bson::Double(values.iter().sum::<f64>() / values.len() as f64)
            }
        }
        Accumulator::Min(field) => extreme(members, field, Ordering::Less),
        Accumulator::Max(field) => extreme(members, field, Ordering::Greater),
    }
}

fn extreme(members: &[&BsonDocument], field: &str, wanted: Ordering) -> Bson {
    members
        .iter()
        .filter_map(|document| lookup(document, field))
        .filter(|value| !matches!(value, Bson::Null))
        .fold(None::<&Bson>, |best, value| match best {
            Some(current)
                if Comparable::from(value).total_cmp(&Comparable::from(current)) != wanted =>
            {
                Some(current)
            }
            _ => Some(value),
        })
        .cloned()
        .unwrap_or(Bson::Null)
}
