//! Index definitions and batched index creation.
//!
//! [`IndexDefinition`]s validate themselves; [`IndexManager::create_many`] rejects the whole
//! batch if any definition is invalid, then submits one request per target collection.

use std::{collections::BTreeMap, time::Duration};

use crate::{
    backend::Backend,
    context::OpContext,
    error::{DocumentStoreError, DocumentStoreResult},
    store::Store,
};

/// Direction of one indexed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDirection {
    Asc,
    Desc,
}

impl IndexDirection {
    pub fn as_i32(self) -> i32 {
        match self {
            IndexDirection::Asc => 1,
            IndexDirection::Desc => -1,
        }
    }
}

/// An index to create on one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub collection: String,
    /// Explicit index name; the backend derives one from the keys when `None`.
    pub name: Option<String>,
    /// Indexed fields, most significant first.
    pub keys: Vec<(String, IndexDirection)>,
    pub unique: bool,
    /// Legacy background-build hint. MongoDB 4.2 and later ignore it and always use an
    /// optimized build that only locks the collection briefly.
    pub background: bool,
    /// Documents expire this many seconds after the indexed date. `<= 0` disables expiry.
    pub expire_after_seconds: i32,
}

impl IndexDefinition {
    pub fn new(collection: impl Into<String>) -> Self {
        IndexDefinition {
            collection: collection.into(),
            name: None,
            keys: Vec::new(),
            unique: false,
            background: false,
            expire_after_seconds: 0,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn key(mut self, field: impl Into<String>, direction: IndexDirection) -> Self {
        self.keys.push((field.into(), direction));
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn expire_after_seconds(mut self, seconds: i32) -> Self {
        self.expire_after_seconds = seconds;
        self
    }

    pub fn validate(&self) -> DocumentStoreResult<()> {
        if self.collection.is_empty() {
            return Err(DocumentStoreError::InvalidDescriptor(
                "index definition requires a collection".into(),
            ));
        }
        if self.keys.is_empty() {
            return Err(DocumentStoreError::InvalidDescriptor(format!(
                "index definition on {} requires at least one key",
                self.collection
            )));
        }
        Ok(())
    }

    /// The backend-facing form of this definition.
    pub fn to_model(&self) -> IndexModel {
        IndexModel {
            keys: self.keys.clone(),
            name: self.name.clone(),
            unique: self.unique,
            background: self.background,
            expire_after: (self.expire_after_seconds > 0)
                .then(|| Duration::from_secs(self.expire_after_seconds as u64)),
        }
    }
}

/// An index as submitted to a backend. The target collection travels separately.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexModel {
    pub keys: Vec<(String, IndexDirection)>,
    pub name: Option<String>,
    pub unique: bool,
    pub background: bool,
    /// `None` means the index has no TTL.
    pub expire_after: Option<Duration>,
}

impl IndexModel {
    /// The name the index is known by: the explicit one, or `field_dir` pairs joined by `_`.
    pub fn resolved_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            self.keys
                .iter()
                .map(|(field, direction)| format!("{field}_{}", direction.as_i32()))
                .collect::<Vec<_>>()
                .join("_")
        })
    }
}

/// Groups valid definitions by collection, keeping each collection's definitions in order.
pub fn group_by_collection(
    definitions: &[IndexDefinition],
) -> DocumentStoreResult<BTreeMap<String, Vec<IndexModel>>> {
    for definition in definitions {
        definition.validate()?;
    }

    let mut groups: BTreeMap<String, Vec<IndexModel>> = BTreeMap::new();
    for definition in definitions {
        groups
            .entry(definition.collection.clone())
            .or_default()
            .push(definition.to_model());
    }

    Ok(groups)
}

/// Creates indexes through a [`Store`]'s backend.
#[derive(Debug)]
pub struct IndexManager<'a, B: Backend> {
    store: &'a Store<B>,
}

impl<'a, B: Backend> IndexManager<'a, B> {
    pub(crate) fn new(store: &'a Store<B>) -> Self {
        IndexManager { store }
    }

    /// Validates every definition, then creates them with one request per collection.
    ///
    /// Nothing is submitted if any definition is invalid. Collections are processed one after
    /// another; a failing collection stops the batch but does not undo collections that
    /// already succeeded.
    ///
    /// Returns the names of the created indexes.
    pub async fn create_many(
        &self,
        ctx: &OpContext,
        definitions: &[IndexDefinition],
    ) -> DocumentStoreResult<Vec<String>> {
        let groups = group_by_collection(definitions)?;
        let mut names = Vec::with_capacity(definitions.len());

        for (collection, models) in groups {
            let count = models.len();
            let created = ctx
                .run(self.store.backend().create_indexes(
                    self.store.database_name(),
                    &collection,
                    models,
                ))
                .await
                .map_err(|e| e.context("create_indexes", &collection))?;

            self.store.logger().scope(|| {
                tracing::info!(
                    database = self.store.database_name(),
                    collection = collection.as_str(),
                    count,
                    "created indexes"
                )
            });
            names.extend(created);
        }

        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_collection_is_rejected() {
        let definition = IndexDefinition::new("").key("sku", IndexDirection::Asc);
        assert!(matches!(
            definition.validate(),
            Err(DocumentStoreError::InvalidDescriptor(_))
        ));
    }

    #[test]
    fn empty_keys_are_rejected() {
        assert!(IndexDefinition::new("orders").validate().is_err());
    }

    #[test]
    fn zero_ttl_is_omitted() {
        let definition = IndexDefinition::new("sessions")
            .key("created_at", IndexDirection::Asc)
            .expire_after_seconds(0);

        assert!(definition.validate().is_ok());
        assert_eq!(definition.to_model().expire_after, None);
        assert_eq!(
            IndexDefinition::new("sessions")
                .key("created_at", IndexDirection::Asc)
                .expire_after_seconds(-5)
                .to_model()
                .expire_after,
            None
        );
    }

    #[test]
    fn positive_ttl_maps_to_duration() {
        let model = IndexDefinition::new("sessions")
            .key("created_at", IndexDirection::Asc)
            .expire_after_seconds(3600)
            .to_model();

        assert_eq!(model.expire_after, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn grouping_rejects_whole_batch_on_one_invalid_definition() {
        let definitions = vec![
            IndexDefinition::new("orders").key("sku", IndexDirection::Asc),
            IndexDefinition::new("orders"),
        ];

        assert!(group_by_collection(&definitions).is_err());
    }

    #[test]
    fn grouping_batches_per_collection() {
        let definitions = vec![
            IndexDefinition::new("orders").key("sku", IndexDirection::Asc).unique(true),
            IndexDefinition::new("users").key("email", IndexDirection::Asc),
            IndexDefinition::new("orders").key("created_at", IndexDirection::Desc).name("recent"),
        ];

        let groups = group_by_collection(&definitions).unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups["orders"].len(), 2);
        assert!(groups["orders"][0].unique);
        assert_eq!(groups["orders"][1].resolved_name(), "recent");
        assert_eq!(groups["users"][0].resolved_name(), "email_1");
    }
}
