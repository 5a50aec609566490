//! Core trait for persisted documents and their BSON conversions.
//!
//! Every type the store persists implements [`Document`]: it names its collection, exposes its
//! identifier and lets the store write back the identifier the backend assigned on insert.

use bson::{Bson, Document as BsonDocument, de::deserialize_from_document, oid::ObjectId, ser::serialize_to_document};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Name of the identifier field in every stored document.
pub const ID_FIELD: &str = "_id";

/// Capability every persisted record type must implement.
///
/// The identifier is `None` until the document has been inserted, unless the caller supplied
/// one up front. After a successful insert the store calls [`set_id`](Document::set_id) with the
/// identifier the backend assigned; nothing else should call it afterwards.
///
/// The identifier field is expected to serialize as `_id` and to be skipped while empty:
///
/// ```ignore
/// use docstore::document::Document;
/// use bson::oid::ObjectId;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct Order {
///     #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
///     pub id: Option<ObjectId>,
///     pub sku: String,
/// }
///
/// impl Document for Order {
///     fn collection_name() -> &'static str { "orders" }
///     fn id(&self) -> Option<ObjectId> { self.id }
///     fn set_id(&mut self, id: ObjectId) { self.id = Some(id); }
/// }
/// ```
///
/// `#[derive(Document)]` from the `docstore` crate generates the same implementation.
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    /// Returns the name of the collection documents of this type live in.
    fn collection_name() -> &'static str;

    /// Returns this document's identifier, if one has been assigned.
    fn id(&self) -> Option<ObjectId>;

    /// Records the identifier assigned by the backend.
    fn set_id(&mut self, id: ObjectId);
}

/// Conversion helpers between documents and raw BSON, implemented for every [`Document`].
pub trait DocumentExt: Document {
    /// Serializes this document for storage.
    ///
    /// An explicit `_id: null` is dropped so the backend assigns an identifier.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidDocument`] if the type does not serialize to a map.
    fn to_bson_document(&self) -> DocumentStoreResult<BsonDocument>;

    /// Decodes a stored document.
    fn from_bson_document(document: BsonDocument) -> DocumentStoreResult<Self>
    where
        Self: Sized;
}

impl<D: Document> DocumentExt for D {
    fn to_bson_document(&self) -> DocumentStoreResult<BsonDocument> {
        let mut document = serialize_to_document(self).map_err(|e| {
            DocumentStoreError::InvalidDocument(format!(
                "{} does not serialize to a document: {e}",
                D::collection_name()
            ))
        })?;

        if matches!(document.get(ID_FIELD), Some(Bson::Null)) {
            document.remove(ID_FIELD);
        }

        Ok(document)
    }

    fn from_bson_document(document: BsonDocument) -> DocumentStoreResult<Self> {
        Ok(deserialize_from_document(document)?)
    }
}
