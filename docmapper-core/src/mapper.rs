//! Translation of logical criteria documents into native query documents.
//!
//! The mapper walks a criteria document recursively. Keys are rewritten from
//! logical property paths to physical field paths through [`EntityMetadata`],
//! identifier values are coerced according to the owning collection's
//! [`IdPolicy`], and association values are turned into references.
//!
//! Mapping never mutates its input and never fails on unknown fields: a key
//! that does not resolve is written unchanged.

use bson::{Bson, Document, doc, oid::ObjectId};
use std::{fmt::Debug, sync::Arc};

use crate::{
    error::{DataAccessError, DataAccessResult},
    identifier::{IdPolicy, Identifier},
    metadata::{Association, EntityMetadata, ID_FIELD},
};

const LOGICAL_KEYWORDS: [&str; 3] = ["$or", "$nor", "$and"];

fn is_logical(key: &str) -> bool {
    LOGICAL_KEYWORDS.contains(&key)
}

/// Converts individual values on their way into a native document.
pub trait ValueConverter: Send + Sync + Debug {
    /// Generic conversion of a plain value into its stored form.
    fn to_native(&self, value: &Bson) -> Bson;

    /// Coerces a value into an `ObjectId`, or `None` when not applicable.
    fn to_object_id(&self, value: &Bson) -> Option<ObjectId>;

    /// Converts a value into a reference to a document of another collection.
    fn to_reference(&self, value: &Bson, association: &Association) -> Bson;
}

/// The default [`ValueConverter`].
///
/// Values pass through unchanged; identifiers canonicalize through
/// [`Identifier::try_canonicalize`]; references are written as
/// `{ $ref: <collection>, $id: <id> }`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardConverter;

impl ValueConverter for StandardConverter {
    fn to_native(&self, value: &Bson) -> Bson {
        value.clone()
    }

    fn to_object_id(&self, value: &Bson) -> Option<ObjectId> {
        Identifier::try_canonicalize(value)
    }

    fn to_reference(&self, value: &Bson, association: &Association) -> Bson {
        if is_reference(value) || matches!(value, Bson::Null) {
            return value.clone();
        }

        let id = match association.id_policy {
            IdPolicy::Legacy => value.clone(),
            IdPolicy::Canonical => self
                .to_object_id(value)
                .map(Bson::ObjectId)
                .unwrap_or_else(|| value.clone()),
        };

        Bson::Document(doc! {
            "$ref": association.collection.clone(),
            "$id": id,
        })
    }
}

fn is_reference(value: &Bson) -> bool {
    matches!(value, Bson::Document(document) if document.contains_key("$ref"))
}

/// A single-key document whose key starts with `$`, e.g. `{ $ne: 5 }`.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyword<'a> {
    pub key: &'a str,
    pub value: &'a Bson,
}

impl<'a> Keyword<'a> {
    /// Whether `document` has the shape of a keyword.
    pub fn is_keyword(document: &Document) -> bool {
        document.len() == 1
            && document
                .keys()
                .next()
                .is_some_and(|key| key.starts_with('$'))
    }

    /// Reads a keyword out of `document`.
    ///
    /// # Errors
    ///
    /// Returns [`DataAccessError::InvalidQuery`] unless the document has
    /// exactly one key and that key starts with `$`.
    pub fn from_document(document: &'a Document) -> DataAccessResult<Self> {
        let mut entries = document.iter();

        match (entries.next(), entries.next()) {
            (Some((key, value)), None) if key.starts_with('$') => Ok(Keyword { key, value }),
            (Some(_), Some(_)) => Err(DataAccessError::InvalidQuery(format!(
                "Keyword must have a single key only, found {}",
                document.len()
            ))),
            _ => Err(DataAccessError::InvalidQuery(format!(
                "Not a keyword document: {}",
                document
            ))),
        }
    }

    pub fn is_logical(&self) -> bool {
        is_logical(self.key)
    }
}

/// Recursive translator from logical criteria to native query documents.
#[derive(Debug, Clone)]
pub struct QueryMapper {
    converter: Arc<dyn ValueConverter>,
}

impl Default for QueryMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryMapper {
    pub fn new() -> Self {
        Self::with_converter(Arc::new(StandardConverter))
    }

    pub fn with_converter(converter: Arc<dyn ValueConverter>) -> Self {
        Self { converter }
    }

    /// Maps a logical criteria document into a native one.
    ///
    /// Without metadata, keys are kept and only values are converted.
    ///
    /// # Errors
    ///
    /// Returns [`DataAccessError::InvalidQuery`] when a logical keyword
    /// (`$or`, `$nor`, `$and`) has an operand that is not an array of
    /// documents, or when identifier membership operands are not arrays.
    pub fn map(
        &self,
        query: &Document,
        metadata: Option<&EntityMetadata>,
    ) -> DataAccessResult<Document> {
        if Keyword::is_keyword(query) {
            return self.map_keyword(&Keyword::from_document(query)?, metadata);
        }

        let mut result = Document::new();

        for (key, value) in query {
            if is_logical(key) {
                let keyword = Keyword { key, value };
                for (key, mapped) in self.map_keyword(&keyword, metadata)? {
                    result.insert(key, mapped);
                }
                continue;
            }

            if key.starts_with('$') {
                result.insert(key.clone(), self.convert_simple_or_document(value, metadata)?);
                continue;
            }

            let new_key = self.determine_key(key, metadata);
            let mapped = self.map_field(key, &new_key, value, metadata)?;
            result.insert(new_key, mapped);
        }

        Ok(result)
    }

    /// Maps the keys of a sort document to physical paths; directions are kept.
    pub fn map_sort(&self, sort: &Document, metadata: Option<&EntityMetadata>) -> Document {
        sort.iter()
            .map(|(key, direction)| (self.determine_key(key, metadata), direction.clone()))
            .collect()
    }

    /// Maps the inner document of every update operator.
    ///
    /// # Errors
    ///
    /// Returns [`DataAccessError::InvalidQuery`] when a top-level key is not
    /// an operator or an operator's operand is not a document.
    pub fn map_update(
        &self,
        update: &Document,
        metadata: Option<&EntityMetadata>,
    ) -> DataAccessResult<Document> {
        let mut result = Document::new();

        for (operator, operand) in update {
            let Some(fields) = operator
                .starts_with('$')
                .then(|| operand.as_document())
                .flatten()
            else {
                return Err(DataAccessError::InvalidQuery(format!(
                    "Update entries must be operator documents, found {}",
                    operator
                )));
            };

            let mut mapped = Document::new();
            for (key, value) in fields {
                let new_key = self.determine_key(key, metadata);
                let value = match metadata.and_then(|m| m.resolve_path(key)) {
                    Some(resolved) => match resolved.property.association() {
                        Some(association) => self.convert_association(value, association),
                        None => self.convert_simple_or_document(value, resolved.property.embedded())?,
                    },
                    None => self.convert_simple_or_document(value, None)?,
                };
                mapped.insert(new_key, value);
            }

            result.insert(operator.clone(), mapped);
        }

        Ok(result)
    }

    fn map_keyword(
        &self,
        keyword: &Keyword<'_>,
        metadata: Option<&EntityMetadata>,
    ) -> DataAccessResult<Document> {
        if !keyword.is_logical() {
            return Ok(doc! {
                keyword.key: self.convert_simple_or_document(keyword.value, metadata)?,
            });
        }

        let Bson::Array(conditions) = keyword.value else {
            return Err(DataAccessError::InvalidQuery(format!(
                "{} requires an array of documents",
                keyword.key
            )));
        };

        let mapped = conditions
            .iter()
            .map(|condition| match condition {
                Bson::Document(condition) => self.map(condition, metadata).map(Bson::Document),
                other => Err(DataAccessError::InvalidQuery(format!(
                    "{} requires an array of documents, found {}",
                    keyword.key, other
                ))),
            })
            .collect::<DataAccessResult<Vec<_>>>()?;

        Ok(doc! { keyword.key: mapped })
    }

    fn determine_key(&self, key: &str, metadata: Option<&EntityMetadata>) -> String {
        match metadata {
            Some(metadata) => metadata.physical_path(key),
            None => key.to_string(),
        }
    }

    fn map_field(
        &self,
        key: &str,
        new_key: &str,
        value: &Bson,
        metadata: Option<&EntityMetadata>,
    ) -> DataAccessResult<Bson> {
        let Some(metadata) = metadata else {
            return self.convert_simple_or_document(value, None);
        };

        let target = metadata.target_property(key);

        if new_key == ID_FIELD || target.as_ref().is_some_and(|t| t.property.is_id()) {
            let policy = target
                .as_ref()
                .map(|t| t.owner_policy)
                .unwrap_or_else(|| metadata.id_policy());
            return self.map_id(value, policy);
        }

        let Some(target) = target else {
            return self.convert_simple_or_document(value, None);
        };

        if let Some(association) = target.property.association() {
            return match value {
                Bson::Document(document) if Keyword::is_keyword(document) => {
                    let keyword = Keyword::from_document(document)?;
                    Ok(Bson::Document(doc! {
                        keyword.key: self.convert_association(keyword.value, association),
                    }))
                }
                _ => Ok(self.convert_association(value, association)),
            };
        }

        self.convert_simple_or_document(value, target.property.embedded())
    }

    fn map_id(&self, value: &Bson, policy: IdPolicy) -> DataAccessResult<Bson> {
        if policy.is_legacy() {
            return Ok(value.clone());
        }

        let Bson::Document(operators) = value else {
            return Ok(self.convert_id(value));
        };

        let is_id_operator = ["$in", "$nin", "$ne"]
            .iter()
            .any(|op| operators.contains_key(op));
        if !is_id_operator {
            return Ok(Bson::Document(self.map(operators, None)?));
        }

        let mut result = operators.clone();
        for op in ["$in", "$nin"] {
            match operators.get(op) {
                Some(Bson::Array(ids)) => {
                    let converted: Vec<Bson> = ids.iter().map(|id| self.convert_id(id)).collect();
                    result.insert(op, converted);
                }
                Some(other) => {
                    return Err(DataAccessError::InvalidQuery(format!(
                        "{} on an identifier requires an array, found {}",
                        op, other
                    )));
                }
                None => {}
            }
        }

        if let Some(excluded) = operators.get("$ne") {
            result.insert("$ne", self.convert_id(excluded));
        }

        Ok(Bson::Document(result))
    }

    fn convert_id(&self, value: &Bson) -> Bson {
        match self.converter.to_object_id(value) {
            Some(oid) => Bson::ObjectId(oid),
            None => {
                tracing::trace!("Identifier {} is not an ObjectId, keeping it as is", value);
                self.converter.to_native(value)
            }
        }
    }

    fn convert_association(&self, value: &Bson, association: &Association) -> Bson {
        match value {
            Bson::Array(elements) => Bson::Array(
                elements
                    .iter()
                    .map(|element| self.converter.to_reference(element, association))
                    .collect(),
            ),
            _ => self.converter.to_reference(value, association),
        }
    }

    fn convert_simple_or_document(
        &self,
        value: &Bson,
        metadata: Option<&EntityMetadata>,
    ) -> DataAccessResult<Bson> {
        match value {
            Bson::Document(document) => Ok(Bson::Document(self.map(document, metadata)?)),
            Bson::Array(elements) => Ok(Bson::Array(
                elements
                    .iter()
                    .map(|element| self.converter.to_native(element))
                    .collect(),
            )),
            _ => Ok(self.converter.to_native(value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const HEX: &str = "5f0c4b2e9d1a3c0012345678";
    const OTHER_HEX: &str = "5f0c4b2e9d1a3c00abcdef01";

    fn oid(hex: &str) -> ObjectId {
        ObjectId::parse_str(hex).unwrap()
    }

    fn answers() -> EntityMetadata {
        EntityMetadata::builder("answers")
            .id("id")
            .property("question_id", "qid")
            .property("votes", "vc")
            .embedded(
                "author",
                "a",
                EntityMetadata::builder("users")
                    .id("id")
                    .property("name", "n")
                    .build(),
            )
            .association("editor", "eid", "users")
            .build()
    }

    fn questions() -> EntityMetadata {
        EntityMetadata::builder("questions")
            .id("id")
            .legacy_ids()
            .property("title", "t")
            .build()
    }

    #[test]
    fn documents_without_metadata_are_unchanged() {
        let mapper = QueryMapper::new();
        let query = doc! {
            "status": "open",
            "id": HEX,
            "votes": { "$gt": 3, "$lt": 9 },
            "$or": [{ "a": 1 }, { "b": { "$in": [1, 2] } }],
        };

        let mapped = mapper.map(&query, None).unwrap();
        assert_eq!(mapped, query);
        assert_eq!(mapper.map(&mapped, None).unwrap(), mapped);
    }

    #[test]
    fn empty_documents_map_to_empty_documents() {
        let mapper = QueryMapper::new();

        assert_eq!(mapper.map(&Document::new(), Some(&answers())).unwrap(), Document::new());
        assert_eq!(mapper.map(&Document::new(), None).unwrap(), Document::new());
    }

    #[test]
    fn keys_resolve_to_physical_paths() {
        let mapper = QueryMapper::new();
        let query = doc! {
            "question_id": "q-1",
            "author.name": "ana",
            "author": { "name": "ana" },
            "unknown.path": 1,
        };

        assert_eq!(
            mapper.map(&query, Some(&answers())).unwrap(),
            doc! {
                "qid": "q-1",
                "a.n": "ana",
                "a": { "n": "ana" },
                "unknown.path": 1,
            }
        );
    }

    #[test]
    fn canonical_ids_convert_with_fallback() {
        let mapper = QueryMapper::new();
        let metadata = answers();

        assert_eq!(
            mapper.map(&doc! { "id": HEX }, Some(&metadata)).unwrap(),
            doc! { "_id": oid(HEX) }
        );
        assert_eq!(
            mapper.map(&doc! { "_id": "q-1024" }, Some(&metadata)).unwrap(),
            doc! { "_id": "q-1024" }
        );
    }

    #[test]
    fn id_membership_converts_every_element_in_order() {
        let mapper = QueryMapper::new();
        let query = doc! { "id": { "$in": [OTHER_HEX, "q-7", HEX], "$exists": true } };

        assert_eq!(
            mapper.map(&query, Some(&answers())).unwrap(),
            doc! { "_id": { "$in": [oid(OTHER_HEX), "q-7", oid(HEX)], "$exists": true } }
        );

        let query = doc! { "_id": { "$nin": [HEX] } };
        assert_eq!(
            mapper.map(&query, Some(&answers())).unwrap(),
            doc! { "_id": { "$nin": [oid(HEX)] } }
        );
    }

    #[test]
    fn id_exclusion_converts() {
        let mapper = QueryMapper::new();

        assert_eq!(
            mapper.map(&doc! { "id": { "$ne": HEX } }, Some(&answers())).unwrap(),
            doc! { "_id": { "$ne": oid(HEX) } }
        );
    }

    #[test]
    fn other_id_operators_map_without_conversion() {
        let mapper = QueryMapper::new();

        assert_eq!(
            mapper.map(&doc! { "id": { "$gt": HEX } }, Some(&answers())).unwrap(),
            doc! { "_id": { "$gt": HEX } }
        );
    }

    #[test]
    fn legacy_collections_keep_ids_verbatim() {
        let mapper = QueryMapper::new();
        let metadata = questions();

        for query in [
            doc! { "id": HEX },
            doc! { "_id": { "$in": [HEX, "q-1"] } },
            doc! { "_id": { "$nin": [HEX] } },
            doc! { "_id": { "$ne": HEX } },
        ] {
            let mut expected = query.clone();
            if let Some(value) = expected.remove("id") {
                expected.insert("_id", value);
            }

            assert_eq!(mapper.map(&query, Some(&metadata)).unwrap(), expected);
        }
    }

    #[test]
    fn id_aliases_apply_without_declared_id() {
        let mapper = QueryMapper::new();
        let metadata = EntityMetadata::builder("events").build();

        assert_eq!(
            mapper.map(&doc! { "id": HEX }, Some(&metadata)).unwrap(),
            doc! { "_id": oid(HEX) }
        );
    }

    #[test]
    fn logical_keywords_recurse_with_metadata() {
        let mapper = QueryMapper::new();
        let query = doc! {
            "$or": [
                { "question_id": "q-1" },
                { "$nor": [{ "votes": { "$lt": 0 } }, { "id": HEX }] },
            ]
        };

        assert_eq!(
            mapper.map(&query, Some(&answers())).unwrap(),
            doc! {
                "$or": [
                    { "qid": "q-1" },
                    { "$nor": [{ "vc": { "$lt": 0 } }, { "_id": oid(HEX) }] },
                ]
            }
        );
    }

    #[test]
    fn logical_keywords_inside_conjunctions_are_mapped() {
        let mapper = QueryMapper::new();
        let query = doc! {
            "question_id": "q-1",
            "$and": [{ "votes": 1 }, { "author.name": "ana" }],
        };

        assert_eq!(
            mapper.map(&query, Some(&answers())).unwrap(),
            doc! {
                "qid": "q-1",
                "$and": [{ "vc": 1 }, { "a.n": "ana" }],
            }
        );
    }

    #[test]
    fn malformed_logical_keywords_are_rejected() {
        let mapper = QueryMapper::new();

        assert!(matches!(
            mapper.map(&doc! { "$or": { "a": 1 } }, None),
            Err(DataAccessError::InvalidQuery(_))
        ));
        assert!(matches!(
            mapper.map(&doc! { "$nor": [1, 2] }, None),
            Err(DataAccessError::InvalidQuery(_))
        ));
    }

    #[test]
    fn keywords_have_exactly_one_key() {
        let single = doc! { "$ne": 5 };
        let keyword = Keyword::from_document(&single).unwrap();
        assert_eq!(keyword.key, "$ne");
        assert_eq!(keyword.value, &Bson::Int32(5));

        let double = doc! { "$gt": 1, "$lt": 2 };
        assert!(!Keyword::is_keyword(&double));
        assert!(Keyword::from_document(&double).is_err());
        assert!(Keyword::from_document(&doc! { "a": 1 }).is_err());
    }

    #[test]
    fn associations_become_references() {
        let mapper = QueryMapper::new();
        let existing = doc! { "$ref": "users", "$id": "u-1" };
        let query = doc! { "editor": [HEX, Bson::Document(existing.clone())] };

        assert_eq!(
            mapper.map(&query, Some(&answers())).unwrap(),
            doc! {
                "eid": [
                    { "$ref": "users", "$id": oid(HEX) },
                    existing,
                ]
            }
        );
    }

    #[test]
    fn association_keywords_map_their_operand() {
        let mapper = QueryMapper::new();

        assert_eq!(
            mapper.map(&doc! { "editor": { "$in": [HEX] } }, Some(&answers())).unwrap(),
            doc! { "eid": { "$in": [{ "$ref": "users", "$id": oid(HEX) }] } }
        );
    }

    #[test]
    fn custom_converters_replace_id_coercion() {
        #[derive(Debug)]
        struct NeverCanonical;

        impl ValueConverter for NeverCanonical {
            fn to_native(&self, value: &Bson) -> Bson {
                value.clone()
            }

            fn to_object_id(&self, _: &Bson) -> Option<ObjectId> {
                None
            }

            fn to_reference(&self, value: &Bson, _: &Association) -> Bson {
                value.clone()
            }
        }

        let mapper = QueryMapper::with_converter(Arc::new(NeverCanonical));

        assert_eq!(
            mapper.map(&doc! { "id": HEX }, Some(&answers())).unwrap(),
            doc! { "_id": HEX }
        );
    }

    #[test]
    fn sort_keys_map_to_physical_paths() {
        let mapper = QueryMapper::new();

        assert_eq!(
            mapper.map_sort(&doc! { "votes": -1, "author.name": 1, "id": 1 }, Some(&answers())),
            doc! { "vc": -1, "a.n": 1, "_id": 1 }
        );
    }

    #[test]
    fn update_operators_map_their_fields() {
        let mapper = QueryMapper::new();
        let update = doc! {
            "$set": { "question_id": "q-2", "editor": HEX },
            "$inc": { "votes": 1 },
        };

        assert_eq!(
            mapper.map_update(&update, Some(&answers())).unwrap(),
            doc! {
                "$set": { "qid": "q-2", "eid": { "$ref": "users", "$id": oid(HEX) } },
                "$inc": { "vc": 1 },
            }
        );

        assert!(mapper.map_update(&doc! { "votes": 1 }, None).is_err());
    }
}
