//! Entity metadata: the mapping from an entity's logical shape to its
//! physical storage shape.
//!
//! Metadata is declared once per entity type (see
//! [`Entity::metadata`](crate::entity::Entity::metadata)) and cached by the
//! [`MetadataRegistry`] for the lifetime of the process.
//!
//! # Example
//!
//! ```ignore
//! use docmapper::metadata::EntityMetadata;
//!
//! let metadata = EntityMetadata::builder("answers")
//!     .id("id")
//!     .property("question_id", "qid")
//!     .association("author", "uid", "users")
//!     .build();
//!
//! assert_eq!(metadata.physical_path("question_id"), "qid");
//! ```

use mea::rwlock::RwLock;
use std::{
    any::{TypeId, type_name},
    collections::HashMap,
    sync::Arc,
};

use crate::{entity::Entity, identifier::IdPolicy};

/// Keys treated as the identifier when an entity declares no id property.
pub const DEFAULT_ID_NAMES: [&str; 2] = ["id", "_id"];

/// Physical name of the identifier field.
pub const ID_FIELD: &str = "_id";

/// A reference from one entity's property to documents of another collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    /// Collection the referenced documents live in.
    pub collection: String,
    /// Identifier policy of the referenced collection.
    pub id_policy: IdPolicy,
}

/// Metadata of a single property.
#[derive(Debug, Clone)]
pub struct PropertyMetadata {
    name: String,
    field_name: String,
    id: bool,
    association: Option<Association>,
    embedded: Option<Arc<EntityMetadata>>,
}

impl PropertyMetadata {
    /// The logical (Rust-side) property name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The physical field name in stored documents.
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn is_id(&self) -> bool {
        self.id
    }

    pub fn association(&self) -> Option<&Association> {
        self.association.as_ref()
    }

    pub fn is_association(&self) -> bool {
        self.association.is_some()
    }

    /// Metadata of the nested document type, for embedded properties.
    pub fn embedded(&self) -> Option<&EntityMetadata> {
        self.embedded.as_deref()
    }
}

/// The result of resolving a logical field path.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    /// Physical dot path, e.g. `a.n` for logical `author.name`.
    pub field_path: String,
    /// The last property of the path.
    pub property: PropertyMetadata,
    /// Identifier policy of the entity that owns `property`.
    pub owner_policy: IdPolicy,
}

/// Immutable description of how an entity type is stored.
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    type_name: Option<String>,
    collection: String,
    id_policy: IdPolicy,
    properties: Vec<PropertyMetadata>,
}

impl EntityMetadata {
    pub fn builder(collection: impl Into<String>) -> EntityMetadataBuilder {
        EntityMetadataBuilder::new(collection.into())
    }

    /// The entity's type name, falling back to the collection name.
    pub fn type_name(&self) -> &str {
        self.type_name.as_deref().unwrap_or(&self.collection)
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn id_policy(&self) -> IdPolicy {
        self.id_policy
    }

    pub fn properties(&self) -> &[PropertyMetadata] {
        &self.properties
    }

    pub fn id_property(&self) -> Option<&PropertyMetadata> {
        self.properties.iter().find(|p| p.id)
    }

    pub fn has_id_property(&self) -> bool {
        self.id_property().is_some()
    }

    /// Looks up a property by its logical name.
    pub fn property(&self, name: &str) -> Option<&PropertyMetadata> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Whether `key` addresses the identifier: the declared id property by
    /// logical or physical name, or one of [`DEFAULT_ID_NAMES`] when no id
    /// property is declared.
    pub fn is_id_key(&self, key: &str) -> bool {
        match self.id_property() {
            Some(id) => id.name == key || id.field_name == key,
            None => DEFAULT_ID_NAMES.contains(&key),
        }
    }

    /// Resolves a dot-separated logical path against this entity and its
    /// embedded properties. Returns `None` if any segment is unknown.
    pub fn resolve_path(&self, path: &str) -> Option<ResolvedPath> {
        let mut owner = self;
        let mut physical = Vec::new();
        let mut segments = path.split('.').peekable();

        while let Some(segment) = segments.next() {
            let property = owner.property(segment)?;
            physical.push(property.field_name.as_str());

            if segments.peek().is_none() {
                return Some(ResolvedPath {
                    field_path: physical.join("."),
                    property: property.clone(),
                    owner_policy: owner.id_policy,
                });
            }

            owner = property.embedded()?;
        }

        None
    }

    /// The property a query key targets, identifier keys included.
    pub fn target_property(&self, key: &str) -> Option<ResolvedPath> {
        if self.is_id_key(key) {
            return self.id_property().map(|id| ResolvedPath {
                field_path: id.field_name.clone(),
                property: id.clone(),
                owner_policy: self.id_policy,
            });
        }

        self.resolve_path(key)
    }

    /// The physical key a logical query key is written under.
    pub fn physical_path(&self, key: &str) -> String {
        if !self.has_id_property() && DEFAULT_ID_NAMES.contains(&key) {
            return ID_FIELD.to_string();
        }

        self.resolve_path(key)
            .map(|resolved| resolved.field_path)
            .unwrap_or_else(|| key.to_string())
    }
}

/// Builder for [`EntityMetadata`].
pub struct EntityMetadataBuilder {
    type_name: Option<String>,
    collection: String,
    id_policy: IdPolicy,
    properties: Vec<PropertyMetadata>,
}

impl EntityMetadataBuilder {
    pub fn new(collection: String) -> Self {
        Self {
            type_name: None,
            collection,
            id_policy: IdPolicy::default(),
            properties: Vec::new(),
        }
    }

    pub fn type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// Declares the identifier property. It is always stored as `_id`.
    pub fn id(mut self, name: impl Into<String>) -> Self {
        self.properties.retain(|p| !p.id);
        self.properties.push(PropertyMetadata {
            name: name.into(),
            field_name: ID_FIELD.to_string(),
            id: true,
            association: None,
            embedded: None,
        });
        self
    }

    /// Marks the collection as keeping its identifiers verbatim.
    pub fn legacy_ids(mut self) -> Self {
        self.id_policy = IdPolicy::Legacy;
        self
    }

    pub fn id_policy(mut self, id_policy: IdPolicy) -> Self {
        self.id_policy = id_policy;
        self
    }

    pub fn property(mut self, name: impl Into<String>, field_name: impl Into<String>) -> Self {
        self.properties.push(PropertyMetadata {
            name: name.into(),
            field_name: field_name.into(),
            id: false,
            association: None,
            embedded: None,
        });
        self
    }

    /// Declares a property holding a nested document described by `embedded`.
    pub fn embedded(
        mut self,
        name: impl Into<String>,
        field_name: impl Into<String>,
        embedded: EntityMetadata,
    ) -> Self {
        self.properties.push(PropertyMetadata {
            name: name.into(),
            field_name: field_name.into(),
            id: false,
            association: None,
            embedded: Some(Arc::new(embedded)),
        });
        self
    }

    /// Declares a property referencing documents of a canonical-id collection.
    pub fn association(
        self,
        name: impl Into<String>,
        field_name: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        self.association_with_policy(name, field_name, collection, IdPolicy::Canonical)
    }

    pub fn association_with_policy(
        mut self,
        name: impl Into<String>,
        field_name: impl Into<String>,
        collection: impl Into<String>,
        id_policy: IdPolicy,
    ) -> Self {
        self.properties.push(PropertyMetadata {
            name: name.into(),
            field_name: field_name.into(),
            id: false,
            association: Some(Association {
                collection: collection.into(),
                id_policy,
            }),
            embedded: None,
        });
        self
    }

    pub fn build(self) -> EntityMetadata {
        EntityMetadata {
            type_name: self.type_name,
            collection: self.collection,
            id_policy: self.id_policy,
            properties: self.properties,
        }
    }
}

/// Process-wide cache of entity metadata, keyed by entity type.
///
/// Metadata is built on first lookup through [`Entity::metadata`] and never
/// rebuilt afterwards. The registry is cheap to share behind an `Arc`.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    entries: RwLock<HashMap<TypeId, Arc<EntityMetadata>>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached metadata for `E`, building it on first use.
    pub async fn resolve<E: Entity>(&self) -> Arc<EntityMetadata> {
        let key = TypeId::of::<E>();

        if let Some(metadata) = self.entries.read().await.get(&key) {
            return metadata.clone();
        }

        let mut entries = self.entries.write().await;
        entries
            .entry(key)
            .or_insert_with(|| {
                tracing::debug!("Building entity metadata for {}", type_name::<E>());

                let mut metadata = E::metadata();
                metadata
                    .type_name
                    .get_or_insert_with(|| type_name::<E>().to_string());
                Arc::new(metadata)
            })
            .clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn answers() -> EntityMetadata {
        EntityMetadata::builder("answers")
            .id("id")
            .property("question_id", "qid")
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

    #[test]
    fn resolves_flat_and_nested_paths() {
        let metadata = answers();

        assert_eq!(metadata.physical_path("question_id"), "qid");
        assert_eq!(metadata.physical_path("author.name"), "a.n");
        assert_eq!(metadata.physical_path("author.id"), "a._id");
        assert_eq!(metadata.physical_path("id"), "_id");
    }

    #[test]
    fn unknown_segments_leave_the_key_unchanged() {
        let metadata = answers();

        assert!(metadata.resolve_path("author.age").is_none());
        assert_eq!(metadata.physical_path("author.age"), "author.age");
        assert_eq!(metadata.physical_path("votes"), "votes");
    }

    #[test]
    fn id_keys_follow_the_declared_property() {
        let metadata = answers();

        assert!(metadata.is_id_key("id"));
        assert!(metadata.is_id_key("_id"));
        assert!(!metadata.is_id_key("qid"));

        let target = metadata.target_property("_id").unwrap();
        assert_eq!(target.field_path, "_id");
        assert!(target.property.is_id());
    }

    #[test]
    fn default_id_aliases_apply_without_declared_id() {
        let metadata = EntityMetadata::builder("events").build();

        assert!(metadata.is_id_key("id"));
        assert!(metadata.is_id_key("_id"));
        assert_eq!(metadata.physical_path("id"), "_id");
        assert!(metadata.target_property("id").is_none());
    }

    #[test]
    fn associations_carry_the_referenced_collection() {
        let metadata = answers();
        let editor = metadata.resolve_path("editor").unwrap();

        assert!(editor.property.is_association());
        assert_eq!(editor.property.association().unwrap().collection, "users");
    }
}
