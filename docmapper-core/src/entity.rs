//! Core traits for typed entities and their conversion to BSON documents.
//!
//! An entity is any serde-serializable type stored in a named collection.
//! [`Entity`] additionally carries an identifier and declares the
//! [`EntityMetadata`] the query mapper uses to translate logical field names.
//!
//! # Example
//!
//! ```ignore
//! use docmapper::prelude::*;
//! use bson::oid::ObjectId;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, ByExample)]
//! pub struct Answer {
//!     #[serde(rename = "_id")]
//!     #[example(skip)]
//!     pub id: ObjectId,
//!     #[serde(rename = "qid")]
//!     pub question_id: Option<String>,
//! }
//!
//! impl Mapped for Answer {
//!     fn collection_name() -> &'static str {
//!         "answers"
//!     }
//! }
//!
//! impl Entity for Answer {
//!     type Id = ObjectId;
//!
//!     fn id(&self) -> &ObjectId {
//!         &self.id
//!     }
//!
//!     fn metadata() -> EntityMetadata {
//!         EntityMetadata::builder("answers")
//!             .id("id")
//!             .property("question_id", "qid")
//!             .build()
//!     }
//! }
//! ```

use bson::{
    Bson, Document,
    de::deserialize_from_document,
    ser::{serialize_to_bson, serialize_to_document},
};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::{error::DataAccessResult, metadata::EntityMetadata};

/// A serializable type stored under a collection (or sub-document) name.
///
/// Sub-documents only need this trait; their collection name doubles as the
/// default field name they are stored under inside an owning document.
pub trait Mapped: Serialize + for<'de> Deserialize<'de> + Send + Sync + 'static {
    /// Returns the name of the collection this type is stored in.
    fn collection_name() -> &'static str;
}

/// A top-level document with an identifier and storage metadata.
pub trait Entity: Mapped + Clone {
    /// The identifier type, e.g. `ObjectId`, `String` or
    /// [`Identifier`](crate::identifier::Identifier).
    type Id: Into<Bson> + Clone + Debug + Send + Sync + 'static;

    /// Returns a reference to this entity's identifier.
    fn id(&self) -> &Self::Id;

    /// Describes how this entity is stored.
    ///
    /// The default declares the collection and an `id` property stored as
    /// `_id`, with canonical identifiers and no other mapped properties.
    fn metadata() -> EntityMetadata {
        EntityMetadata::builder(Self::collection_name())
            .id("id")
            .build()
    }
}

/// BSON conversion helpers, implemented for every [`Mapped`] type.
pub trait EntityExt: Mapped {
    /// Converts this value into a BSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the value does not
    /// serialize to a document.
    fn to_document(&self) -> DataAccessResult<Document>;

    /// Creates a value from a BSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    fn from_document(document: Document) -> DataAccessResult<Self>;
}

impl<M: Mapped> EntityExt for M {
    fn to_document(&self) -> DataAccessResult<Document> {
        Ok(serialize_to_document(self)?)
    }

    fn from_document(document: Document) -> DataAccessResult<Self> {
        Ok(deserialize_from_document(document)?)
    }
}

/// Field enumeration used to build equality criteria from a sample value.
///
/// Usually derived with `#[derive(ByExample)]`, which emits one entry per
/// field whose serialized value is not null, in declaration order. Fields
/// marked `#[example(skip)]` are never emitted.
///
/// Names are the Rust field names, not their `#[serde(rename)]` forms. The
/// mapper turns them into stored names, so every field must be declared as
/// a property in the entity's [`EntityMetadata`](crate::metadata::EntityMetadata)
/// for its criterion to hit the stored field.
pub trait ByExample {
    /// Returns `(logical field name, value)` pairs for every populated field.
    fn example_criteria(&self) -> DataAccessResult<Vec<(&'static str, Bson)>>;
}

/// Serializes a field value for [`ByExample`], returning `None` for nulls.
pub fn example_value<T: Serialize + ?Sized>(value: &T) -> DataAccessResult<Option<Bson>> {
    match serialize_to_bson(value)? {
        Bson::Null | Bson::Undefined => Ok(None),
        value => Ok(Some(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};
    use docmapper_macros::ByExample;
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, Serialize, Deserialize, ByExample)]
    struct Question {
        #[serde(rename = "_id")]
        #[example(skip)]
        id: ObjectId,
        title: Option<String>,
        #[serde(rename = "vc")]
        votes: Option<i32>,
        tags: Vec<String>,
    }

    impl Mapped for Question {
        fn collection_name() -> &'static str {
            "questions"
        }
    }

    impl Entity for Question {
        type Id = ObjectId;

        fn id(&self) -> &ObjectId {
            &self.id
        }
    }

    #[test]
    fn documents_round_trip_through_serde() {
        let question = Question {
            id: ObjectId::new(),
            title: Some("Why?".into()),
            votes: None,
            tags: vec!["rust".into()],
        };

        let document = question.to_document().unwrap();
        assert_eq!(document.get("_id"), Some(&Bson::ObjectId(question.id)));
        assert_eq!(document.get("vc"), Some(&Bson::Null));

        let restored = Question::from_document(document).unwrap();
        assert_eq!(restored.title.as_deref(), Some("Why?"));
    }

    #[test]
    fn by_example_skips_nulls_and_marked_fields() {
        let sample = Question {
            id: ObjectId::new(),
            title: Some("Why?".into()),
            votes: None,
            tags: vec![],
        };

        let criteria = sample.example_criteria().unwrap();
        let rendered: Document = criteria
            .into_iter()
            .map(|(field, value)| (field.to_string(), value))
            .collect();

        assert_eq!(rendered, doc! { "title": "Why?", "tags": [] });
    }

    #[test]
    fn default_metadata_declares_the_id() {
        let metadata = Question::metadata();

        assert_eq!(metadata.collection(), "questions");
        assert!(metadata.is_id_key("id"));
        assert_eq!(metadata.physical_path("id"), "_id");
    }
}
