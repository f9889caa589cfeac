//! Update documents and write acknowledgments.

use bson::{Bson, Document};

/// An ordered set of update operators keyed by logical field names.
///
/// ```ignore
/// let update = Update::new()
///     .set("status", "closed")
///     .inc("votes", 1)
///     .push("tags", "answered");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    operators: Document,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an update document that already uses operator keys.
    pub fn from_document(operators: Document) -> Self {
        Self { operators }
    }

    fn with(mut self, operator: &str, field: String, value: Bson) -> Self {
        match self.operators.get_mut(operator) {
            Some(Bson::Document(fields)) => {
                fields.insert(field, value);
            }
            _ => {
                let mut fields = Document::new();
                fields.insert(field, value);
                self.operators.insert(operator, fields);
            }
        }
        self
    }

    /// Sets `field` to `value` (`$set`).
    pub fn set(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.with("$set", field.into(), value.into())
    }

    /// Removes `field` (`$unset`).
    pub fn unset(self, field: impl Into<String>) -> Self {
        self.with("$unset", field.into(), Bson::String(String::new()))
    }

    /// Increments a numeric field (`$inc`).
    pub fn inc(self, field: impl Into<String>, amount: impl Into<Bson>) -> Self {
        self.with("$inc", field.into(), amount.into())
    }

    /// Appends to an array field (`$push`).
    pub fn push(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.with("$push", field.into(), value.into())
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    pub fn as_document(&self) -> &Document {
        &self.operators
    }
}

/// Which documents an update applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// The first matching document.
    First,
    /// Every matching document.
    Multi,
    /// The first matching document, inserting one when none matches.
    Upsert,
}

/// The store's acknowledgment of a write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<Bson>,
}

impl WriteOutcome {
    /// Number of documents the write touched, counting an upsert as one.
    pub fn affected(&self) -> u64 {
        match self.upserted_id {
            Some(_) => self.matched + 1,
            None => self.matched,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;

    #[test]
    fn operators_group_their_fields() {
        let update = Update::new()
            .set("status", "closed")
            .inc("votes", 1)
            .set("closed_by", "ana")
            .unset("draft");

        assert_eq!(
            update.as_document(),
            &doc! {
                "$set": { "status": "closed", "closed_by": "ana" },
                "$inc": { "votes": 1 },
                "$unset": { "draft": "" },
            }
        );
    }

    #[test]
    fn upserts_count_as_affected() {
        let outcome = WriteOutcome {
            matched: 0,
            modified: 0,
            upserted_id: Some(Bson::Int32(1)),
        };

        assert_eq!(outcome.affected(), 1);
        assert_eq!(WriteOutcome::default().affected(), 0);
    }
}
