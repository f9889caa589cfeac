//! Identifier representations and the per-collection identifier policy.
//!
//! Most collections store their ids as `ObjectId` (the canonical 12-byte id).
//! Some collections predate that convention and keep plain string ids; for
//! those, string values that happen to look like a hex `ObjectId` must not be
//! converted, or lookups stop matching.

use bson::{Bson, oid::ObjectId, spec::BinarySubtype};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a collection represents the values of its `_id` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdPolicy {
    /// Identifier values are coerced to `ObjectId` whenever possible.
    #[default]
    Canonical,
    /// Identifier values are used verbatim.
    Legacy,
}

impl IdPolicy {
    pub fn is_legacy(&self) -> bool {
        matches!(self, IdPolicy::Legacy)
    }
}

/// An identifier that is either a legacy string or a canonical `ObjectId`.
///
/// Serializes as the bare string or the bare `ObjectId`, so it can be used
/// directly as the `_id` field of an entity whose collection mixes both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Canonical(ObjectId),
    Legacy(String),
}

impl Identifier {
    /// Interprets a raw string, preferring the canonical form when the string
    /// is a valid 24-character hex `ObjectId`.
    pub fn parse(raw: &str) -> Self {
        match ObjectId::parse_str(raw) {
            Ok(oid) => Identifier::Canonical(oid),
            Err(_) => Identifier::Legacy(raw.to_string()),
        }
    }

    /// Attempts to coerce a BSON value into an `ObjectId`.
    ///
    /// Accepts an `ObjectId`, a 24-character hex string, or a 12-byte generic
    /// binary. Returns `None` for anything else instead of failing.
    pub fn try_canonicalize(value: &Bson) -> Option<ObjectId> {
        match value {
            Bson::ObjectId(oid) => Some(*oid),
            Bson::String(raw) => ObjectId::parse_str(raw).ok(),
            Bson::Binary(binary) if binary.subtype == BinarySubtype::Generic => {
                let bytes: [u8; 12] = binary.bytes.as_slice().try_into().ok()?;
                Some(ObjectId::from_bytes(bytes))
            }
            _ => None,
        }
    }

    pub fn is_canonical(&self) -> bool {
        matches!(self, Identifier::Canonical(_))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Canonical(oid) => write!(f, "{}", oid.to_hex()),
            Identifier::Legacy(raw) => f.write_str(raw),
        }
    }
}

impl From<ObjectId> for Identifier {
    fn from(oid: ObjectId) -> Self {
        Identifier::Canonical(oid)
    }
}

impl From<String> for Identifier {
    fn from(raw: String) -> Self {
        Identifier::Legacy(raw)
    }
}

impl From<&str> for Identifier {
    fn from(raw: &str) -> Self {
        Identifier::Legacy(raw.to_string())
    }
}

impl From<Identifier> for Bson {
    fn from(id: Identifier) -> Self {
        match id {
            Identifier::Canonical(oid) => Bson::ObjectId(oid),
            Identifier::Legacy(raw) => Bson::String(raw),
        }
    }
}
