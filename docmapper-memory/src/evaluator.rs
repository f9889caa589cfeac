//! Evaluation of native criteria documents against stored documents.
//!
//! Supports implicit equality (including array membership), `$eq`, `$ne`,
//! `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`, `$regex` with `$options`,
//! `$exists`, `$not`, `$size`, the logical `$and`, `$or` and `$nor`, and dot
//! paths that fan out over arrays of sub-documents.

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};
use regex::RegexBuilder;
use std::{cmp::Ordering, collections::HashMap};

use docmapper_core::error::{DataAccessError, DataAccessResult};

/// Comparable representation of BSON values.
///
/// Numeric types are normalized to f64. Values of different kinds are never
/// equal and have no order, except through [`sort_order`].
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            other => Comparable::Other(other),
        }
    }
}

impl Comparable<'_> {
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
            Comparable::Other(_) => 8,
        }
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.bytes().partial_cmp(&b.bytes()),
            _ => None,
        }
    }
}

/// Total order used for sorting and min/max: values of different kinds
/// order by kind, null and missing values first.
pub(crate) fn sort_order(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let left = left.map(Comparable::from).unwrap_or(Comparable::Null);
    let right = right.map(Comparable::from).unwrap_or(Comparable::Null);

    left.partial_cmp(&right)
        .unwrap_or_else(|| left.rank().cmp(&right.rank()))
}

/// Values found under a dot path, fanning out over arrays of sub-documents.
pub(crate) fn resolve<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let mut segments = path.split('.');
    let mut current: Vec<&'a Bson> = segments
        .next()
        .and_then(|first| document.get(first))
        .into_iter()
        .collect();

    for segment in segments {
        current = current
            .into_iter()
            .flat_map(|value| match value {
                Bson::Document(inner) => inner.get(segment).into_iter().collect::<Vec<_>>(),
                Bson::Array(items) => items
                    .iter()
                    .filter_map(Bson::as_document)
                    .filter_map(|inner| inner.get(segment))
                    .collect(),
                _ => Vec::new(),
            })
            .collect();
    }

    current
}

/// Whether `document` matches the native criteria `filter`.
pub(crate) fn matches(document: &Document, filter: &Document) -> DataAccessResult<bool> {
    for (key, condition) in filter {
        let matched = match key.as_str() {
            "$and" => {
                let mut all = true;
                for clause in clauses(key, condition)? {
                    if !matches(document, clause)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for clause in clauses(key, condition)? {
                    if matches(document, clause)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for clause in clauses(key, condition)? {
                    if matches(document, clause)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            other if other.starts_with('$') => {
                return Err(DataAccessError::Unsupported(format!(
                    "Top-level operator {} is not supported in memory",
                    other
                )));
            }
            path => matches_condition(&resolve(document, path), condition)?,
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn clauses<'a>(keyword: &str, condition: &'a Bson) -> DataAccessResult<Vec<&'a Document>> {
    let invalid = || DataAccessError::InvalidQuery(format!("{} requires an array of documents", keyword));

    match condition {
        Bson::Array(items) => items
            .iter()
            .map(|item| item.as_document().ok_or_else(&invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

fn is_operator_document(condition: &Bson) -> Option<&Document> {
    match condition {
        Bson::Document(document)
            if !document.is_empty() && document.keys().all(|key| key.starts_with('$')) =>
        {
            // references are plain values
            (!document.contains_key("$ref")).then_some(document)
        }
        _ => None,
    }
}

fn matches_condition(values: &[&Bson], condition: &Bson) -> DataAccessResult<bool> {
    let Some(operators) = is_operator_document(condition) else {
        return Ok(equals_any(values, condition));
    };

    for (op, operand) in operators {
        let matched = match op.as_str() {
            "$eq" => equals_any(values, operand),
            "$ne" => !equals_any(values, operand),
            "$gt" => compares_any(values, operand, |o| o == Ordering::Greater),
            "$gte" => compares_any(values, operand, |o| o != Ordering::Less),
            "$lt" => compares_any(values, operand, |o| o == Ordering::Less),
            "$lte" => compares_any(values, operand, |o| o != Ordering::Greater),
            "$in" => in_any(values, op, operand)?,
            "$nin" => !in_any(values, op, operand)?,
            "$exists" => !values.is_empty() == truthy(operand),
            "$regex" => {
                let options = operators.get_str("$options").unwrap_or_default();
                regex_any(values, operand, options)?
            }
            "$options" => true,
            "$size" => {
                let size = Comparable::from(operand);
                values.iter().any(|value| match value {
                    Bson::Array(items) => Comparable::Number(items.len() as f64) == size,
                    _ => false,
                })
            }
            "$not" => !matches_condition(values, operand)?,
            other => {
                return Err(DataAccessError::Unsupported(format!(
                    "Operator {} is not supported in memory",
                    other
                )));
            }
        };

        if !matched {
            return Ok(false);
        }
    }

    Ok(true)
}

fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(value) => *value,
        Bson::Int32(value) => *value != 0,
        Bson::Int64(value) => *value != 0,
        Bson::Double(value) => *value != 0.0,
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

fn equals_any(values: &[&Bson], target: &Bson) -> bool {
    let target = Comparable::from(target);

    if values.is_empty() {
        return target == Comparable::Null;
    }

    values.iter().any(|value| {
        Comparable::from(*value) == target
            || matches!(value, Bson::Array(items) if items.iter().any(|item| Comparable::from(item) == target))
    })
}

fn compares_any(values: &[&Bson], operand: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    let operand = Comparable::from(operand);
    let accepts = |value: &Bson| {
        Comparable::from(value)
            .partial_cmp(&operand)
            .is_some_and(&accept)
    };

    values.iter().any(|value| match value {
        Bson::Array(items) => items.iter().any(&accepts),
        other => accepts(*other),
    })
}

fn in_any(values: &[&Bson], op: &str, operand: &Bson) -> DataAccessResult<bool> {
    let Bson::Array(candidates) = operand else {
        return Err(DataAccessError::InvalidQuery(format!("{} requires an array", op)));
    };

    Ok(candidates.iter().any(|candidate| equals_any(values, candidate)))
}

fn regex_any(values: &[&Bson], pattern: &Bson, options: &str) -> DataAccessResult<bool> {
    let Bson::String(pattern) = pattern else {
        return Err(DataAccessError::InvalidQuery("$regex requires a string pattern".to_string()));
    };

    let regex = RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| DataAccessError::InvalidQuery(e.to_string()))?;

    let is_match = |value: &Bson| matches!(value, Bson::String(text) if regex.is_match(text));

    Ok(values.iter().any(|value| match value {
        Bson::Array(items) => items.iter().any(&is_match),
        other => is_match(*other),
    }))
}
