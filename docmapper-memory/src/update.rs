//! Update operators, projections and upsert seeding on in-memory documents.

use bson::{Bson, Document};

use docmapper_core::error::{DataAccessError, DataAccessResult};

/// Writes `value` at a dot path, creating intermediate documents.
pub(crate) fn set_path(document: &mut Document, path: &str, value: Bson) -> DataAccessResult<()> {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
            Ok(())
        }
        Some((head, rest)) => {
            if !document.contains_key(head) {
                document.insert(head, Document::new());
            }

            match document.get_mut(head) {
                Some(Bson::Document(inner)) => set_path(inner, rest, value),
                _ => Err(DataAccessError::InvalidDocument(format!(
                    "Cannot set {} inside a non-document field {}",
                    rest, head
                ))),
            }
        }
    }
}

fn remove_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

pub(crate) fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    match path.split_once('.') {
        None => document.get(path),
        Some((head, rest)) => get_path(document.get_document(head).ok()?, rest),
    }
}

fn increment(current: Option<&Bson>, amount: &Bson) -> DataAccessResult<Bson> {
    let current = current.cloned().unwrap_or(Bson::Int32(0));

    match (&current, amount) {
        (Bson::Int32(a), Bson::Int32(b)) => Ok(a
            .checked_add(*b)
            .map(Bson::Int32)
            .unwrap_or(Bson::Int64(*a as i64 + *b as i64))),
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            Ok(Bson::Int64(as_i64(&current) + as_i64(amount)))
        }
        (Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_), Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => {
            Ok(Bson::Double(as_f64(&current) + as_f64(amount)))
        }
        _ => Err(DataAccessError::InvalidDocument(format!(
            "Cannot increment {} by {}",
            current, amount
        ))),
    }
}

fn as_i64(value: &Bson) -> i64 {
    match value {
        Bson::Int32(value) => *value as i64,
        Bson::Int64(value) => *value,
        _ => 0,
    }
}

pub(crate) fn as_f64(value: &Bson) -> f64 {
    match value {
        Bson::Int32(value) => *value as f64,
        Bson::Int64(value) => *value as f64,
        Bson::Double(value) => *value,
        _ => 0.0,
    }
}

/// Applies an operator update document. `$setOnInsert` only applies when
/// `inserting`.
pub(crate) fn apply_update(document: &mut Document, update: &Document, inserting: bool) -> DataAccessResult<()> {
    for (operator, fields) in update {
        let Some(fields) = fields.as_document() else {
            return Err(DataAccessError::InvalidQuery(format!(
                "{} requires a document of fields",
                operator
            )));
        };

        for (path, value) in fields {
            match operator.as_str() {
                "$set" => set_path(document, path, value.clone())?,
                "$setOnInsert" if inserting => set_path(document, path, value.clone())?,
                "$setOnInsert" => {}
                "$unset" => remove_path(document, path),
                "$inc" => {
                    let next = increment(get_path(document, path), value)?;
                    set_path(document, path, next)?;
                }
                "$push" => {
                    let mut items = match get_path(document, path) {
                        None | Some(Bson::Null) => Vec::new(),
                        Some(Bson::Array(items)) => items.clone(),
                        Some(other) => {
                            return Err(DataAccessError::InvalidDocument(format!(
                                "Cannot push onto non-array field {}: {}",
                                path, other
                            )));
                        }
                    };

                    match value {
                        Bson::Document(each) if each.contains_key("$each") => {
                            items.extend(each.get_array("$each").map_err(|e| {
                                DataAccessError::InvalidQuery(e.to_string())
                            })?.iter().cloned());
                        }
                        value => items.push(value.clone()),
                    }

                    set_path(document, path, Bson::Array(items))?;
                }
                other => {
                    return Err(DataAccessError::Unsupported(format!(
                        "Update operator {} is not supported in memory",
                        other
                    )));
                }
            }
        }
    }

    Ok(())
}

/// The document an upsert starts from: the equality fields of the filter.
pub(crate) fn seed_from_filter(filter: &Document) -> DataAccessResult<Document> {
    let mut seed = Document::new();

    for (key, value) in filter {
        if key == "$and" {
            for clause in value.as_array().into_iter().flatten().filter_map(Bson::as_document) {
                for (path, value) in seed_from_filter(clause)? {
                    set_path(&mut seed, &path, value)?;
                }
            }
            continue;
        }

        if key.starts_with('$') {
            continue;
        }

        let value = match value {
            Bson::Document(operators) if operators.keys().all(|k| k.starts_with('$')) => {
                match operators.get("$eq") {
                    Some(value) => value.clone(),
                    None => continue,
                }
            }
            value => value.clone(),
        };

        set_path(&mut seed, key, value)?;
    }

    Ok(seed)
}

/// Applies an inclusion (`1`) or exclusion (`0`) projection. `_id` is kept
/// by inclusion projections unless excluded explicitly.
pub(crate) fn project(document: &Document, projection: &Document) -> DataAccessResult<Document> {
    let included = |value: &Bson| match value {
        Bson::Boolean(flag) => *flag,
        Bson::Int32(flag) => *flag != 0,
        Bson::Int64(flag) => *flag != 0,
        Bson::Double(flag) => *flag != 0.0,
        _ => true,
    };

    let inclusive = projection
        .iter()
        .any(|(key, value)| key != "_id" && included(value));

    if !inclusive {
        let mut projected = document.clone();
        for (key, value) in projection {
            if !included(value) {
                remove_path(&mut projected, key);
            }
        }
        return Ok(projected);
    }

    let mut projected = Document::new();
    let keep_id = projection.get("_id").is_none_or(|value| included(value));
    if keep_id {
        if let Some(id) = document.get("_id") {
            projected.insert("_id", id.clone());
        }
    }

    for (path, value) in projection {
        if path == "_id" || !included(value) {
            continue;
        }

        if let Some(found) = get_path(document, path) {
            set_path(&mut projected, path, found.clone())?;
        }
    }

    Ok(projected)
}
