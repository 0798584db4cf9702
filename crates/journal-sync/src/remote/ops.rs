//! Store-independent document semantics shared by the store implementations:
//! path validation, write application, query evaluation and snapshot diffing.

use super::{
    ChangeKind, DocChange, Document, FieldChange, Filter, Query, RemoteError, Result, Target,
    WriteOp,
};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Check that `path` names a document: non-empty segments, even count.
pub fn validate_document_path(path: &str) -> Result<()> {
    let segments: Vec<&str> = path.split('/').collect();
    if path.is_empty()
        || segments.len() % 2 != 0
        || segments.iter().any(|s| s.is_empty() || *s == "." || *s == "..")
    {
        return Err(RemoteError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Check that `path` names a collection: non-empty segments, odd count.
pub fn validate_collection_path(path: &str) -> Result<()> {
    let segments: Vec<&str> = path.split('/').collect();
    if path.is_empty()
        || segments.len() % 2 != 1
        || segments.iter().any(|s| s.is_empty() || *s == "." || *s == "..")
    {
        return Err(RemoteError::InvalidPath(path.to_string()));
    }
    Ok(())
}

/// Compute the document body after applying `op` to `current`.
///
/// Returns `None` when the document no longer exists.
pub fn apply(current: Option<&Value>, op: &WriteOp) -> Result<Option<Value>> {
    validate_document_path(op.path())?;
    match op {
        WriteOp::Set { path, data } => {
            require_object(path, data)?;
            Ok(Some(data.clone()))
        }
        WriteOp::Merge { path, data } => {
            require_object(path, data)?;
            let mut merged = current.cloned().unwrap_or_else(|| Value::Object(Map::new()));
            merge_into(&mut merged, data);
            Ok(Some(merged))
        }
        WriteOp::Update { path, changes } => {
            let mut updated = current
                .cloned()
                .ok_or_else(|| RemoteError::NotFound(path.clone()))?;
            let Value::Object(fields) = &mut updated else {
                return Err(invalid(path, "document is not an object"));
            };
            for change in changes {
                apply_change(path, fields, change)?;
            }
            Ok(Some(updated))
        }
        WriteOp::Delete { .. } => Ok(None),
    }
}

fn require_object(path: &str, data: &Value) -> Result<()> {
    if data.is_object() {
        Ok(())
    } else {
        Err(invalid(path, "document body must be an object"))
    }
}

fn invalid(path: &str, reason: &str) -> RemoteError {
    RemoteError::InvalidOperation {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Recursively merge object `patch` into `target`. Non-object values replace.
pub fn merge_into(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge_into(existing, value)
                    }
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn apply_change(path: &str, fields: &mut Map<String, Value>, change: &FieldChange) -> Result<()> {
    match change {
        FieldChange::Set { field, value } => {
            fields.insert(field.clone(), value.clone());
        }
        FieldChange::ArrayUnion { field, values } => {
            let array = array_field(path, fields, field)?;
            for value in values {
                if !array.contains(value) {
                    array.push(value.clone());
                }
            }
        }
        FieldChange::ArrayRemove { field, values } => {
            let array = array_field(path, fields, field)?;
            array.retain(|v| !values.contains(v));
        }
        FieldChange::Increment { field, by } => {
            let current = match fields.get(field) {
                None | Some(Value::Null) => 0,
                Some(value) => value
                    .as_i64()
                    .ok_or_else(|| invalid(path, &format!("field {field} is not an integer")))?,
            };
            fields.insert(field.clone(), Value::from(current.saturating_add(*by)));
        }
        FieldChange::Expect { field, value } => {
            if fields.get(field).unwrap_or(&Value::Null) != value {
                return Err(RemoteError::PreconditionFailed {
                    path: path.to_string(),
                    field: field.clone(),
                });
            }
        }
    }
    Ok(())
}

fn array_field<'a>(
    path: &str,
    fields: &'a mut Map<String, Value>,
    field: &str,
) -> Result<&'a mut Vec<Value>> {
    let entry = fields
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if entry.is_null() {
        *entry = Value::Array(Vec::new());
    }
    entry
        .as_array_mut()
        .ok_or_else(|| invalid(path, &format!("field {field} is not an array")))
}

/// Whether a document body satisfies a filter.
pub fn matches(filter: &Filter, data: &Value) -> bool {
    match filter {
        Filter::ArrayContains { field, value } => data
            .get(field)
            .and_then(Value::as_array)
            .is_some_and(|array| array.contains(value)),
        Filter::Equals { field, value } => data.get(field) == Some(value),
    }
}

/// Order two JSON values: numbers numerically, strings lexically, else equal.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

/// Run a query over an iterator of candidate documents.
pub fn run_query<'a>(query: &Query, docs: impl Iterator<Item = &'a Document>) -> Vec<Document> {
    let mut result: Vec<Document> = docs
        .filter(|doc| doc.collection() == query.collection)
        .filter(|doc| {
            query
                .filter
                .as_ref()
                .is_none_or(|filter| matches(filter, &doc.data))
        })
        .cloned()
        .collect();

    if let Some(order) = &query.order_by {
        result.sort_by(|a, b| {
            let ord = compare_values(a.data.get(&order.field), b.data.get(&order.field));
            let ord = if order.descending { ord.reverse() } else { ord };
            ord.then_with(|| a.path.cmp(&b.path))
        });
    } else {
        result.sort_by(|a, b| a.path.cmp(&b.path));
    }
    result
}

/// Evaluate a subscription target against the documents of a store.
pub fn evaluate<'a>(target: &Target, docs: impl Iterator<Item = &'a Document>) -> Vec<Document> {
    match target {
        Target::Document(path) => docs.filter(|doc| &doc.path == path).cloned().collect(),
        Target::Query(query) => run_query(query, docs),
    }
}

/// Per-document changes between two snapshots of the same target.
///
/// Documents compare by body only; a rewrite with identical content is not a
/// change.
pub fn diff(prev: &[Document], next: &[Document]) -> Vec<DocChange> {
    let before: HashMap<&str, &Document> = prev.iter().map(|d| (d.path.as_str(), d)).collect();
    let after: HashMap<&str, &Document> = next.iter().map(|d| (d.path.as_str(), d)).collect();

    let mut changes = Vec::new();
    for doc in next {
        match before.get(doc.path.as_str()) {
            None => changes.push(DocChange {
                kind: ChangeKind::Added,
                doc: doc.clone(),
            }),
            Some(old) if old.data != doc.data => changes.push(DocChange {
                kind: ChangeKind::Modified,
                doc: doc.clone(),
            }),
            Some(_) => {}
        }
    }
    for doc in prev {
        if !after.contains_key(doc.path.as_str()) {
            changes.push(DocChange {
                kind: ChangeKind::Removed,
                doc: doc.clone(),
            });
        }
    }
    changes
}
