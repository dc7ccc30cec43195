//! Evaluation of the query DSL subset the builder emits.
//!
//! Supported: `match_all`, `term`, `terms`, `bool` (`filter`, `must`,
//! `must_not`, `should`, `minimum_should_match`) and `query_string` with
//! `field:value` terms (trailing `*` for prefixes, quotes allowed) and bare
//! words, joined by `AND`/`OR`. Anything else is rejected the way the real
//! backend rejects unknown queries.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::error::{BackendError, StorageError, StorageResult};

/// A document as seen by the evaluator.
pub(super) struct DocView<'a> {
    pub id: &'a str,
    pub source: &'a Value,
}

fn parsing_error(reason: impl Into<String>) -> StorageError {
    StorageError::Backend(BackendError::Rejected {
        backend_name: "memory".to_string(),
        status: 400,
        error_type: "parsing_exception".to_string(),
        reason: reason.into(),
    })
}

/// Matches index names against a comma-separated list of glob patterns.
pub(super) fn index_matches(pattern: &str, index: &str) -> bool {
    pattern
        .split(',')
        .map(str::trim)
        .any(|p| glob_match(p.as_bytes(), index.as_bytes()))
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|i| glob_match(rest, &text[i..])),
        Some((c, rest)) => text.first() == Some(c) && glob_match(rest, &text[1..]),
    }
}

/// Collects the values at a dotted path, flattening arrays along the way.
///
/// The `.keyword` sub-field resolves to the field itself and `_id` to the
/// document id.
pub(super) fn field_values<'a>(doc: &DocView<'a>, field: &str) -> Vec<Value> {
    let field = field.strip_suffix(".keyword").unwrap_or(field);
    if field == "_id" {
        return vec![Value::String(doc.id.to_string())];
    }

    let mut current: Vec<&Value> = vec![doc.source];
    for segment in field.split('.') {
        let mut next = Vec::new();
        for value in current {
            collect_child(value, segment, &mut next);
        }
        current = next;
    }

    let mut out = Vec::new();
    for value in current {
        flatten(value, &mut out);
    }
    out
}

fn collect_child<'a>(value: &'a Value, segment: &str, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            if let Some(child) = map.get(segment) {
                out.push(child);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_child(item, segment, out);
            }
        }
        _ => {}
    }
}

fn flatten(value: &Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| flatten(item, out)),
        Value::Null => {}
        other => out.push(other.clone()),
    }
}

/// Renders a scalar the way term queries compare it.
pub(super) fn scalar_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Evaluates a query element against one document.
pub(super) fn matches(query: &Value, doc: &DocView<'_>) -> StorageResult<bool> {
    let Some((kind, body)) = query.as_object().and_then(|o| o.iter().next()) else {
        return Err(parsing_error(format!("malformed query: {}", query)));
    };

    match kind.as_str() {
        "match_all" => Ok(true),
        "term" => {
            let (field, expected) = single_entry(body, "term")?;
            let expected = match expected {
                Value::Object(inner) => inner.get("value").cloned().unwrap_or(Value::Null),
                other => other.clone(),
            };
            Ok(term_matches(doc, field, &expected))
        }
        "terms" => {
            let (field, accepted) = single_entry(body, "terms")?;
            let accepted = accepted
                .as_array()
                .ok_or_else(|| parsing_error("[terms] requires an array"))?;
            Ok(accepted.iter().any(|v| term_matches(doc, field, v)))
        }
        "bool" => bool_matches(body, doc),
        "query_string" => {
            let text = body
                .get("query")
                .and_then(Value::as_str)
                .ok_or_else(|| parsing_error("[query_string] requires [query]"))?;
            Ok(query_string_matches(text, doc))
        }
        other => Err(parsing_error(format!("unknown query [{}]", other))),
    }
}

fn single_entry<'v>(body: &'v Value, kind: &str) -> StorageResult<(&'v str, &'v Value)> {
    body.as_object()
        .and_then(|o| o.iter().next())
        .map(|(k, v)| (k.as_str(), v))
        .ok_or_else(|| parsing_error(format!("[{}] requires a field", kind)))
}

fn term_matches(doc: &DocView<'_>, field: &str, expected: &Value) -> bool {
    let expected = scalar_string(expected);
    field_values(doc, field)
        .iter()
        .any(|v| scalar_string(v) == expected)
}

fn clauses<'v>(body: &'v Map<String, Value>, key: &str) -> Vec<&'v Value> {
    match body.get(key) {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single @ Value::Object(_)) => vec![single],
        _ => Vec::new(),
    }
}

fn bool_matches(body: &Value, doc: &DocView<'_>) -> StorageResult<bool> {
    let body = body
        .as_object()
        .ok_or_else(|| parsing_error("[bool] requires an object"))?;

    let required = clauses(body, "filter")
        .into_iter()
        .chain(clauses(body, "must"))
        .collect::<Vec<_>>();
    for clause in &required {
        if !matches(clause, doc)? {
            return Ok(false);
        }
    }

    for clause in clauses(body, "must_not") {
        if matches(clause, doc)? {
            return Ok(false);
        }
    }

    let should = clauses(body, "should");
    if should.is_empty() {
        return Ok(true);
    }
    // Without required clauses at least one alternative must match
    let default_minimum = if required.is_empty() { 1 } else { 0 };
    let minimum = body
        .get("minimum_should_match")
        .and_then(Value::as_u64)
        .unwrap_or(default_minimum);

    let mut matched = 0;
    for clause in should {
        if matches(clause, doc)? {
            matched += 1;
        }
    }
    Ok(matched >= minimum)
}

fn query_string_matches(text: &str, doc: &DocView<'_>) -> bool {
    text.split(" OR ").any(|alternative| {
        alternative
            .split(" AND ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .all(|t| query_term_matches(t, doc))
    })
}

fn query_term_matches(term: &str, doc: &DocView<'_>) -> bool {
    let term = term.trim_matches(|c| c == '(' || c == ')');
    match term.split_once(':') {
        Some((field, value)) => {
            let value = value.trim_matches('"');
            let candidates = field_values(doc, field);
            match value.strip_suffix('*') {
                Some(prefix) => candidates
                    .iter()
                    .any(|v| scalar_string(v).starts_with(prefix)),
                None => candidates.iter().any(|v| scalar_string(v) == value),
            }
        }
        None => {
            let needle = term.trim_matches('"').to_lowercase();
            contains_text(doc.source, &needle)
        }
    }
}

fn contains_text(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Array(items) => items.iter().any(|v| contains_text(v, needle)),
        Value::Object(map) => map.values().any(|v| contains_text(v, needle)),
        _ => false,
    }
}

/// Orders two documents by a `sort` array. Missing values sort last.
pub(super) fn compare_by_sort(sort: &[Value], a: &DocView<'_>, b: &DocView<'_>) -> Ordering {
    for criterion in sort {
        let Some((field, spec)) = criterion.as_object().and_then(|o| o.iter().next()) else {
            continue;
        };
        let descending = spec
            .get("order")
            .and_then(Value::as_str)
            .is_some_and(|o| o == "desc");

        let left = field_values(a, field).into_iter().next();
        let right = field_values(b, field).into_iter().next();
        let ordering = match (left, right) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => return Ordering::Greater,
            (Some(_), None) => return Ordering::Less,
            (Some(l), Some(r)) => compare_scalars(&l, &r),
        };
        let ordering = if descending {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn compare_scalars(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => scalar_string(a).cmp(&scalar_string(b)),
    }
}

/// Recursively merges `patch` into `target`, the way partial updates do.
pub(super) fn merge(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                let nested = value.is_object() && target.get(&key).is_some_and(Value::is_object);
                match target.get_mut(&key) {
                    Some(existing) if nested => merge(existing, value),
                    _ => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}
