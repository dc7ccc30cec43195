//! In-memory [`SearchBackend`] for tests and local runs.
//!
//! Documents live in `BTreeMap`s behind `parking_lot::RwLock`s, one map per
//! index. Searches evaluate the same query bodies the Elasticsearch backend
//! sends (see [`eval`] for the supported subset), so stores behave the same
//! on both. Writes are immediately visible, matching `refresh=true`.
//!
//! Sequence numbers come from one counter shared by every index and the
//! primary term is always 1.

mod eval;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Value, json};

use crate::backends::{
    BulkResponse, IndexTemplate, SearchBackend, SearchResponse, VersionGuard, WriteOutcome,
};
use crate::error::{BackendError, StorageError, StorageResult};

use eval::DocView;

const BACKEND_NAME: &str = "memory";
const PRIMARY_TERM: i64 = 1;
const DEFAULT_SEARCH_SIZE: usize = 10;

struct StoredDoc {
    source: Value,
    seq_no: i64,
}

type Index = BTreeMap<String, StoredDoc>;

/// In-memory search backend.
pub struct InMemoryBackend {
    indices: RwLock<BTreeMap<String, Index>>,
    templates: RwLock<Vec<IndexTemplate>>,
    seq_no: AtomicI64,
}

impl std::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("indices", &self.indices.read().len())
            .finish_non_exhaustive()
    }
}

impl InMemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self {
            indices: RwLock::new(BTreeMap::new()),
            templates: RwLock::new(Vec::new()),
            seq_no: AtomicI64::new(0),
        }
    }

    /// Names of every index that holds at least one document.
    pub fn index_names(&self) -> Vec<String> {
        self.indices
            .read()
            .iter()
            .filter(|(_, docs)| !docs.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Returns the stored source of a document.
    pub fn raw_document(&self, index: &str, id: &str) -> Option<Value> {
        self.indices
            .read()
            .get(index)
            .and_then(|docs| docs.get(id))
            .map(|doc| doc.source.clone())
    }

    /// Templates installed through [`SearchBackend::initialize`].
    pub fn templates(&self) -> Vec<IndexTemplate> {
        self.templates.read().clone()
    }

    fn next_seq_no(&self) -> i64 {
        self.seq_no.fetch_add(1, Ordering::SeqCst)
    }

    fn put(&self, index: &str, id: &str, source: Value, create_only: bool) -> Result<WriteOutcome, (u16, &'static str, String)> {
        validate_index_name(index)?;
        if !source.is_object() {
            return Err((
                400,
                "mapper_parsing_exception",
                "failed to parse, document is empty or not an object".to_string(),
            ));
        }

        let mut indices = self.indices.write();
        let docs = indices.entry(index.to_string()).or_default();
        let existed = docs.contains_key(id);
        if existed && create_only {
            return Err((
                409,
                "version_conflict_engine_exception",
                format!("[{}]: version conflict, document already exists", id),
            ));
        }

        let seq_no = self.next_seq_no();
        docs.insert(id.to_string(), StoredDoc { source, seq_no });
        Ok(WriteOutcome {
            result: if existed { "updated" } else { "created" }.to_string(),
            seq_no,
            primary_term: PRIMARY_TERM,
        })
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_index_name(index: &str) -> Result<(), (u16, &'static str, String)> {
    if index.is_empty() || index.chars().any(|c| c.is_uppercase() || c == '*' || c == ',') {
        return Err((
            400,
            "invalid_index_name_exception",
            format!("Invalid index name [{}]", index),
        ));
    }
    Ok(())
}

fn rejected((status, error_type, reason): (u16, &'static str, String)) -> StorageError {
    StorageError::Backend(BackendError::Rejected {
        backend_name: BACKEND_NAME.to_string(),
        status,
        error_type: error_type.to_string(),
        reason,
    })
}

/// Documents of every index matching the pattern, in index then id order.
fn matching_docs<'a>(
    indices: &'a BTreeMap<String, Index>,
    pattern: &str,
    query: &Value,
) -> StorageResult<Vec<(&'a str, DocView<'a>, i64)>> {
    let mut out = Vec::new();
    for (index, docs) in indices {
        if !eval::index_matches(pattern, index) {
            continue;
        }
        for (id, stored) in docs {
            let view = DocView {
                id,
                source: &stored.source,
            };
            if eval::matches(query, &view)? {
                out.push((index.as_str(), view, stored.seq_no));
            }
        }
    }
    Ok(out)
}

fn terms_aggregation(docs: &[(&str, DocView<'_>, i64)], spec: &Value) -> StorageResult<Value> {
    let terms = spec
        .get("terms")
        .ok_or_else(|| rejected((400, "parsing_exception", "only terms aggregations are supported".to_string())))?;
    let field = terms
        .get("field")
        .and_then(Value::as_str)
        .ok_or_else(|| rejected((400, "parsing_exception", "[terms] requires [field]".to_string())))?;
    let size = terms.get("size").and_then(Value::as_u64).unwrap_or(10) as usize;

    let mut counts: BTreeMap<String, (Value, u64)> = BTreeMap::new();
    for (_, doc, _) in docs {
        for value in eval::field_values(doc, field) {
            let entry = counts
                .entry(eval::scalar_string(&value))
                .or_insert((value, 0));
            entry.1 += 1;
        }
    }

    let mut buckets: Vec<(String, Value, u64)> = counts
        .into_iter()
        .map(|(key, (value, count))| (key, value, count))
        .collect();
    buckets.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));
    buckets.truncate(size);

    Ok(json!({
        "buckets": buckets
            .into_iter()
            .map(|(_, key, doc_count)| json!({ "key": key, "doc_count": doc_count }))
            .collect::<Vec<_>>()
    }))
}

#[async_trait]
impl SearchBackend for InMemoryBackend {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn initialize(&self, templates: &[IndexTemplate]) -> StorageResult<()> {
        let mut installed = self.templates.write();
        for template in templates {
            installed.retain(|t| t.name != template.name);
            installed.push(template.clone());
        }
        Ok(())
    }

    async fn create(&self, index: &str, id: &str, document: Value) -> StorageResult<WriteOutcome> {
        self.put(index, id, document, true).map_err(rejected)
    }

    async fn update(
        &self,
        index: &str,
        id: &str,
        partial: Value,
        guard: Option<VersionGuard>,
    ) -> StorageResult<WriteOutcome> {
        let mut indices = self.indices.write();
        let stored = indices
            .get_mut(index)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| {
                rejected((
                    404,
                    "document_missing_exception",
                    format!("[{}]: document missing", id),
                ))
            })?;

        if let Some(guard) = guard {
            if guard.seq_no != stored.seq_no || guard.primary_term != PRIMARY_TERM {
                return Err(rejected((
                    409,
                    "version_conflict_engine_exception",
                    format!(
                        "[{}]: version conflict, required seqNo [{}], current document has seqNo [{}]",
                        id, guard.seq_no, stored.seq_no
                    ),
                )));
            }
        }

        eval::merge(&mut stored.source, partial);
        stored.seq_no = self.next_seq_no();
        Ok(WriteOutcome {
            result: "updated".to_string(),
            seq_no: stored.seq_no,
            primary_term: PRIMARY_TERM,
        })
    }

    async fn search(&self, index_pattern: &str, body: Value) -> StorageResult<SearchResponse> {
        let query = body.get("query").cloned().unwrap_or(json!({ "match_all": {} }));
        let from = body.get("from").and_then(Value::as_u64).unwrap_or(0) as usize;
        let size = body
            .get("size")
            .and_then(Value::as_u64)
            .map(|s| s as usize)
            .unwrap_or(DEFAULT_SEARCH_SIZE);

        let indices = self.indices.read();
        let mut docs = matching_docs(&indices, index_pattern, &query)?;

        if let Some(sort) = body.get("sort").and_then(Value::as_array) {
            docs.sort_by(|(_, a, _), (_, b, _)| eval::compare_by_sort(sort, a, b));
        }

        let mut aggregations = serde_json::Map::new();
        if let Some(aggs) = body.get("aggs").and_then(Value::as_object) {
            for (name, spec) in aggs {
                aggregations.insert(name.clone(), terms_aggregation(&docs, spec)?);
            }
        }

        let hits: Vec<Value> = docs
            .iter()
            .skip(from)
            .take(size)
            .map(|(index, doc, seq_no)| {
                json!({
                    "_index": index,
                    "_id": doc.id,
                    "_seq_no": seq_no,
                    "_primary_term": PRIMARY_TERM,
                    "_source": doc.source,
                })
            })
            .collect();

        SearchResponse::from_json(json!({
            "hits": {
                "total": { "value": docs.len(), "relation": "eq" },
                "hits": hits,
            },
            "aggregations": aggregations,
        }))
    }

    async fn delete_by_query(&self, index_pattern: &str, body: Value) -> StorageResult<u64> {
        let query = body.get("query").cloned().unwrap_or(json!({ "match_all": {} }));

        let mut indices = self.indices.write();
        let doomed: Vec<(String, String)> = matching_docs(&indices, index_pattern, &query)?
            .into_iter()
            .map(|(index, doc, _)| (index.to_string(), doc.id.to_string()))
            .collect();

        for (index, id) in &doomed {
            if let Some(docs) = indices.get_mut(index) {
                docs.remove(id);
            }
        }
        Ok(doomed.len() as u64)
    }

    async fn bulk(&self, lines: Vec<String>) -> StorageResult<BulkResponse> {
        if lines.len() % 2 != 0 {
            return Err(rejected((
                400,
                "illegal_argument_exception",
                "The bulk request must be terminated by a newline [\\n]".to_string(),
            )));
        }

        let mut items = Vec::with_capacity(lines.len() / 2);
        let mut errors = false;
        for pair in lines.chunks(2) {
            let action: Value = serde_json::from_str(&pair[0]).map_err(|e| {
                rejected((400, "illegal_argument_exception", format!("Malformed action line: {}", e)))
            })?;
            let Some((verb, meta)) = action.as_object().and_then(|o| o.iter().next()) else {
                return Err(rejected((
                    400,
                    "illegal_argument_exception",
                    "Malformed action line".to_string(),
                )));
            };
            let index = meta.get("_index").and_then(Value::as_str).unwrap_or_default();
            let id = meta.get("_id").and_then(Value::as_str).unwrap_or_default();

            let outcome = match serde_json::from_str::<Value>(&pair[1]) {
                Ok(document) => self.put(index, id, document, verb == "create"),
                Err(e) => Err((400, "mapper_parsing_exception", e.to_string())),
            };

            let item = match outcome {
                Ok(written) => json!({
                    "_index": index,
                    "_id": id,
                    "status": if written.result == "created" { 201 } else { 200 },
                    "result": written.result,
                }),
                Err((status, error_type, reason)) => {
                    errors = true;
                    json!({
                        "_index": index,
                        "_id": id,
                        "status": status,
                        "error": { "type": error_type, "reason": reason },
                    })
                }
            };
            let mut entry = serde_json::Map::new();
            entry.insert(verb.clone(), item);
            items.push(Value::Object(entry));
        }

        BulkResponse::from_json(json!({ "took": 0, "errors": errors, "items": items }))
    }
}
