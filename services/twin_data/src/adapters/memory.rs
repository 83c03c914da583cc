//! services/twin_data/src/adapters/memory.rs
//!
//! In-process implementations of the storage ports. They keep the same
//! observable semantics as the remote adapters (partition scoping, not-found
//! signalling, merge-or-upload, structured filters) and back the test suite
//! and local runs without cloud credentials.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;
use twin_data_core::ports::{
    BlobStorage, DocumentQuery, DocumentStore, PortError, PortResult, QueryFilter, SearchIndexClient,
};
use twin_data_core::search::{
    FieldKind, IndexAction, IndexActionKind, IndexDefinition, IndexingResult, SearchRequest, SearchResponse,
    SearchResponseHit,
};

//=========================================================================================
// Document Store
//=========================================================================================

type DocumentKey = (String, String, String);

#[derive(Default)]
struct StoredDocument {
    body: Value,
    sequence: u64,
}

/// A `DocumentStore` held in memory.
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<DocumentKey, StoredDocument>>,
    next_sequence: std::sync::atomic::AtomicU64,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents across every collection and partition.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn sequence(&self) -> u64 {
        self.next_sequence.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }
}

fn key(collection: &str, partition: &str, id: &str) -> DocumentKey {
    (collection.to_string(), partition.to_string(), id.to_string())
}

/// The string form a SQL-like `field = 'value'` comparison would see.
fn field_text(body: &Value, field: &str) -> Option<String> {
    match body.get(field)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn filter_matches(body: &Value, filter: &QueryFilter) -> bool {
    match filter {
        QueryFilter::Equals { field, value } => field_text(body, field).as_deref() == Some(value.as_str()),
        QueryFilter::Contains { field, value } => field_text(body, field)
            .map(|text| text.to_lowercase().contains(&value.to_lowercase()))
            .unwrap_or(false),
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn create(&self, collection: &str, partition: &str, id: &str, body: Value) -> PortResult<()> {
        let mut documents = self.documents.write().await;
        let k = key(collection, partition, id);
        if documents.contains_key(&k) {
            return Err(PortError::Permanent(format!(
                "document {} already exists in {}/{}",
                id, collection, partition
            )));
        }
        let sequence = self.sequence();
        documents.insert(k, StoredDocument { body, sequence });
        Ok(())
    }

    async fn read(&self, collection: &str, partition: &str, id: &str) -> PortResult<Value> {
        self.documents
            .read()
            .await
            .get(&key(collection, partition, id))
            .map(|d| d.body.clone())
            .ok_or_else(|| PortError::NotFound(format!("document {} not found in {}/{}", id, collection, partition)))
    }

    async fn upsert(&self, collection: &str, partition: &str, id: &str, body: Value) -> PortResult<()> {
        let mut documents = self.documents.write().await;
        let k = key(collection, partition, id);
        match documents.get_mut(&k) {
            Some(existing) => existing.body = body,
            None => {
                let sequence = self.sequence();
                documents.insert(k, StoredDocument { body, sequence });
            }
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, partition: &str, id: &str) -> PortResult<()> {
        self.documents
            .write()
            .await
            .remove(&key(collection, partition, id))
            .map(|_| ())
            .ok_or_else(|| PortError::NotFound(format!("document {} not found in {}/{}", id, collection, partition)))
    }

    async fn query(&self, collection: &str, partition: &str, query: &DocumentQuery) -> PortResult<Vec<Value>> {
        let documents = self.documents.read().await;
        let mut matched: Vec<&StoredDocument> = documents
            .iter()
            .filter(|((c, p, _), _)| c == collection && p == partition)
            .map(|(_, d)| d)
            .filter(|d| query.filters.iter().all(|f| filter_matches(&d.body, f)))
            .collect();

        match &query.order_by {
            Some(order) => matched.sort_by(|a, b| {
                let ordering = field_text(&a.body, &order.field).cmp(&field_text(&b.body, &order.field));
                if order.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            }),
            None => matched.sort_by_key(|d| d.sequence),
        }

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matched.into_iter().skip(query.offset).take(limit).map(|d| d.body.clone()).collect())
    }
}

//=========================================================================================
// Search Index
//=========================================================================================

#[derive(Default)]
struct IndexState {
    definition: Option<IndexDefinition>,
    documents: BTreeMap<String, Map<String, Value>>,
}

/// A `SearchIndexClient` held in memory.
///
/// Full text is a case-insensitive term match over the searchable fields;
/// vector queries rank by cosine similarity.
#[derive(Default)]
pub struct InMemorySearchIndex {
    indexes: RwLock<HashMap<String, IndexState>>,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn document_count(&self, index: &str) -> usize {
        self.indexes.read().await.get(index).map(|s| s.documents.len()).unwrap_or(0)
    }

    pub async fn definition(&self, index: &str) -> Option<IndexDefinition> {
        self.indexes.read().await.get(index).and_then(|s| s.definition.clone())
    }
}

/// Cosine similarity of two vectors; zero when either has no magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

fn stored_vector(document: &Map<String, Value>, field: &str) -> Option<Vec<f32>> {
    document
        .get(field)?
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

fn text_score(document: &Map<String, Value>, definition: &IndexDefinition, terms: &[String]) -> f64 {
    let mut haystack = String::new();
    for field in definition.searchable_fields() {
        match (&field.kind, document.get(&field.name)) {
            (FieldKind::String, Some(Value::String(s))) => {
                haystack.push_str(&s.to_lowercase());
                haystack.push(' ');
            }
            (FieldKind::StringCollection, Some(Value::Array(items))) => {
                for item in items.iter().filter_map(Value::as_str) {
                    haystack.push_str(&item.to_lowercase());
                    haystack.push(' ');
                }
            }
            _ => {}
        }
    }
    terms.iter().filter(|t| haystack.contains(t.as_str())).count() as f64
}

fn compare_field(a: &Map<String, Value>, b: &Map<String, Value>, field: &str) -> Ordering {
    match (a.get(field), b.get(field)) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal)
        }
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

#[async_trait]
impl SearchIndexClient for InMemorySearchIndex {
    async fn create_or_update_index(&self, definition: &IndexDefinition) -> PortResult<()> {
        if definition.key_field().is_none() {
            return Err(PortError::InvalidInput(format!("index {} has no key field", definition.name)));
        }
        let mut indexes = self.indexes.write().await;
        indexes.entry(definition.name.clone()).or_default().definition = Some(definition.clone());
        Ok(())
    }

    async fn index_documents(&self, index: &str, actions: Vec<IndexAction>) -> PortResult<Vec<IndexingResult>> {
        let mut indexes = self.indexes.write().await;
        let state = indexes
            .get_mut(index)
            .filter(|s| s.definition.is_some())
            .ok_or_else(|| PortError::NotFound(format!("index {} does not exist", index)))?;
        let key_field = state
            .definition
            .as_ref()
            .and_then(|d| d.key_field())
            .map(|f| f.name.clone())
            .unwrap_or_default();

        let mut results = Vec::with_capacity(actions.len());
        for action in actions {
            let Some(key) = action.document.get(&key_field).and_then(Value::as_str).map(String::from) else {
                results.push(IndexingResult {
                    key: String::new(),
                    succeeded: false,
                    status_code: 400,
                    error_message: Some(format!("document is missing key field '{}'", key_field)),
                });
                continue;
            };
            match action.kind {
                IndexActionKind::Upload => {
                    state.documents.insert(key.clone(), action.document);
                }
                IndexActionKind::MergeOrUpload => {
                    let existing = state.documents.entry(key.clone()).or_default();
                    for (k, v) in action.document {
                        existing.insert(k, v);
                    }
                }
                IndexActionKind::Delete => {
                    state.documents.remove(&key);
                }
            }
            results.push(IndexingResult { key, succeeded: true, status_code: 200, error_message: None });
        }
        Ok(results)
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> PortResult<SearchResponse> {
        let indexes = self.indexes.read().await;
        let state = indexes
            .get(index)
            .ok_or_else(|| PortError::NotFound(format!("index {} does not exist", index)))?;
        let Some(definition) = state.definition.as_ref() else {
            return Err(PortError::NotFound(format!("index {} does not exist", index)));
        };

        let terms: Vec<String> = request
            .search_text
            .as_deref()
            .filter(|t| t.trim() != "*")
            .map(|t| t.split_whitespace().map(str::to_lowercase).collect())
            .unwrap_or_default();

        let mut hits: Vec<SearchResponseHit> = Vec::new();
        for document in state.documents.values() {
            if !request.filters.iter().all(|f| f.matches(document)) {
                continue;
            }

            let text = if terms.is_empty() { None } else { Some(text_score(document, definition, &terms)) };
            let vector = request.vector.as_ref().and_then(|q| {
                stored_vector(document, &q.field).map(|stored| cosine_similarity(&q.vector, &stored))
            });

            let score = if request.vector.is_some() && request.search_text.is_none() {
                // Pure vector query: only documents carrying a vector are candidates.
                match vector {
                    Some(v) => v,
                    None => continue,
                }
            } else if request.vector.is_some() {
                // Hybrid: the union of the text and vector channels.
                let t = text.unwrap_or(1.0);
                if t == 0.0 && vector.is_none() {
                    continue;
                }
                t + vector.unwrap_or(0.0)
            } else {
                match text {
                    Some(t) if t > 0.0 => t,
                    Some(_) => continue,
                    None => 1.0,
                }
            };

            hits.push(SearchResponseHit {
                score,
                reranker_score: request.semantic.as_ref().map(|_| score),
                captions: Vec::new(),
                document: document.clone(),
            });
        }

        if let Some(vector) = &request.vector {
            if request.search_text.is_none() {
                hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
                hits.truncate(vector.k);
            }
        }

        match request.order_by.as_deref().and_then(|o| o.split_whitespace().next().map(|f| (f, o))) {
            Some((field, raw)) => {
                let descending = raw.to_lowercase().ends_with(" desc");
                hits.sort_by(|a, b| {
                    let ordering = compare_field(&a.document, &b.document, field);
                    if descending {
                        ordering.reverse()
                    } else {
                        ordering
                    }
                });
            }
            None => hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal)),
        }

        let total_count = request.include_total_count.then_some(hits.len() as u64);
        let mut page: Vec<SearchResponseHit> = hits.into_iter().skip(request.skip).take(request.top).collect();
        if !request.select.is_empty() {
            for hit in &mut page {
                hit.document.retain(|k, _| request.select.iter().any(|s| s == k));
            }
        }

        Ok(SearchResponse { total_count, hits: page, answers: Vec::new() })
    }

    async fn get_document(&self, index: &str, key: &str) -> PortResult<Map<String, Value>> {
        self.indexes
            .read()
            .await
            .get(index)
            .and_then(|s| s.documents.get(key))
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("document {} not found in index {}", key, index)))
    }
}

//=========================================================================================
// Blob Storage
//=========================================================================================

/// A `BlobStorage` held in memory. Download URLs use a `memory://` scheme.
#[derive(Default)]
pub struct InMemoryBlobStorage {
    blobs: RwLock<HashMap<(String, String), (Bytes, String)>>,
}

impl InMemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, container: &str, path: &str) -> Option<Bytes> {
        self.blobs
            .read()
            .await
            .get(&(container.to_string(), path.to_string()))
            .map(|(data, _)| data.clone())
    }
}

#[async_trait]
impl BlobStorage for InMemoryBlobStorage {
    async fn upload(&self, container: &str, path: &str, data: Bytes, content_type: &str) -> PortResult<()> {
        if container.is_empty() || path.is_empty() {
            return Err(PortError::InvalidInput("container and path are required".to_string()));
        }
        self.blobs
            .write()
            .await
            .insert((container.to_string(), path.to_string()), (data, content_type.to_string()));
        Ok(())
    }

    async fn download_url(&self, container: &str, path: &str, ttl: Duration) -> PortResult<String> {
        if !self.blobs.read().await.contains_key(&(container.to_string(), path.to_string())) {
            return Err(PortError::NotFound(format!("blob {}/{} not found", container, path)));
        }
        Ok(format!("memory://{}/{}?ttl={}", container, path, ttl.as_secs()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use twin_data_core::search::{FilterClause, IndexField, VectorQuery};

    fn definition() -> IndexDefinition {
        IndexDefinition {
            name: "idx".into(),
            fields: vec![
                IndexField::new("id", FieldKind::String).key(),
                IndexField::new("twinId", FieldKind::String).filterable(),
                IndexField::new("body", FieldKind::String).searchable(),
                IndexField::new("vec", FieldKind::Vector { dimensions: 2, profile: "p".into() }),
            ],
            vector_profile: None,
            semantic: None,
        }
    }

    fn doc(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn queries_never_cross_partitions() {
        let store = InMemoryDocumentStore::new();
        store.create("c", "t1", "a", json!({ "Name": "x" })).await.unwrap();
        store.create("c", "t2", "b", json!({ "Name": "x" })).await.unwrap();

        let rows = store.query("c", "t1", &DocumentQuery::new().equals("Name", "x")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(store.read("c", "t2", "a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn create_rejects_duplicates_and_delete_reports_missing() {
        let store = InMemoryDocumentStore::new();
        store.create("c", "t1", "a", json!({})).await.unwrap();
        assert!(matches!(store.create("c", "t1", "a", json!({})).await, Err(PortError::Permanent(_))));
        store.delete("c", "t1", "a").await.unwrap();
        assert!(store.delete("c", "t1", "a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn merge_or_upload_keeps_untouched_fields() {
        let index = InMemorySearchIndex::new();
        index.create_or_update_index(&definition()).await.unwrap();
        index
            .index_documents("idx", vec![IndexAction::merge_or_upload(doc(json!({ "id": "1", "twinId": "t1", "body": "old" })))])
            .await
            .unwrap();
        index
            .index_documents("idx", vec![IndexAction::merge_or_upload(doc(json!({ "id": "1", "body": "new" })))])
            .await
            .unwrap();

        let stored = index.get_document("idx", "1").await.unwrap();
        assert_eq!(stored["twinId"], "t1");
        assert_eq!(stored["body"], "new");
        assert_eq!(index.document_count("idx").await, 1);
    }

    #[tokio::test]
    async fn vector_search_ranks_by_cosine() {
        let index = InMemorySearchIndex::new();
        index.create_or_update_index(&definition()).await.unwrap();
        let docs = vec![
            IndexAction::merge_or_upload(doc(json!({ "id": "near", "twinId": "t1", "body": "a", "vec": [1.0, 0.0] }))),
            IndexAction::merge_or_upload(doc(json!({ "id": "far", "twinId": "t1", "body": "b", "vec": [0.0, 1.0] }))),
            IndexAction::merge_or_upload(doc(json!({ "id": "none", "twinId": "t1", "body": "c" }))),
        ];
        index.index_documents("idx", docs).await.unwrap();

        let request = SearchRequest {
            vector: Some(VectorQuery { vector: vec![0.9, 0.1], k: 5, field: "vec".into() }),
            filters: vec![FilterClause::eq_text("twinId", "t1")],
            top: 10,
            include_total_count: true,
            ..Default::default()
        };
        let response = index.search("idx", &request).await.unwrap();
        assert_eq!(response.total_count, Some(2));
        assert_eq!(response.hits[0].document["id"], "near");
    }

    #[tokio::test]
    async fn download_url_requires_existing_blob() {
        let blobs = InMemoryBlobStorage::new();
        assert!(blobs.download_url("c", "p", Duration::from_secs(60)).await.unwrap_err().is_not_found());
        blobs.upload("c", "p", Bytes::from_static(b"x"), "text/plain").await.unwrap();
        assert_eq!(blobs.download_url("c", "p", Duration::from_secs(60)).await.unwrap(), "memory://c/p?ttl=60");
    }
}
