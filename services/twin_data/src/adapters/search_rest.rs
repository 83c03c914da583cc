//! services/twin_data/src/adapters/search_rest.rs
//!
//! This module contains the adapter for the managed search service's REST API.
//! It implements the `SearchIndexClient` port from the `core` crate and owns
//! the translation of schemas, filters and queries into the service's JSON.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde_json::{json, Map, Value};
use tracing::debug;
use twin_data_core::ports::{PortError, PortResult, SearchIndexClient};
use twin_data_core::search::{
    FieldKind, FilterClause, FilterValue, IndexAction, IndexActionKind, IndexDefinition, IndexField,
    IndexingResult, SearchRequest, SearchResponse, SearchResponseHit,
};

use crate::config::SearchConfig;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `SearchIndexClient` over HTTPS.
#[derive(Clone)]
pub struct RestSearchClient {
    http: Client,
    endpoint: String,
    api_key: String,
    api_version: String,
}

impl RestSearchClient {
    /// Creates a new `RestSearchClient`.
    pub fn new(http: Client, config: SearchConfig) -> Self {
        Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            api_version: config.api_version,
        }
    }

    fn url(&self, segments: &[&str]) -> PortResult<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| PortError::Permanent(format!("invalid search endpoint '{}': {}", self.endpoint, e)))?;
        url.path_segments_mut()
            .map_err(|_| PortError::Permanent(format!("search endpoint '{}' cannot be a base", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut().append_pair("api-version", &self.api_version);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http.request(method, url).header("api-key", &self.api_key)
    }

    /// Sends the request and returns the JSON body of a successful response.
    async fn send(&self, request: RequestBuilder) -> PortResult<Value> {
        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        let bytes = response.bytes().await.map_err(map_reqwest_error)?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

//=========================================================================================
// Error Mapping
//=========================================================================================

pub(crate) fn map_reqwest_error(e: reqwest::Error) -> PortError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        PortError::Transient(e.to_string())
    } else {
        PortError::Permanent(e.to_string())
    }
}

pub(crate) fn map_status(status: StatusCode, body: &str) -> PortError {
    let message = format!("search service returned {}: {}", status, body);
    if status == StatusCode::NOT_FOUND {
        PortError::NotFound(message)
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        PortError::Transient(message)
    } else {
        PortError::Permanent(message)
    }
}

//=========================================================================================
// Wire Rendering
//=========================================================================================

fn field_json(field: &IndexField) -> Value {
    match &field.kind {
        FieldKind::Vector { dimensions, profile } => json!({
            "name": field.name,
            "type": "Collection(Edm.Single)",
            "searchable": true,
            "retrievable": true,
            "dimensions": dimensions,
            "vectorSearchProfile": profile,
        }),
        kind => {
            let edm = match kind {
                FieldKind::String => "Edm.String",
                FieldKind::Int32 => "Edm.Int32",
                FieldKind::Int64 => "Edm.Int64",
                FieldKind::Double => "Edm.Double",
                FieldKind::Boolean => "Edm.Boolean",
                FieldKind::DateTimeOffset => "Edm.DateTimeOffset",
                FieldKind::StringCollection => "Collection(Edm.String)",
                FieldKind::Vector { .. } => "Collection(Edm.Single)",
            };
            json!({
                "name": field.name,
                "type": edm,
                "key": field.key,
                "searchable": field.searchable,
                "filterable": field.filterable,
                "sortable": field.sortable,
                "facetable": field.facetable,
                "retrievable": true,
            })
        }
    }
}

/// Renders an index schema in the service's create-or-update format.
pub fn index_definition_json(definition: &IndexDefinition) -> Value {
    let mut body = json!({
        "name": definition.name,
        "fields": definition.fields.iter().map(field_json).collect::<Vec<_>>(),
    });

    if let Some(profile) = &definition.vector_profile {
        body["vectorSearch"] = json!({
            "algorithms": [{
                "name": profile.algorithm_name,
                "kind": "hnsw",
                "hnswParameters": { "metric": "cosine", "m": 4, "efConstruction": 400, "efSearch": 500 }
            }],
            "profiles": [{ "name": profile.profile_name, "algorithm": profile.algorithm_name }]
        });
    }

    if let Some(semantic) = &definition.semantic {
        let fields = |names: &[String]| names.iter().map(|n| json!({ "fieldName": n })).collect::<Vec<_>>();
        body["semantic"] = json!({
            "configurations": [{
                "name": semantic.name,
                "prioritizedFields": {
                    "titleField": { "fieldName": semantic.title_field },
                    "prioritizedContentFields": fields(semantic.content_fields.as_slice()),
                    "prioritizedKeywordsFields": fields(semantic.keyword_fields.as_slice()),
                }
            }]
        });
    }
    body
}

fn odata_literal(value: &FilterValue) -> String {
    match value {
        FilterValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
        FilterValue::Bool(b) => b.to_string(),
        FilterValue::Int(n) => n.to_string(),
        FilterValue::DateTime(s) => s.clone(),
    }
}

/// Renders ANDed filter clauses as an OData `$filter` expression.
pub fn odata_filter(clauses: &[FilterClause]) -> Option<String> {
    if clauses.is_empty() {
        return None;
    }
    let parts: Vec<String> = clauses
        .iter()
        .map(|c| match c {
            FilterClause::Eq(f, v) => format!("{} eq {}", f, odata_literal(v)),
            FilterClause::Ge(f, v) => format!("{} ge {}", f, odata_literal(v)),
            FilterClause::Le(f, v) => format!("{} le {}", f, odata_literal(v)),
        })
        .collect();
    Some(parts.join(" and "))
}

/// Renders a `SearchRequest` as the body of a `docs/search` call.
pub fn search_body(request: &SearchRequest) -> Value {
    let mut body = Map::new();

    match (&request.search_text, &request.vector) {
        (Some(text), _) => {
            body.insert("search".into(), json!(text));
        }
        (None, Some(_)) => {}
        (None, None) => {
            body.insert("search".into(), json!("*"));
        }
    }
    if let Some(filter) = odata_filter(&request.filters) {
        body.insert("filter".into(), json!(filter));
    }
    if let Some(order) = &request.order_by {
        body.insert("orderby".into(), json!(order));
    }
    if !request.select.is_empty() {
        body.insert("select".into(), json!(request.select.join(",")));
    }
    body.insert("top".into(), json!(request.top));
    body.insert("skip".into(), json!(request.skip));
    body.insert("count".into(), json!(request.include_total_count));

    if let Some(semantic) = &request.semantic {
        body.insert("queryType".into(), json!("semantic"));
        body.insert("semanticConfiguration".into(), json!(semantic.configuration));
        if semantic.captions {
            body.insert("captions".into(), json!("extractive"));
        }
        if semantic.answers {
            body.insert("answers".into(), json!("extractive|count-3"));
        }
    }

    if let Some(vector) = &request.vector {
        body.insert(
            "vectorQueries".into(),
            json!([{ "kind": "vector", "vector": vector.vector, "k": vector.k, "fields": vector.field }]),
        );
    }
    Value::Object(body)
}

fn action_name(kind: IndexActionKind) -> &'static str {
    match kind {
        IndexActionKind::Upload => "upload",
        IndexActionKind::MergeOrUpload => "mergeOrUpload",
        IndexActionKind::Delete => "delete",
    }
}

fn parse_search_response(body: Value) -> SearchResponse {
    let total_count = body.get("@odata.count").and_then(Value::as_u64);
    let answers = body
        .get("@search.answers")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|x| x.get("text").and_then(Value::as_str)).map(String::from).collect())
        .unwrap_or_default();

    let hits = body
        .get("value")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(Value::as_object)
                .map(|row| {
                    let captions = row
                        .get("@search.captions")
                        .and_then(Value::as_array)
                        .map(|c| c.iter().filter_map(|x| x.get("text").and_then(Value::as_str)).map(String::from).collect())
                        .unwrap_or_default();
                    let document = row
                        .iter()
                        .filter(|(k, _)| !k.starts_with("@search."))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    SearchResponseHit {
                        score: row.get("@search.score").and_then(Value::as_f64).unwrap_or(0.0),
                        reranker_score: row.get("@search.rerankerScore").and_then(Value::as_f64),
                        captions,
                        document,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    SearchResponse { total_count, hits, answers }
}

/// Reads one per-item result. A status code outside the HTTP range marks the
/// item as failed, which callers treat as permanent.
fn parse_indexing_result(row: &Value) -> IndexingResult {
    let key = row.get("key").and_then(Value::as_str).unwrap_or_default().to_string();
    let error_message = row.get("errorMessage").and_then(Value::as_str).map(String::from);
    let raw_code = row.get("statusCode").and_then(Value::as_u64).unwrap_or(0);
    match u16::try_from(raw_code) {
        Ok(status_code) => IndexingResult {
            key,
            succeeded: row.get("status").and_then(Value::as_bool).unwrap_or(false),
            status_code,
            error_message,
        },
        Err(_) => IndexingResult {
            key,
            succeeded: false,
            status_code: 0,
            error_message: Some(format!("invalid status code {}", raw_code)),
        },
    }
}

//=========================================================================================
// `SearchIndexClient` Trait Implementation
//=========================================================================================

#[async_trait]
impl SearchIndexClient for RestSearchClient {
    async fn create_or_update_index(&self, definition: &IndexDefinition) -> PortResult<()> {
        let url = self.url(&["indexes", &definition.name])?;
        let body = index_definition_json(definition);
        self.send(self.request(Method::PUT, url).json(&body)).await?;
        debug!(index = %definition.name, "Index schema pushed");
        Ok(())
    }

    async fn index_documents(&self, index: &str, actions: Vec<IndexAction>) -> PortResult<Vec<IndexingResult>> {
        let url = self.url(&["indexes", index, "docs", "index"])?;
        let value: Vec<Value> = actions
            .into_iter()
            .map(|action| {
                let mut document = action.document;
                document.insert("@search.action".into(), json!(action_name(action.kind)));
                Value::Object(document)
            })
            .collect();

        let body = self.send(self.request(Method::POST, url).json(&json!({ "value": value }))).await?;
        let results = body
            .get("value")
            .and_then(Value::as_array)
            .map(|rows| rows.iter().map(parse_indexing_result).collect())
            .unwrap_or_default();
        Ok(results)
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> PortResult<SearchResponse> {
        let url = self.url(&["indexes", index, "docs", "search"])?;
        let body = self.send(self.request(Method::POST, url).json(&search_body(request))).await?;
        Ok(parse_search_response(body))
    }

    async fn get_document(&self, index: &str, key: &str) -> PortResult<Map<String, Value>> {
        let url = self.url(&["indexes", index, "docs", key])?;
        match self.send(self.request(Method::GET, url)).await? {
            Value::Object(document) => Ok(document),
            other => Err(PortError::Permanent(format!("unexpected document payload: {}", other))),
        }
    }
}
