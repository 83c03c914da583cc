//! services/twin_data/src/indexes/mod.rs
//!
//! Index managers for the search-backed entities, plus the pieces they share:
//! the retrieval mode, the typed result page and the translation of a mode
//! into a `SearchRequest`.

pub mod diary;
pub mod schema;
pub mod semistructured;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use twin_data_core::ports::{EmbeddingService, PortError, PortResult};
use twin_data_core::search::{
    FilterClause, IndexingResult, SearchRequest, SearchResponse, SemanticOptions, VectorQuery,
};

pub use diary::{DiaryAnalysisIndex, DiarySearchQuery};
pub use semistructured::{SemistructuredIndex, SemistructuredSearchQuery};

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

/// How a query is matched against the index. The modes are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    #[default]
    FullText,
    /// Full text re-ranked by the index's semantic configuration, with captions and answers.
    Semantic,
    /// k-NN over the stored embeddings. `hybrid` also unions the full-text matches.
    Vector { hybrid: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit<T> {
    pub score: f64,
    pub reranker_score: Option<f64>,
    pub captions: Vec<String>,
    pub item: T,
}

/// One page of results and the total number of matches.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResults<T> {
    pub total_count: u64,
    pub hits: Vec<SearchHit<T>>,
    pub answers: Vec<String>,
}

/// The index-specific names a query needs.
pub(crate) struct IndexFields<'a> {
    pub vector: &'a str,
    pub semantic_configuration: &'a str,
}

/// Replaces the characters a document key may not contain with `_`.
pub fn sanitize_key(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '=') { c } else { '_' })
        .collect()
}

/// Timestamps are written and filtered in one fixed RFC 3339 form.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(raw: Option<&Value>) -> Option<DateTime<Utc>> {
    raw.and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn text_field(document: &Map<String, Value>, field: &str) -> String {
    document.get(field).and_then(Value::as_str).unwrap_or_default().to_string()
}

/// Builds the request for one page of a query in the given mode. A vector query
/// whose text cannot be embedded falls back to full text.
pub(crate) async fn build_request(
    embeddings: &dyn EmbeddingService,
    fields: IndexFields<'_>,
    search_text: Option<&str>,
    mode: SearchMode,
    filters: Vec<FilterClause>,
    skip: usize,
    top: usize,
) -> SearchRequest {
    let text = search_text.map(str::trim).filter(|t| !t.is_empty()).map(String::from);
    let top = top.clamp(1, MAX_PAGE_SIZE);
    let mut request = SearchRequest {
        search_text: text.clone(),
        filters,
        skip,
        top,
        include_total_count: true,
        ..Default::default()
    };

    match mode {
        SearchMode::FullText => {}
        // Re-ranking needs query text to rank against.
        SearchMode::Semantic if text.is_none() => {}
        SearchMode::Semantic => {
            request.semantic = Some(SemanticOptions {
                configuration: fields.semantic_configuration.to_string(),
                captions: true,
                answers: true,
            });
        }
        SearchMode::Vector { hybrid } => {
            let Some(query_text) = text else {
                debug!("Vector search without query text; running a plain filtered search");
                return request;
            };
            match embeddings.embed(&query_text).await {
                Ok(vector) => {
                    request.vector = Some(VectorQuery { vector, k: skip + top, field: fields.vector.to_string() });
                    if !hybrid {
                        request.search_text = None;
                    }
                }
                Err(e) => warn!(error = %e, "Query embedding failed; falling back to full-text search"),
            }
        }
    }
    request
}

/// Converts a raw response page into typed hits. Rows that fail to decode are dropped.
pub(crate) fn typed_results<T>(
    response: SearchResponse,
    decode: impl Fn(&Map<String, Value>) -> PortResult<T>,
) -> SearchResults<T> {
    let mut hits = Vec::with_capacity(response.hits.len());
    for hit in response.hits {
        match decode(&hit.document) {
            Ok(item) => hits.push(SearchHit {
                score: hit.score,
                reranker_score: hit.reranker_score,
                captions: hit.captions,
                item,
            }),
            Err(e) => warn!(error = %e, "Dropping search hit that could not be decoded"),
        }
    }
    let total_count = response.total_count.unwrap_or(hits.len() as u64);
    SearchResults { total_count, hits, answers: response.answers }
}

/// Turns the first failed item of a batch into an error.
pub(crate) fn check_results(results: &[IndexingResult]) -> PortResult<()> {
    match results.iter().find(|r| !r.succeeded) {
        None => Ok(()),
        Some(failed) => {
            let message = format!(
                "indexing '{}' failed with status {}: {}",
                failed.key,
                failed.status_code,
                failed.error_message.as_deref().unwrap_or("no message")
            );
            if failed.status_code == 429 || failed.status_code >= 500 {
                Err(PortError::Transient(message))
            } else {
                Err(PortError::Permanent(message))
            }
        }
    }
}

/// Embeds `text`, or returns `None` (with a warning) so the document is indexed without a vector.
pub(crate) async fn embed_or_skip(embeddings: &dyn EmbeddingService, id: &str, text: &str) -> Option<Vec<f32>> {
    if text.trim().is_empty() {
        return None;
    }
    match embeddings.embed(text).await {
        Ok(vector) => Some(vector),
        Err(e) => {
            warn!(id = %id, error = %e, "Embedding failed; indexing the document without a vector");
            None
        }
    }
}
