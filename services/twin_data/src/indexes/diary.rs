//! services/twin_data/src/indexes/diary.rs
//!
//! The diary analysis index. One diary entry maps to at most one search
//! document: its key is derived from the entry id, and an existing document for
//! the same entry is always reused before a new key is minted.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use twin_data_core::domain::{DiaryAnalysis, DiaryAnalysisEntry};
use twin_data_core::html::strip_html;
use twin_data_core::ports::{require, EmbeddingService, PortError, PortResult, SearchIndexClient};
use twin_data_core::search::{FilterClause, FilterValue, IndexAction, IndexDefinition, SearchRequest};

use super::schema::{diary_fields as f, diary_index_definition};
use super::{
    build_request, check_results, embed_or_skip, parse_timestamp, sanitize_key, text_field, timestamp, typed_results,
    IndexFields, SearchMode, SearchResults, DEFAULT_PAGE_SIZE,
};

pub const DOCUMENT_ID_PREFIX: &str = "diary_analysis_";

/// The deterministic search key for a diary entry.
pub fn document_id_for(diary_entry_id: &str) -> String {
    format!("{}{}", DOCUMENT_ID_PREFIX, sanitize_key(diary_entry_id))
}

/// The free text that is embedded and searched for an analysis.
pub fn combined_text(analysis: &DiaryAnalysis) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut push = |part: String| {
        let part = part.trim().trim_end_matches('.').trim().to_string();
        if !part.is_empty() {
            parts.push(part);
        }
    };

    push(analysis.executive_summary.clone());
    push(strip_html(&analysis.html_report));
    for (key, value) in &analysis.metadata {
        push(format!("{}: {}", key, value));
    }
    push(format!("Estado: {}", estado(analysis.success)));
    push(format!("Tiempo de procesamiento: {} ms", analysis.processing_time_ms));
    parts.join(". ")
}

fn estado(success: bool) -> &'static str {
    if success {
        "Exitoso"
    } else {
        "Con errores"
    }
}

fn to_document(id: &str, analysis: &DiaryAnalysis, content: &str, vector: Option<Vec<f32>>) -> PortResult<Map<String, Value>> {
    let mut document = Map::new();
    document.insert(f::ID.into(), json!(id));
    document.insert(f::DIARY_ENTRY_ID.into(), json!(analysis.diary_entry_id));
    document.insert(f::TWIN_ID.into(), json!(analysis.twin_id));
    document.insert(f::SUCCESS.into(), json!(analysis.success));
    document.insert(f::ESTADO.into(), json!(estado(analysis.success)));
    document.insert(f::EXECUTIVE_SUMMARY.into(), json!(analysis.executive_summary));
    document.insert(f::HTML_REPORT.into(), json!(analysis.html_report));
    document.insert(f::CONTENIDO_COMPLETO.into(), json!(content));
    document.insert(f::PROCESSING_TIME_MS.into(), json!(analysis.processing_time_ms));
    document.insert(f::ANALYZED_AT.into(), json!(timestamp(analysis.analyzed_at)));
    document.insert(f::ERROR_MESSAGE.into(), json!(analysis.error_message));
    document.insert(f::METADATA_JSON.into(), json!(serde_json::to_string(&analysis.metadata)?));
    // Null clears a vector left by an earlier merge.
    document.insert(f::VECTOR.into(), json!(vector));
    Ok(document)
}

fn from_document(document: &Map<String, Value>) -> PortResult<DiaryAnalysisEntry> {
    let document_id = text_field(document, f::ID);
    let diary_entry_id = text_field(document, f::DIARY_ENTRY_ID);
    if document_id.is_empty() || diary_entry_id.is_empty() {
        return Err(PortError::Permanent("diary search document is missing its keys".to_string()));
    }
    let metadata: BTreeMap<String, String> = document
        .get(f::METADATA_JSON)
        .and_then(Value::as_str)
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();

    Ok(DiaryAnalysisEntry {
        document_id,
        analysis: DiaryAnalysis {
            diary_entry_id,
            twin_id: text_field(document, f::TWIN_ID),
            success: document.get(f::SUCCESS).and_then(Value::as_bool).unwrap_or(false),
            executive_summary: text_field(document, f::EXECUTIVE_SUMMARY),
            html_report: text_field(document, f::HTML_REPORT),
            processing_time_ms: document.get(f::PROCESSING_TIME_MS).and_then(Value::as_i64).unwrap_or(0),
            analyzed_at: parse_timestamp(document.get(f::ANALYZED_AT)).unwrap_or_default(),
            error_message: document.get(f::ERROR_MESSAGE).and_then(Value::as_str).map(String::from),
            metadata,
        },
    })
}

/// A query against the diary index. Results are always scoped to one twin.
#[derive(Debug, Clone)]
pub struct DiarySearchQuery {
    pub twin_id: String,
    pub search_text: Option<String>,
    pub mode: SearchMode,
    pub success: Option<bool>,
    /// Inclusive lower bound on `analyzedAt`.
    pub analyzed_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `analyzedAt`.
    pub analyzed_to: Option<DateTime<Utc>>,
    pub skip: usize,
    pub top: usize,
}

impl DiarySearchQuery {
    pub fn new(twin_id: impl Into<String>) -> Self {
        Self {
            twin_id: twin_id.into(),
            search_text: None,
            mode: SearchMode::FullText,
            success: None,
            analyzed_from: None,
            analyzed_to: None,
            skip: 0,
            top: DEFAULT_PAGE_SIZE,
        }
    }

    fn filters(&self) -> Vec<FilterClause> {
        let mut filters = vec![FilterClause::eq_text(f::TWIN_ID, self.twin_id.clone())];
        if let Some(success) = self.success {
            filters.push(FilterClause::Eq(f::SUCCESS.to_string(), FilterValue::Bool(success)));
        }
        if let Some(from) = self.analyzed_from {
            filters.push(FilterClause::Ge(f::ANALYZED_AT.to_string(), FilterValue::DateTime(timestamp(from))));
        }
        if let Some(to) = self.analyzed_to {
            filters.push(FilterClause::Le(f::ANALYZED_AT.to_string(), FilterValue::DateTime(timestamp(to))));
        }
        filters
    }
}

#[derive(Clone)]
pub struct DiaryAnalysisIndex {
    client: Arc<dyn SearchIndexClient>,
    embeddings: Arc<dyn EmbeddingService>,
    definition: IndexDefinition,
}

impl DiaryAnalysisIndex {
    /// Creates a new `DiaryAnalysisIndex`. The vector field is sized from the embedding service.
    pub fn new(client: Arc<dyn SearchIndexClient>, embeddings: Arc<dyn EmbeddingService>, index_name: &str) -> Self {
        let definition = diary_index_definition(index_name, embeddings.dimensions());
        Self { client, embeddings, definition }
    }

    pub fn index_name(&self) -> &str {
        &self.definition.name
    }

    pub async fn create_or_update_index(&self) -> PortResult<()> {
        self.client.create_or_update_index(&self.definition).await.map_err(|e| {
            error!(index = %self.definition.name, error = %e, "Failed to create or update the diary index");
            e
        })?;
        info!(index = %self.definition.name, "Diary index is up to date");
        Ok(())
    }

    /// Upserts the analysis of one diary entry and returns its search key.
    pub async fn index_entry(&self, analysis: &DiaryAnalysis) -> PortResult<String> {
        require("DiaryEntryId", &analysis.diary_entry_id)?;
        require("TwinID", &analysis.twin_id)?;

        let id = self.resolve_document_id(&analysis.diary_entry_id).await?;
        let content = combined_text(analysis);
        let vector = embed_or_skip(self.embeddings.as_ref(), &id, &content).await;
        let has_vector = vector.is_some();
        let document = to_document(&id, analysis, &content, vector)?;

        let results = self
            .client
            .index_documents(&self.definition.name, vec![IndexAction::merge_or_upload(document)])
            .await
            .and_then(|results| check_results(&results));
        if let Err(e) = results {
            error!(id = %id, diary_entry_id = %analysis.diary_entry_id, error = %e, "Failed to index diary analysis");
            return Err(e);
        }

        info!(id = %id, diary_entry_id = %analysis.diary_entry_id, twin_id = %analysis.twin_id, has_vector, "Diary analysis indexed");
        Ok(id)
    }

    /// Reuses the key of an existing document for the entry; otherwise takes the
    /// deterministic key, suffixed with a timestamp if a different entry holds it.
    async fn resolve_document_id(&self, diary_entry_id: &str) -> PortResult<String> {
        if let Some(existing) = self.find_document_ids(diary_entry_id, 1).await?.into_iter().next() {
            debug!(id = %existing, diary_entry_id = %diary_entry_id, "Updating existing diary document");
            return Ok(existing);
        }

        let candidate = document_id_for(diary_entry_id);
        let holder = match self.client.get_document(&self.definition.name, &candidate).await {
            Err(e) if e.is_not_found() => return Ok(candidate),
            Err(e) => return Err(e),
            Ok(holder) => text_field(&holder, f::DIARY_ENTRY_ID),
        };

        // The lookup can miss a document the point read sees; the key is still ours then.
        if holder.is_empty() || holder == diary_entry_id {
            debug!(id = %candidate, diary_entry_id = %diary_entry_id, "Deterministic key already holds this entry");
            return Ok(candidate);
        }

        let fallback = format!("{}_{}", candidate, Utc::now().timestamp_millis());
        warn!(
            key = %candidate,
            holder = %holder,
            diary_entry_id = %diary_entry_id,
            fallback = %fallback,
            "Search key already belongs to another diary entry"
        );
        Ok(fallback)
    }

    async fn find_document_ids(&self, diary_entry_id: &str, top: usize) -> PortResult<Vec<String>> {
        let request = SearchRequest {
            filters: vec![FilterClause::eq_text(f::DIARY_ENTRY_ID, diary_entry_id)],
            select: vec![f::ID.to_string()],
            top,
            ..Default::default()
        };
        let response = self.client.search(&self.definition.name, &request).await?;
        Ok(response
            .hits
            .iter()
            .map(|hit| text_field(&hit.document, f::ID))
            .filter(|id| !id.is_empty())
            .collect())
    }

    pub async fn search(&self, query: &DiarySearchQuery) -> PortResult<SearchResults<DiaryAnalysisEntry>> {
        require("TwinID", &query.twin_id)?;
        let fields = IndexFields { vector: f::VECTOR, semantic_configuration: f::SEMANTIC_CONFIGURATION };
        let mut request = build_request(
            self.embeddings.as_ref(),
            fields,
            query.search_text.as_deref(),
            query.mode,
            query.filters(),
            query.skip,
            query.top,
        )
        .await;
        if request.search_text.is_none() && request.vector.is_none() {
            request.order_by = Some(format!("{} desc", f::ANALYZED_AT));
        }

        let response = self.client.search(&self.definition.name, &request).await.map_err(|e| {
            error!(twin_id = %query.twin_id, error = %e, "Diary search failed");
            e
        })?;
        let results = typed_results(response, from_document);
        debug!(twin_id = %query.twin_id, total = results.total_count, page = results.hits.len(), "Diary search completed");
        Ok(results)
    }

    /// Removes every search document held by the entry.
    pub async fn delete_entry(&self, diary_entry_id: &str) -> PortResult<()> {
        require("DiaryEntryId", diary_entry_id)?;
        let mut ids = self.find_document_ids(diary_entry_id, 50).await?;
        if ids.is_empty() {
            let candidate = document_id_for(diary_entry_id);
            self.client.get_document(&self.definition.name, &candidate).await.map_err(|e| {
                if e.is_not_found() {
                    warn!(diary_entry_id = %diary_entry_id, "No diary document to delete");
                }
                e
            })?;
            ids.push(candidate);
        }

        let actions = ids.iter().map(|id| IndexAction::delete(f::ID, id)).collect();
        let results = self.client.index_documents(&self.definition.name, actions).await?;
        check_results(&results)?;
        info!(diary_entry_id = %diary_entry_id, deleted = ids.len(), "Diary analysis removed from the index");
        Ok(())
    }

    pub async fn get_by_entry_and_twin(&self, diary_entry_id: &str, twin_id: &str) -> PortResult<DiaryAnalysisEntry> {
        require("DiaryEntryId", diary_entry_id)?;
        require("TwinID", twin_id)?;
        let request = SearchRequest {
            filters: vec![
                FilterClause::eq_text(f::DIARY_ENTRY_ID, diary_entry_id),
                FilterClause::eq_text(f::TWIN_ID, twin_id),
            ],
            top: 2,
            ..Default::default()
        };
        let response = self.client.search(&self.definition.name, &request).await?;
        if response.hits.len() > 1 {
            warn!(diary_entry_id = %diary_entry_id, twin_id = %twin_id, "More than one diary document for one entry");
        }
        match response.hits.first() {
            Some(hit) => from_document(&hit.document),
            None => Err(PortError::NotFound(format!(
                "no diary analysis for entry {} of twin {}",
                diary_entry_id, twin_id
            ))),
        }
    }
}
