//! services/twin_data/src/indexes/semistructured.rs
//!
//! The index of semistructured documents (invoices, statements, books...),
//! searched through their plain-text report.

use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use twin_data_core::domain::{new_id, SemistructuredDocument};
use twin_data_core::ports::{require, EmbeddingService, PortError, PortResult, SearchIndexClient};
use twin_data_core::search::{FilterClause, IndexAction, IndexDefinition};

use super::schema::{semistructured_fields as f, semistructured_index_definition};
use super::{
    build_request, check_results, embed_or_skip, parse_timestamp, text_field, timestamp, typed_results,
    IndexFields, SearchMode, SearchResults, DEFAULT_PAGE_SIZE,
};

fn to_document(document: &SemistructuredDocument, vector: Option<Vec<f32>>) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert(f::ID.into(), json!(document.id));
    fields.insert(f::TWIN_ID.into(), json!(document.twin_id));
    fields.insert(f::DOCUMENT_TYPE.into(), json!(document.document_type));
    fields.insert(f::FILE_NAME.into(), json!(document.file_name));
    fields.insert(f::FILE_PATH.into(), json!(document.file_path));
    fields.insert(f::REPORTE_TEXTO_PLANO.into(), json!(document.reporte_texto_plano));
    fields.insert(f::PROCESSED_AT.into(), json!(timestamp(document.processed_at)));
    // Null clears a vector left by an earlier merge.
    fields.insert(f::VECTOR.into(), json!(vector));
    fields
}

fn from_document(fields: &Map<String, Value>) -> PortResult<SemistructuredDocument> {
    let id = text_field(fields, f::ID);
    if id.is_empty() {
        return Err(PortError::Permanent("semistructured search document has no id".to_string()));
    }
    Ok(SemistructuredDocument {
        id,
        twin_id: text_field(fields, f::TWIN_ID),
        document_type: text_field(fields, f::DOCUMENT_TYPE),
        file_name: text_field(fields, f::FILE_NAME),
        file_path: fields.get(f::FILE_PATH).and_then(Value::as_str).map(String::from),
        reporte_texto_plano: text_field(fields, f::REPORTE_TEXTO_PLANO),
        processed_at: parse_timestamp(fields.get(f::PROCESSED_AT)).unwrap_or_default(),
    })
}

#[derive(Debug, Clone)]
pub struct SemistructuredSearchQuery {
    pub twin_id: String,
    pub document_type: Option<String>,
    pub search_text: Option<String>,
    pub mode: SearchMode,
    pub skip: usize,
    pub top: usize,
}

impl SemistructuredSearchQuery {
    pub fn new(twin_id: impl Into<String>) -> Self {
        Self {
            twin_id: twin_id.into(),
            document_type: None,
            search_text: None,
            mode: SearchMode::FullText,
            skip: 0,
            top: DEFAULT_PAGE_SIZE,
        }
    }
}

#[derive(Clone)]
pub struct SemistructuredIndex {
    client: Arc<dyn SearchIndexClient>,
    embeddings: Arc<dyn EmbeddingService>,
    definition: IndexDefinition,
}

impl SemistructuredIndex {
    /// Creates a new `SemistructuredIndex`.
    pub fn new(client: Arc<dyn SearchIndexClient>, embeddings: Arc<dyn EmbeddingService>, index_name: &str) -> Self {
        let definition = semistructured_index_definition(index_name, embeddings.dimensions());
        Self { client, embeddings, definition }
    }

    pub fn index_name(&self) -> &str {
        &self.definition.name
    }

    pub async fn create_or_update_index(&self) -> PortResult<()> {
        self.client.create_or_update_index(&self.definition).await.map_err(|e| {
            error!(index = %self.definition.name, error = %e, "Failed to create or update the semistructured index");
            e
        })?;
        info!(index = %self.definition.name, "Semistructured index is up to date");
        Ok(())
    }

    /// Upserts a document and returns its key. An empty id gets a generated one.
    pub async fn index_document(&self, document: &SemistructuredDocument) -> PortResult<String> {
        require("TwinID", &document.twin_id)?;
        require("DocumentType", &document.document_type)?;

        let mut document = document.clone();
        if document.id.trim().is_empty() {
            document.id = new_id();
        }
        let vector = embed_or_skip(self.embeddings.as_ref(), &document.id, &document.reporte_texto_plano).await;
        let has_vector = vector.is_some();

        let action = IndexAction::merge_or_upload(to_document(&document, vector));
        let result = self
            .client
            .index_documents(&self.definition.name, vec![action])
            .await
            .and_then(|results| check_results(&results));
        if let Err(e) = result {
            error!(id = %document.id, twin_id = %document.twin_id, error = %e, "Failed to index semistructured document");
            return Err(e);
        }

        info!(id = %document.id, twin_id = %document.twin_id, document_type = %document.document_type, has_vector, "Semistructured document indexed");
        Ok(document.id)
    }

    pub async fn search(
        &self,
        query: &SemistructuredSearchQuery,
    ) -> PortResult<SearchResults<SemistructuredDocument>> {
        require("TwinID", &query.twin_id)?;
        let mut filters = vec![FilterClause::eq_text(f::TWIN_ID, query.twin_id.clone())];
        if let Some(document_type) = query.document_type.as_deref().filter(|t| !t.trim().is_empty()) {
            filters.push(FilterClause::eq_text(f::DOCUMENT_TYPE, document_type));
        }

        let fields = IndexFields { vector: f::VECTOR, semantic_configuration: f::SEMANTIC_CONFIGURATION };
        let mut request = build_request(
            self.embeddings.as_ref(),
            fields,
            query.search_text.as_deref(),
            query.mode,
            filters,
            query.skip,
            query.top,
        )
        .await;
        if request.search_text.is_none() && request.vector.is_none() {
            request.order_by = Some(format!("{} desc", f::PROCESSED_AT));
        }

        let response = self.client.search(&self.definition.name, &request).await.map_err(|e| {
            error!(twin_id = %query.twin_id, error = %e, "Semistructured search failed");
            e
        })?;
        let results = typed_results(response, from_document);
        debug!(twin_id = %query.twin_id, total = results.total_count, page = results.hits.len(), "Semistructured search completed");
        Ok(results)
    }

    /// Point lookup. A document owned by another twin is reported as not found.
    pub async fn get_document(&self, id: &str, twin_id: &str) -> PortResult<SemistructuredDocument> {
        require("id", id)?;
        require("TwinID", twin_id)?;
        let fields = self.client.get_document(&self.definition.name, id).await?;
        let document = from_document(&fields)?;
        if document.twin_id != twin_id {
            warn!(id = %id, twin_id = %twin_id, "Semistructured document belongs to another twin");
            return Err(PortError::NotFound(format!("document {} not found for twin {}", id, twin_id)));
        }
        Ok(document)
    }

    pub async fn delete_document(&self, id: &str) -> PortResult<()> {
        require("id", id)?;
        let results = self
            .client
            .index_documents(&self.definition.name, vec![IndexAction::delete(f::ID, id)])
            .await?;
        check_results(&results)?;
        info!(id = %id, "Semistructured document removed from the index");
        Ok(())
    }
}
