//! services/twin_data/src/indexes/schema.rs
//!
//! Index schemas for the search-backed entities. Field names are shared with
//! the index managers through the `*_fields` modules.

use twin_data_core::search::{FieldKind, IndexDefinition, IndexField, SemanticConfiguration, VectorProfile};

pub const VECTOR_PROFILE: &str = "twin-vector-profile";
pub const VECTOR_ALGORITHM: &str = "twin-hnsw";

pub mod diary_fields {
    pub const ID: &str = "id";
    pub const DIARY_ENTRY_ID: &str = "diaryEntryId";
    pub const TWIN_ID: &str = "twinId";
    pub const SUCCESS: &str = "success";
    pub const ESTADO: &str = "estado";
    pub const EXECUTIVE_SUMMARY: &str = "executiveSummary";
    pub const HTML_REPORT: &str = "detailedHtmlReport";
    pub const CONTENIDO_COMPLETO: &str = "contenidoCompleto";
    pub const PROCESSING_TIME_MS: &str = "processingTimeMs";
    pub const ANALYZED_AT: &str = "analyzedAt";
    pub const ERROR_MESSAGE: &str = "errorMessage";
    pub const METADATA_JSON: &str = "metadataJson";
    pub const VECTOR: &str = "contenidoVector";
    pub const SEMANTIC_CONFIGURATION: &str = "diary-semantic-config";
}

pub mod semistructured_fields {
    pub const ID: &str = "id";
    pub const TWIN_ID: &str = "twinId";
    pub const DOCUMENT_TYPE: &str = "documentType";
    pub const FILE_NAME: &str = "fileName";
    pub const FILE_PATH: &str = "filePath";
    pub const REPORTE_TEXTO_PLANO: &str = "reporteTextoPlano";
    pub const PROCESSED_AT: &str = "processedAt";
    pub const VECTOR: &str = "reporteVector";
    pub const SEMANTIC_CONFIGURATION: &str = "semistructured-semantic-config";
}

fn vector_profile() -> VectorProfile {
    VectorProfile { profile_name: VECTOR_PROFILE.to_string(), algorithm_name: VECTOR_ALGORITHM.to_string() }
}

fn vector_field(name: &str, dimensions: usize) -> IndexField {
    IndexField::new(name, FieldKind::Vector { dimensions, profile: VECTOR_PROFILE.to_string() })
}

pub fn diary_index_definition(name: &str, dimensions: usize) -> IndexDefinition {
    use diary_fields::*;
    IndexDefinition {
        name: name.to_string(),
        fields: vec![
            IndexField::new(ID, FieldKind::String).key(),
            IndexField::new(DIARY_ENTRY_ID, FieldKind::String).filterable(),
            IndexField::new(TWIN_ID, FieldKind::String).filterable().facetable(),
            IndexField::new(SUCCESS, FieldKind::Boolean).filterable().facetable(),
            IndexField::new(ESTADO, FieldKind::String).searchable().filterable().facetable(),
            IndexField::new(EXECUTIVE_SUMMARY, FieldKind::String).searchable(),
            IndexField::new(HTML_REPORT, FieldKind::String),
            IndexField::new(CONTENIDO_COMPLETO, FieldKind::String).searchable(),
            IndexField::new(PROCESSING_TIME_MS, FieldKind::Int64).filterable().sortable(),
            IndexField::new(ANALYZED_AT, FieldKind::DateTimeOffset).filterable().sortable().facetable(),
            IndexField::new(ERROR_MESSAGE, FieldKind::String),
            IndexField::new(METADATA_JSON, FieldKind::String),
            vector_field(VECTOR, dimensions),
        ],
        vector_profile: Some(vector_profile()),
        semantic: Some(SemanticConfiguration {
            name: SEMANTIC_CONFIGURATION.to_string(),
            title_field: EXECUTIVE_SUMMARY.to_string(),
            content_fields: vec![CONTENIDO_COMPLETO.to_string()],
            keyword_fields: vec![ESTADO.to_string()],
        }),
    }
}

pub fn semistructured_index_definition(name: &str, dimensions: usize) -> IndexDefinition {
    use semistructured_fields::*;
    IndexDefinition {
        name: name.to_string(),
        fields: vec![
            IndexField::new(ID, FieldKind::String).key(),
            IndexField::new(TWIN_ID, FieldKind::String).filterable().facetable(),
            IndexField::new(DOCUMENT_TYPE, FieldKind::String).searchable().filterable().facetable(),
            IndexField::new(FILE_NAME, FieldKind::String).searchable().filterable().sortable(),
            IndexField::new(FILE_PATH, FieldKind::String),
            IndexField::new(REPORTE_TEXTO_PLANO, FieldKind::String).searchable(),
            IndexField::new(PROCESSED_AT, FieldKind::DateTimeOffset).filterable().sortable(),
            vector_field(VECTOR, dimensions),
        ],
        vector_profile: Some(vector_profile()),
        semantic: Some(SemanticConfiguration {
            name: SEMANTIC_CONFIGURATION.to_string(),
            title_field: FILE_NAME.to_string(),
            content_fields: vec![REPORTE_TEXTO_PLANO.to_string()],
            keyword_fields: vec![DOCUMENT_TYPE.to_string()],
        }),
    }
}
