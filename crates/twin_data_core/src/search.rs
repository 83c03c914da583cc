//! crates/twin_data_core/src/search.rs
//!
//! Vendor-neutral vocabulary for talking to a search index: schema definitions,
//! index actions, structured filters and the shape of a query and its results.
//! Adapters translate these into their own wire format.

use serde_json::{Map, Value};

//=========================================================================================
// Index Schema
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String,
    Int32,
    Int64,
    Double,
    Boolean,
    DateTimeOffset,
    StringCollection,
    /// A dense vector searched through the named vector profile.
    Vector { dimensions: usize, profile: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexField {
    pub name: String,
    pub kind: FieldKind,
    pub key: bool,
    pub searchable: bool,
    pub filterable: bool,
    pub sortable: bool,
    pub facetable: bool,
}

impl IndexField {
    /// A retrievable field with every attribute switched off.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            key: false,
            searchable: false,
            filterable: false,
            sortable: false,
            facetable: false,
        }
    }

    pub fn key(mut self) -> Self {
        self.key = true;
        self.filterable = true;
        self
    }

    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    pub fn filterable(mut self) -> Self {
        self.filterable = true;
        self
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = true;
        self
    }

    pub fn facetable(mut self) -> Self {
        self.facetable = true;
        self
    }
}

/// An approximate nearest-neighbour profile bound to the vector fields.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorProfile {
    pub profile_name: String,
    pub algorithm_name: String,
}

/// The fields a secondary ranking model reads during semantic search.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticConfiguration {
    pub name: String,
    pub title_field: String,
    pub content_fields: Vec<String>,
    pub keyword_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexDefinition {
    pub name: String,
    pub fields: Vec<IndexField>,
    pub vector_profile: Option<VectorProfile>,
    pub semantic: Option<SemanticConfiguration>,
}

impl IndexDefinition {
    pub fn key_field(&self) -> Option<&IndexField> {
        self.fields.iter().find(|f| f.key)
    }

    pub fn searchable_fields(&self) -> impl Iterator<Item = &IndexField> {
        self.fields.iter().filter(|f| f.searchable)
    }
}

//=========================================================================================
// Writes
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexActionKind {
    Upload,
    MergeOrUpload,
    Delete,
}

/// One document write in an indexing batch.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexAction {
    pub kind: IndexActionKind,
    pub document: Map<String, Value>,
}

impl IndexAction {
    pub fn merge_or_upload(document: Map<String, Value>) -> Self {
        Self { kind: IndexActionKind::MergeOrUpload, document }
    }

    /// A delete only needs the key field.
    pub fn delete(key_field: &str, key: &str) -> Self {
        let mut document = Map::new();
        document.insert(key_field.to_string(), Value::String(key.to_string()));
        Self { kind: IndexActionKind::Delete, document }
    }
}

/// The per-document outcome of an indexing batch.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexingResult {
    pub key: String,
    pub succeeded: bool,
    pub status_code: u16,
    pub error_message: Option<String>,
}

//=========================================================================================
// Queries
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Bool(bool),
    Int(i64),
    /// An RFC 3339 timestamp.
    DateTime(String),
}

impl FilterValue {
    /// Orders a stored JSON value relative to this filter value. `None` when the types differ.
    pub fn compare(&self, stored: &Value) -> Option<std::cmp::Ordering> {
        match (self, stored) {
            (FilterValue::Text(v), Value::String(s)) => Some(s.as_str().cmp(v.as_str())),
            (FilterValue::DateTime(v), Value::String(s)) => Some(s.as_str().cmp(v.as_str())),
            (FilterValue::Bool(v), Value::Bool(b)) => Some(b.cmp(v)),
            (FilterValue::Int(v), Value::Number(n)) => n.as_i64().map(|n| n.cmp(v)),
            _ => None,
        }
    }
}

/// A single predicate. Clauses in a request are ANDed together.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterClause {
    Eq(String, FilterValue),
    Ge(String, FilterValue),
    Le(String, FilterValue),
}

impl FilterClause {
    pub fn eq_text(field: &str, value: impl Into<String>) -> Self {
        FilterClause::Eq(field.to_string(), FilterValue::Text(value.into()))
    }

    pub fn field(&self) -> &str {
        match self {
            FilterClause::Eq(f, _) | FilterClause::Ge(f, _) | FilterClause::Le(f, _) => f,
        }
    }

    /// Evaluates the predicate against a stored document.
    pub fn matches(&self, document: &Map<String, Value>) -> bool {
        use std::cmp::Ordering;
        let Some(stored) = document.get(self.field()) else {
            return false;
        };
        match self {
            FilterClause::Eq(_, v) => v.compare(stored) == Some(Ordering::Equal),
            FilterClause::Ge(_, v) => matches!(v.compare(stored), Some(Ordering::Greater | Ordering::Equal)),
            FilterClause::Le(_, v) => matches!(v.compare(stored), Some(Ordering::Less | Ordering::Equal)),
        }
    }
}

/// A k-nearest-neighbour query against a vector field.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    pub k: usize,
    pub field: String,
}

/// Semantic re-ranking options.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticOptions {
    pub configuration: String,
    pub captions: bool,
    pub answers: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRequest {
    /// Full-text query. `None` means "match everything" (or a pure vector query).
    pub search_text: Option<String>,
    pub filters: Vec<FilterClause>,
    pub semantic: Option<SemanticOptions>,
    pub vector: Option<VectorQuery>,
    pub order_by: Option<String>,
    pub skip: usize,
    pub top: usize,
    pub include_total_count: bool,
    pub select: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponseHit {
    pub score: f64,
    pub reranker_score: Option<f64>,
    pub captions: Vec<String>,
    pub document: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    pub total_count: Option<u64>,
    pub hits: Vec<SearchResponseHit>,
    pub answers: Vec<String>,
}
