//! crates/twin_data_core/src/ports.rs
//!
//! Defines the service contracts (traits) for every external collaborator.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! record stores and index managers to stay independent of the concrete
//! document database, search service, model provider or blob storage.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::time::Duration;

use crate::domain::IndexingEvent;
use crate::search::{IndexAction, IndexDefinition, IndexingResult, SearchRequest, SearchResponse};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// The variant tells the caller whether retrying could help.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Transient failure: {0}")]
    Transient(String),
    #[error("Permanent failure: {0}")]
    Permanent(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl PortError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, PortError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, PortError::NotFound(_))
    }
}

impl From<serde_json::Error> for PortError {
    fn from(e: serde_json::Error) -> Self {
        PortError::Permanent(format!("serialization error: {}", e))
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Rejects blank identifiers before any external call is made.
pub fn require(field: &str, value: &str) -> PortResult<()> {
    if value.trim().is_empty() {
        return Err(PortError::InvalidInput(format!("{} is required", field)));
    }
    Ok(())
}

//=========================================================================================
// Document Store
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum QueryFilter {
    /// Exact match on the string form of a top-level field.
    Equals { field: String, value: String },
    /// Case-insensitive substring match on a top-level string field.
    Contains { field: String, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

/// A query scoped to one partition of a collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentQuery {
    pub filters: Vec<QueryFilter>,
    pub order_by: Option<OrderBy>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl DocumentQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, field: &str, value: impl Into<String>) -> Self {
        self.filters.push(QueryFilter::Equals { field: field.to_string(), value: value.into() });
        self
    }

    pub fn contains(mut self, field: &str, value: impl Into<String>) -> Self {
        self.filters.push(QueryFilter::Contains { field: field.to_string(), value: value.into() });
        self
    }

    pub fn order_by(mut self, field: &str, descending: bool) -> Self {
        self.order_by = Some(OrderBy { field: field.to_string(), descending });
        self
    }

    pub fn page(mut self, offset: usize, limit: Option<usize>) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }
}

/// A partitioned JSON document collection. Every call names the partition.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Writes a new document. Fails if `(collection, partition, id)` already exists.
    async fn create(&self, collection: &str, partition: &str, id: &str, body: Value) -> PortResult<()>;

    async fn read(&self, collection: &str, partition: &str, id: &str) -> PortResult<Value>;

    async fn upsert(&self, collection: &str, partition: &str, id: &str, body: Value) -> PortResult<()>;

    async fn delete(&self, collection: &str, partition: &str, id: &str) -> PortResult<()>;

    async fn query(&self, collection: &str, partition: &str, query: &DocumentQuery) -> PortResult<Vec<Value>>;
}

//=========================================================================================
// Search Index
//=========================================================================================

#[async_trait]
pub trait SearchIndexClient: Send + Sync {
    /// Pushes an index schema. Safe to call repeatedly.
    async fn create_or_update_index(&self, definition: &IndexDefinition) -> PortResult<()>;

    /// Applies a batch of writes and reports the outcome of each one.
    async fn index_documents(&self, index: &str, actions: Vec<IndexAction>) -> PortResult<Vec<IndexingResult>>;

    async fn search(&self, index: &str, request: &SearchRequest) -> PortResult<SearchResponse>;

    /// Point lookup by key field value.
    async fn get_document(&self, index: &str, key: &str) -> PortResult<serde_json::Map<String, Value>>;
}

//=========================================================================================
// Model Services
//=========================================================================================

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Generates a dense embedding for the given text.
    async fn embed(&self, text: &str) -> PortResult<Vec<f32>>;

    fn dimensions(&self) -> usize;
}

#[async_trait]
pub trait ChatCompletionService: Send + Sync {
    /// Sends a system and a user message and returns the assistant's text.
    async fn complete(&self, system: &str, user: &str) -> PortResult<String>;

    /// Same as `complete`, with an image (http(s) or data URL) attached to the user message.
    async fn complete_with_image(&self, system: &str, prompt: &str, image_url: &str) -> PortResult<String>;
}

//=========================================================================================
// Blob Storage
//=========================================================================================

#[async_trait]
pub trait BlobStorage: Send + Sync {
    async fn upload(&self, container: &str, path: &str, data: Bytes, content_type: &str) -> PortResult<()>;

    /// A temporary, shareable download URL for an existing blob.
    async fn download_url(&self, container: &str, path: &str, ttl: Duration) -> PortResult<String>;
}

//=========================================================================================
// Outbox
//=========================================================================================

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: IndexingEvent) -> PortResult<()>;
}
