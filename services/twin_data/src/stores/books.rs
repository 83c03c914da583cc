//! services/twin_data/src/stores/books.rs
//!
//! The `books` collection. Every write publishes an indexing event; the
//! record write is the source of truth and a failed publish is only
//! logged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;
use twin_data_core::domain::{BookMain, IndexingEvent};
use twin_data_core::ports::{DocumentQuery, DocumentStore, EventPublisher, PortResult};

use super::collection::{Envelope, RecordCollection, WireRecord};

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct BookRecord {
    #[serde(flatten)]
    envelope: Envelope,
    title: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl WireRecord for BookRecord {
    type Domain = BookMain;

    const COLLECTION: &'static str = "books";
    const SCHEMA_VERSION: u32 = 1;

    fn from_domain(book: &BookMain) -> Self {
        Self {
            envelope: Envelope::new(&book.id, &book.twin_id, book.created_at, book.updated_at),
            title: book.title.clone(),
            author: book.author.clone(),
            content: book.content.clone(),
            metadata: book.metadata.clone(),
        }
    }

    fn into_domain(self) -> BookMain {
        BookMain {
            id: self.envelope.id,
            twin_id: self.envelope.twin_id,
            title: self.title,
            author: self.author,
            content: self.content,
            metadata: self.metadata,
            created_at: self.envelope.created_at,
            updated_at: self.envelope.updated_at,
        }
    }

    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }
}

/// Filters for listing a twin's books.
#[derive(Debug, Clone, Default)]
pub struct BookQuery {
    pub title_contains: Option<String>,
    pub offset: usize,
    pub limit: Option<usize>,
}

#[derive(Clone)]
pub struct BookStore {
    records: RecordCollection<BookRecord>,
    events: Option<Arc<dyn EventPublisher>>,
}

impl BookStore {
    /// Creates a new `BookStore`.
    pub fn new(store: Arc<dyn DocumentStore>, events: Arc<dyn EventPublisher>) -> Self {
        Self { records: RecordCollection::new(store), events: Some(events) }
    }

    /// Creates a `BookStore` that publishes nothing. Used by the indexer itself,
    /// so that it does not keep its own queue open.
    pub fn without_events(store: Arc<dyn DocumentStore>) -> Self {
        Self { records: RecordCollection::new(store), events: None }
    }

    pub async fn create_book(&self, book: &BookMain) -> PortResult<BookMain> {
        let created = self.records.create(book).await?;
        self.publish(IndexingEvent::BookCreated {
            twin_id: created.twin_id.clone(),
            book_id: created.id.clone(),
        })
        .await;
        Ok(created)
    }

    pub async fn get_book(&self, id: &str, twin_id: &str) -> PortResult<BookMain> {
        self.records.get(id, twin_id).await
    }

    /// Newest first.
    pub async fn list_books(&self, twin_id: &str, query: &BookQuery) -> PortResult<Vec<BookMain>> {
        let mut q = DocumentQuery::new().order_by("CreatedAt", true).page(query.offset, query.limit);
        if let Some(title) = query.title_contains.as_deref().filter(|t| !t.trim().is_empty()) {
            q = q.contains("Title", title);
        }
        self.records.list(twin_id, &q).await
    }

    pub async fn update_book(&self, book: &BookMain) -> PortResult<BookMain> {
        let updated = self.records.update(book).await?;
        self.publish(IndexingEvent::BookUpdated {
            twin_id: updated.twin_id.clone(),
            book_id: updated.id.clone(),
        })
        .await;
        Ok(updated)
    }

    pub async fn delete_book(&self, id: &str, twin_id: &str) -> PortResult<()> {
        self.records.delete(id, twin_id).await?;
        self.publish(IndexingEvent::BookDeleted { twin_id: twin_id.to_string(), book_id: id.to_string() })
            .await;
        Ok(())
    }

    async fn publish(&self, event: IndexingEvent) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(e) = events.publish(event.clone()).await {
            warn!(?event, error = %e, "Failed to publish indexing event; the book was saved but will not be indexed");
        }
    }
}
