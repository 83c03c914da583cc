//! services/twin_data/src/outbox.rs
//!
//! Record-created events and their consumer. Stores publish an `IndexingEvent`
//! after the primary write; the `IndexingWorker` applies it to the search
//! index in the background, retrying transient failures on its own schedule.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use twin_data_core::domain::{BookMain, IndexingEvent, SemistructuredDocument};
use twin_data_core::ports::{EventPublisher, PortError, PortResult};

use crate::indexes::{sanitize_key, SemistructuredIndex};
use crate::stores::BookStore;

/// Backoff stops doubling after this many attempts.
const MAX_BACKOFF_EXPONENT: u32 = 5;

pub const BOOK_DOCUMENT_TYPE: &str = "Book";

//=========================================================================================
// Publisher
//=========================================================================================

/// An `EventPublisher` backed by a bounded in-process channel.
#[derive(Clone)]
pub struct ChannelOutbox {
    sender: mpsc::Sender<IndexingEvent>,
}

impl ChannelOutbox {
    /// Creates the outbox and the receiving end to hand to an `IndexingWorker`.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<IndexingEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EventPublisher for ChannelOutbox {
    async fn publish(&self, event: IndexingEvent) -> PortResult<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| PortError::Permanent("the indexing worker has stopped".to_string()))
    }
}

//=========================================================================================
// Worker
//=========================================================================================

/// Applies one event. `Transient` errors are retried by the worker.
#[async_trait]
pub trait IndexingHandler: Send + Sync {
    async fn handle(&self, event: &IndexingEvent) -> PortResult<()>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub handled: usize,
    pub dropped: usize,
}

pub struct IndexingWorker {
    receiver: mpsc::Receiver<IndexingEvent>,
    handler: Arc<dyn IndexingHandler>,
    max_retries: u32,
    retry_base: Duration,
}

impl IndexingWorker {
    /// Creates a new `IndexingWorker`.
    pub fn new(
        receiver: mpsc::Receiver<IndexingEvent>,
        handler: Arc<dyn IndexingHandler>,
        max_retries: u32,
        retry_base: Duration,
    ) -> Self {
        Self { receiver, handler, max_retries, retry_base }
    }

    /// The delay before retry number `attempt` (starting at 0).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base.saturating_mul(2u32.pow(attempt.min(MAX_BACKOFF_EXPONENT)))
    }

    /// Consumes events until every publisher is dropped or `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) -> WorkerSummary {
        info!("Indexing worker started.");
        let mut summary = WorkerSummary::default();
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Indexing worker cancelled.");
                    break;
                }
                event = self.receiver.recv() => match event {
                    Some(event) => event,
                    None => {
                        info!("Indexing queue closed.");
                        break;
                    }
                },
            };

            if self.dispatch(&event, &cancel).await {
                summary.handled += 1;
            } else {
                summary.dropped += 1;
            }
        }
        info!(handled = summary.handled, dropped = summary.dropped, "Indexing worker stopped.");
        summary
    }

    async fn dispatch(&self, event: &IndexingEvent, cancel: &CancellationToken) -> bool {
        let mut attempt = 0;
        loop {
            match self.handler.handle(event).await {
                Ok(()) => {
                    debug!(?event, attempt, "Indexing event handled");
                    return true;
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.backoff(attempt);
                    warn!(?event, attempt, ?delay, error = %e, "Indexing failed; retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return false,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => {
                    error!(?event, attempt, error = %e, "Dropping indexing event");
                    return false;
                }
            }
        }
    }
}

//=========================================================================================
// Book Indexing
//=========================================================================================

/// The search key of a book in the semistructured index.
pub fn book_document_id(book_id: &str) -> String {
    format!("book_{}", sanitize_key(book_id))
}

/// The plain-text report a book is searched by.
pub fn book_report(book: &BookMain) -> String {
    let mut report = format!("Título: {}", book.title.trim());
    if let Some(author) = book.author.as_deref().filter(|a| !a.trim().is_empty()) {
        report.push_str(&format!("\nAutor: {}", author.trim()));
    }
    for (key, value) in &book.metadata {
        report.push_str(&format!("\n{}: {}", key, value));
    }
    if !book.content.trim().is_empty() {
        report.push_str("\n\n");
        report.push_str(book.content.trim());
    }
    report
}

/// Indexes books into the semistructured index as `DocumentType = "Book"`.
/// Created and updated books are both (re)written from the stored record.
pub struct BookIndexer {
    books: BookStore,
    index: SemistructuredIndex,
}

impl BookIndexer {
    /// Creates a new `BookIndexer`.
    pub fn new(books: BookStore, index: SemistructuredIndex) -> Self {
        Self { books, index }
    }
}

#[async_trait]
impl IndexingHandler for BookIndexer {
    async fn handle(&self, event: &IndexingEvent) -> PortResult<()> {
        match event {
            IndexingEvent::BookCreated { twin_id, book_id } | IndexingEvent::BookUpdated { twin_id, book_id } => {
                let book = match self.books.get_book(book_id, twin_id).await {
                    Ok(book) => book,
                    Err(e) if e.is_not_found() => {
                        debug!(book_id = %book_id, twin_id = %twin_id, "Book deleted before it was indexed");
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                };
                let document = SemistructuredDocument {
                    id: book_document_id(&book.id),
                    twin_id: book.twin_id.clone(),
                    document_type: BOOK_DOCUMENT_TYPE.to_string(),
                    file_name: book.title.clone(),
                    file_path: None,
                    reporte_texto_plano: book_report(&book),
                    processed_at: Utc::now(),
                };
                self.index.index_document(&document).await.map(|_| ())
            }
            IndexingEvent::BookDeleted { book_id, .. } => {
                match self.index.delete_document(&book_document_id(book_id)).await {
                    Err(e) if e.is_not_found() => Ok(()),
                    other => other,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails with the given error for the first `failures` calls.
    struct Flaky {
        failures: usize,
        error: PortError,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IndexingHandler for Flaky {
        async fn handle(&self, _event: &IndexingEvent) -> PortResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
    }

    fn event() -> IndexingEvent {
        IndexingEvent::BookCreated { twin_id: "t1".into(), book_id: "b1".into() }
    }

    fn worker(handler: Arc<Flaky>, max_retries: u32) -> (ChannelOutbox, IndexingWorker) {
        let (outbox, receiver) = ChannelOutbox::channel(8);
        (outbox, IndexingWorker::new(receiver, handler, max_retries, Duration::from_millis(1)))
    }

    #[test]
    fn backoff_doubles_and_then_levels_off() {
        let (_outbox, receiver) = ChannelOutbox::channel(1);
        let handler = Arc::new(Flaky { failures: 0, error: PortError::Transient(String::new()), calls: AtomicUsize::new(0) });
        let worker = IndexingWorker::new(receiver, handler, 3, Duration::from_millis(100));
        assert_eq!(worker.backoff(0), Duration::from_millis(100));
        assert_eq!(worker.backoff(3), Duration::from_millis(800));
        assert_eq!(worker.backoff(5), Duration::from_millis(3200));
        assert_eq!(worker.backoff(9), Duration::from_millis(3200));
    }

    #[test]
    fn a_huge_retry_base_saturates_instead_of_overflowing() {
        let (_outbox, receiver) = ChannelOutbox::channel(1);
        let handler = Arc::new(Flaky { failures: 0, error: PortError::Transient(String::new()), calls: AtomicUsize::new(0) });
        let worker = IndexingWorker::new(receiver, handler, 3, Duration::from_secs(u64::MAX));
        assert_eq!(worker.backoff(5), Duration::MAX);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_until_they_succeed() {
        let handler = Arc::new(Flaky { failures: 2, error: PortError::Transient("busy".into()), calls: AtomicUsize::new(0) });
        let (outbox, worker) = worker(handler.clone(), 3);

        outbox.publish(event()).await.unwrap();
        drop(outbox);
        let summary = worker.run(CancellationToken::new()).await;

        assert_eq!(summary, WorkerSummary { handled: 1, dropped: 0 });
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failures_are_dropped_without_retry() {
        let handler = Arc::new(Flaky { failures: 1, error: PortError::Permanent("bad".into()), calls: AtomicUsize::new(0) });
        let (outbox, worker) = worker(handler.clone(), 3);

        outbox.publish(event()).await.unwrap();
        outbox.publish(event()).await.unwrap();
        drop(outbox);
        let summary = worker.run(CancellationToken::new()).await;

        assert_eq!(summary, WorkerSummary { handled: 1, dropped: 1 });
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retries_stop_at_the_limit() {
        let handler = Arc::new(Flaky { failures: 10, error: PortError::Transient("busy".into()), calls: AtomicUsize::new(0) });
        let (outbox, worker) = worker(handler.clone(), 2);

        outbox.publish(event()).await.unwrap();
        drop(outbox);
        let summary = worker.run(CancellationToken::new()).await;

        assert_eq!(summary.dropped, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_the_worker() {
        let handler = Arc::new(Flaky { failures: 0, error: PortError::Transient(String::new()), calls: AtomicUsize::new(0) });
        let (_outbox, worker) = worker(handler, 0);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(worker.run(cancel).await, WorkerSummary::default());
    }

    #[tokio::test]
    async fn publishing_after_the_worker_stopped_is_an_error() {
        let (outbox, receiver) = ChannelOutbox::channel(1);
        drop(receiver);
        assert!(matches!(outbox.publish(event()).await, Err(PortError::Permanent(_))));
    }

    #[test]
    fn book_report_lists_title_author_and_content() {
        let mut book = BookMain::new("t1", "Dune", "  Arrakis.  ");
        book.author = Some("Frank Herbert".into());
        assert_eq!(book_report(&book), "Título: Dune\nAutor: Frank Herbert\n\nArrakis.");
        assert_eq!(book_document_id("a/b"), "book_a_b");
    }
}
