mod common;

use common::harness;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use twin_data_core::domain::BookMain;
use twin_data_lib::indexes::{SemistructuredIndex, SemistructuredSearchQuery};
use twin_data_lib::outbox::{book_document_id, BOOK_DOCUMENT_TYPE};

fn books_of(twin: &str) -> SemistructuredSearchQuery {
    let mut query = SemistructuredSearchQuery::new(twin);
    query.document_type = Some(BOOK_DOCUMENT_TYPE.to_string());
    query
}

/// Polls the index until it holds `expected` books for the twin.
async fn wait_for_books(index: &SemistructuredIndex, twin: &str, expected: u64) -> bool {
    for _ in 0..200 {
        if index.search(&books_of(twin)).await.map(|r| r.total_count).unwrap_or(0) == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn created_books_become_searchable_and_deleted_books_disappear() {
    let h = harness().await;
    let cancel = CancellationToken::new();
    let worker = tokio::spawn(h.worker.run(cancel.clone()));

    let mut book = BookMain::new("t1", "El túnel", "Bastará decir que soy Juan Pablo Castel.");
    book.author = Some("Ernesto Sabato".into());
    let created = h.services.books.create_book(&book).await.unwrap();

    let index = &h.services.semistructured_index;
    assert!(wait_for_books(index, "t1", 1).await, "book was never indexed");

    let found = index.get_document(&book_document_id(&created.id), "t1").await.unwrap();
    assert_eq!(found.document_type, BOOK_DOCUMENT_TYPE);
    assert_eq!(found.file_name, "El túnel");
    assert!(found.reporte_texto_plano.starts_with("Título: El túnel\nAutor: Ernesto Sabato"));

    let mut by_text = books_of("t1");
    by_text.search_text = Some("Castel".into());
    assert_eq!(index.search(&by_text).await.unwrap().total_count, 1);
    assert_eq!(index.search(&books_of("t2")).await.unwrap().total_count, 0);

    h.services.books.delete_book(&created.id, "t1").await.unwrap();
    assert!(wait_for_books(index, "t1", 0).await, "deleted book is still searchable");

    cancel.cancel();
    let summary = worker.await.unwrap();
    assert_eq!(summary.handled, 2);
    assert_eq!(summary.dropped, 0);
}

#[tokio::test]
async fn a_book_deleted_before_indexing_is_skipped() {
    let h = harness().await;
    let created = h.services.books.create_book(&BookMain::new("t1", "Efímero", "")).await.unwrap();
    h.services.books.delete_book(&created.id, "t1").await.unwrap();

    // Both events are queued before the worker starts.
    let cancel = CancellationToken::new();
    let worker = tokio::spawn(h.worker.run(cancel.clone()));
    let index = &h.services.semistructured_index;
    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();

    let summary = worker.await.unwrap();
    assert_eq!(summary.handled, 2);
    assert_eq!(index.search(&books_of("t1")).await.unwrap().total_count, 0);
    assert_eq!(h.search.document_count(index.index_name()).await, 0);
}

#[tokio::test]
async fn the_worker_stops_once_every_publisher_is_gone() {
    let h = harness().await;
    h.services.books.create_book(&BookMain::new("t1", "Rayuela", "")).await.unwrap();

    let search = h.search.clone();
    let index_name = h.services.semistructured_index.index_name().to_string();
    drop(h.services);

    let summary = tokio::time::timeout(Duration::from_secs(5), h.worker.run(CancellationToken::new()))
        .await
        .expect("worker drains the queue and stops");
    assert_eq!(summary.handled, 1);
    assert_eq!(search.document_count(&index_name).await, 1);
}

#[tokio::test]
async fn updated_books_are_reindexed_with_their_new_fields() {
    let h = harness().await;
    let cancel = CancellationToken::new();
    let worker = tokio::spawn(h.worker.run(cancel.clone()));
    let index = &h.services.semistructured_index;

    let mut book = h.services.books.create_book(&BookMain::new("t1", "Borrador", "")).await.unwrap();
    assert!(wait_for_books(index, "t1", 1).await, "book was never indexed");

    book.title = "Pedro Páramo".into();
    h.services.books.update_book(&book).await.unwrap();

    let key = book_document_id(&book.id);
    let mut renamed = false;
    for _ in 0..200 {
        if index.get_document(&key, "t1").await.map(|d| d.file_name == "Pedro Páramo").unwrap_or(false) {
            renamed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(renamed, "index kept the old title");
    assert_eq!(index.search(&books_of("t1")).await.unwrap().total_count, 1);

    cancel.cancel();
    assert_eq!(worker.await.unwrap().handled, 2);
}
