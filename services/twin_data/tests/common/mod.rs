//! Shared fakes and builders for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use twin_data_core::ports::{BlobStorage, ChatCompletionService, EmbeddingService, PortError, PortResult};
use twin_data_lib::adapters::memory::{InMemoryBlobStorage, InMemoryDocumentStore, InMemorySearchIndex};
use twin_data_lib::app::{Collaborators, TwinDataServices};
use twin_data_lib::config::Config;
use twin_data_lib::outbox::IndexingWorker;

pub const DIMENSIONS: usize = 16;

/// A configuration with every required variable set and fast retries.
pub fn test_config() -> Config {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("DATABASE_URL", "postgres://localhost/twin_data_test"),
        ("SEARCH_ENDPOINT", "https://search.example.test/"),
        ("SEARCH_API_KEY", "test-key"),
        ("INDEXING_RETRY_BASE_MS", "1"),
        ("EMBEDDING_DIMENSIONS", "16"),
    ]);
    Config::from_lookup(|key| vars.get(key).map(|v| v.to_string())).expect("test config is valid")
}

/// A deterministic bag-of-words embedding: each word bumps one bucket.
#[derive(Default)]
pub struct KeywordEmbedding {
    pub calls: AtomicUsize,
}

fn bucket(word: &str) -> usize {
    word.bytes().fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619)) as usize % DIMENSIONS
}

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; DIMENSIONS];
    for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        vector[bucket(&word.to_lowercase())] += 1.0;
    }
    vector
}

#[async_trait]
impl EmbeddingService for KeywordEmbedding {
    async fn embed(&self, text: &str) -> PortResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(keyword_vector(text))
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }
}

/// An embedding service that is always down.
pub struct FailingEmbedding;

#[async_trait]
impl EmbeddingService for FailingEmbedding {
    async fn embed(&self, _text: &str) -> PortResult<Vec<f32>> {
        Err(PortError::Transient("embedding deployment unavailable".to_string()))
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }
}

/// Replies with queued answers in order, then with the last one.
pub struct ScriptedChat {
    replies: Mutex<Vec<String>>,
    pub prompts: Mutex<Vec<String>>,
    pub image_urls: Mutex<Vec<String>>,
}

impl ScriptedChat {
    pub fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
            image_urls: Mutex::new(Vec::new()),
        })
    }

    async fn next(&self, prompt: &str) -> PortResult<String> {
        self.prompts.lock().await.push(prompt.to_string());
        let mut replies = self.replies.lock().await;
        if replies.len() > 1 {
            Ok(replies.pop().unwrap_or_default())
        } else {
            replies.last().cloned().ok_or_else(|| PortError::Permanent("no scripted reply".to_string()))
        }
    }
}

#[async_trait]
impl ChatCompletionService for ScriptedChat {
    async fn complete(&self, _system: &str, user: &str) -> PortResult<String> {
        self.next(user).await
    }

    async fn complete_with_image(&self, _system: &str, prompt: &str, image_url: &str) -> PortResult<String> {
        self.image_urls.lock().await.push(image_url.to_string());
        self.next(prompt).await
    }
}

/// Blob storage that records how many uploads are running at once.
/// Paths containing "fail" are rejected.
pub struct TrackingBlobStorage {
    inner: InMemoryBlobStorage,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    delay: Duration,
}

impl TrackingBlobStorage {
    pub fn new(delay: Duration) -> Self {
        Self { inner: InMemoryBlobStorage::new(), in_flight: AtomicUsize::new(0), max_in_flight: AtomicUsize::new(0), delay }
    }
}

#[async_trait]
impl BlobStorage for TrackingBlobStorage {
    async fn upload(&self, container: &str, path: &str, data: Bytes, content_type: &str) -> PortResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let result = if path.contains("fail") {
            Err(PortError::Transient(format!("upload of {} timed out", path)))
        } else {
            self.inner.upload(container, path, data, content_type).await
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn download_url(&self, container: &str, path: &str, ttl: Duration) -> PortResult<String> {
        self.inner.download_url(container, path, ttl).await
    }
}

/// Everything wired over in-memory collaborators.
pub struct Harness {
    pub services: TwinDataServices,
    pub worker: IndexingWorker,
    pub documents: Arc<InMemoryDocumentStore>,
    pub search: Arc<InMemorySearchIndex>,
    pub blobs: Arc<InMemoryBlobStorage>,
    pub embeddings: Arc<KeywordEmbedding>,
}

pub async fn harness() -> Harness {
    let documents = Arc::new(InMemoryDocumentStore::new());
    let search = Arc::new(InMemorySearchIndex::new());
    let blobs = Arc::new(InMemoryBlobStorage::new());
    let embeddings = Arc::new(KeywordEmbedding::default());
    let chat = ScriptedChat::new(&["{}"]);

    let collaborators = Collaborators {
        documents: documents.clone(),
        search: search.clone(),
        embeddings: embeddings.clone(),
        chat: chat.clone(),
        vision: chat,
        blobs: blobs.clone(),
    };
    let (services, worker) = TwinDataServices::build(&test_config(), collaborators);
    services.ensure_indexes().await.expect("in-memory indexes are created");
    Harness { services, worker, documents, search, blobs, embeddings }
}
