//! services/twin_data/src/app.rs
//!
//! The composition root. Wires the stores, index managers and model helpers
//! to a set of collaborators, and hands back the outbox worker for the caller
//! to spawn.

use std::sync::Arc;
use tracing::info;
use twin_data_core::ports::{
    BlobStorage, ChatCompletionService, DocumentStore, EmbeddingService, PortResult, SearchIndexClient,
};

use crate::adapters::openai::{build_client, OpenAiChatAdapter, OpenAiEmbeddingAdapter};
use crate::config::{AiConfig, Config};
use crate::indexes::{DiaryAnalysisIndex, SemistructuredIndex};
use crate::llm::{ChapterContentExtractor, ImageAnalyzer};
use crate::outbox::{BookIndexer, ChannelOutbox, IndexingWorker};
use crate::stores::{BookStore, CourseStore, JobOpportunityStore, MortgageStore};
use crate::upload::BatchUploader;

/// Events waiting for the indexing worker before publishers are slowed down.
pub const OUTBOX_CAPACITY: usize = 256;

/// The external services everything else is built on.
#[derive(Clone)]
pub struct Collaborators {
    pub documents: Arc<dyn DocumentStore>,
    pub search: Arc<dyn SearchIndexClient>,
    pub embeddings: Arc<dyn EmbeddingService>,
    pub chat: Arc<dyn ChatCompletionService>,
    pub vision: Arc<dyn ChatCompletionService>,
    pub blobs: Arc<dyn BlobStorage>,
}

/// The model adapters for the configured provider: embeddings, chat and vision.
pub fn openai_services(
    config: &AiConfig,
) -> PortResult<(Arc<OpenAiEmbeddingAdapter>, Arc<OpenAiChatAdapter>, Arc<OpenAiChatAdapter>)> {
    let client = build_client(config)?;
    let embeddings =
        OpenAiEmbeddingAdapter::new(client.clone(), config.embedding_model.clone(), config.embedding_dimensions);
    let chat = OpenAiChatAdapter::new(client.clone(), config.chat_model.clone());
    let vision = OpenAiChatAdapter::new(client, config.vision_model.clone());
    Ok((Arc::new(embeddings), Arc::new(chat), Arc::new(vision)))
}

#[derive(Clone)]
pub struct TwinDataServices {
    pub books: BookStore,
    pub courses: CourseStore,
    pub mortgages: MortgageStore,
    pub jobs: JobOpportunityStore,
    pub diary_index: DiaryAnalysisIndex,
    pub semistructured_index: SemistructuredIndex,
    pub uploader: BatchUploader,
    pub chapters: ChapterContentExtractor,
    pub images: ImageAnalyzer,
}

impl TwinDataServices {
    /// Builds every service. The returned worker indexes books as they are
    /// written; spawn it with `IndexingWorker::run`.
    pub fn build(config: &Config, collaborators: Collaborators) -> (Self, IndexingWorker) {
        let Collaborators { documents, search, embeddings, chat, vision, blobs } = collaborators;
        let (outbox, receiver) = ChannelOutbox::channel(OUTBOX_CAPACITY);

        let books = BookStore::new(documents.clone(), Arc::new(outbox));
        let diary_index = DiaryAnalysisIndex::new(search.clone(), embeddings.clone(), &config.search.diary_index_name);
        let semistructured_index =
            SemistructuredIndex::new(search, embeddings, &config.search.semistructured_index_name);

        let worker = IndexingWorker::new(
            receiver,
            Arc::new(BookIndexer::new(BookStore::without_events(documents.clone()), semistructured_index.clone())),
            config.worker.indexing_max_retries,
            config.worker.indexing_retry_base,
        );

        let http = reqwest::Client::new();
        let services = Self {
            books,
            courses: CourseStore::new(documents.clone()),
            mortgages: MortgageStore::new(documents.clone(), Some(blobs.clone())),
            jobs: JobOpportunityStore::new(documents),
            diary_index,
            semistructured_index,
            uploader: BatchUploader::new(blobs.clone(), config.worker.upload_concurrency),
            chapters: ChapterContentExtractor::new(chat),
            images: ImageAnalyzer::new(vision, blobs, http, config.worker.image_download_timeout),
        };
        (services, worker)
    }

    /// Pushes both index schemas. Safe to call on every start.
    pub async fn ensure_indexes(&self) -> PortResult<()> {
        futures::try_join!(
            self.diary_index.create_or_update_index(),
            self.semistructured_index.create_or_update_index()
        )?;
        info!(
            diary = %self.diary_index.index_name(),
            semistructured = %self.semistructured_index.index_name(),
            "Search indexes are ready"
        );
        Ok(())
    }
}
