pub mod db;
pub mod memory;
pub mod openai;
pub mod search_rest;

pub use db::PgDocumentStore;
pub use memory::{InMemoryBlobStorage, InMemoryDocumentStore, InMemorySearchIndex};
pub use openai::{OpenAiChatAdapter, OpenAiEmbeddingAdapter};
pub use search_rest::RestSearchClient;
