pub mod adapters;
pub mod app;
pub mod config;
pub mod error;
pub mod indexes;
pub mod llm;
pub mod outbox;
pub mod stores;
pub mod upload;
