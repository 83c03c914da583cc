//! services/twin_data/src/bin/bootstrap.rs
//!
//! Prepares the backing services: applies the document store migrations and
//! pushes both search index schemas. Safe to run on every deploy.

use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use twin_data_lib::{
    adapters::{db::PgDocumentStore, search_rest::RestSearchClient},
    app::openai_services,
    config::Config,
    error::TwinDataError,
    indexes::{DiaryAnalysisIndex, SemistructuredIndex},
};

#[tokio::main]
async fn main() -> Result<(), TwinDataError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Bootstrapping backing services...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    let documents = PgDocumentStore::new(db_pool);
    info!("Running database migrations...");
    documents.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Push the Search Index Schemas ---
    let (embeddings, _, _) = openai_services(&config.ai)?;
    let search = Arc::new(RestSearchClient::new(reqwest::Client::new(), config.search.clone()));

    DiaryAnalysisIndex::new(search.clone(), embeddings.clone(), &config.search.diary_index_name)
        .create_or_update_index()
        .await?;
    SemistructuredIndex::new(search, embeddings, &config.search.semistructured_index_name)
        .create_or_update_index()
        .await?;

    info!("Bootstrap complete.");
    Ok(())
}
