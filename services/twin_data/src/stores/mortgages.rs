//! services/twin_data/src/stores/mortgages.rs
//!
//! Mortgage documents attached to a twin's homes. Each record keeps both the
//! parsed AI report and the raw model response it was parsed from.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use twin_data_core::domain::{MortgageDocument, MortgageDocumentView, MortgageReport};
use twin_data_core::ports::{BlobStorage, DocumentQuery, DocumentStore, PortResult};

use super::collection::{Envelope, RecordCollection, WireRecord};

/// How long a generated download URL stays valid.
pub const DOWNLOAD_URL_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct MortgageRecord {
    #[serde(flatten)]
    envelope: Envelope,
    home_id: String,
    file_name: String,
    #[serde(default)]
    container_name: String,
    #[serde(default)]
    file_path: String,
    #[serde(default)]
    report: MortgageReport,
    #[serde(default, rename = "RawAIJson")]
    raw_ai_json: String,
}

impl WireRecord for MortgageRecord {
    type Domain = MortgageDocument;

    const COLLECTION: &'static str = "mortgages";
    const SCHEMA_VERSION: u32 = 1;

    fn from_domain(doc: &MortgageDocument) -> Self {
        Self {
            envelope: Envelope::new(&doc.id, &doc.twin_id, doc.created_at, doc.updated_at),
            home_id: doc.home_id.clone(),
            file_name: doc.file_name.clone(),
            container_name: doc.container_name.clone(),
            file_path: doc.file_path.clone(),
            report: doc.report.clone(),
            raw_ai_json: doc.raw_ai_json.clone(),
        }
    }

    fn into_domain(self) -> MortgageDocument {
        MortgageDocument {
            id: self.envelope.id,
            twin_id: self.envelope.twin_id,
            home_id: self.home_id,
            file_name: self.file_name,
            container_name: self.container_name,
            file_path: self.file_path,
            report: self.report,
            raw_ai_json: self.raw_ai_json,
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

#[derive(Clone)]
pub struct MortgageStore {
    records: RecordCollection<MortgageRecord>,
    blobs: Option<Arc<dyn BlobStorage>>,
}

impl MortgageStore {
    /// Creates a new `MortgageStore`. Without blob storage, reads carry no download URL.
    pub fn new(store: Arc<dyn DocumentStore>, blobs: Option<Arc<dyn BlobStorage>>) -> Self {
        Self { records: RecordCollection::new(store), blobs }
    }

    pub async fn create_mortgage(&self, doc: &MortgageDocument) -> PortResult<MortgageDocument> {
        self.records.create(doc).await
    }

    pub async fn get_mortgage(&self, id: &str, twin_id: &str) -> PortResult<MortgageDocument> {
        self.records.get(id, twin_id).await
    }

    /// Reads a document and attaches a temporary download URL for its file.
    /// A URL failure leaves `download_url` empty; it never fails the read.
    pub async fn get_mortgage_with_download_url(&self, id: &str, twin_id: &str) -> PortResult<MortgageDocumentView> {
        let document = self.records.get(id, twin_id).await?;
        let download_url = self.download_url(&document).await;
        Ok(MortgageDocumentView { document, download_url })
    }

    pub async fn list_mortgages(&self, twin_id: &str, home_id: Option<&str>) -> PortResult<Vec<MortgageDocument>> {
        let mut query = DocumentQuery::new().order_by("CreatedAt", true);
        if let Some(home_id) = home_id {
            query = query.equals("HomeId", home_id);
        }
        self.records.list(twin_id, &query).await
    }

    pub async fn update_mortgage(&self, doc: &MortgageDocument) -> PortResult<MortgageDocument> {
        self.records.update(doc).await
    }

    pub async fn delete_mortgage(&self, id: &str, twin_id: &str) -> PortResult<()> {
        self.records.delete(id, twin_id).await
    }

    async fn download_url(&self, doc: &MortgageDocument) -> Option<String> {
        let blobs = self.blobs.as_ref()?;
        if doc.container_name.is_empty() || doc.file_path.is_empty() {
            return None;
        }
        match blobs.download_url(&doc.container_name, &doc.file_path, DOWNLOAD_URL_TTL).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(id = %doc.id, twin_id = %doc.twin_id, path = %doc.file_path, error = %e, "Could not generate download URL");
                None
            }
        }
    }
}
