//! services/twin_data/src/stores/jobs.rs
//!
//! Job opportunities a twin is tracking. Status changes are recorded by
//! appending a timestamped line to the free-text `Notas` field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use twin_data_core::domain::{JobOpportunity, JobStatus};
use twin_data_core::ports::{require, DocumentQuery, DocumentStore, PortResult};

use super::collection::{now, Envelope, RecordCollection, WireRecord};

/// Past this size the notes history is still written, with a warning.
pub const NOTES_WARN_BYTES: usize = 16 * 1024;

mod estado {
    use serde::{Deserialize, Deserializer, Serializer};
    use twin_data_core::domain::JobStatus;

    pub fn serialize<S: Serializer>(value: &JobStatus, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<JobStatus, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct JobOpportunityRecord {
    #[serde(flatten)]
    envelope: Envelope,
    puesto: String,
    empresa: String,
    #[serde(with = "estado")]
    estado: JobStatus,
    #[serde(default)]
    ubicacion: Option<String>,
    #[serde(default)]
    salario: Option<String>,
    #[serde(default, rename = "URLOferta")]
    url_oferta: Option<String>,
    #[serde(default)]
    descripcion: Option<String>,
    #[serde(default)]
    fecha_aplicacion: Option<DateTime<Utc>>,
    #[serde(default)]
    fecha_entrevista: Option<DateTime<Utc>>,
    #[serde(default)]
    notas: String,
}

impl WireRecord for JobOpportunityRecord {
    type Domain = JobOpportunity;

    const COLLECTION: &'static str = "job_opportunities";
    const SCHEMA_VERSION: u32 = 1;

    fn from_domain(job: &JobOpportunity) -> Self {
        Self {
            envelope: Envelope::new(&job.id, &job.twin_id, job.created_at, job.updated_at),
            puesto: job.puesto.clone(),
            empresa: job.empresa.clone(),
            estado: job.estado,
            ubicacion: job.ubicacion.clone(),
            salario: job.salario.clone(),
            url_oferta: job.url_oferta.clone(),
            descripcion: job.descripcion.clone(),
            fecha_aplicacion: job.fecha_aplicacion,
            fecha_entrevista: job.fecha_entrevista,
            notas: job.notas.clone(),
        }
    }

    fn into_domain(self) -> JobOpportunity {
        JobOpportunity {
            id: self.envelope.id,
            twin_id: self.envelope.twin_id,
            puesto: self.puesto,
            empresa: self.empresa,
            estado: self.estado,
            ubicacion: self.ubicacion,
            salario: self.salario,
            url_oferta: self.url_oferta,
            descripcion: self.descripcion,
            fecha_aplicacion: self.fecha_aplicacion,
            fecha_entrevista: self.fecha_entrevista,
            notas: self.notas,
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

/// Optional filters for listing a twin's job opportunities.
#[derive(Debug, Clone, Default)]
pub struct JobQuery {
    pub estado: Option<JobStatus>,
    /// Case-insensitive substring of the company name.
    pub empresa: Option<String>,
    /// Case-insensitive substring of the position title.
    pub puesto: Option<String>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl JobQuery {
    fn to_document_query(&self) -> DocumentQuery {
        let mut query = DocumentQuery::new().order_by("CreatedAt", true).page(self.offset, self.limit);
        if let Some(estado) = self.estado {
            query = query.equals("Estado", estado.as_str());
        }
        if let Some(empresa) = self.empresa.as_deref().filter(|v| !v.trim().is_empty()) {
            query = query.contains("Empresa", empresa);
        }
        if let Some(puesto) = self.puesto.as_deref().filter(|v| !v.trim().is_empty()) {
            query = query.contains("Puesto", puesto);
        }
        query
    }
}

/// Formats one line of the status history.
pub fn status_note(at: DateTime<Utc>, estado: JobStatus, note: Option<&str>) -> String {
    let stamp = at.format("%Y-%m-%d %H:%M UTC");
    match note.map(str::trim).filter(|n| !n.is_empty()) {
        Some(note) => format!("[{}] Estado: {} - {}", stamp, estado, note),
        None => format!("[{}] Estado: {}", stamp, estado),
    }
}

#[derive(Clone)]
pub struct JobOpportunityStore {
    records: RecordCollection<JobOpportunityRecord>,
}

impl JobOpportunityStore {
    /// Creates a new `JobOpportunityStore`.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { records: RecordCollection::new(store) }
    }

    pub async fn create_job_opportunity(&self, job: &JobOpportunity) -> PortResult<JobOpportunity> {
        require("Puesto", &job.puesto)?;
        require("Empresa", &job.empresa)?;
        self.records.create(job).await
    }

    pub async fn get_job_opportunity(&self, id: &str, twin_id: &str) -> PortResult<JobOpportunity> {
        self.records.get(id, twin_id).await
    }

    pub async fn get_job_opportunities_by_twin_id(
        &self,
        twin_id: &str,
        query: &JobQuery,
    ) -> PortResult<Vec<JobOpportunity>> {
        self.records.list(twin_id, &query.to_document_query()).await
    }

    pub async fn update_job_opportunity(&self, job: &JobOpportunity) -> PortResult<JobOpportunity> {
        self.records.update(job).await
    }

    /// Moves an opportunity to `estado` and appends a timestamped line to its notes.
    pub async fn update_status(
        &self,
        id: &str,
        twin_id: &str,
        estado: JobStatus,
        note: Option<&str>,
    ) -> PortResult<JobOpportunity> {
        let mut job = self.records.get(id, twin_id).await?;
        let previous = job.estado;

        let line = status_note(now(), estado, note);
        if !job.notas.is_empty() {
            job.notas.push('\n');
        }
        job.notas.push_str(&line);
        job.estado = estado;

        if job.notas.len() > NOTES_WARN_BYTES {
            warn!(id = %id, twin_id = %twin_id, bytes = job.notas.len(), "Job opportunity notes keep growing");
        }

        let updated = self.records.update(&job).await?;
        info!(id = %id, twin_id = %twin_id, from = %previous, to = %estado, "Job opportunity status changed");
        Ok(updated)
    }

    pub async fn delete_job_opportunity(&self, id: &str, twin_id: &str) -> PortResult<()> {
        self.records.delete(id, twin_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryDocumentStore;
    use twin_data_core::ports::PortError;

    fn store() -> (Arc<InMemoryDocumentStore>, JobOpportunityStore) {
        let docs = Arc::new(InMemoryDocumentStore::new());
        (docs.clone(), JobOpportunityStore::new(docs))
    }

    #[test]
    fn status_note_format() {
        let at = DateTime::parse_from_rfc3339("2024-03-05T09:07:59Z").unwrap().with_timezone(&Utc);
        assert_eq!(
            status_note(at, JobStatus::Entrevista, Some("  phone screen ")),
            "[2024-03-05 09:07 UTC] Estado: Entrevista - phone screen"
        );
        assert_eq!(status_note(at, JobStatus::Rechazado, Some("")), "[2024-03-05 09:07 UTC] Estado: Rechazado");
    }

    #[tokio::test]
    async fn status_updates_append_to_existing_notes() {
        let (_, jobs) = store();
        let mut job = JobOpportunity::new("t1", "Engineer", "Acme");
        job.notas = "Referred by Ana".into();
        let created = jobs.create_job_opportunity(&job).await.unwrap();

        jobs.update_status(&created.id, "t1", JobStatus::Entrevista, Some("first round")).await.unwrap();
        let updated = jobs.update_status(&created.id, "t1", JobStatus::Esperando, None).await.unwrap();

        let lines: Vec<_> = updated.notas.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Referred by Ana");
        assert!(lines[1].ends_with("Estado: Entrevista - first round"));
        assert!(lines[2].ends_with("Estado: Esperando"));
        assert_eq!(updated.estado, JobStatus::Esperando);
    }

    #[tokio::test]
    async fn status_update_of_missing_job_is_not_found() {
        let (_, jobs) = store();
        let err = jobs.update_status("nope", "t1", JobStatus::Aceptado, None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn position_and_company_are_required() {
        let (_, jobs) = store();
        let err = jobs.create_job_opportunity(&JobOpportunity::new("t1", "", "Acme")).await.unwrap_err();
        assert!(matches!(err, PortError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn query_combines_status_and_company_filters() {
        let (_, jobs) = store();
        let a = jobs.create_job_opportunity(&JobOpportunity::new("t1", "Engineer", "Acme Corp")).await.unwrap();
        jobs.create_job_opportunity(&JobOpportunity::new("t1", "Designer", "Globex")).await.unwrap();
        let b = jobs.create_job_opportunity(&JobOpportunity::new("t1", "Manager", "ACME Labs")).await.unwrap();
        jobs.update_status(&b.id, "t1", JobStatus::Entrevista, None).await.unwrap();

        let query = JobQuery { empresa: Some("acme".into()), ..Default::default() };
        assert_eq!(jobs.get_job_opportunities_by_twin_id("t1", &query).await.unwrap().len(), 2);

        let query = JobQuery { empresa: Some("acme".into()), estado: Some(JobStatus::Aplicado), ..Default::default() };
        let listed = jobs.get_job_opportunities_by_twin_id("t1", &query).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, a.id);
    }

    #[tokio::test]
    async fn unknown_stored_status_is_skipped_when_listing() {
        let (docs, jobs) = store();
        jobs.create_job_opportunity(&JobOpportunity::new("t1", "Engineer", "Acme")).await.unwrap();
        docs.create(
            "job_opportunities",
            "t1",
            "legacy",
            serde_json::json!({
                "id": "legacy", "TwinID": "t1", "SchemaVersion": 1,
                "CreatedAt": "2023-01-01T00:00:00.000Z", "UpdatedAt": "2023-01-01T00:00:00.000Z",
                "Puesto": "Old", "Empresa": "Initech", "Estado": "Contratado"
            }),
        )
        .await
        .unwrap();

        let listed = jobs.get_job_opportunities_by_twin_id("t1", &JobQuery::default()).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(matches!(jobs.get_job_opportunity("legacy", "t1").await, Err(PortError::Permanent(_))));
    }
}
